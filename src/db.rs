use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;
use crate::error::{AppError, Result};
use std::time::Duration;

/// Creates a new database connection pool.
///
/// # Arguments
///
/// * `database_url` - The URL of the PostgreSQL database.
///
/// # Returns
///
/// A `Result` containing the `Pool`.
pub fn create_pool(database_url: &str) -> Result<Pool> {
    let mut cfg = Config::new();
    let pg_config: tokio_postgres::Config = database_url.parse()?;

    if let Some(host) = pg_config.get_hosts().first() {
        if let tokio_postgres::config::Host::Tcp(hostname) = host {
            cfg.host = Some(hostname.to_string());
        }
    }

    if let Some(port) = pg_config.get_ports().first() {
        cfg.port = Some(*port);
    }

    if let Some(dbname) = pg_config.get_dbname() {
        cfg.dbname = Some(dbname.to_string());
    }

    if let Some(user) = pg_config.get_user() {
        cfg.user = Some(user.to_string());
    }

    if let Some(password) = pg_config.get_password() {
        cfg.password = Some(String::from_utf8_lossy(password).to_string());
    }

    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });

    let mut pool_config = PoolConfig::new(32);
    pool_config.timeouts = deadpool_postgres::Timeouts {
        wait: Some(Duration::from_secs(5)),
        create: Some(Duration::from_secs(2)),
        recycle: Some(Duration::from_secs(1)),
    };
    cfg.pool = Some(pool_config);

    cfg.create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(|e| AppError::Internal(format!("Failed to create pool: {}", e)))
}

/// Creates the tables the session and user stores rely on.
pub async fn init_schema(pool: &Pool) -> Result<()> {
    let client = pool.get().await?;
    client
        .batch_execute(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                token TEXT PRIMARY KEY,
                user_id BIGINT,
                client_key BYTEA NOT NULL CHECK (octet_length(client_key) = 32),
                server_key BYTEA NOT NULL CHECK (octet_length(server_key) = 32),
                last_accessed BIGINT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS sessions_last_accessed_idx ON sessions (last_accessed);
            CREATE TABLE IF NOT EXISTS users (
                id BIGSERIAL PRIMARY KEY,
                login_key TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL
            );
            "#,
        )
        .await?;
    tracing::info!("✅ Session and user tables ready");
    Ok(())
}
