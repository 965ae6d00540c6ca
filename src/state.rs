use std::sync::Arc;
use zeroize::Zeroizing;
use crate::config::Config;
use crate::crypto::asymmetric::{AsymmetricCipher, ServerKey};
use crate::crypto::token::TokenCodec;
use crate::crypto::xmc;
use crate::error::Result;
use crate::repositories::session::{MemorySessionStore, PgSessionStore, SessionStore};
use crate::repositories::user::{MemoryUserStore, PgUserStore, UserStore};

/// The application's state.
///
/// Everything in here is immutable after startup; the stores handle their
/// own synchronisation.
#[derive(Clone)]
pub struct AppState {
    /// The application's configuration.
    pub config: Arc<Config>,
    /// The server's private key.
    pub server_key: Arc<dyn AsymmetricCipher>,
    /// The session token envelope codec.
    pub tokens: Arc<TokenCodec>,
    /// The session store.
    pub sessions: Arc<dyn SessionStore>,
    /// The credential store.
    pub users: Arc<dyn UserStore>,
    /// The CROSS-mode XMC key, derived once from the fixed secrets.
    pub cross_key: Arc<Zeroizing<[u8; 32]>>,
}

impl AppState {
    /// Creates a new `AppState`.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `AppState`.
    pub async fn new(config: &Config) -> Result<Self> {
        let server_key = ServerKey::load(&config.server_private_key)?;
        tracing::info!("✅ Server private key loaded from {}", config.server_private_key.display());

        let (sessions, users): (Arc<dyn SessionStore>, Arc<dyn UserStore>) = match &config.database_url {
            Some(url) => {
                let pool = crate::db::create_pool(url)?;
                crate::db::init_schema(&pool).await?;
                tracing::info!("✅ PostgreSQL pool initialized with deadpool-postgres");
                (
                    Arc::new(PgSessionStore::new(pool.clone())),
                    Arc::new(PgUserStore::new(pool)),
                )
            }
            None => {
                tracing::warn!("⚠️  DATABASE_URL not set, sessions and users are kept in memory");
                (
                    Arc::new(MemorySessionStore::new()),
                    Arc::new(MemoryUserStore::new()),
                )
            }
        };

        Ok(Self::from_parts(config.clone(), Arc::new(server_key), sessions, users))
    }

    /// Assembles a state from already-built parts.
    pub fn from_parts(
        config: Config,
        server_key: Arc<dyn AsymmetricCipher>,
        sessions: Arc<dyn SessionStore>,
        users: Arc<dyn UserStore>,
    ) -> Self {
        let tokens = Arc::new(TokenCodec::new(&config.secret_key));
        let cross_key = Arc::new(Zeroizing::new(xmc::cross_key(
            &config.base_xorpad,
            &config.application_key,
        )));
        Self {
            config: Arc::new(config),
            server_key,
            tokens,
            sessions,
            users,
            cross_key,
        }
    }
}
