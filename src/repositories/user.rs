use std::collections::HashMap;

use async_trait::async_trait;
use deadpool_postgres::Pool;
use tokio::sync::RwLock;
use tokio_postgres::{error::SqlState, Row};

use crate::{
    error::{AppError, Result},
    models::user::UserCredential,
};

/// Credential lookup used by login. Game-side user data is not kept here.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Registers a login key. Fails if the key is already registered.
    async fn create(&self, login_key: &str, password_hash: &str) -> Result<UserCredential>;

    /// Finds the account that owns `login_key`.
    async fn find_by_key(&self, login_key: &str) -> Result<Option<UserCredential>>;
}

/// In-process user store.
#[derive(Default)]
pub struct MemoryUserStore {
    inner: RwLock<MemoryUsers>,
}

#[derive(Default)]
struct MemoryUsers {
    next_id: i64,
    by_key: HashMap<String, UserCredential>,
}

impl MemoryUserStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, login_key: &str, password_hash: &str) -> Result<UserCredential> {
        let mut users = self.inner.write().await;
        if users.by_key.contains_key(login_key) {
            return Err(AppError::Validation("Login key already registered".to_string()));
        }
        users.next_id += 1;
        let user = UserCredential {
            id: users.next_id,
            login_key: login_key.to_string(),
            password_hash: password_hash.to_string(),
        };
        users.by_key.insert(login_key.to_string(), user.clone());
        Ok(user)
    }

    async fn find_by_key(&self, login_key: &str) -> Result<Option<UserCredential>> {
        Ok(self.inner.read().await.by_key.get(login_key).cloned())
    }
}

/// PostgreSQL user store over the `users` table.
#[derive(Clone)]
pub struct PgUserStore {
    pool: Pool,
}

impl PgUserStore {
    /// Creates a store over an existing pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

/// A helper function to map a `tokio_postgres::Row` to a `UserCredential`.
fn row_to_user(row: &Row) -> Result<UserCredential> {
    Ok(UserCredential {
        id: row.try_get("id").map_err(|_| AppError::Internal("Missing column id".to_string()))?,
        login_key: row.try_get("login_key").map_err(|_| AppError::Internal("Missing column login_key".to_string()))?,
        password_hash: row.try_get("password_hash").map_err(|_| AppError::Internal("Missing column password_hash".to_string()))?,
    })
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create(&self, login_key: &str, password_hash: &str) -> Result<UserCredential> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                r#"
                INSERT INTO users (login_key, password_hash)
                VALUES ($1, $2)
                RETURNING id, login_key, password_hash
                "#,
                &[&login_key, &password_hash],
            )
            .await
            .map_err(|e| {
                if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                    AppError::Validation("Login key already registered".to_string())
                } else {
                    AppError::Database(e)
                }
            })?;
        row_to_user(&row)
    }

    async fn find_by_key(&self, login_key: &str) -> Result<Option<UserCredential>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                SELECT id, login_key, password_hash
                FROM users
                WHERE login_key = $1
                "#,
                &[&login_key],
            )
            .await?;
        row.map(|r| row_to_user(&r)).transpose()
    }
}
