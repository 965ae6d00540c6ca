use std::collections::BTreeMap;

use async_trait::async_trait;
use deadpool_postgres::Pool;
use tokio::sync::RwLock;
use tokio_postgres::Row;

use crate::{
    error::{AppError, Result},
    models::session::{FIRST_STAGE_MAX_DURATION, SessionRecord, SweepStats},
};

/// Durable mapping from token to [`SessionRecord`].
///
/// Implementations must keep `client_key`/`server_key` write-once and must
/// tolerate concurrent `touch` calls on the same token.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Stores a new record. Fails if the token is already taken.
    async fn insert(&self, record: &SessionRecord) -> Result<()>;

    /// Looks a record up without modifying it.
    async fn find(&self, token: &str) -> Result<Option<SessionRecord>>;

    /// Moves `last_accessed` forward to `now` and returns the updated record,
    /// or `None` if the record no longer exists.
    async fn touch(&self, token: &str, now: i64) -> Result<Option<SessionRecord>>;

    /// Atomically retires the pre-authenticated record `old_token` and stores
    /// its key material under `new_token`, bound to `user_id`.
    ///
    /// Returns `None` when `old_token` is gone or already bound.
    async fn promote(
        &self,
        old_token: &str,
        new_token: &str,
        user_id: i64,
        now: i64,
    ) -> Result<Option<SessionRecord>>;

    /// Deletes a record. Returns whether one existed.
    async fn delete(&self, token: &str) -> Result<bool>;

    /// Deletes every record past its lifetime at `now`.
    async fn sweep(&self, now: i64, expiry: i64) -> Result<SweepStats>;
}

/// In-process store, used when no database is configured and in tests.
#[derive(Default)]
pub struct MemorySessionStore {
    records: RwLock<BTreeMap<String, SessionRecord>>,
}

impl MemorySessionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert(&self, record: &SessionRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.token) {
            return Err(AppError::Internal("Session token collision".to_string()));
        }
        records.insert(record.token.clone(), record.clone());
        Ok(())
    }

    async fn find(&self, token: &str) -> Result<Option<SessionRecord>> {
        Ok(self.records.read().await.get(token).cloned())
    }

    async fn touch(&self, token: &str, now: i64) -> Result<Option<SessionRecord>> {
        let mut records = self.records.write().await;
        Ok(records.get_mut(token).map(|record| {
            record.last_accessed = record.last_accessed.max(now);
            record.clone()
        }))
    }

    async fn promote(
        &self,
        old_token: &str,
        new_token: &str,
        user_id: i64,
        now: i64,
    ) -> Result<Option<SessionRecord>> {
        let mut records = self.records.write().await;
        if records.contains_key(new_token) {
            return Err(AppError::Internal("Session token collision".to_string()));
        }
        match records.get(old_token) {
            Some(old) if !old.is_authenticated() => {}
            _ => return Ok(None),
        }
        let Some(old) = records.remove(old_token) else {
            return Ok(None);
        };

        let promoted = SessionRecord {
            token: new_token.to_string(),
            user_id,
            client_key: old.client_key,
            server_key: old.server_key,
            last_accessed: now,
        };
        records.insert(promoted.token.clone(), promoted.clone());
        Ok(Some(promoted))
    }

    async fn delete(&self, token: &str) -> Result<bool> {
        Ok(self.records.write().await.remove(token).is_some())
    }

    async fn sweep(&self, now: i64, expiry: i64) -> Result<SweepStats> {
        let mut records = self.records.write().await;
        let mut stats = SweepStats::default();
        records.retain(|_, record| {
            if !record.is_expired(now, expiry) {
                return true;
            }
            if record.is_authenticated() || record.last_accessed >= now - FIRST_STAGE_MAX_DURATION {
                stats.expired += 1;
            } else {
                stats.first_stage += 1;
            }
            false
        });
        Ok(stats)
    }
}

/// PostgreSQL store. Rows live in the `sessions` table created by
/// [`crate::db::init_schema`].
#[derive(Clone)]
pub struct PgSessionStore {
    pool: Pool,
}

impl PgSessionStore {
    /// Creates a store over an existing pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

fn key_column(row: &Row, column: &str) -> Result<[u8; 32]> {
    let bytes: Vec<u8> = row
        .try_get(column)
        .map_err(|_| AppError::Internal(format!("Missing column {}", column)))?;
    bytes
        .try_into()
        .map_err(|_| AppError::Internal(format!("Column {} is not 32 bytes", column)))
}

/// A helper function to map a `tokio_postgres::Row` to a `SessionRecord`.
fn row_to_session(row: &Row) -> Result<SessionRecord> {
    let user_id: Option<i64> = row
        .try_get("user_id")
        .map_err(|_| AppError::Internal("Missing column user_id".to_string()))?;
    Ok(SessionRecord {
        token: row.try_get("token").map_err(|_| AppError::Internal("Missing column token".to_string()))?,
        user_id: user_id.unwrap_or(0),
        client_key: key_column(row, "client_key")?,
        server_key: key_column(row, "server_key")?,
        last_accessed: row
            .try_get("last_accessed")
            .map_err(|_| AppError::Internal("Missing column last_accessed".to_string()))?,
    })
}

fn nullable_user(user_id: i64) -> Option<i64> {
    (user_id != 0).then_some(user_id)
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn insert(&self, record: &SessionRecord) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                r#"
                INSERT INTO sessions (token, user_id, client_key, server_key, last_accessed)
                VALUES ($1, $2, $3, $4, $5)
                "#,
                &[
                    &record.token,
                    &nullable_user(record.user_id),
                    &&record.client_key[..],
                    &&record.server_key[..],
                    &record.last_accessed,
                ],
            )
            .await?;
        Ok(())
    }

    async fn find(&self, token: &str) -> Result<Option<SessionRecord>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                SELECT token, user_id, client_key, server_key, last_accessed
                FROM sessions
                WHERE token = $1
                "#,
                &[&token],
            )
            .await?;
        row.map(|r| row_to_session(&r)).transpose()
    }

    async fn touch(&self, token: &str, now: i64) -> Result<Option<SessionRecord>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                UPDATE sessions
                SET last_accessed = GREATEST(last_accessed, $2)
                WHERE token = $1
                RETURNING token, user_id, client_key, server_key, last_accessed
                "#,
                &[&token, &now],
            )
            .await?;
        row.map(|r| row_to_session(&r)).transpose()
    }

    async fn promote(
        &self,
        old_token: &str,
        new_token: &str,
        user_id: i64,
        now: i64,
    ) -> Result<Option<SessionRecord>> {
        let mut client = self.pool.get().await?;
        let transaction = client.transaction().await?;

        let old = transaction
            .query_opt(
                r#"
                DELETE FROM sessions
                WHERE token = $1 AND user_id IS NULL
                RETURNING client_key, server_key
                "#,
                &[&old_token],
            )
            .await?;

        let Some(old) = old else {
            transaction.rollback().await?;
            return Ok(None);
        };

        let promoted = SessionRecord {
            token: new_token.to_string(),
            user_id,
            client_key: key_column(&old, "client_key")?,
            server_key: key_column(&old, "server_key")?,
            last_accessed: now,
        };

        transaction
            .execute(
                r#"
                INSERT INTO sessions (token, user_id, client_key, server_key, last_accessed)
                VALUES ($1, $2, $3, $4, $5)
                "#,
                &[
                    &promoted.token,
                    &nullable_user(user_id),
                    &&promoted.client_key[..],
                    &&promoted.server_key[..],
                    &now,
                ],
            )
            .await?;

        transaction.commit().await?;
        Ok(Some(promoted))
    }

    async fn delete(&self, token: &str) -> Result<bool> {
        let client = self.pool.get().await?;
        let deleted = client
            .execute("DELETE FROM sessions WHERE token = $1", &[&token])
            .await?;
        Ok(deleted > 0)
    }

    async fn sweep(&self, now: i64, expiry: i64) -> Result<SweepStats> {
        let client = self.pool.get().await?;
        let first_stage = client
            .execute(
                "DELETE FROM sessions WHERE user_id IS NULL AND last_accessed < $1",
                &[&(now - FIRST_STAGE_MAX_DURATION)],
            )
            .await?;

        let expired = if expiry > 0 {
            client
                .execute(
                    "DELETE FROM sessions WHERE last_accessed < $1",
                    &[&(now - expiry)],
                )
                .await?
        } else {
            0
        };

        Ok(SweepStats { first_stage, expired })
    }
}
