use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::models::session::SweepStats;
use crate::repositories::session::SessionStore;

/// Runs one expiry pass over the session store.
///
/// # Arguments
///
/// * `sessions` - The session store.
/// * `now` - The current UNIX time in seconds.
/// * `expiry` - Lifetime of authenticated sessions, `0` to keep them forever.
pub async fn sweep_once(sessions: &dyn SessionStore, now: i64, expiry: i64) -> Result<SweepStats> {
    let stats = sessions.sweep(now, expiry).await?;
    if stats.first_stage > 0 || stats.expired > 0 {
        tracing::info!(
            "🧹 Swept {} stale pre-auth and {} expired sessions",
            stats.first_stage,
            stats.expired
        );
    }
    Ok(stats)
}

/// Spawns the background task that expires sessions every `interval`.
pub fn spawn(
    sessions: Arc<dyn SessionStore>,
    interval: Duration,
    expiry: i64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let now = chrono::Utc::now().timestamp();
            if let Err(e) = sweep_once(sessions.as_ref(), now, expiry).await {
                tracing::error!("❌ Session sweep failed: {}", e);
            }
        }
    })
}
