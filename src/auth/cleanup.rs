/// Refresh Token Retention Cleanup
///
/// Periodic sweep that deletes refresh tokens long past expiry or
/// revocation. Runs independently of request handling and takes no lock a
/// request path waits on; a failed sweep is logged and retried next tick.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::auth::refresh_token::RefreshTokenStore;

pub fn spawn_token_cleanup(
    store: Arc<dyn RefreshTokenStore>,
    interval: StdDuration,
    retention: chrono::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            match store.delete_expired(retention).await {
                Ok(0) => {}
                Ok(deleted) => {
                    tracing::info!(deleted = deleted, "Purged expired refresh tokens");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Refresh token cleanup failed");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::refresh_token::{generate_refresh_token, InMemoryRefreshTokenStore};
    use uuid::Uuid;

    #[tokio::test]
    async fn cleanup_task_purges_old_tokens() {
        let store = Arc::new(InMemoryRefreshTokenStore::new());
        let stale = generate_refresh_token();
        let live = generate_refresh_token();
        store
            .save(Uuid::new_v4(), &stale, None, -3600)
            .await
            .unwrap();
        store.save(Uuid::new_v4(), &live, None, 3600).await.unwrap();

        let handle = spawn_token_cleanup(
            store.clone(),
            StdDuration::from_millis(10),
            chrono::Duration::seconds(60),
        );

        // The first tick fires immediately; give it a moment to run.
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        handle.abort();

        assert_eq!(store.token_count(), 1);
        assert!(store.find(&live).await.unwrap().is_some());
    }
}
