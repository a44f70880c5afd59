// src/jobs/retention.rs

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::RetentionConfig;
use crate::jobs::store::JobStore;

/// Periodically evict finished jobs according to `policy` until `shutdown`.
pub fn spawn_janitor(
    store: Arc<JobStore>,
    policy: RetentionConfig,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(policy.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("retention janitor stopping");
                    break;
                }
                _ = ticker.tick() => {
                    store.sweep(&policy, Utc::now());
                }
            }
        }
    })
}
