//! Background trust store refresh task.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info, warn};

use super::store::{RefreshOutcome, TrustStore};

/// Spawn a background task that periodically refreshes the trust store.
///
/// Returns a `JoinHandle` that can be used to abort the task.
pub fn spawn_refresh_task(
    trust_store: Arc<TrustStore>,
    refresh_interval_secs: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(refresh_interval_secs.max(1)));

        // Skip the first immediate tick, the store was just loaded
        ticker.tick().await;

        loop {
            ticker.tick().await;

            match trust_store.refresh().await {
                Ok(RefreshOutcome::Updated(set)) => {
                    info!(
                        version = ?set.version(),
                        anchors = set.len(),
                        "Periodic trust store refresh published new snapshot"
                    );
                }
                Ok(RefreshOutcome::Unchanged(_)) => {
                    debug!("Periodic trust store refresh: bundle unchanged");
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        "Periodic trust store refresh failed"
                    );
                }
            }
        }
    })
}
