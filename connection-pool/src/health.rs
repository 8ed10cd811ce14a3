//! Background health polling.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::pool_manager::ConnectionPoolRegistry;

/// Probes every registered source once per `interval` until the returned
/// handle is aborted.
///
/// Probe failures only degrade the affected source's health flag.
pub fn spawn_health_monitor(registry: Arc<ConnectionPoolRegistry>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; sources were just probed by `add`.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let results = registry.health_check_all().await;
            let degraded: Vec<&str> = results
                .iter()
                .filter(|(_, healthy)| !**healthy)
                .map(|(id, _)| id.as_str())
                .collect();
            if degraded.is_empty() {
                tracing::debug!(sources = results.len(), "Health check passed");
            } else {
                tracing::warn!(sources = results.len(), degraded = ?degraded, "Health check found degraded sources");
            }
        }
    })
}
