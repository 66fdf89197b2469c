//! Hourly aggregation and retention pass.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

use crate::db::Store;

/// Default period between maintenance passes.
pub const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Run [`perform_maintenance`] now and then every `period` until stopped.
pub(crate) async fn run_maintenance(
    store: Arc<Store>,
    period: Duration,
    mut stop_rx: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = stop_rx.recv() => break,
            _ = ticker.tick() => perform_maintenance(&store),
        }
    }
}

/// Refresh hourly patterns, then archive and prune expired rows.
///
/// A failing step is logged and does not prevent the other one. Both steps are
/// idempotent, so the next pass repairs whatever this one missed.
pub fn perform_maintenance(store: &Store) {
    tracing::info!("Maintenance: running");

    match store.aggregate_recent() {
        Ok(rows) => tracing::debug!("Maintenance: refreshed {} hourly pattern rows", rows),
        Err(e) => tracing::error!("Maintenance: failed to aggregate hourly patterns: {}", e),
    }

    match store.archive_and_prune() {
        Ok(report) => tracing::info!(
            "Maintenance: archived {} hours, deleted {} samples and {} patterns{}",
            report.archived_hours,
            report.deleted_samples,
            report.deleted_patterns,
            if report.compacted { ", compacted database" } else { "" }
        ),
        Err(e) => tracing::error!("Maintenance: failed to archive old data: {}", e),
    }
}
