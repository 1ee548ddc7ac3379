use std::sync::Arc;
use std::time::Duration;

use tracing::error;

use crate::engine::Engine;
use crate::observability::WAL_COMPACTIONS_TOTAL;

/// Background task that rewrites the WAL once `threshold` events have been
/// appended since the last compaction. Runs until the task is aborted.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        compact_if_needed(&engine, threshold).await;
    }
}

/// Compact when the append counter has reached `threshold`.
/// Returns whether a compaction ran.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            metrics::counter!(WAL_COMPACTIONS_TOTAL).increment(1);
            true
        }
        Err(e) => {
            error!("WAL compaction after {appends} appends failed: {e}");
            false
        }
    }
}
