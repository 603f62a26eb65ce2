use std::{sync::Arc, time::Duration};

use common::{error::AppError, storage::db::SurrealDbClient, storage::types::search_log::SearchLog};
use tracing::warn;

use crate::pipeline::SearchHit;

const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Append one search-log record. Telemetry is best-effort: a failing write
/// is logged and swallowed, never surfaced to the caller.
pub async fn record_outcome(
    db: &SurrealDbClient,
    stack_key: &str,
    query: &str,
    modality: &str,
    latency_ms: u64,
    result: &Result<Vec<SearchHit>, AppError>,
) {
    let log = match result {
        Ok(hits) => SearchLog::success(stack_key, query, modality, hits.len(), latency_ms),
        Err(err) => SearchLog::failure(stack_key, query, modality, latency_ms, err.to_string()),
    };

    if let Err(err) = log.record(db).await {
        warn!(%stack_key, error = %err, "search log write failed");
    }
}

/// Hourly sweep dropping search logs older than the retention window.
pub async fn run_retention_loop(db: Arc<SurrealDbClient>, retention_days: i64) {
    let mut ticker = tokio::time::interval(RETENTION_SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let cutoff = chrono::Utc::now() - chrono::Duration::days(retention_days);
        if let Err(err) = SearchLog::purge_older_than(&db, cutoff).await {
            warn!(error = %err, "search log retention sweep failed");
        }
    }
}
