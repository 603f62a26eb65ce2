use surrealdb::sql::Datetime as SurrealDatetime;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(SearchLog, "search_log", {
    stack_key: String,
    query: String,
    modality: String,
    result_count: usize,
    latency_ms: u64,
    success: bool,
    error_message: Option<String>
});

impl SearchLog {
    pub fn success(
        stack_key: &str,
        query: &str,
        modality: &str,
        result_count: usize,
        latency_ms: u64,
    ) -> Self {
        Self::build(stack_key, query, modality, result_count, latency_ms, true, None)
    }

    pub fn failure(
        stack_key: &str,
        query: &str,
        modality: &str,
        latency_ms: u64,
        error_message: String,
    ) -> Self {
        Self::build(
            stack_key,
            query,
            modality,
            0,
            latency_ms,
            false,
            Some(error_message),
        )
    }

    fn build(
        stack_key: &str,
        query: &str,
        modality: &str,
        result_count: usize,
        latency_ms: u64,
        success: bool,
        error_message: Option<String>,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            stack_key: stack_key.to_owned(),
            query: query.to_owned(),
            modality: modality.to_owned(),
            result_count,
            latency_ms,
            success,
            error_message,
            created_at: now,
            updated_at: now,
        }
    }

    pub async fn record(self, db: &SurrealDbClient) -> Result<(), AppError> {
        db.store_item(self).await?;
        Ok(())
    }

    pub async fn for_stack(
        db: &SurrealDbClient,
        stack_key: &str,
    ) -> Result<Vec<SearchLog>, AppError> {
        let logs: Vec<SearchLog> = db
            .client
            .query(
                "SELECT * FROM type::table($table)
                 WHERE stack_key = $stack_key
                 ORDER BY created_at DESC",
            )
            .bind(("table", Self::table_name()))
            .bind(("stack_key", stack_key.to_owned()))
            .await?
            .take(0)?;

        Ok(logs)
    }

    /// Telemetry is retained for a bounded window, then dropped.
    pub async fn purge_older_than(
        db: &SurrealDbClient,
        cutoff: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), AppError> {
        db.client
            .query("DELETE type::table($table) WHERE created_at <= $cutoff")
            .bind(("table", Self::table_name()))
            .bind(("cutoff", SurrealDatetime::from(cutoff)))
            .await?;

        Ok(())
    }
}
