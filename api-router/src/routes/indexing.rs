use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use common::utils::best_effort::spawn_best_effort;
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::{api_state::ApiState, error::ApiError, middleware_stack_key::StackKey};

#[derive(Debug, Deserialize)]
pub struct IndexRunParams {
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default)]
    pub content_types: Option<Vec<String>>,
    #[serde(default)]
    pub include_assets: bool,
}

fn default_environment() -> String {
    "production".to_owned()
}

/// Kick off a full re-index in the background and acknowledge immediately.
/// The returned run id ties subsequent log lines to this request.
pub async fn trigger_index(
    State(state): State<ApiState>,
    Extension(StackKey(stack_key)): Extension<StackKey>,
    Json(params): Json<IndexRunParams>,
) -> Result<impl IntoResponse, ApiError> {
    // Fail fast on a stack that cannot index anyway.
    state.credentials.get_valid_access_token(&stack_key).await?;

    let run_id = Uuid::new_v4().to_string();
    info!(%stack_key, %run_id, environment = %params.environment, "indexing run accepted");

    let indexing = state.indexing.clone();
    let run = run_id.clone();
    spawn_best_effort("indexing_run", async move {
        let summary = indexing
            .index_all(
                &stack_key,
                &params.environment,
                params.content_types.as_deref(),
            )
            .await?;
        info!(
            run_id = %run,
            indexed = summary.indexed,
            skipped = summary.skipped,
            failed = summary.failed,
            "indexing run completed"
        );

        if params.include_assets {
            let assets = indexing.index_assets(&stack_key, &params.environment).await?;
            info!(
                run_id = %run,
                indexed = assets.indexed,
                skipped = assets.skipped,
                failed = assets.failed,
                "asset indexing completed"
            );
        }
        Ok(())
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "status": "accepted", "run_id": run_id })),
    ))
}

/// Drop and recreate the stack's index. Destructive but recoverable: a
/// follow-up indexing run repopulates from the CMS.
pub async fn reset_index(
    State(state): State<ApiState>,
    Extension(StackKey(stack_key)): Extension<StackKey>,
) -> Result<impl IntoResponse, ApiError> {
    state.indexing.reset_index(&stack_key).await?;
    Ok((StatusCode::OK, Json(json!({ "status": "ok" }))))
}

/// Remove one entry's vector. Idempotent; removing an unknown id succeeds.
pub async fn remove_entry(
    State(state): State<ApiState>,
    Extension(StackKey(stack_key)): Extension<StackKey>,
    Path((_content_type, entry_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    state.indexing.remove_entry(&stack_key, &entry_id).await?;
    Ok((StatusCode::OK, Json(json!({ "status": "ok" }))))
}
