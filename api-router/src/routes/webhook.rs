use axum::{extract::State, http::StatusCode, response::IntoResponse, Extension, Json};
use common::utils::best_effort::spawn_best_effort;
use indexing_pipeline::WebhookEvent;
use serde_json::json;
use tracing::info;

use crate::{api_state::ApiState, error::ApiError, middleware_stack_key::StackKey};

/// CMS webhook receiver. Acknowledges with 202 before doing any work so the
/// CMS delivery never times out; the event is applied in a spawned task.
pub async fn receive_webhook(
    State(state): State<ApiState>,
    Extension(StackKey(stack_key)): Extension<StackKey>,
    Json(event): Json<WebhookEvent>,
) -> Result<impl IntoResponse, ApiError> {
    info!(%stack_key, entry_id = %event.entry_id, action = ?event.action, "webhook received");

    let indexing = state.indexing.clone();
    spawn_best_effort("webhook_event", async move {
        indexing.process_webhook_event(&stack_key, &event).await
    });

    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "accepted" }))))
}
