use axum::{extract::{Query, State}, response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::{api_state::ApiState, error::ApiError};

/// Redirect parameters from the provider. The stack key rides in `state`,
/// set when the authorization flow was initiated.
#[derive(Debug, Deserialize)]
pub struct OAuthCallbackParams {
    pub code: String,
    pub state: String,
}

/// Authorization-code callback: exchange the code and persist the tokens.
/// A fresh handshake also reactivates a stack that went inactive.
pub async fn oauth_callback(
    State(state): State<ApiState>,
    Query(params): Query<OAuthCallbackParams>,
) -> Result<impl IntoResponse, ApiError> {
    let stack_key = params.state.trim();
    if stack_key.is_empty() {
        return Err(ApiError::ValidationError(
            "state must carry the stack key".into(),
        ));
    }

    let credential = state
        .credentials
        .exchange_authorization_code(stack_key, &params.code)
        .await?;

    info!(stack_key = %credential.stack_key, "authorization handshake completed");

    Ok(Json(json!({
        "status": "ok",
        "stack_key": credential.stack_key,
    })))
}
