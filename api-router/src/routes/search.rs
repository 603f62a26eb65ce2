use axum::{extract::State, response::IntoResponse, Extension, Json};
use retrieval_pipeline::{HybridSearchRequest, ImageSearchRequest, SearchRequest};
use tracing::info;

use crate::{api_state::ApiState, error::ApiError, middleware_stack_key::StackKey};

const MAX_TOP_K: usize = 100;

fn validate_top_k(top_k: usize) -> Result<(), ApiError> {
    if top_k == 0 || top_k > MAX_TOP_K {
        return Err(ApiError::ValidationError(format!(
            "top_k must be between 1 and {MAX_TOP_K}"
        )));
    }
    Ok(())
}

pub async fn search(
    State(state): State<ApiState>,
    Extension(StackKey(stack_key)): Extension<StackKey>,
    Json(request): Json<SearchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.query.trim().is_empty() {
        return Err(ApiError::ValidationError("query must not be empty".into()));
    }
    validate_top_k(request.top_k)?;

    info!(%stack_key, top_k = request.top_k, "text search");
    let response = state.retrieval.search(&stack_key, &request).await?;
    Ok(Json(response))
}

pub async fn search_image(
    State(state): State<ApiState>,
    Extension(StackKey(stack_key)): Extension<StackKey>,
    Json(request): Json<ImageSearchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.image_url.trim().is_empty() {
        return Err(ApiError::ValidationError("image_url must not be empty".into()));
    }
    validate_top_k(request.top_k)?;

    info!(%stack_key, top_k = request.top_k, "image search");
    let response = state.retrieval.search_image(&stack_key, &request).await?;
    Ok(Json(response))
}

pub async fn search_hybrid(
    State(state): State<ApiState>,
    Extension(StackKey(stack_key)): Extension<StackKey>,
    Json(request): Json<HybridSearchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.query.trim().is_empty() {
        return Err(ApiError::ValidationError("query must not be empty".into()));
    }
    validate_top_k(request.top_k)?;
    if request.text_weight < 0.0 || request.image_weight < 0.0 {
        return Err(ApiError::ValidationError(
            "modality weights must be non-negative".into(),
        ));
    }

    info!(%stack_key, top_k = request.top_k, "hybrid search");
    let response = state.retrieval.search_hybrid(&stack_key, &request).await?;
    Ok(Json(response))
}
