use axum::{extract::Request, middleware::Next, response::Response};

use crate::error::ApiError;

/// The tenant key for the current request, extracted from `X-Stack-Key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackKey(pub String);

/// Tenant middleware: every protected route runs on behalf of exactly one
/// stack. Credential validity is checked later, per operation, so a stack
/// mid-re-authorization still reaches the OAuth callback.
pub async fn require_stack_key(mut request: Request, next: Next) -> Result<Response, ApiError> {
    let stack_key = request
        .headers()
        .get("X-Stack-Key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .ok_or_else(|| ApiError::Unauthorized("missing X-Stack-Key header".to_string()))?;

    request.extensions_mut().insert(StackKey(stack_key));

    Ok(next.run(request).await)
}
