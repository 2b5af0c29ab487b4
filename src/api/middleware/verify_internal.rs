use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use http::StatusCode;
use http::header::AUTHORIZATION;

use crate::api::server::{AppState, RouteError};
use crate::util::constant_time_cmp;

/// Lets a request through only when its `Authorization` header is exactly the internal token.
///
/// An empty configured token locks the internal routes entirely.
pub async fn verify_internal_ident(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, RouteError> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(RouteError::AuthError(StatusCode::UNAUTHORIZED))?;

    if state.internal_token.is_empty() || !constant_time_cmp(header, &state.internal_token) {
        return Err(RouteError::AuthError(StatusCode::UNAUTHORIZED));
    }

    Ok(next.run(req).await)
}
