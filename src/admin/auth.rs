use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use crate::http::server::AppState;

pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    if let Some(token) = auth_header.and_then(|v| v.strip_prefix("Bearer ")) {
        if !state.config.admin.api_key.is_empty() && token == state.config.admin.api_key {
            return Ok(next.run(request).await);
        }
    }

    tracing::debug!(path = %request.uri().path(), "Admin request rejected");
    Err(StatusCode::UNAUTHORIZED)
}
