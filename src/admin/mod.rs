pub mod handlers;
pub mod auth;

use axum::{
    routing::{get, post},
    Router,
    middleware,
};
use crate::http::server::AppState;
use self::handlers::*;
use self::auth::admin_auth_middleware;

pub fn setup_admin_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/_admin/status", get(get_status))
        .route("/_admin/routes", get(get_routes))
        .route("/_admin/reload", post(post_reload))
        .layer(middleware::from_fn_with_state(state, admin_auth_middleware))
}
