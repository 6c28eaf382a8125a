use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use crate::http::server::AppState;
use crate::reload::SupervisorStatus;
use crate::routing::RouteSummary;

/// Longest time `POST /_admin/reload` waits for the rebuild.
const RELOAD_WAIT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub generation: u64,
    pub built_at: DateTime<Utc>,
    pub templates: usize,
    pub routes: usize,
    pub reload: SupervisorStatus,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let set = state.reload.current();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        generation: set.generation(),
        built_at: set.built_at(),
        templates: set.templates().len(),
        routes: set.routes().len(),
        reload: state.reload.status(),
    })
}

pub async fn get_routes(State(state): State<AppState>) -> Json<Vec<RouteSummary>> {
    let set = state.reload.current();
    Json(set.routes().routes().iter().map(RouteSummary::from).collect())
}

/// Force a rebuild. 200 when it published, 422 when it failed, 202 when it
/// is still running after the wait.
pub async fn post_reload(State(state): State<AppState>) -> (StatusCode, Json<SupervisorStatus>) {
    match tokio::time::timeout(RELOAD_WAIT, state.reload.reload()).await {
        Ok(status) if status.last_error.is_none() => (StatusCode::OK, Json(status)),
        Ok(status) => (StatusCode::UNPROCESSABLE_ENTITY, Json(status)),
        Err(_) => (StatusCode::ACCEPTED, Json(state.reload.status())),
    }
}
