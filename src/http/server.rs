//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router (admin API + template fallback)
//! - Wire up middleware (tracing, timeout, request ID)
//! - Read the request body within the configured limit
//! - Hand requests to the dispatcher
//! - Stop accepting on shutdown and drain in-flight requests

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin;
use crate::config::ServerConfig;
use crate::http::dispatcher::{Dispatcher, RenderRequest};
use crate::http::X_REQUEST_ID;
use crate::reload::ReloadHandle;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub reload: ReloadHandle,
    pub config: Arc<ServerConfig>,
}

/// HTTP front of the template server.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(state: AppState) -> Self {
        let router = Self::build_router(state);
        Self { router }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(state: AppState) -> Router {
        let config = state.config.clone();

        let mut router = Router::new();
        if config.admin.enabled {
            router = router.merge(admin::setup_admin_router(state.clone()));
        }

        router
            .fallback(render_handler)
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// The fully layered router.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve on `listener` until a shutdown signal arrives.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Renders every request the admin API does not claim.
async fn render_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let request_id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, state.config.listener.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(request_id = %request_id, error = %e, "Request body rejected");
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
    };

    state
        .dispatcher
        .dispatch(RenderRequest {
            method: parts.method,
            path: parts.uri.path().to_string(),
            query: parts.uri.query().map(str::to_string),
            headers: parts.headers,
            body,
            request_id,
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::funcs::FunctionLibrary;
    use crate::reload::ReloadSupervisor;
    use crate::templates::Compiler;
    use tower::ServiceExt;

    fn server(root: &std::path::Path) -> (HttpServer, ReloadSupervisor) {
        let mut config = ServerConfig::default();
        config.templates.root = root.to_path_buf();
        config.reload.watch = false;
        config.admin.enabled = true;
        config.admin.api_key = "k".to_string();

        let library = Arc::new(FunctionLibrary::standard().unwrap());
        let compiler = Compiler::new(config.templates.clone(), library).unwrap();
        let (supervisor, reload) = ReloadSupervisor::start(compiler, &config.reload).unwrap();
        let dispatcher = Dispatcher::new(reload.cell(), None, &config);
        let state = AppState {
            dispatcher: Arc::new(dispatcher),
            reload,
            config: Arc::new(config),
        };
        (HttpServer::new(state), supervisor)
    }

    #[tokio::test]
    async fn test_request_id_is_echoed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.html"), "hi").unwrap();
        let (server, _supervisor) = server(dir.path());

        let res = server
            .router()
            .oneshot(Request::get("/hello").header(X_REQUEST_ID, "abc").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[X_REQUEST_ID], "abc");
    }

    #[tokio::test]
    async fn test_admin_routes_require_key() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.html"), "hi").unwrap();
        let (server, _supervisor) = server(dir.path());

        let res = server
            .router()
            .oneshot(Request::get("/_admin/routes").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = server
            .router()
            .oneshot(
                Request::get("/_admin/routes")
                    .header("authorization", "Bearer k")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
}
