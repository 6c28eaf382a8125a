//! Request dispatcher.
//!
//! # Responsibilities
//! - Snapshot the current template generation once per request
//! - Resolve the route (404 / 405 / match)
//! - Build the execution context and render on the blocking pool
//! - Map render failures to clean status codes
//!
//! # Design Decisions
//! - Buffered output is the default: nothing is committed until the render
//!   finishes, so any failure still becomes a clean status
//! - Streaming output commits on the first full chunk; after that a failure
//!   aborts the body instead of changing the status
//! - Every request owns a cancellation token that fires when the request
//!   (or, when streaming, the response body) is dropped

use std::io;
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use indexmap::IndexMap;
use minijinja::value::Value;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::config::{OutputMode, ServerConfig};
use crate::funcs::FuncError;
use crate::observability::metrics;
use crate::query::{DataSource, QueryBridge};
use crate::routing::{ParamSet, RouteMatch};
use crate::templates::TemplateSet;

const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// Everything the dispatcher needs from an inbound request.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub request_id: String,
}

/// The `req` value seen by templates.
#[derive(Debug, Serialize)]
struct RequestView {
    method: String,
    path: String,
    query: IndexMap<String, String>,
    form: IndexMap<String, String>,
    headers: IndexMap<String, String>,
    body: String,
    request_id: String,
}

fn decode_pairs(raw: &[u8]) -> IndexMap<String, String> {
    let mut out = IndexMap::new();
    for (key, value) in url::form_urlencoded::parse(raw) {
        out.entry(key.into_owned()).or_insert_with(|| value.into_owned());
    }
    out
}

impl RequestView {
    fn new(req: &RenderRequest) -> Self {
        let mut headers: IndexMap<String, String> = IndexMap::new();
        for (name, value) in &req.headers {
            let value = String::from_utf8_lossy(value.as_bytes());
            match headers.entry(name.as_str().to_string()) {
                indexmap::map::Entry::Occupied(mut joined) => {
                    joined.get_mut().push_str(", ");
                    joined.get_mut().push_str(&value);
                }
                indexmap::map::Entry::Vacant(slot) => {
                    slot.insert(value.into_owned());
                }
            }
        }

        let is_form = req
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/x-www-form-urlencoded"));

        Self {
            method: req.method.to_string(),
            path: req.path.clone(),
            query: decode_pairs(req.query.as_deref().unwrap_or_default().as_bytes()),
            form: if is_form { decode_pairs(&req.body) } else { IndexMap::new() },
            headers,
            body: String::from_utf8_lossy(&req.body).into_owned(),
            request_id: req.request_id.clone(),
        }
    }
}

/// Status carried by an `httpError(code)` anywhere in the error chain.
pub fn http_error_status(err: &minijinja::Error) -> Option<StatusCode> {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(FuncError::Http(status)) = e.downcast_ref::<FuncError>() {
            return Some(*status);
        }
        current = e.source();
    }
    None
}

fn empty(status: StatusCode) -> Response {
    metrics::record_request(status.as_u16(), None);
    status.into_response()
}

/// Resolves requests against the current template generation.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    current: Arc<ArcSwap<TemplateSet>>,
    source: Option<Arc<dyn DataSource>>,
    meta: Value,
    output: OutputMode,
    chunk_bytes: usize,
}

impl Dispatcher {
    pub fn new(
        current: Arc<ArcSwap<TemplateSet>>,
        source: Option<Arc<dyn DataSource>>,
        config: &ServerConfig,
    ) -> Self {
        Self {
            current,
            source,
            meta: Value::from_serialize(&config.context),
            output: config.render.output,
            chunk_bytes: config.render.stream_chunk_bytes.max(1),
        }
    }

    pub async fn dispatch(&self, req: RenderRequest) -> Response {
        let set = self.current.load_full();

        let (template, params) = match set.routes().match_route(&req.method, &req.path) {
            RouteMatch::Found { route, params } => (route.template.clone(), params),
            RouteMatch::MethodNotAllowed { allowed } => {
                tracing::debug!(request_id = %req.request_id, method = %req.method, path = %req.path, "Method not allowed");
                let allow = allowed.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
                metrics::record_request(StatusCode::METHOD_NOT_ALLOWED.as_u16(), None);
                let mut response = StatusCode::METHOD_NOT_ALLOWED.into_response();
                if let Ok(value) = HeaderValue::from_str(&allow) {
                    response.headers_mut().insert(header::ALLOW, value);
                }
                return response;
            }
            RouteMatch::NotFound => {
                tracing::debug!(request_id = %req.request_id, method = %req.method, path = %req.path, "No route matched");
                return empty(StatusCode::NOT_FOUND);
            }
            RouteMatch::BadPath => {
                tracing::debug!(request_id = %req.request_id, path = %req.path, "Request path is not valid UTF-8");
                return empty(StatusCode::BAD_REQUEST);
            }
        };

        let cancel = CancellationToken::new();
        let ctx = match self.context(&req, &params, set.generation(), &cancel) {
            Ok(ctx) => ctx,
            Err(e) => {
                tracing::error!(request_id = %req.request_id, error = %e, "Failed to build render context");
                return empty(StatusCode::INTERNAL_SERVER_ERROR);
            }
        };

        tracing::debug!(
            request_id = %req.request_id,
            template = %template,
            generation = set.generation(),
            "Rendering"
        );

        let job = RenderJob {
            set,
            template,
            ctx,
            request_id: req.request_id,
            guard: cancel.drop_guard(),
        };
        match self.output {
            OutputMode::Buffered => job.buffered().await,
            OutputMode::Streaming => job.streaming(self.chunk_bytes).await,
        }
    }

    fn context(
        &self,
        req: &RenderRequest,
        params: &ParamSet,
        generation: u64,
        cancel: &CancellationToken,
    ) -> Result<Value, FuncError> {
        let db = match &self.source {
            Some(source) => QueryBridge::new(source.clone(), cancel.clone())?.into_value(),
            None => Value::from(()),
        };

        Ok(Value::from_iter([
            ("params", Value::from_serialize(params)),
            ("req", Value::from_serialize(RequestView::new(req))),
            ("db", db),
            ("meta", self.meta.clone()),
            ("generation", Value::from(generation)),
        ]))
    }
}

/// One render in flight. Dropping it cancels the request's token.
struct RenderJob {
    set: Arc<TemplateSet>,
    template: String,
    ctx: Value,
    request_id: String,
    guard: DropGuard,
}

impl RenderJob {
    fn failure(&self, err: &minijinja::Error) -> Response {
        if let Some(status) = http_error_status(err) {
            tracing::debug!(request_id = %self.request_id, template = %self.template, status = status.as_u16(), "httpError raised");
            return empty(status);
        }
        tracing::error!(
            request_id = %self.request_id,
            template = %self.template,
            generation = self.set.generation(),
            error = %err,
            "Render failed"
        );
        empty(StatusCode::INTERNAL_SERVER_ERROR)
    }

    async fn buffered(self) -> Response {
        let started = Instant::now();
        let set = self.set.clone();
        let template = self.template.clone();
        let ctx = self.ctx.clone();

        let rendered = tokio::task::spawn_blocking(move || set.render(&template, ctx)).await;

        match rendered {
            Ok(Ok(body)) => {
                metrics::record_request(StatusCode::OK.as_u16(), Some(started.elapsed()));
                ([(header::CONTENT_TYPE, HTML_CONTENT_TYPE)], body).into_response()
            }
            Ok(Err(e)) => self.failure(&e),
            Err(e) => {
                tracing::error!(request_id = %self.request_id, template = %self.template, error = %e, "Render task failed");
                empty(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    async fn streaming(self, chunk_bytes: usize) -> Response {
        let started = Instant::now();
        let (body_tx, body_rx) = mpsc::channel::<Result<Bytes, io::Error>>(4);
        let (head_tx, head_rx) = oneshot::channel();

        let set = self.set.clone();
        let template = self.template.clone();
        let ctx = self.ctx.clone();
        let request_id = self.request_id.clone();

        tokio::task::spawn_blocking(move || {
            let mut writer = ChunkWriter::new(body_tx, head_tx, chunk_bytes);
            let result = set.render_to_write(&template, ctx, &mut writer);
            if let Err(e) = &result {
                if writer.is_committed() {
                    tracing::error!(request_id = %request_id, template = %template, error = %e, "Render failed after output was committed");
                }
            }
            writer.finish(result);
        });

        match head_rx.await {
            Ok(Ok(())) => {
                metrics::record_request(StatusCode::OK.as_u16(), Some(started.elapsed()));
                let stream = futures_util::stream::unfold((body_rx, self.guard), |(mut rx, guard)| async move {
                    rx.recv().await.map(|item| (item, (rx, guard)))
                });
                ([(header::CONTENT_TYPE, HTML_CONTENT_TYPE)], Body::from_stream(stream)).into_response()
            }
            Ok(Err(e)) => self.failure(&e),
            Err(_) => {
                tracing::error!(request_id = %self.request_id, template = %self.template, "Render task ended without a result");
                empty(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}

type Head = Result<(), minijinja::Error>;

/// `io::Write` sink that forwards fixed-size chunks to the response body.
///
/// The first flush commits the response by resolving `head`.
struct ChunkWriter {
    body: mpsc::Sender<Result<Bytes, io::Error>>,
    head: Option<oneshot::Sender<Head>>,
    buf: Vec<u8>,
    chunk_bytes: usize,
}

impl ChunkWriter {
    fn new(body: mpsc::Sender<Result<Bytes, io::Error>>, head: oneshot::Sender<Head>, chunk_bytes: usize) -> Self {
        Self {
            body,
            head: Some(head),
            buf: Vec::with_capacity(chunk_bytes),
            chunk_bytes,
        }
    }

    fn is_committed(&self) -> bool {
        self.head.is_none()
    }

    fn commit(&mut self) {
        if let Some(head) = self.head.take() {
            let _ = head.send(Ok(()));
        }
    }

    fn send(&mut self, item: Result<Bytes, io::Error>) -> io::Result<()> {
        self.body
            .blocking_send(item)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "client went away"))
    }

    fn finish(mut self, result: Result<(), minijinja::Error>) {
        match result {
            Ok(()) => {
                self.commit();
                if !self.buf.is_empty() {
                    let chunk = Bytes::from(std::mem::take(&mut self.buf));
                    let _ = self.send(Ok(chunk));
                }
            }
            Err(e) => match self.head.take() {
                Some(head) => {
                    let _ = head.send(Err(e));
                }
                None => {
                    let _ = self.send(Err(io::Error::other(e.to_string())));
                }
            },
        }
    }
}

impl io::Write for ChunkWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        if self.buf.len() >= self.chunk_bytes {
            self.flush()?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        self.commit();
        let chunk = Bytes::from(std::mem::replace(&mut self.buf, Vec::with_capacity(self.chunk_bytes)));
        self.send(Ok(chunk))
    }
}
