//! Handler invocation layer.
//!
//! # Responsibilities
//! - Normalize handler return values into a [`Response`]
//! - Map explicit [`HttpError`]s to their status, anything else to 500
//! - Contain panics so nothing escapes into the connection loop
//! - Tag handlers as plain request handlers or upgrade handlers
//!
//! # Design Decisions
//! - Handlers are async closures, type-erased once at registration
//! - Errors are values (`Result`), boxed and downcast to recover the status
//! - The connection loop switches on [`Handler`] exactly once per request

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::body::Bytes;
use axum::http::StatusCode;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::http::response::{self, RequestMeta};
use crate::http::{Request, Response};
use crate::websocket::SessionHandle;

/// Boxed error returned by handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// An error a handler raises on purpose, carrying the status to reply with.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct HttpError {
    status: StatusCode,
    message: String,
}

impl HttpError {
    /// Create an error answered with `status` and `message` as body.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// 400 Bad Request.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// 404 Not Found.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// 500 Internal Server Error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Conversion of a handler's output into a response for a given request.
pub trait IntoResponse {
    fn into_response(self, meta: &RequestMeta) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self, _meta: &RequestMeta) -> Response {
        self
    }
}

impl IntoResponse for String {
    fn into_response(self, meta: &RequestMeta) -> Response {
        response::text(self, meta)
    }
}

impl IntoResponse for &'static str {
    fn into_response(self, meta: &RequestMeta) -> Response {
        response::text(self, meta)
    }
}

impl IntoResponse for Bytes {
    fn into_response(self, meta: &RequestMeta) -> Response {
        response::build(StatusCode::OK, "application/octet-stream", self, meta)
    }
}

impl IntoResponse for StatusCode {
    fn into_response(self, meta: &RequestMeta) -> Response {
        response::build(self, "text/plain", self.canonical_reason().unwrap_or(""), meta)
    }
}

impl IntoResponse for (StatusCode, String) {
    fn into_response(self, meta: &RequestMeta) -> Response {
        response::build(self.0, "text/plain", self.1, meta)
    }
}

impl IntoResponse for serde_json::Value {
    fn into_response(self, meta: &RequestMeta) -> Response {
        response::build(StatusCode::OK, "application/json", self.to_string(), meta)
    }
}

impl IntoResponse for HttpError {
    fn into_response(self, meta: &RequestMeta) -> Response {
        response::error(self.status, self.message, meta)
    }
}

impl<T, E> IntoResponse for Result<T, E>
where
    T: IntoResponse,
    E: Into<BoxError>,
{
    fn into_response(self, meta: &RequestMeta) -> Response {
        match self {
            Ok(value) => value.into_response(meta),
            Err(err) => error_response(err.into(), meta),
        }
    }
}

/// Map a handler error to a response: explicit statuses are kept, anything
/// else is an internal error carrying the error text.
fn error_response(err: BoxError, meta: &RequestMeta) -> Response {
    match err.downcast::<HttpError>() {
        Ok(http) => {
            tracing::debug!(status = %http.status, message = %http.message, "Handler returned HTTP error");
            http.into_response(meta)
        }
        Err(other) => {
            tracing::warn!(error = %other, target = %meta.target, "Unhandled handler error");
            response::error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string(), meta)
        }
    }
}

/// A type-erased request/response handler that always yields a response.
#[derive(Clone)]
pub struct RequestHandler {
    inner: Arc<dyn Fn(Request) -> BoxFuture<'static, Response> + Send + Sync>,
}

impl RequestHandler {
    /// Wrap an async handler function.
    pub fn new<F, Fut, R>(f: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoResponse,
    {
        let f = Arc::new(f);
        let inner = move |req: Request| -> BoxFuture<'static, Response> {
            let meta = RequestMeta::of(&req);
            let f = Arc::clone(&f);
            let call_meta = meta.clone();
            let call = async move { f(req).await.into_response(&call_meta) };

            AssertUnwindSafe(call)
                .catch_unwind()
                .map(move |outcome| {
                    outcome.unwrap_or_else(|_| {
                        tracing::error!(target = %meta.target, "Handler panicked");
                        response::error(StatusCode::INTERNAL_SERVER_ERROR, "unhandled exception", &meta)
                    })
                })
                .boxed()
        };

        Self { inner: Arc::new(inner) }
    }

    /// Run the handler. Never fails and never panics outward.
    pub fn call(&self, req: Request) -> BoxFuture<'static, Response> {
        (self.inner)(req)
    }
}

impl std::fmt::Debug for RequestHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RequestHandler")
    }
}

type MessageFn = dyn Fn(String, SessionHandle) -> BoxFuture<'static, ()> + Send + Sync;
type CloseFn = dyn Fn(SessionHandle) + Send + Sync;

/// Upgrade handler: callbacks for a WebSocket route.
#[derive(Clone)]
pub struct WsHandler {
    on_message: Arc<MessageFn>,
    on_close: Option<Arc<CloseFn>>,
}

impl WsHandler {
    /// Handler invoked with `(message, session)` for every inbound message.
    pub fn new<F, Fut>(on_message: F) -> Self
    where
        F: Fn(String, SessionHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            on_message: Arc::new(move |msg: String, session: SessionHandle| on_message(msg, session).boxed()),
            on_close: None,
        }
    }

    /// Callback invoked once when a session on this route closes.
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(SessionHandle) + Send + Sync + 'static,
    {
        self.on_close = Some(Arc::new(f));
        self
    }

    /// Deliver one message. A panicking callback is logged and contained.
    pub(crate) async fn deliver(&self, msg: String, session: SessionHandle) {
        let id = session.id();
        let fut = (self.on_message)(msg, session);
        if AssertUnwindSafe(fut).catch_unwind().await.is_err() {
            tracing::error!(session_id = %id, "WebSocket message handler panicked");
        }
    }

    pub(crate) fn close_callback(&self) -> Option<Arc<CloseFn>> {
        self.on_close.clone()
    }
}

impl std::fmt::Debug for WsHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsHandler")
            .field("on_close", &self.on_close.is_some())
            .finish()
    }
}

/// A route's handler: plain request/response or protocol upgrade.
#[derive(Debug, Clone)]
pub enum Handler {
    Request(RequestHandler),
    Upgrade(WsHandler),
}
