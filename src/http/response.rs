//! Response construction and keep-alive handling.
//!
//! # Responsibilities
//! - Build the responses the core generates itself (not found, errors, text)
//! - Stamp every generated response with the `Server` header
//! - Read and set the keep-alive flag through `Connection`
//!
//! # Design Decisions
//! - Keep-alive lives in the response headers, so the connection loop reads
//!   the decision back from the response it is about to write
//! - Generated responses copy version and keep-alive from the request

use axum::body::Bytes;
use axum::http::{header, HeaderValue, StatusCode, Version};

use crate::http::request::keep_alive;
use crate::http::Response;

/// Value of the `Server` header on generated responses.
pub const SERVER_NAME: &str = concat!("switchyard/", env!("CARGO_PKG_VERSION"));

/// What a generated response needs to know about the request it answers.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    /// Protocol version of the request.
    pub version: Version,
    /// Keep-alive intent of the request.
    pub keep_alive: bool,
    /// Request target, used in not-found messages.
    pub target: String,
}

impl RequestMeta {
    /// Capture the fields of `req` that response generation needs.
    pub fn of(req: &crate::http::Request) -> Self {
        use crate::http::RequestExt;

        Self {
            version: req.version(),
            keep_alive: req.keep_alive(),
            target: req.target().to_string(),
        }
    }
}

/// Keep-alive flag accessors for [`Response`].
pub trait ResponseExt {
    /// Whether the connection stays open after this response is written.
    fn keep_alive(&self) -> bool;

    /// Set the keep-alive flag, honoring the response's HTTP version.
    fn set_keep_alive(&mut self, keep_alive: bool);
}

impl ResponseExt for Response {
    fn keep_alive(&self) -> bool {
        keep_alive(self.version(), self.headers())
    }

    fn set_keep_alive(&mut self, keep_alive: bool) {
        let version = self.version();
        let headers = self.headers_mut();
        match (keep_alive, version >= Version::HTTP_11) {
            (true, true) => {
                headers.remove(header::CONNECTION);
            }
            (true, false) => {
                headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
            }
            (false, _) => {
                headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
            }
        }
    }
}

/// Build a response with the given status, content type and body.
pub fn build(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
    meta: &RequestMeta,
) -> Response {
    let mut res = Response::new(body.into());
    *res.status_mut() = status;
    *res.version_mut() = meta.version;
    let headers = res.headers_mut();
    headers.insert(header::SERVER, HeaderValue::from_static(SERVER_NAME));
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    res.set_keep_alive(meta.keep_alive);
    res
}

/// 200 response with a plain-text body.
pub fn text(body: impl Into<Bytes>, meta: &RequestMeta) -> Response {
    build(StatusCode::OK, "text/plain", body, meta)
}

/// 404 response naming the unmatched target.
pub fn not_found(meta: &RequestMeta) -> Response {
    build(
        StatusCode::NOT_FOUND,
        "text/html",
        format!("The resource '{}' was not found.", meta.target),
        meta,
    )
}

/// Error response carrying `message` as its body.
pub fn error(status: StatusCode, message: impl Into<Bytes>, meta: &RequestMeta) -> Response {
    build(status, "text/html", message, meta)
}
