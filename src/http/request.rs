//! Request inspection helpers.
//!
//! # Responsibilities
//! - Extract the routable path (target without query string)
//! - Derive the keep-alive intent from version and `Connection`
//! - Detect WebSocket upgrade semantics
//!
//! # Design Decisions
//! - The core only reads requests; it never builds wire bytes for them
//! - Header token matching is case-insensitive, per RFC 9110

use axum::http::{header, HeaderMap, Method, Version};

use crate::http::Request;

/// Read-only views over a [`Request`] used by the dispatch loop.
pub trait RequestExt {
    /// The request path, without the query string.
    fn path(&self) -> &str;

    /// The request target as received (path and query).
    fn target(&self) -> &str;

    /// Whether the client wants the connection kept open after the response.
    fn keep_alive(&self) -> bool;

    /// Whether this request asks for a WebSocket upgrade.
    fn is_upgrade(&self) -> bool;
}

impl RequestExt for Request {
    fn path(&self) -> &str {
        self.uri().path()
    }

    fn target(&self) -> &str {
        self.uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| self.uri().path())
    }

    fn keep_alive(&self) -> bool {
        keep_alive(self.version(), self.headers())
    }

    fn is_upgrade(&self) -> bool {
        self.method() == Method::GET
            && self.version() >= Version::HTTP_11
            && has_token(self.headers(), header::CONNECTION, "upgrade")
            && has_token(self.headers(), header::UPGRADE, "websocket")
    }
}

/// Keep-alive rule shared by requests and responses.
///
/// HTTP/1.1 defaults to persistent unless `Connection: close`; HTTP/1.0
/// defaults to closing unless `Connection: keep-alive`.
pub(crate) fn keep_alive(version: Version, headers: &HeaderMap) -> bool {
    if version >= Version::HTTP_11 {
        !has_token(headers, header::CONNECTION, "close")
    } else {
        has_token(headers, header::CONNECTION, "keep-alive")
    }
}

/// Returns true if any comma-separated value of `name` equals `token`.
pub(crate) fn has_token(headers: &HeaderMap, name: header::HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|item| item.trim().eq_ignore_ascii_case(token))
}
