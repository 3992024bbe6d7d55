//! Static file mount.
//!
//! # Responsibilities
//! - Turn a URI prefix into an escaped, anchored route pattern
//! - Resolve requests under the prefix to files in a directory
//!
//! # Design Decisions
//! - File resolution is `tower_http::services::ServeDir`: content types,
//!   conditional and range requests, traversal protection, `index.html`
//! - Bodies are buffered up to a configured cap; larger files are refused

use std::path::{Path, PathBuf};

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderValue, StatusCode};
use tower::ServiceExt;
use tower_http::services::ServeDir;

use crate::http::response::{self, RequestMeta, ResponseExt, SERVER_NAME};
use crate::http::{Request, Response};

/// Files under `dir`, served below `prefix`.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    prefix: String,
    dir: PathBuf,
    service: ServeDir,
    max_bytes: usize,
}

impl StaticFiles {
    /// Mount `dir` at `uri`. A trailing `/` on `uri` is ignored.
    pub fn new(uri: &str, dir: impl Into<PathBuf>, max_bytes: usize) -> Self {
        let dir = dir.into();
        Self {
            prefix: uri.trim_end_matches('/').to_string(),
            service: ServeDir::new(&dir),
            dir,
            max_bytes,
        }
    }

    /// Route pattern matching everything below the prefix.
    pub fn pattern(&self) -> String {
        format!("{}(/.*)", regex::escape(&self.prefix))
    }

    /// Directory files are read from.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Answer `req`, whose path must lie below the prefix.
    pub async fn serve(&self, req: Request) -> Response {
        let meta = RequestMeta::of(&req);
        let rest = req.uri().path().strip_prefix(&self.prefix).unwrap_or("/");
        let uri = match req.uri().query() {
            Some(query) => format!("{rest}?{query}"),
            None => rest.to_string(),
        };

        let mut inner = axum::http::Request::new(Body::empty());
        *inner.method_mut() = req.method().clone();
        *inner.headers_mut() = req.headers().clone();
        match uri.parse() {
            Ok(uri) => *inner.uri_mut() = uri,
            Err(_) => return response::error(StatusCode::BAD_REQUEST, "invalid path", &meta),
        }

        let res = match self.service.clone().oneshot(inner).await {
            Ok(res) => res,
            Err(never) => match never {},
        };
        let (mut parts, body) = res.into_parts();

        let body: Bytes = match axum::body::to_bytes(Body::new(body), self.max_bytes).await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(target = %meta.target, error = %e, "Static file not served");
                return response::error(StatusCode::INTERNAL_SERVER_ERROR, "file could not be served", &meta);
            }
        };

        // Directory redirects are relative to the mount, not the server root.
        if let Some(location) = parts.headers.get(header::LOCATION).and_then(|v| v.to_str().ok()) {
            if location.starts_with('/') {
                if let Ok(value) = HeaderValue::from_str(&format!("{}{}", self.prefix, location)) {
                    parts.headers.insert(header::LOCATION, value);
                }
            }
        }

        parts.version = meta.version;
        parts.headers.insert(header::SERVER, HeaderValue::from_static(SERVER_NAME));
        let mut res = Response::from_parts(parts, body);
        res.set_keep_alive(meta.keep_alive);
        res
    }
}
