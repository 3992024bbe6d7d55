//! Server side of the WebSocket opening handshake (RFC 6455 §4.2).

use axum::body::Bytes;
use axum::http::{header, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;

use crate::http::response::SERVER_NAME;
use crate::http::{Request, RequestExt, Response};

const SUPPORTED_VERSION: &str = "13";

/// Why an upgrade request was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    #[error("request does not ask for a websocket upgrade")]
    NotUpgrade,

    #[error("missing Sec-WebSocket-Key header")]
    MissingKey,

    #[error("unsupported websocket version {0:?}")]
    UnsupportedVersion(Option<String>),
}

/// Validate an upgrade request and build the `101 Switching Protocols` reply.
pub fn accept(req: &Request) -> Result<Response, HandshakeError> {
    if !req.is_upgrade() {
        return Err(HandshakeError::NotUpgrade);
    }

    let version = req
        .headers()
        .get(header::SEC_WEBSOCKET_VERSION)
        .and_then(|v| v.to_str().ok())
        .map(str::trim);
    if version != Some(SUPPORTED_VERSION) {
        return Err(HandshakeError::UnsupportedVersion(version.map(str::to_string)));
    }

    let key = req
        .headers()
        .get(header::SEC_WEBSOCKET_KEY)
        .ok_or(HandshakeError::MissingKey)?;
    let accept_key = derive_accept_key(key.as_bytes());

    let mut res = Response::new(Bytes::new());
    *res.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    *res.version_mut() = req.version();
    let headers = res.headers_mut();
    headers.insert(header::SERVER, HeaderValue::from_static(SERVER_NAME));
    headers.insert(header::CONNECTION, HeaderValue::from_static("upgrade"));
    headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
    // Base64 output is always a valid header value.
    if let Ok(value) = HeaderValue::from_str(&accept_key) {
        headers.insert(header::SEC_WEBSOCKET_ACCEPT, value);
    }
    Ok(res)
}
