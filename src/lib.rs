//! Embeddable HTTP/1.1 and WebSocket server.
//!
//! Routes are regular expressions matched against the whole request path,
//! tried in registration order. A route either answers requests or upgrades
//! them to WebSocket sessions, which stay listed in a session directory for
//! application-driven broadcast.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod routing;
pub mod websocket;

pub use axum::http::{Method, StatusCode};
pub use config::ServerConfig;
pub use error::ServerError;
pub use http::{HttpError, Request, RequestExt, Response, ResponseExt, ServerHandle, WebServer, WsHandler};
pub use lifecycle::Shutdown;
pub use websocket::{SessionHandle, WebSocketSession};
