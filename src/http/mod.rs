//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection (accepted in server.rs)
//!     → connection.rs (state machine: Reading → Dispatching → Responding)
//!     → codec.rs (parse request head and body)
//!     → routing::Registry (first match on method + path)
//!     → handler.rs (invoke, normalize result, contain failures)
//!     → response.rs (generated responses, keep-alive)
//!     → codec.rs (serialize response)
//!
//! Upgrade route + upgrade request:
//!     connection.rs → websocket::handshake → websocket::session
//! ```

pub mod codec;
pub mod connection;
pub mod handler;
pub mod request;
pub mod response;
pub mod server;
pub mod static_files;

/// Request as seen by handlers: head plus fully buffered body.
pub type Request = axum::http::Request<axum::body::Bytes>;

/// Response produced by handlers and written by the connection loop.
pub type Response = axum::http::Response<axum::body::Bytes>;

pub use handler::{BoxError, Handler, HttpError, IntoResponse, RequestHandler, WsHandler};
pub use request::RequestExt;
pub use response::{RequestMeta, ResponseExt};
pub use server::{ServerHandle, WebServer};
pub use static_files::StaticFiles;
