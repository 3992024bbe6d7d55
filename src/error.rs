//! Top-level error type for server setup and lifecycle.

use crate::config::ConfigError;
use crate::net::{ListenerError, TlsError};
use crate::routing::RouteError;

/// Configuration-time failure of a [`crate::WebServer`] operation.
///
/// Failures while serving (transport errors, handler errors) never surface
/// here; they are reported through logging and handled per connection.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to build runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("server is already running; routes are frozen")]
    AlreadyRunning,

    #[error("at least one worker is required")]
    NoWorkers,
}
