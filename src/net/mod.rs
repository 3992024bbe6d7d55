//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! listen / listen_tls
//!     → listener.rs (BoundSocket: bind now, register with runtime at start)
//!     → tls.rs (acceptor built once per TLS listener)
//!
//! Accept loop (http/server.rs)
//!     → Listener::accept (connection limit)
//!     → optional TLS handshake
//!     → connection.rs (tracked for shutdown and metrics)
//!     → Hand off to http/connection.rs
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - TLS is optional and handled transparently

pub mod connection;
pub mod listener;
pub mod tls;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{BoundSocket, ConnectionPermit, Listener, ListenerError};
pub use tls::{load_tls_acceptor, tls_acceptor_from_pem, TlsError};
