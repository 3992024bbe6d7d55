//! WebSocket subsystem.
//!
//! # Data Flow
//! ```text
//! Upgrade request matched to an upgrade route (http/connection.rs)
//!     → handshake.rs (validate, 101 Switching Protocols)
//!     → session.rs (session created, read loop + writer task)
//!     → directory.rs (registered; removed again on close)
//!
//! Application broadcast:
//!     directory.snapshot() → session.send() per handle → writer task
//! ```
//!
//! # Design Decisions
//! - The session owns its stream; the directory only holds shared handles
//! - Per-session delivery order is preserved; sessions run independently

pub mod directory;
pub mod handshake;
pub mod session;

pub use directory::SessionDirectory;
pub use handshake::HandshakeError;
pub use session::{SessionError, SessionHandle, SessionId, SessionState, WebSocketSession};
