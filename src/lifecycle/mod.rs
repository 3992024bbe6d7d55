//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     stop() / signal / drop → trigger → accept loops exit
//!                                     → idle connections close
//!                                     → WebSocket read loops close their sessions
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → stop()
//! ```
//!
//! # Design Decisions
//! - One watch channel fans the shutdown out to every task
//! - In-flight handlers finish; the runtime bounds the wait with a grace period

pub mod shutdown;
pub mod signals;

pub use shutdown::{Shutdown, ShutdownSignal};
pub use signals::shutdown_signal;
