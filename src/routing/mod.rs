//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (verb, path)
//!     → registry.rs (ordered scan)
//!     → pattern.rs (anchored pattern match)
//!     → Return: matched handler or NotFound
//!
//! Route Compilation (at configuration time):
//!     add(verb, pattern, handler)
//!     → Compile pattern (InvalidPattern on failure)
//!     → Append to the table
//!     → Frozen when the server starts
//! ```
//!
//! # Design Decisions
//! - Routes compiled once, immutable while serving
//! - First match wins, in registration order
//! - Query strings are not part of the matched path

pub mod pattern;
pub mod registry;

pub use pattern::RoutePattern;
pub use registry::Registry;

use axum::http::Method;

/// Errors raised by route registration and lookup.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    /// The pattern is not a valid expression.
    #[error("invalid route pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// No entry matches the verb and path.
    #[error("no route for {method} {path}")]
    NotFound { method: Method, path: String },
}
