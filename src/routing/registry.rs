//! Route table and lookup.
//!
//! # Responsibilities
//! - Store (verb, pattern, handler) entries in registration order
//! - Resolve a request verb and path to the first matching handler
//!
//! # Design Decisions
//! - Append-only while configuring, read-only while serving (no locking)
//! - O(n) linear scan; registration order is the only precedence rule
//! - Overlapping patterns are never deduplicated
//! - Explicit `NotFound` rather than a silent default

use axum::http::Method;

use crate::routing::pattern::RoutePattern;
use crate::routing::RouteError;

/// One registered route.
#[derive(Debug, Clone)]
struct RouteEntry<H> {
    method: Method,
    pattern: RoutePattern,
    handler: H,
}

impl<H> RouteEntry<H> {
    fn matches(&self, method: &Method, path: &str) -> bool {
        self.method == *method && self.pattern.matches(path)
    }
}

/// Ordered, first-match route table.
#[derive(Debug, Clone)]
pub struct Registry<H> {
    entries: Vec<RouteEntry<H>>,
}

impl<H> Registry<H> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Append a route. The pattern is compiled here, once.
    pub fn add(&mut self, method: Method, pattern: &str, handler: H) -> Result<(), RouteError> {
        let pattern = RoutePattern::new(pattern)?;

        tracing::debug!(method = %method, pattern = %pattern, "Route registered");

        self.entries.push(RouteEntry {
            method,
            pattern,
            handler,
        });
        Ok(())
    }

    /// Find the first entry whose verb equals `method` and whose pattern matches
    /// all of `path`.
    pub fn resolve(&self, method: &Method, path: &str) -> Result<&H, RouteError> {
        self.entries
            .iter()
            .find(|entry| entry.matches(method, path))
            .map(|entry| &entry.handler)
            .ok_or_else(|| RouteError::NotFound {
                method: method.clone(),
                path: path.to_string(),
            })
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no route has been registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<H> Default for Registry<H> {
    fn default() -> Self {
        Self::new()
    }
}
