//! Path pattern compilation and matching.
//!
//! # Responsibilities
//! - Compile a route pattern once, at registration time
//! - Match a request path against the whole pattern (anchored)
//!
//! # Design Decisions
//! - Patterns are regular expressions; capture groups are allowed but ignored
//! - The compiled expression is wrapped in `^(?:...)$` so a match always covers
//!   the entire path, never a prefix or substring
//! - Matching is case-sensitive

use regex::Regex;

use crate::routing::RouteError;

/// A compiled, anchored path pattern.
#[derive(Debug, Clone)]
pub struct RoutePattern {
    source: String,
    regex: Regex,
}

impl RoutePattern {
    /// Compile `pattern` into an anchored matcher.
    pub fn new(pattern: &str) -> Result<Self, RouteError> {
        let regex = Regex::new(&format!("^(?:{pattern})$")).map_err(|source| {
            RouteError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            }
        })?;

        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    /// Returns true if `path` matches the pattern in full.
    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// The pattern as it was registered.
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl std::fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}
