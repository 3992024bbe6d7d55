//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → handed to WebServer::with_config
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; no hot reload (routes are frozen at start)
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    LimitsConfig, ListenerConfig, LogFormat, ObservabilityConfig, ServerConfig, StaticFilesConfig,
    TimeoutConfig, TlsConfig,
};
pub use validation::{validate_config, ValidationError};
