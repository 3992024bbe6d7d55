//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (workers, limits, timeouts)
//! - Check that referenced files and directories exist
//! - Detect duplicate listener addresses
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::config::schema::ServerConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("workers must be at least 1")]
    NoWorkers,

    #[error("listener address `{0}` is not a socket address")]
    BadAddress(String),

    #[error("listener address `{0}` is configured twice")]
    DuplicateAddress(SocketAddr),

    #[error("listener `{0}` must allow at least one connection")]
    ZeroConnections(String),

    #[error("TLS file not found: {0}")]
    MissingTlsFile(PathBuf),

    #[error("static files uri `{0}` must start with '/'")]
    BadStaticUri(String),

    #[error("static files directory not found: {0}")]
    MissingStaticDir(PathBuf),

    #[error("timeouts.request_secs must be greater than 0 when set")]
    ZeroRequestTimeout,

    #[error("limits.{0} must be greater than 0")]
    ZeroLimit(&'static str),

    #[error("metrics address `{0}` is not a socket address")]
    BadMetricsAddress(String),
}

/// Check `config` for semantic errors, collecting every problem found.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.workers == 0 {
        errors.push(ValidationError::NoWorkers);
    }

    let mut seen = HashSet::new();
    for listener in &config.listeners {
        match listener.bind_address.parse::<SocketAddr>() {
            Ok(addr) => {
                // Port 0 asks the OS for a fresh port each time; never a clash.
                if addr.port() != 0 && !seen.insert(addr) {
                    errors.push(ValidationError::DuplicateAddress(addr));
                }
            }
            Err(_) => errors.push(ValidationError::BadAddress(listener.bind_address.clone())),
        }
        if listener.max_connections == 0 {
            errors.push(ValidationError::ZeroConnections(listener.bind_address.clone()));
        }
        if let Some(tls) = &listener.tls {
            for path in [&tls.cert_path, &tls.key_path] {
                if !path.is_file() {
                    errors.push(ValidationError::MissingTlsFile(path.clone()));
                }
            }
        }
    }

    for mount in &config.static_files {
        if !mount.uri.starts_with('/') {
            errors.push(ValidationError::BadStaticUri(mount.uri.clone()));
        }
        if !mount.dir.is_dir() {
            errors.push(ValidationError::MissingStaticDir(mount.dir.clone()));
        }
    }

    if config.timeouts.request_secs == Some(0) {
        errors.push(ValidationError::ZeroRequestTimeout);
    }

    let limits = &config.limits;
    for (name, value) in [
        ("max_header_bytes", limits.max_header_bytes),
        ("max_body_bytes", limits.max_body_bytes),
        ("max_static_file_bytes", limits.max_static_file_bytes),
    ] {
        if value == 0 {
            errors.push(ValidationError::ZeroLimit(name));
        }
    }

    let observability = &config.observability;
    if observability.metrics_enabled && observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BadMetricsAddress(observability.metrics_address.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
