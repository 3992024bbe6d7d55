//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for the server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Worker threads driving the shared executor in `start`.
    pub workers: usize,

    /// Listeners to bind (plain or TLS).
    pub listeners: Vec<ListenerConfig>,

    /// Directories served under a URI prefix.
    pub static_files: Vec<StaticFilesConfig>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Wire-level size limits.
    pub limits: LimitsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            listeners: Vec::new(),
            static_files: Vec::new(),
            timeouts: TimeoutConfig::default(),
            limits: LimitsConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
            max_connections: 10_000,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate chain file (PEM).
    pub cert_path: PathBuf,

    /// Path to private key file (PEM).
    pub key_path: PathBuf,
}

/// A local directory exposed under a URI prefix.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StaticFilesConfig {
    /// URI prefix, e.g. "/static/".
    pub uri: String,

    /// Directory the prefix maps to.
    pub dir: PathBuf,
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Bound on waiting for a request and on running its handler.
    /// Absent means no timeout.
    pub request_secs: Option<u64>,

    /// How long dropping the server waits for workers to finish, and how
    /// long a closing WebSocket session waits for the peer's close reply.
    pub shutdown_grace_secs: u64,
}

impl TimeoutConfig {
    /// The request timeout, if one is configured.
    pub fn request(&self) -> Option<Duration> {
        self.request_secs.map(Duration::from_secs)
    }

    /// The shutdown grace period.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: None,
            shutdown_grace_secs: 5,
        }
    }
}

/// Wire-level size limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum size of a request line plus headers.
    pub max_header_bytes: usize,

    /// Maximum size of a request body.
    pub max_body_bytes: usize,

    /// Maximum size of a file returned by a static mount.
    pub max_static_file_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_header_bytes: 16 * 1024,
            max_body_bytes: 1024 * 1024,     // 1MB
            max_static_file_bytes: 32 << 20, // 32MB
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config.workers, 1);
        assert!(config.listeners.is_empty());
        assert!(config.timeouts.request().is_none());
        assert_eq!(config.limits.max_body_bytes, 1024 * 1024);
    }

    #[test]
    fn full_document_parses() {
        let config: ServerConfig = toml::from_str(
            r#"
            workers = 4

            [[listeners]]
            bind_address = "127.0.0.1:8443"
            max_connections = 64
            tls = { cert_path = "cert.pem", key_path = "key.pem" }

            [[static_files]]
            uri = "/static/"
            dir = "./www"

            [timeouts]
            request_secs = 30

            [observability]
            log_format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.workers, 4);
        assert_eq!(config.listeners[0].max_connections, 64);
        assert_eq!(
            config.listeners[0].tls.as_ref().unwrap().key_path,
            PathBuf::from("key.pem")
        );
        assert_eq!(config.static_files[0].uri, "/static/");
        assert_eq!(config.timeouts.request(), Some(Duration::from_secs(30)));
        assert_eq!(config.timeouts.shutdown_grace_secs, 5);
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }
}
