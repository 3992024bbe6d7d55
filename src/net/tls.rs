//! TLS configuration and certificate loading.
//!
//! Certificates are read once, synchronously, when a TLS listener is added;
//! every connection on that listener shares the resulting acceptor.

use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::{self, ServerConfig};
use tokio_rustls::TlsAcceptor;

/// Failure to build a TLS acceptor.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse PEM: {0}")]
    Pem(#[source] std::io::Error),

    #[error("no certificate found in PEM input")]
    NoCertificate,

    #[error("no private key found in PEM input")]
    NoPrivateKey,

    #[error("invalid TLS configuration: {0}")]
    Config(#[from] rustls::Error),
}

/// Load a certificate chain and private key from PEM files.
pub fn load_tls_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, TlsError> {
    let read = |path: &Path| {
        std::fs::read(path).map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })
    };
    let cert_pem = read(cert_path)?;
    let key_pem = read(key_path)?;

    tracing::debug!(cert = %cert_path.display(), key = %key_path.display(), "Loading TLS material");
    tls_acceptor_from_pem(&cert_pem, &key_pem)
}

/// Build an acceptor from in-memory PEM data.
pub fn tls_acceptor_from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<TlsAcceptor, TlsError> {
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut BufReader::new(cert_pem))
        .collect::<Result<_, _>>()
        .map_err(TlsError::Pem)?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificate);
    }

    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut BufReader::new(key_pem))
        .map_err(TlsError::Pem)?
        .ok_or(TlsError::NoPrivateKey)?;

    let mut config = ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}
