//! TCP listener implementation with backpressure.
//!
//! # Responsibilities
//! - Bind to configured address(es) eagerly, before any runtime exists
//! - Accept incoming TCP connections
//! - Enforce max_connections limit via semaphore
//!
//! # Design Decisions
//! - Binding is synchronous so `listen` reports address errors immediately
//!   and `listen` on port 0 can report the chosen port
//! - The socket joins the reactor only when the server starts

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Error type for listener operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// Failed to bind to address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to hand the socket to the runtime.
    #[error("failed to register listener: {0}")]
    Register(#[source] std::io::Error),

    /// Failed to accept connection.
    #[error("failed to accept: {0}")]
    Accept(#[source] std::io::Error),

    /// The connection limit was torn down.
    #[error("listener closed")]
    Closed,
}

/// A socket that is bound and listening but not yet driven by a runtime.
#[derive(Debug)]
pub struct BoundSocket {
    inner: std::net::TcpListener,
    local_addr: SocketAddr,
    max_connections: usize,
}

impl BoundSocket {
    /// Bind `addr` (e.g. `"0.0.0.0:8080"` or `"[::1]:0"`).
    ///
    /// On Unix the standard library sets `SO_REUSEADDR` before binding.
    pub fn bind(addr: &str, max_connections: usize) -> Result<Self, ListenerError> {
        let bind_err = |source| ListenerError::Bind {
            addr: addr.to_string(),
            source,
        };

        let inner = std::net::TcpListener::bind(addr).map_err(bind_err)?;
        inner.set_nonblocking(true).map_err(bind_err)?;
        let local_addr = inner.local_addr().map_err(bind_err)?;

        tracing::debug!(address = %local_addr, "Socket bound");

        Ok(Self {
            inner,
            local_addr,
            max_connections,
        })
    }

    /// Address actually bound; reports the chosen port when binding port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// A bounded TCP listener that limits concurrent connections.
///
/// Uses a semaphore to enforce `max_connections`. When the limit is reached,
/// new connections wait in the kernel backlog until a slot becomes available.
pub struct Listener {
    /// The underlying TCP listener.
    inner: TcpListener,
    /// Semaphore to limit concurrent connections.
    connection_limit: Arc<Semaphore>,
    /// Configured maximum connections.
    max_connections: usize,
    local_addr: SocketAddr,
}

impl Listener {
    /// Register a bound socket with the current runtime.
    pub fn from_bound(socket: BoundSocket) -> Result<Self, ListenerError> {
        let inner = TcpListener::from_std(socket.inner).map_err(ListenerError::Register)?;

        tracing::info!(
            address = %socket.local_addr,
            max_connections = socket.max_connections,
            "Listener bound"
        );

        Ok(Self {
            inner,
            connection_limit: Arc::new(Semaphore::new(socket.max_connections)),
            max_connections: socket.max_connections,
            local_addr: socket.local_addr,
        })
    }

    /// Accept a new connection, respecting the connection limit.
    ///
    /// Returns the stream and a permit that must be held for the connection's lifetime.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        // Acquire permit first (backpressure)
        let permit = Arc::clone(&self.connection_limit)
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;

        let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;

        tracing::debug!(
            peer_addr = %addr,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get current available connection slots.
    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    /// Get configured maximum connections.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// A permit representing a connection slot.
///
/// When dropped, the connection slot is released back to the pool, even if
/// the connection task panicked.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_reports_chosen_port() {
        let socket = BoundSocket::bind("127.0.0.1:0", 4).unwrap();
        assert_ne!(socket.local_addr().port(), 0);
    }

    #[test]
    fn bind_rejects_bad_address() {
        let err = BoundSocket::bind("not-an-address", 4).unwrap_err();
        assert!(matches!(err, ListenerError::Bind { .. }));
    }

    #[test]
    fn bind_conflict_is_reported() {
        let first = BoundSocket::bind("127.0.0.1:0", 4).unwrap();
        let err = BoundSocket::bind(&first.local_addr().to_string(), 4).unwrap_err();
        assert!(matches!(err, ListenerError::Bind { .. }));
    }

    #[tokio::test]
    async fn permits_bound_concurrent_connections() {
        let socket = BoundSocket::bind("127.0.0.1:0", 1).unwrap();
        let addr = socket.local_addr();
        let listener = Listener::from_bound(socket).unwrap();
        assert_eq!(listener.max_connections(), 1);

        let _client = TcpStream::connect(addr).await.unwrap();
        let (_stream, _peer, permit) = listener.accept().await.unwrap();
        assert_eq!(listener.available_permits(), 0);

        drop(permit);
        assert_eq!(listener.available_permits(), 1);
    }
}
