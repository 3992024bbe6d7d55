//! Server lifecycle: routes, listeners, workers.
//!
//! # Responsibilities
//! - Collect routes and listeners before the server runs
//! - Own the runtime that drives accept loops and connections
//! - Stop accepting and wind connections down on request
//!
//! # Design Decisions
//! - The registry is frozen into shared state at start; later registration
//!   fails with [`ServerError::AlreadyRunning`]
//! - Sockets bind eagerly in `listen*`, so address errors surface there
//! - `start(n)` runs `n` background workers and returns; `run` blocks the
//!   caller until stopped, on a single-threaded runtime if none was started
//! - Dropping the server is the join point: it stops and waits up to the
//!   configured grace period for in-flight work

use std::future::Future;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use tokio::runtime::{Builder, Runtime};
use tokio_rustls::TlsAcceptor;
use tracing::Instrument;

use crate::config::{ListenerConfig, ServerConfig, TlsConfig};
use crate::error::ServerError;
use crate::http::connection::{serve_connection, ServerState};
use crate::http::handler::{Handler, IntoResponse, RequestHandler, WsHandler};
use crate::http::static_files::StaticFiles;
use crate::http::Request;
use crate::lifecycle::Shutdown;
use crate::net::{load_tls_acceptor, BoundSocket, ConnectionTracker, Listener, ListenerError};
use crate::routing::Registry;
use crate::websocket::{SessionDirectory, SessionHandle};

/// Pause after a failed accept, so a persistent error (e.g. out of file
/// descriptors) does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// A socket waiting for the server to start.
struct PendingListener {
    socket: BoundSocket,
    tls: Option<TlsAcceptor>,
}

/// Embeddable HTTP and WebSocket server.
///
/// ```no_run
/// use switchyard::{Method, WebServer};
///
/// # fn main() -> Result<(), switchyard::ServerError> {
/// let mut server = WebServer::new();
/// server.add_http_handler(Method::GET, "/hello/?", |_req| async { "Hello\n" })?;
/// server.listen(8080)?;
/// server.run()?;
/// # Ok(())
/// # }
/// ```
pub struct WebServer {
    config: ServerConfig,
    registry: Registry<Handler>,
    pending: Vec<PendingListener>,
    local_addrs: Vec<SocketAddr>,
    directory: SessionDirectory,
    tracker: ConnectionTracker,
    shutdown: Shutdown,
    state: Option<Arc<ServerState>>,
    runtime: Option<Runtime>,
}

impl WebServer {
    /// Create a server with default configuration.
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    /// Create a server using `config` for limits, timeouts and defaults.
    ///
    /// Listeners and static mounts named in `config` are not applied until
    /// [`bind_configured_listeners`](Self::bind_configured_listeners) and
    /// [`serve_configured_files`](Self::serve_configured_files) are called.
    pub fn with_config(config: ServerConfig) -> Self {
        Self {
            config,
            registry: Registry::new(),
            pending: Vec::new(),
            local_addrs: Vec::new(),
            directory: SessionDirectory::new(),
            tracker: ConnectionTracker::new(),
            shutdown: Shutdown::new(),
            state: None,
            runtime: None,
        }
    }

    /// Register a request handler for `method` on paths fully matching `pattern`.
    ///
    /// Routes are tried in registration order; the first match wins.
    pub fn add_http_handler<F, Fut, R>(
        &mut self,
        method: Method,
        pattern: &str,
        handler: F,
    ) -> Result<&mut Self, ServerError>
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoResponse,
    {
        self.add_route(method, pattern, Handler::Request(RequestHandler::new(handler)))
    }

    /// Register a WebSocket route. Upgrade requests are always `GET`.
    pub fn add_ws_handler(&mut self, pattern: &str, handler: WsHandler) -> Result<&mut Self, ServerError> {
        self.add_route(Method::GET, pattern, Handler::Upgrade(handler))
    }

    /// Serve files from `dir` for `GET` requests below `uri`.
    ///
    /// The mount is an ordinary route: register it after more specific routes
    /// that share its prefix.
    pub fn serve_files(&mut self, uri: &str, dir: impl Into<PathBuf>) -> Result<&mut Self, ServerError> {
        let files = Arc::new(StaticFiles::new(uri, dir, self.config.limits.max_static_file_bytes));
        let pattern = files.pattern();
        tracing::debug!(pattern = %pattern, dir = %files.dir().display(), "Serving static files");

        self.add_http_handler(Method::GET, &pattern, move |req| {
            let files = Arc::clone(&files);
            async move { files.serve(req).await }
        })
    }

    /// Mount every `[[static_files]]` entry of the configuration, in order.
    pub fn serve_configured_files(&mut self) -> Result<&mut Self, ServerError> {
        let mounts = self.config.static_files.clone();
        for mount in mounts {
            self.serve_files(&mount.uri, mount.dir)?;
        }
        Ok(self)
    }

    /// Accept plain connections on `port` on every interface.
    ///
    /// Binds the dual-stack `[::]`, or `0.0.0.0` on hosts without IPv6.
    pub fn listen(&mut self, port: u16) -> Result<SocketAddr, ServerError> {
        self.listen_any(port, None)
    }

    /// Accept TLS connections on `port` on every interface, like [`listen`](Self::listen).
    ///
    /// The certificate chain and key are loaded now; a bad file fails here.
    pub fn listen_tls(&mut self, tls: &TlsConfig, port: u16) -> Result<SocketAddr, ServerError> {
        self.listen_any(port, Some(tls))
    }

    /// Accept connections on `addr`, with TLS when `tls` is given.
    ///
    /// Returns the bound address, which carries the chosen port when `addr`
    /// uses port 0.
    pub fn listen_on(&mut self, addr: SocketAddr, tls: Option<&TlsConfig>) -> Result<SocketAddr, ServerError> {
        let config = ListenerConfig {
            bind_address: addr.to_string(),
            tls: tls.cloned(),
            ..ListenerConfig::default()
        };
        self.add_listener(&config)
    }

    /// Bind every `[[listeners]]` entry of the configuration.
    pub fn bind_configured_listeners(&mut self) -> Result<Vec<SocketAddr>, ServerError> {
        let listeners = self.config.listeners.clone();
        listeners.iter().map(|config| self.add_listener(config)).collect()
    }

    /// Start `workers` worker threads and return immediately.
    pub fn start(&mut self, workers: usize) -> Result<(), ServerError> {
        if workers == 0 {
            return Err(ServerError::NoWorkers);
        }
        if self.is_started() {
            return Err(ServerError::AlreadyRunning);
        }

        let runtime = Builder::new_multi_thread()
            .worker_threads(workers)
            .thread_name("switchyard-worker")
            .enable_all()
            .build()
            .map_err(ServerError::Runtime)?;

        tracing::info!(workers, "Starting server");
        self.launch(runtime)
    }

    /// Serve on the calling thread until [`stop`](Self::stop) is requested.
    ///
    /// Without a prior [`start`](Self::start) the calling thread is the only
    /// worker; otherwise it waits alongside the started workers.
    pub fn run(&mut self) -> Result<(), ServerError> {
        self.run_until(std::future::pending())
    }

    /// Like [`run`](Self::run), but also stops when `until` completes.
    pub fn run_until<F>(&mut self, until: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        if !self.is_started() {
            let runtime = Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(ServerError::Runtime)?;
            tracing::info!("Running server on the calling thread");
            self.launch(runtime)?;
        }

        let mut signal = self.shutdown.subscribe();
        let shutdown = self.shutdown.clone();
        let Some(runtime) = self.runtime.as_ref() else {
            return Ok(());
        };
        runtime.block_on(async move {
            tokio::select! {
                _ = signal.recv() => {}
                _ = until => shutdown.trigger(),
            }
        });

        tracing::info!("Server stopped");
        Ok(())
    }

    /// Request shutdown: accept loops exit, idle connections close and
    /// WebSocket sessions are closed. Idempotent.
    pub fn stop(&self) {
        self.shutdown.trigger();
    }

    /// Snapshot of the live WebSocket sessions.
    pub fn sessions(&self) -> Vec<SessionHandle> {
        self.directory.snapshot()
    }

    /// Cloneable handle for use inside handlers and from other threads.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            directory: self.directory.clone(),
            tracker: self.tracker.clone(),
            shutdown: self.shutdown.clone(),
        }
    }

    /// Addresses bound so far, in `listen` order.
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    /// Configuration the server was built with.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn is_started(&self) -> bool {
        self.state.is_some()
    }

    fn add_route(&mut self, method: Method, pattern: &str, handler: Handler) -> Result<&mut Self, ServerError> {
        if self.is_started() {
            return Err(ServerError::AlreadyRunning);
        }
        self.registry.add(method, pattern, handler)?;
        Ok(self)
    }

    fn listen_any(&mut self, port: u16, tls: Option<&TlsConfig>) -> Result<SocketAddr, ServerError> {
        match self.listen_on(SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)), tls) {
            Err(ServerError::Listener(ListenerError::Bind { source, .. })) => {
                tracing::debug!(error = %source, "IPv6 bind failed, falling back to IPv4");
                self.listen_on(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)), tls)
            }
            other => other,
        }
    }

    fn add_listener(&mut self, config: &ListenerConfig) -> Result<SocketAddr, ServerError> {
        let tls = config
            .tls
            .as_ref()
            .map(|tls| load_tls_acceptor(&tls.cert_path, &tls.key_path))
            .transpose()?;
        let socket = BoundSocket::bind(&config.bind_address, config.max_connections)?;
        let addr = socket.local_addr();
        self.local_addrs.push(addr);

        let pending = PendingListener { socket, tls };
        match (&self.runtime, &self.state) {
            (Some(runtime), Some(state)) => spawn_listener(
                runtime,
                pending,
                Arc::clone(state),
                self.tracker.clone(),
                self.shutdown.clone(),
            )?,
            _ => self.pending.push(pending),
        }
        Ok(addr)
    }

    fn launch(&mut self, runtime: Runtime) -> Result<(), ServerError> {
        let state = Arc::new(ServerState {
            registry: std::mem::take(&mut self.registry),
            directory: self.directory.clone(),
            limits: self.config.limits.clone(),
            request_timeout: self.config.timeouts.request(),
            close_grace: self.config.timeouts.shutdown_grace(),
        });
        tracing::debug!(routes = state.registry.len(), "Routes frozen");

        if self.pending.is_empty() {
            tracing::warn!("Server started without listeners");
        }
        for pending in std::mem::take(&mut self.pending) {
            spawn_listener(
                &runtime,
                pending,
                Arc::clone(&state),
                self.tracker.clone(),
                self.shutdown.clone(),
            )?;
        }

        self.state = Some(state);
        self.runtime = Some(runtime);
        Ok(())
    }
}

impl Default for WebServer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WebServer {
    fn drop(&mut self) {
        self.shutdown.trigger();
        let Some(runtime) = self.runtime.take() else {
            return;
        };

        if tokio::runtime::Handle::try_current().is_ok() {
            // Blocking inside another runtime would panic.
            runtime.shutdown_background();
        } else {
            runtime.shutdown_timeout(self.config.timeouts.shutdown_grace());
        }
        tracing::debug!("Runtime shut down");
    }
}

/// Cloneable view of a server for handlers and other threads.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    directory: SessionDirectory,
    tracker: ConnectionTracker,
    shutdown: Shutdown,
}

impl ServerHandle {
    /// Snapshot of the live WebSocket sessions.
    pub fn sessions(&self) -> Vec<SessionHandle> {
        self.directory.snapshot()
    }

    /// Send `text` to every live session. Returns how many accepted it;
    /// sessions that closed concurrently are skipped.
    pub fn broadcast(&self, text: &str) -> usize {
        self.directory
            .snapshot()
            .iter()
            .filter(|session| session.send(text).is_ok())
            .count()
    }

    /// Request shutdown. Idempotent.
    pub fn stop(&self) {
        self.shutdown.trigger();
    }

    /// Whether shutdown has been requested.
    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_triggered()
    }

    /// Connections currently being served, across all listeners.
    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }
}

fn spawn_listener(
    runtime: &Runtime,
    pending: PendingListener,
    state: Arc<ServerState>,
    tracker: ConnectionTracker,
    shutdown: Shutdown,
) -> Result<(), ServerError> {
    let _enter = runtime.enter();
    let listener = Listener::from_bound(pending.socket)?;
    runtime.spawn(accept_loop(listener, pending.tls, state, tracker, shutdown));
    Ok(())
}

async fn accept_loop(
    listener: Listener,
    tls: Option<TlsAcceptor>,
    state: Arc<ServerState>,
    tracker: ConnectionTracker,
    shutdown: Shutdown,
) {
    let address = listener.local_addr();
    let mut signal = shutdown.subscribe();
    tracing::info!(address = %address, tls = tls.is_some(), "Accepting connections");

    loop {
        let accepted = tokio::select! {
            _ = signal.recv() => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, peer_addr, permit) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(address = %address, error = %e, "Accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
        }

        let guard = tracker.track();
        let span = tracing::debug_span!("connection", id = %guard.id(), peer = %peer_addr);
        let state = Arc::clone(&state);
        let tls = tls.clone();
        let mut conn_shutdown = shutdown.subscribe();

        tokio::spawn(
            async move {
                let _permit = permit;
                let _guard = guard;
                tracing::trace!("Connection opened");

                let Some(acceptor) = tls else {
                    serve_connection(stream, Some(peer_addr), state, conn_shutdown).await;
                    return;
                };
                let handshake = tokio::select! {
                    _ = conn_shutdown.recv() => return,
                    handshake = acceptor.accept(stream) => handshake,
                };
                match handshake {
                    Ok(stream) => serve_connection(stream, Some(peer_addr), state, conn_shutdown).await,
                    Err(e) => tracing::warn!(error = %e, "TLS handshake failed"),
                }
            }
            .instrument(span),
        );
    }

    tracing::info!(address = %address, "Listener stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_are_frozen_after_start() {
        let mut server = WebServer::new();
        server
            .add_http_handler(Method::GET, "/a", |_req| async { "a" })
            .unwrap();
        server.start(1).unwrap();

        let err = server
            .add_http_handler(Method::GET, "/b", |_req| async { "b" })
            .err()
            .unwrap();
        assert!(matches!(err, ServerError::AlreadyRunning));
        assert!(matches!(server.start(1), Err(ServerError::AlreadyRunning)));
    }

    #[test]
    fn invalid_pattern_is_rejected_at_registration() {
        let mut server = WebServer::new();
        let err = server
            .add_http_handler(Method::GET, "/broken(", |_req| async { "x" })
            .err()
            .unwrap();
        assert!(matches!(err, ServerError::Route(_)));
    }

    #[test]
    fn zero_workers_is_rejected() {
        let mut server = WebServer::new();
        assert!(matches!(server.start(0), Err(ServerError::NoWorkers)));
    }

    #[test]
    fn listen_reports_bound_port() {
        let mut server = WebServer::new();
        let addr = server
            .listen_on(SocketAddr::from(([127, 0, 0, 1], 0)), None)
            .unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(server.local_addrs(), &[addr]);
    }

    #[test]
    fn listen_accepts_ipv4_loopback() {
        let mut server = WebServer::new();
        let addr = server.listen(0).unwrap();
        assert!(addr.ip().is_unspecified());
        assert_ne!(addr.port(), 0);

        // Bound but not yet started: the kernel still completes the handshake.
        std::net::TcpStream::connect((Ipv4Addr::LOCALHOST, addr.port())).unwrap();
    }

    #[test]
    fn missing_tls_material_fails_listen() {
        let mut server = WebServer::new();
        let tls = TlsConfig {
            cert_path: "/nonexistent/cert.pem".into(),
            key_path: "/nonexistent/key.pem".into(),
        };
        assert!(matches!(
            server.listen_on(SocketAddr::from(([127, 0, 0, 1], 0)), Some(&tls)),
            Err(ServerError::Tls(_))
        ));
    }

    #[test]
    fn run_returns_after_stop_from_handle() {
        let mut server = WebServer::new();
        server
            .listen_on(SocketAddr::from(([127, 0, 0, 1], 0)), None)
            .unwrap();
        let handle = server.handle();

        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            handle.stop();
        });
        server.run().unwrap();
        stopper.join().unwrap();
        assert!(server.handle().is_stopped());
    }

    #[test]
    fn run_until_stops_when_future_completes() {
        let mut server = WebServer::new();
        server
            .run_until(async { tokio::time::sleep(Duration::from_millis(10)).await })
            .unwrap();
        assert!(server.handle().is_stopped());
    }

    #[test]
    fn broadcast_skips_closed_sessions() {
        let server = WebServer::new();
        let handle = server.handle();
        let (open, mut rx) = crate::websocket::WebSocketSession::detached();
        let (closed, _rx) = crate::websocket::WebSocketSession::detached();
        closed.close();
        server.directory.add(Arc::clone(&open));
        server.directory.add(closed);

        assert_eq!(handle.broadcast("hello"), 1);
        assert_eq!(
            rx.try_recv().unwrap(),
            tokio_tungstenite::tungstenite::Message::text("hello")
        );
        assert_eq!(server.sessions().len(), 2);
    }
}
