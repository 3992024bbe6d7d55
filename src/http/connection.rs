//! Per-connection state machine.
//!
//! # Responsibilities
//! - Read requests, dispatch them through the registry, write responses
//! - Honor keep-alive between requests
//! - Hand upgraded connections to a WebSocket session
//!
//! # States
//! ```text
//! Reading ──request──▶ Dispatching ──response──▶ Responding ──keep-alive──▶ Reading
//!    │                     │                         │
//!    │                     └──upgrade──▶ Upgrading   └──close──▶ Closed
//!    └──eof / error / timeout / shutdown──▶ Closed
//! ```
//!
//! # Design Decisions
//! - One request in flight per connection; no pipelining
//! - Handler failures never reach this loop: the invocation layer always
//!   produces a response
//! - `Closed` shuts the write side down, which for TLS sends `close_notify`

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{header, HeaderValue, StatusCode};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;

use crate::config::LimitsConfig;
use crate::http::codec;
use crate::http::handler::{Handler, WsHandler};
use crate::http::response::{self, RequestMeta, ResponseExt};
use crate::http::{Request, RequestExt, Response};
use crate::lifecycle::ShutdownSignal;
use crate::observability::metrics;
use crate::routing::Registry;
use crate::websocket::{handshake, session, SessionDirectory, WebSocketSession};

/// Everything a connection needs from the server, frozen at start.
#[derive(Debug)]
pub(crate) struct ServerState {
    pub(crate) registry: Registry<Handler>,
    pub(crate) directory: SessionDirectory,
    pub(crate) limits: LimitsConfig,
    pub(crate) request_timeout: Option<Duration>,
    pub(crate) close_grace: Duration,
}

enum Phase {
    Reading,
    Dispatching(Request),
    Responding(Response),
    Upgrading(Request, WsHandler),
    Closed,
}

/// Serve one accepted connection until it closes.
pub(crate) async fn serve_connection<S>(
    stream: S,
    peer_addr: Option<SocketAddr>,
    state: Arc<ServerState>,
    mut shutdown: ShutdownSignal,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut stream = BufReader::new(stream);
    let mut phase = Phase::Reading;

    loop {
        phase = match phase {
            Phase::Reading => read(&mut stream, &state, &mut shutdown).await,
            Phase::Dispatching(req) => dispatch(req, &state).await,
            Phase::Responding(res) => respond(&mut stream, res).await,
            Phase::Upgrading(req, handler) => {
                upgrade(stream, req, handler, peer_addr, &state, shutdown).await;
                return;
            }
            Phase::Closed => break,
        };
    }

    close(stream).await;
}

async fn read<S>(stream: &mut BufReader<S>, state: &ServerState, shutdown: &mut ShutdownSignal) -> Phase
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let outcome = tokio::select! {
        _ = shutdown.recv() => {
            tracing::debug!("Closing idle connection for shutdown");
            return Phase::Closed;
        }
        outcome = within(state.request_timeout, codec::read_request(stream, &state.limits)) => outcome,
    };

    match outcome {
        Some(Ok(Some(req))) => Phase::Dispatching(req),
        Some(Ok(None)) => {
            tracing::trace!("Peer closed connection");
            Phase::Closed
        }
        Some(Err(e)) => {
            tracing::debug!(error = %e, "Failed to read request");
            Phase::Closed
        }
        None => {
            tracing::debug!("Timed out waiting for request");
            Phase::Closed
        }
    }
}

async fn dispatch(req: Request, state: &ServerState) -> Phase {
    let start = Instant::now();
    let method = req.method().clone();
    let meta = RequestMeta::of(&req);

    let res = match state.registry.resolve(req.method(), req.path()) {
        Err(e) => {
            tracing::debug!(error = %e, "No route");
            response::not_found(&meta)
        }
        Ok(Handler::Upgrade(handler)) if req.is_upgrade() => {
            return Phase::Upgrading(req, handler.clone());
        }
        Ok(Handler::Upgrade(_)) => {
            let mut res = response::error(StatusCode::UPGRADE_REQUIRED, "Upgrade Required", &meta);
            res.headers_mut()
                .insert(header::UPGRADE, HeaderValue::from_static("websocket"));
            res
        }
        Ok(Handler::Request(handler)) => match within(state.request_timeout, handler.call(req)).await {
            Some(res) => res,
            None => {
                tracing::warn!(target = %meta.target, "Handler timed out");
                response::error(StatusCode::SERVICE_UNAVAILABLE, "request timed out", &meta)
            }
        },
    };

    tracing::debug!(
        method = %method,
        target = %meta.target,
        status = res.status().as_u16(),
        "Request handled"
    );
    metrics::record_request(method.as_str(), res.status().as_u16(), start);
    Phase::Responding(res)
}

async fn respond<S>(stream: &mut BufReader<S>, res: Response) -> Phase
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if let Err(e) = codec::write_response(stream, &res).await {
        tracing::debug!(error = %e, "Failed to write response");
        return Phase::Closed;
    }
    if res.keep_alive() {
        Phase::Reading
    } else {
        Phase::Closed
    }
}

async fn upgrade<S>(
    mut stream: BufReader<S>,
    req: Request,
    handler: WsHandler,
    peer_addr: Option<SocketAddr>,
    state: &ServerState,
    shutdown: ShutdownSignal,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let reply = match handshake::accept(&req) {
        Ok(reply) => reply,
        Err(e) => {
            tracing::warn!(error = %e, target = %req.target(), "Rejected WebSocket handshake");
            let mut res = response::error(StatusCode::BAD_REQUEST, e.to_string(), &RequestMeta::of(&req));
            res.set_keep_alive(false);
            if let Err(e) = codec::write_response(&mut stream, &res).await {
                tracing::debug!(error = %e, "Failed to write handshake rejection");
            }
            close(stream).await;
            return;
        }
    };

    if let Err(e) = codec::write_response(&mut stream, &reply).await {
        tracing::debug!(error = %e, "Failed to complete WebSocket handshake");
        return;
    }

    let ws = WebSocketStream::from_raw_socket(stream, Role::Server, None).await;
    let (session, outbound) = WebSocketSession::new(peer_addr);

    state.directory.add(Arc::clone(&session));
    let directory = state.directory.clone();
    session.on_close(move |session| {
        directory.remove(session);
    });
    if let Some(on_close) = handler.close_callback() {
        session.on_close(move |session| {
            let session = Arc::clone(session);
            if std::panic::catch_unwind(AssertUnwindSafe(|| on_close(session))).is_err() {
                tracing::error!("WebSocket close handler panicked");
            }
        });
    }

    tracing::info!(session_id = %session.id(), path = %req.path(), "WebSocket session opened");
    session::run(session, ws, outbound, handler, shutdown, state.close_grace).await;
}

async fn close<S>(mut stream: BufReader<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if let Err(e) = stream.shutdown().await {
        tracing::trace!(error = %e, "Shutdown of write side failed");
    }
}

/// Await `fut`, bounded by `limit` when one is set. `None` means it expired.
async fn within<F: std::future::Future>(limit: Option<Duration>, fut: F) -> Option<F::Output> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.ok(),
        None => Some(fut.await),
    }
}
