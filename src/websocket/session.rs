//! A live, upgraded WebSocket connection.
//!
//! # Responsibilities
//! - Own the framed duplex stream for the lifetime of the session
//! - Serialize outbound frames from any number of concurrent senders
//! - Run the read loop, delivering messages to the route's callback
//! - Fire close callbacks exactly once
//!
//! # Design Decisions
//! - `send` enqueues onto an unbounded channel drained by a single writer
//!   task, so frames never interleave and callers never block on the socket
//! - The session is shared (`Arc`) between its read loop and the directory;
//!   it is freed when both have let go
//! - Any read error, including a peer close, ends the loop; no retry
//! - After a local close the peer has a grace period to answer before the
//!   session is torn down regardless

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use crate::http::handler::WsHandler;
use crate::lifecycle::ShutdownSignal;
use crate::observability::metrics;

/// Unique identifier for a session.
pub type SessionId = Uuid;

/// Shared handle on a session.
pub type SessionHandle = Arc<WebSocketSession>;

type CloseHook = Box<dyn FnOnce(&SessionHandle) + Send>;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Reading and accepting sends.
    Open,
    /// A close frame has been queued; sends are refused.
    Closing,
    /// The read loop has ended and close callbacks have fired.
    Closed,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Open,
            1 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }
}

/// Error returned by operations on a session that is no longer open.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("session {0} is closed")]
    Closed(SessionId),
}

/// One upgraded connection.
pub struct WebSocketSession {
    id: SessionId,
    peer_addr: Option<SocketAddr>,
    state: AtomicU8,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    close_hooks: Mutex<Option<Vec<CloseHook>>>,
    closing: Notify,
}

impl WebSocketSession {
    /// Create a session and the receiving end of its write queue.
    pub(crate) fn new(peer_addr: Option<SocketAddr>) -> (SessionHandle, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(Self {
            id: Uuid::new_v4(),
            peer_addr,
            state: AtomicU8::new(SessionState::Open as u8),
            outbound: Mutex::new(Some(tx)),
            close_hooks: Mutex::new(Some(Vec::new())),
            closing: Notify::new(),
        });
        (session, rx)
    }

    /// A session with no stream behind it; its queue is returned to the caller.
    #[cfg(test)]
    pub(crate) fn detached() -> (SessionHandle, mpsc::UnboundedReceiver<Message>) {
        Self::new(None)
    }

    /// Unique session id.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Remote address, when known.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Queue a text frame for the peer.
    ///
    /// Safe to call from any task, concurrently with the read loop and other
    /// senders. Fails once the session is closing or closed.
    pub fn send(&self, text: impl Into<String>) -> Result<(), SessionError> {
        if self.state() != SessionState::Open {
            return Err(SessionError::Closed(self.id));
        }
        self.enqueue(Message::text(text.into()))
    }

    /// Start the closing handshake. Later sends fail.
    pub fn close(&self) {
        let was_open = self
            .state
            .compare_exchange(
                SessionState::Open as u8,
                SessionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if was_open {
            tracing::debug!(session_id = %self.id, "Closing session");
            if let Err(e) = self.enqueue(Message::Close(None)) {
                tracing::trace!(session_id = %self.id, error = %e, "Close frame not queued");
            }
            self.closing.notify_one();
        }
    }

    /// Register a callback to run once when the session closes. Runs
    /// immediately if it already has.
    pub(crate) fn on_close<F>(self: &Arc<Self>, hook: F)
    where
        F: FnOnce(&SessionHandle) + Send + 'static,
    {
        let mut hooks = self.close_hooks.lock().unwrap_or_else(PoisonError::into_inner);
        match hooks.as_mut() {
            Some(hooks) => hooks.push(Box::new(hook)),
            None => {
                drop(hooks);
                hook(self);
            }
        }
    }

    /// Mark the session closed, stop the writer and fire close callbacks.
    /// Only the first call has any effect.
    pub(crate) fn finish(self: &Arc<Self>) {
        self.state.store(SessionState::Closed as u8, Ordering::Release);
        self.outbound.lock().unwrap_or_else(PoisonError::into_inner).take();

        let hooks = self.close_hooks.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(hooks) = hooks {
            tracing::debug!(session_id = %self.id, "Session closed");
            for hook in hooks {
                hook(self);
            }
        }
    }

    fn enqueue(&self, msg: Message) -> Result<(), SessionError> {
        let outbound = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        outbound
            .as_ref()
            .ok_or(SessionError::Closed(self.id))?
            .send(msg)
            .map_err(|_| SessionError::Closed(self.id))
    }
}

impl fmt::Debug for WebSocketSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketSession")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state())
            .finish()
    }
}

/// Drive `session` over `stream` until it closes.
///
/// The writer runs as its own task; the read loop runs on the caller's task,
/// so the connection stays accounted for while the session lives.
/// `close_grace` bounds both the wait for the peer's close reply and the
/// final flush of the writer.
pub(crate) async fn run<S>(
    session: SessionHandle,
    stream: WebSocketStream<S>,
    outbound: mpsc::UnboundedReceiver<Message>,
    handler: WsHandler,
    shutdown: ShutdownSignal,
    close_grace: Duration,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let id = session.id();
    let (sink, source) = stream.split();
    let mut writer = tokio::spawn(write_loop(id, sink, outbound));
    read_loop(session, source, handler, shutdown, close_grace).await;

    match tokio::time::timeout(close_grace, &mut writer).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(session_id = %id, error = %e, "WebSocket writer task failed"),
        Err(_) => {
            tracing::debug!(session_id = %id, "WebSocket writer did not drain in time");
            writer.abort();
        }
    }
}

async fn write_loop<S>(
    id: SessionId,
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(msg) = outbound.recv().await {
        if let Err(e) = sink.send(msg).await {
            tracing::debug!(session_id = %id, error = %e, "WebSocket write failed");
            break;
        }
    }
    if let Err(e) = sink.close().await {
        tracing::trace!(session_id = %id, error = %e, "WebSocket close failed");
    }
}

async fn read_loop<S>(
    session: SessionHandle,
    mut source: SplitStream<WebSocketStream<S>>,
    handler: WsHandler,
    mut shutdown: ShutdownSignal,
    close_grace: Duration,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut deadline: Option<Instant> = None;
    loop {
        let next = tokio::select! {
            _ = shutdown.recv() => {
                session.close();
                break;
            }
            _ = session.closing.notified(), if deadline.is_none() => {
                deadline = Some(Instant::now() + close_grace);
                continue;
            }
            _ = expire(deadline) => {
                tracing::debug!(session_id = %session.id(), "Peer did not answer close");
                break;
            }
            next = source.next() => next,
        };

        let text = match next {
            Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
            Some(Ok(Message::Binary(data))) => String::from_utf8_lossy(&data).into_owned(),
            Some(Ok(Message::Close(frame))) => {
                tracing::debug!(session_id = %session.id(), ?frame, "Peer closed session");
                break;
            }
            // Ping, pong and raw frames are handled by the codec.
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::debug!(session_id = %session.id(), error = %e, "WebSocket read failed");
                break;
            }
            None => break,
        };

        metrics::record_ws_message();
        handler.deliver(text, Arc::clone(&session)).await;
    }

    session.finish();
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
