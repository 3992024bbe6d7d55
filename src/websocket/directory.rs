//! Directory of live WebSocket sessions.
//!
//! # Responsibilities
//! - Track every open session for application-driven broadcast
//! - Hand out point-in-time snapshots for lock-free iteration
//!
//! # Design Decisions
//! - One coarse mutex; held only for a push, a removal or a copy, never
//!   across an await point
//! - Removal compares handles by identity and is idempotent, because normal
//!   close and shutdown may race to remove the same session
//! - A snapshot can contain a session that closes right after the copy; a
//!   send to it fails and is ignored by the caller

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::observability::metrics;
use crate::websocket::SessionHandle;

/// Thread-safe set of live sessions, in registration order.
#[derive(Debug, Clone, Default)]
pub struct SessionDirectory {
    sessions: Arc<Mutex<Vec<SessionHandle>>>,
}

impl SessionDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session.
    pub fn add(&self, session: SessionHandle) {
        let mut sessions = self.lock();
        sessions.push(session);
        metrics::set_ws_sessions(sessions.len());
    }

    /// Remove a session. Returns false if it was already absent.
    pub fn remove(&self, session: &SessionHandle) -> bool {
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|s| !Arc::ptr_eq(s, session));
        metrics::set_ws_sessions(sessions.len());
        sessions.len() != before
    }

    /// Copy of the current set, taken under the lock.
    pub fn snapshot(&self) -> Vec<SessionHandle> {
        self.lock().clone()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if no session is registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SessionHandle>> {
        // The guarded Vec has no invariant a panicking holder could break.
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::WebSocketSession;

    #[test]
    fn remove_is_idempotent() {
        let directory = SessionDirectory::new();
        let (a, _rx_a) = WebSocketSession::detached();
        let (b, _rx_b) = WebSocketSession::detached();
        directory.add(Arc::clone(&a));
        directory.add(Arc::clone(&b));

        assert!(directory.remove(&a));
        assert!(!directory.remove(&a));

        let snapshot = directory.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(Arc::ptr_eq(&snapshot[0], &b));
    }

    #[test]
    fn snapshot_reflects_completed_mutations() {
        let directory = SessionDirectory::new();
        let sessions: Vec<_> = (0..3).map(|_| WebSocketSession::detached()).collect();
        for (session, _) in &sessions {
            directory.add(Arc::clone(session));
        }
        directory.remove(&sessions[1].0);

        let snapshot = directory.snapshot();
        let ids: Vec<_> = snapshot.iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec![sessions[0].0.id(), sessions[2].0.id()]);
    }

    #[test]
    fn snapshot_is_detached_from_later_changes() {
        let directory = SessionDirectory::new();
        let (a, _rx) = WebSocketSession::detached();
        directory.add(Arc::clone(&a));

        let snapshot = directory.snapshot();
        directory.remove(&a);

        assert_eq!(snapshot.len(), 1);
        assert!(directory.is_empty());
    }

    #[test]
    fn concurrent_adds_and_removes() {
        let directory = SessionDirectory::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let directory = directory.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let (session, _rx) = WebSocketSession::detached();
                        directory.add(Arc::clone(&session));
                        let _ = directory.snapshot();
                        assert!(directory.remove(&session));
                        assert!(!directory.remove(&session));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(directory.is_empty());
    }
}
