//! The roster: authoritative map of username → active session.
//!
//! Enforces username uniqueness among active sessions and is the source of
//! truth for presence queries. Mutated only by admit/remove; routing only
//! ever reads it.

use parley_core::{ParleyError, ParleyResult, ServerFrame};
use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

/// Non-owning reference to an active session's write path.
///
/// Frames pushed here are drained in order by the session's writer task, so
/// per-recipient delivery order is the order of `send` calls.
#[derive(Clone)]
pub struct SessionHandle {
    pub username: String,
    outbound: mpsc::UnboundedSender<ServerFrame>,
}

impl SessionHandle {
    pub fn new(username: String, outbound: mpsc::UnboundedSender<ServerFrame>) -> Self {
        Self { username, outbound }
    }

    /// Queue a frame for delivery. Returns `false` if the session's writer
    /// has already gone away.
    pub fn send(&self, frame: ServerFrame) -> bool {
        self.outbound.send(frame).is_ok()
    }
}

/// Registry of currently admitted sessions, keyed by username.
pub struct Roster {
    inner: RwLock<HashMap<String, SessionHandle>>,
}

impl Roster {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Register an admitted session. Fails if the username is already active.
    pub async fn insert(&self, handle: SessionHandle) -> ParleyResult<()> {
        let mut inner = self.inner.write().await;
        if inner.contains_key(&handle.username) {
            return Err(ParleyError::DuplicateUser(handle.username.clone()));
        }
        debug!(username = %handle.username, "roster insert");
        inner.insert(handle.username.clone(), handle);
        Ok(())
    }

    /// Remove a session on teardown. Returns the handle if it was present.
    pub async fn remove(&self, username: &str) -> Option<SessionHandle> {
        let mut inner = self.inner.write().await;
        let removed = inner.remove(username);
        if removed.is_some() {
            debug!(username, "roster remove");
        }
        removed
    }

    /// Whether the username has an active session.
    pub async fn contains(&self, username: &str) -> bool {
        self.inner.read().await.contains_key(username)
    }

    /// Sorted snapshot of active usernames.
    pub async fn names(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        let mut names: Vec<String> = inner.keys().cloned().collect();
        names.sort();
        names
    }

    /// Deliver a frame to one session. Returns `false` if absent or dead.
    pub async fn send_to(&self, username: &str, frame: ServerFrame) -> bool {
        let inner = self.inner.read().await;
        match inner.get(username) {
            Some(handle) => handle.send(frame),
            None => false,
        }
    }

    /// Deliver a frame to every active session.
    pub async fn broadcast(&self, frame: ServerFrame) {
        let inner = self.inner.read().await;
        for handle in inner.values() {
            handle.send(frame.clone());
        }
    }

    /// Deliver a frame to every active session except `sender`.
    pub async fn broadcast_except(&self, sender: &str, frame: ServerFrame) {
        let inner = self.inner.read().await;
        for (name, handle) in inner.iter() {
            if name != sender {
                handle.send(frame.clone());
            }
        }
    }

    /// Number of active sessions.
    pub async fn count(&self) -> usize {
        self.inner.read().await.len()
    }
}

impl Default for Roster {
    fn default() -> Self {
        Self::new()
    }
}
