//! Source and client entries
//!
//! This module defines the per-connection state stored in the registry.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex as SyncMutex;
use tokio::io::AsyncWrite;
use tokio::sync::{watch, Mutex};

use crate::game::GameState;
use crate::stats::SourceCounters;

/// State of a source connection
///
/// ```text
/// Connecting -> Active <-> Idle -> Terminating -> Removed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    /// Name reserved, TCP connect in progress
    Connecting,
    /// Protocol traffic flowing (or just connected)
    Active,
    /// Read timed out with no match in progress
    Idle,
    /// Removal requested, cleanup pending
    Terminating,
    /// Cleaned up and gone from the registry
    Removed,
}

impl SourceState {
    fn is_closing(self) -> bool {
        matches!(self, SourceState::Terminating | SourceState::Removed)
    }

    /// Connected and not shutting down
    pub fn is_running(self) -> bool {
        matches!(self, SourceState::Active | SourceState::Idle)
    }
}

/// Entry for one upstream console in the registry
pub struct SourceHandle {
    name: String,
    endpoint: String,
    state: watch::Sender<SourceState>,
    game: watch::Sender<GameState>,
    peer_addr: SyncMutex<Option<SocketAddr>>,
    /// Match-end payload size from the latest handshake
    match_end_size: AtomicUsize,
    pub(crate) stats: SourceCounters,
}

impl SourceHandle {
    pub(super) fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        let (state, _) = watch::channel(SourceState::Connecting);
        let (game, _) = watch::channel(GameState::new());
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            state,
            game,
            peer_addr: SyncMutex::new(None),
            match_end_size: AtomicUsize::new(1),
            stats: SourceCounters::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address the source was added with
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        *self.peer_addr.lock()
    }

    pub(super) fn set_peer_addr(&self, addr: Option<SocketAddr>) {
        *self.peer_addr.lock() = addr;
    }

    pub fn state(&self) -> SourceState {
        *self.state.borrow()
    }

    pub fn is_terminating(&self) -> bool {
        self.state().is_closing()
    }

    /// Whether clients may attach
    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// Move to `to` unless the source is already shutting down
    pub(crate) fn transition(&self, to: SourceState) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_closing() || *state == to {
                return false;
            }
            *state = to;
            true
        })
    }

    /// Flag the source for removal
    ///
    /// Returns `false` if it was already terminating or removed.
    pub(super) fn request_terminate(&self) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_closing() {
                return false;
            }
            *state = SourceState::Terminating;
            true
        })
    }

    pub(super) fn mark_removed(&self) {
        self.state.send_replace(SourceState::Removed);
    }

    /// Wait until cleanup has finished
    pub(super) async fn removed(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`
        let _ = rx.wait_for(|s| *s == SourceState::Removed).await;
    }

    pub(crate) fn match_end_size(&self) -> usize {
        self.match_end_size.load(Ordering::Relaxed)
    }

    pub(crate) fn set_match_end_size(&self, size: usize) {
        self.match_end_size.store(size, Ordering::Relaxed);
    }

    /// Publish the latest decoded state to watchers
    pub(crate) fn publish_game(&self, game: &GameState) {
        self.game.send_if_modified(|current| {
            if current == game {
                return false;
            }
            *current = game.clone();
            true
        });
    }

    pub fn watch_game(&self) -> watch::Receiver<GameState> {
        self.game.subscribe()
    }
}

impl std::fmt::Debug for SourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceHandle")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

/// Write half of a viewer connection
pub type ClientWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Shared handle to a viewer's writer; socket I/O happens outside the table lock
pub(crate) type SharedWriter = Arc<Mutex<ClientWriter>>;

/// State of a viewer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Not attached to any source
    Pending,
    /// Attached, waiting for the next match to start
    AttachedInactive,
    /// Attached and receiving relayed bytes
    AttachedActive,
}

/// Entry for one downstream viewer in the registry
pub(crate) struct ClientEntry {
    pub peer_addr: Option<SocketAddr>,
    pub writer: SharedWriter,
    pub source: Option<String>,
    pub relay_enabled: bool,
    pub in_match: bool,
    pub connected_at: Instant,
}

impl ClientEntry {
    pub fn new(writer: ClientWriter, peer_addr: Option<SocketAddr>) -> Self {
        Self {
            peer_addr,
            writer: Arc::new(Mutex::new(writer)),
            source: None,
            relay_enabled: false,
            in_match: false,
            connected_at: Instant::now(),
        }
    }

    pub fn is_attached_to(&self, source: &str) -> bool {
        self.source.as_deref() == Some(source)
    }

    /// Point at a new source (or none), back in the liveness pool
    pub fn reassign(&mut self, source: Option<String>) {
        self.source = source;
        self.relay_enabled = false;
        self.in_match = false;
    }

    pub fn state(&self) -> ClientState {
        match (&self.source, self.relay_enabled) {
            (None, _) => ClientState::Pending,
            (Some(_), false) => ClientState::AttachedInactive,
            (Some(_), true) => ClientState::AttachedActive,
        }
    }

    pub fn snapshot(&self, name: &str) -> ClientSnapshot {
        ClientSnapshot {
            name: name.to_string(),
            peer_addr: self.peer_addr,
            source: self.source.clone(),
            state: self.state(),
            in_match: self.in_match,
            connected_for: self.connected_at.elapsed(),
        }
    }
}

/// Read-only view of a viewer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSnapshot {
    pub name: String,
    pub peer_addr: Option<SocketAddr>,
    pub source: Option<String>,
    pub state: ClientState,
    pub in_match: bool,
    pub connected_for: std::time::Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_transitions() {
        let handle = SourceHandle::new("wii", "10.0.0.2:666");
        assert_eq!(handle.state(), SourceState::Connecting);
        assert!(!handle.is_running());

        assert!(handle.transition(SourceState::Active));
        assert!(!handle.transition(SourceState::Active));
        assert!(handle.transition(SourceState::Idle));
        assert!(handle.is_running());
        assert!(handle.transition(SourceState::Active));

        assert!(handle.request_terminate());
        assert!(!handle.is_running());
        assert!(!handle.request_terminate());
        assert!(handle.is_terminating());

        // terminating is sticky
        assert!(!handle.transition(SourceState::Active));
        assert_eq!(handle.state(), SourceState::Terminating);

        handle.mark_removed();
        assert_eq!(handle.state(), SourceState::Removed);
        assert!(!handle.request_terminate());
    }

    #[tokio::test]
    async fn test_removed_wakes_waiter() {
        let handle = Arc::new(SourceHandle::new("wii", "10.0.0.2:666"));
        let waiter = {
            let handle = Arc::clone(&handle);
            tokio::spawn(async move { handle.removed().await })
        };
        handle.request_terminate();
        handle.mark_removed();
        waiter.await.unwrap();
    }

    #[test]
    fn test_publish_game_skips_unchanged() {
        let handle = SourceHandle::new("wii", "10.0.0.2:666");
        let mut rx = handle.watch_game();
        rx.borrow_and_update();

        handle.publish_game(&GameState::new());
        assert!(!rx.has_changed().unwrap());

        let mut game = GameState::new();
        game.ready = true;
        handle.publish_game(&game);
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().ready);
    }

    #[test]
    fn test_client_reassign() {
        let (writer, _peer) = tokio::io::duplex(64);
        let mut entry = ClientEntry::new(Box::new(writer), None);
        assert_eq!(entry.state(), ClientState::Pending);

        entry.reassign(Some("a".into()));
        assert_eq!(entry.state(), ClientState::AttachedInactive);
        entry.relay_enabled = true;
        entry.in_match = true;
        assert_eq!(entry.state(), ClientState::AttachedActive);
        assert!(entry.is_attached_to("a"));

        entry.reassign(Some("b".into()));
        assert_eq!(entry.state(), ClientState::AttachedInactive);
        assert!(!entry.in_match);

        let snapshot = entry.snapshot("client-1");
        assert_eq!(snapshot.source.as_deref(), Some("b"));
        assert_eq!(snapshot.name, "client-1");
    }
}
