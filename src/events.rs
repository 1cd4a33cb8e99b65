//! Relay event bus
//!
//! Decouples the parser and the registry from whoever reacts to source and
//! client lifecycle changes (overlay control, operator logging). Events are a
//! closed enumeration with typed payloads.
//!
//! Delivery uses `tokio::sync::broadcast`: publishing never blocks, each
//! subscriber sees events in publication order, and a subscriber that falls
//! more than `capacity` events behind loses the oldest ones.

use std::net::SocketAddr;

use tokio::sync::broadcast;

/// Default number of events buffered per subscriber
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Notification published by the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// A source connected and was registered
    SourceAdded { source: String },
    /// Protocol traffic resumed on a source
    SourceActive { source: String },
    /// A source timed out while no match was running
    SourceInactive { source: String },
    /// A match started (`true`) or ended (`false`) on a source
    MatchStatus { source: String, in_match: bool },
    /// A handshake announced a new match
    NewMatch { source: String },
    /// A source terminated and its name is free again
    SourceRemoved { source: String },
    /// A viewer connected
    ClientConnected {
        client: String,
        peer: Option<SocketAddr>,
    },
    /// A viewer was dropped from the registry
    ClientRemoved { client: String },
}

impl RelayEvent {
    /// Source name, for source-scoped events
    pub fn source(&self) -> Option<&str> {
        match self {
            RelayEvent::SourceAdded { source }
            | RelayEvent::SourceActive { source }
            | RelayEvent::SourceInactive { source }
            | RelayEvent::MatchStatus { source, .. }
            | RelayEvent::NewMatch { source }
            | RelayEvent::SourceRemoved { source } => Some(source),
            RelayEvent::ClientConnected { .. } | RelayEvent::ClientRemoved { .. } => None,
        }
    }
}

/// Process-wide publish/subscribe channel
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RelayEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event
    ///
    /// Returns the number of subscribers that will see it.
    pub fn publish(&self, event: RelayEvent) -> usize {
        tracing::trace!(?event, "publish");
        self.tx.send(event).unwrap_or(0)
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
