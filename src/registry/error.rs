//! Registry error types
//!
//! Error types for relay registry operations.

use thiserror::Error;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// A source with this name is already registered
    #[error("source name already registered: {0}")]
    NameConflict(String),

    /// Connecting to the console failed or timed out
    #[error("source {name} unreachable at {addr}: {reason}")]
    SourceUnreachable {
        name: String,
        addr: String,
        reason: String,
    },

    /// No source with this name
    #[error("source not found: {0}")]
    SourceNotFound(String),

    /// No client with this name
    #[error("client not found: {0}")]
    ClientNotFound(String),

    /// Write or read failed on an established socket
    #[error("peer disconnected: {0}")]
    PeerDisconnected(String),
}
