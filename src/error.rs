//! Error types
//!
//! Nothing in this crate is process-fatal. Every error is scoped to a single
//! source or client connection and leaves the rest of the relay running.

use thiserror::Error;

pub use crate::registry::RelayError;

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    /// Socket-level failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Registry operation rejected
    #[error(transparent)]
    Relay(#[from] RelayError),

    /// Invalid configuration value
    #[error("config error: {0}")]
    Config(String),
}

/// Stream framing conditions
///
/// These never tear down a connection. The parser reports them in its
/// summary and waits for more bytes, so they are never wrapped in [`Error`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// A command arrived before the handshake announced its payload size
    #[error("protocol desync: command 0x{command:02x} has no announced payload size")]
    Desync { command: u8 },

    /// Not enough bytes buffered for a full command
    #[error("short read: need {needed} bytes, have {available}")]
    ShortRead { needed: usize, available: usize },
}

/// Decoder failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Payload shorter than the fixed layout requires
    #[error("command 0x{command:02x} truncated: need {needed} bytes, have {available}")]
    Truncated {
        command: u8,
        needed: usize,
        available: usize,
    },

    /// Player slot outside 0..4
    #[error("invalid player slot {0}")]
    InvalidSlot(u8),

    /// Frame update arrived before any match-start
    #[error("frame update before match start")]
    MatchNotStarted,
}
