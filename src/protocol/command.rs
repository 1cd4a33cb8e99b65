//! Command identifiers

use super::constants::*;

/// Protocol command, identified by its leading byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Payload-size handshake (`0x35`)
    PayloadSizes,
    /// Match start (`0x36`)
    MatchStart,
    /// Pre-frame update (`0x37`)
    PreFrame,
    /// Post-frame update (`0x38`)
    PostFrame,
    /// Match end (`0x39`)
    MatchEnd,
    /// Any command the decoder does not interpret
    Other(u8),
}

impl Command {
    pub fn from_byte(b: u8) -> Self {
        match b {
            CMD_PAYLOAD_SIZES => Command::PayloadSizes,
            CMD_MATCH_START => Command::MatchStart,
            CMD_PRE_FRAME => Command::PreFrame,
            CMD_POST_FRAME => Command::PostFrame,
            CMD_MATCH_END => Command::MatchEnd,
            other => Command::Other(other),
        }
    }

    pub fn as_byte(&self) -> u8 {
        match self {
            Command::PayloadSizes => CMD_PAYLOAD_SIZES,
            Command::MatchStart => CMD_MATCH_START,
            Command::PreFrame => CMD_PRE_FRAME,
            Command::PostFrame => CMD_POST_FRAME,
            Command::MatchEnd => CMD_MATCH_END,
            Command::Other(b) => *b,
        }
    }

    /// Whether this command is traffic that marks its source as live
    pub fn signals_activity(&self) -> bool {
        !matches!(self, Command::PayloadSizes | Command::MatchEnd)
    }
}
