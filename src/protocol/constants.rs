//! Wire-level constants

/// Liveness token, valid wherever a command boundary is expected
pub const LIVENESS_TOKEN: &[u8; 5] = b"HELO\0";

/// Handshake announcing the payload-size table
pub const CMD_PAYLOAD_SIZES: u8 = 0x35;
/// Match configuration
pub const CMD_MATCH_START: u8 = 0x36;
/// Per-frame controller input
pub const CMD_PRE_FRAME: u8 = 0x37;
/// Per-frame resulting character state
pub const CMD_POST_FRAME: u8 = 0x38;
/// Match outcome
pub const CMD_MATCH_END: u8 = 0x39;

/// Length of one handshake table entry: command id + u16 size
pub const SIZE_ENTRY_LEN: usize = 3;

/// Match-end reason sent to viewers when their source goes away mid-match
pub const END_REASON_INCONCLUSIVE: u8 = 0x00;

/// Default console port
pub const DEFAULT_CONSOLE_PORT: u16 = 666;

/// Player slots per match
pub const PLAYER_SLOTS: usize = 4;
