//! Console wire protocol
//!
//! Command framing, the payload-size handshake and the streaming parser.

pub mod command;
pub mod constants;
pub mod parser;
pub mod sizes;

pub use command::Command;
pub use parser::{MatchMetadata, ParseSummary, StreamParser};
pub use sizes::PayloadSizeTable;

use constants::{CMD_MATCH_END, END_REASON_INCONCLUSIVE};

/// Match-end command telling a viewer its match will not finish
///
/// `payload_size` is the match-end size announced by the source's handshake;
/// the frame is zero-padded to it so the viewer's own parser stays in sync.
pub fn inconclusive_end_frame(payload_size: usize) -> Vec<u8> {
    let mut frame = vec![0u8; 1 + payload_size.max(1)];
    frame[0] = CMD_MATCH_END;
    frame[1] = END_REASON_INCONCLUSIVE;
    frame
}
