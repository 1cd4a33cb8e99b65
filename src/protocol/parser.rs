//! Streaming command parser
//!
//! Splits an arbitrarily chunked console stream into commands:
//!
//! ```text
//! ... | id (1) | payload (sizes[id]) | id (1) | payload ... | HELO\0 | ...
//! ```
//!
//! Payload lengths come from the handshake (`0x35`) sent at the start of
//! every match. Bytes that do not yet form a complete command are carried
//! over to the next [`StreamParser::feed`] call, so the decoded result does
//! not depend on how TCP split the stream.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::BytesMut;

use crate::error::ProtocolError;
use crate::events::{EventBus, RelayEvent};
use crate::game::{self, GameState};
use crate::sink::ByteSink;

use super::command::Command;
use super::constants::*;
use super::sizes::PayloadSizeTable;

/// Running per-match bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchMetadata {
    /// When the handshake for this match was seen
    pub started_at: Option<SystemTime>,
    /// Frame index of the latest non-follower post-frame
    pub last_frame: i32,
    /// Post-frame count per slot per internal character id
    pub char_usage: HashMap<u8, HashMap<u8, u32>>,
}

impl MatchMetadata {
    fn starting_now() -> Self {
        Self {
            started_at: Some(SystemTime::now()),
            ..Default::default()
        }
    }

    /// Frames a slot spent on a given internal character
    pub fn usage(&self, slot: u8, internal_char_id: u8) -> u32 {
        self.char_usage
            .get(&slot)
            .and_then(|chars| chars.get(&internal_char_id))
            .copied()
            .unwrap_or(0)
    }
}

/// What one `feed` call did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseSummary {
    /// Complete commands consumed
    pub commands: usize,
    /// Bytes handed to the sink
    pub appended: usize,
    /// A handshake started a new match
    pub new_match: bool,
    /// A match-end was consumed
    pub match_ended: bool,
    /// Last match status change, in stream order
    pub match_status: Option<bool>,
    /// Payloads the decoder rejected
    pub decode_errors: usize,
    /// Set when parsing stopped on an unannounced command
    pub desync: Option<ProtocolError>,
}

/// Per-source parser and decode state
pub struct StreamParser {
    source: String,
    sizes: PayloadSizeTable,
    pending: BytesMut,
    bytes_written: u64,
    metadata: MatchMetadata,
    game: GameState,
    active: bool,
    in_match: bool,
    sink: Arc<dyn ByteSink>,
    events: EventBus,
}

enum Step {
    /// Complete command of this many bytes
    Command(Command, usize),
    /// Liveness token
    Token,
    /// Need more bytes
    Short(ProtocolError),
    /// Unannounced command id
    Desync(ProtocolError),
}

impl StreamParser {
    pub fn new(source: impl Into<String>, sink: Arc<dyn ByteSink>, events: EventBus) -> Self {
        Self {
            source: source.into(),
            sizes: PayloadSizeTable::new(),
            pending: BytesMut::new(),
            bytes_written: 0,
            metadata: MatchMetadata::default(),
            game: GameState::new(),
            active: false,
            in_match: false,
            sink,
            events,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn game(&self) -> &GameState {
        &self.game
    }

    pub fn metadata(&self) -> &MatchMetadata {
        &self.metadata
    }

    pub fn sizes(&self) -> &PayloadSizeTable {
        &self.sizes
    }

    /// Bytes carried over, waiting for the rest of a command
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Bytes handed to the sink since the current match began
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn in_match(&self) -> bool {
        self.in_match
    }

    /// Parse the next chunk from the socket
    pub fn feed(&mut self, chunk: &[u8]) -> ParseSummary {
        self.pending.extend_from_slice(chunk);
        let mut data = std::mem::take(&mut self.pending);
        let mut summary = ParseSummary::default();

        let mut index = 0;
        while index < data.len() {
            match self.next_step(&data[index..]) {
                Step::Token => index += LIVENESS_TOKEN.len(),
                Step::Command(command, len) => {
                    let end = index + len;
                    self.apply(command, &data[index..end], &mut summary);
                    index = end;
                }
                Step::Short(reason) => {
                    tracing::trace!(source = %self.source, %reason, "buffering partial command");
                    let _ = data.split_to(index);
                    self.pending = data;
                    return summary;
                }
                Step::Desync(err) => {
                    tracing::warn!(
                        source = %self.source,
                        discarded = data.len() - index,
                        error = %err,
                        "parsing halted until next handshake"
                    );
                    summary.desync = Some(err);
                    return summary;
                }
            }
        }
        summary
    }

    fn next_step(&self, rest: &[u8]) -> Step {
        if rest.starts_with(LIVENESS_TOKEN) {
            return Step::Token;
        }

        let id = rest[0];
        let command = Command::from_byte(id);
        let len = match command {
            Command::PayloadSizes => match rest.get(1) {
                Some(&declared) => 1 + (declared as usize).max(1),
                None => 2,
            },
            _ => match self.sizes.get(id) {
                Some(size) => 1 + size,
                None if LIVENESS_TOKEN.starts_with(rest) => LIVENESS_TOKEN.len(),
                None => return Step::Desync(ProtocolError::Desync { command: id }),
            },
        };

        if rest.len() < len {
            return Step::Short(ProtocolError::ShortRead {
                needed: len,
                available: rest.len(),
            });
        }
        Step::Command(command, len)
    }

    fn apply(&mut self, command: Command, bytes: &[u8], summary: &mut ParseSummary) {
        if command == Command::PayloadSizes {
            self.start_match(bytes);
            summary.new_match = true;
            summary.match_status = Some(true);
        }

        self.note_activity(command);
        self.sink.append(&self.source, bytes);
        self.bytes_written += bytes.len() as u64;
        summary.appended += bytes.len();
        summary.commands += 1;

        let result = match command {
            Command::PayloadSizes | Command::Other(_) => Ok(()),
            Command::MatchStart => game::decode_match_start(&mut self.game, bytes),
            Command::PreFrame => game::decode_pre_frame(&mut self.game, bytes).map(|_| ()),
            Command::PostFrame => game::decode_post_frame(&mut self.game, bytes).map(|header| {
                if !header.is_follower {
                    self.metadata.last_frame = header.frame;
                    let char_id = self.game.characters[header.slot as usize].internal_char_id;
                    *self
                        .metadata
                        .char_usage
                        .entry(header.slot)
                        .or_default()
                        .entry(char_id)
                        .or_default() += 1;
                }
            }),
            Command::MatchEnd => {
                let result = game::decode_match_end(&mut self.game, bytes).map(|_| ());
                self.end_match();
                summary.match_ended = true;
                summary.match_status = Some(false);
                result
            }
        };

        if let Err(e) = result {
            summary.decode_errors += 1;
            tracing::warn!(
                source = %self.source,
                command = command.as_byte(),
                error = %e,
                "failed to decode command"
            );
        }
    }

    fn start_match(&mut self, bytes: &[u8]) {
        self.sizes = PayloadSizeTable::from_handshake(&bytes[1..]).unwrap_or_default();
        self.metadata = MatchMetadata::starting_now();
        self.game = GameState::new();
        self.bytes_written = 0;
        self.in_match = true;
        self.sink.begin_match(&self.source);

        tracing::info!(
            source = %self.source,
            commands = self.sizes.len(),
            "new match starting"
        );
        self.events.publish(RelayEvent::NewMatch {
            source: self.source.clone(),
        });
        self.events.publish(RelayEvent::MatchStatus {
            source: self.source.clone(),
            in_match: true,
        });
    }

    fn end_match(&mut self) {
        self.in_match = false;
        tracing::info!(
            source = %self.source,
            last_frame = self.metadata.last_frame,
            reason = ?self.game.match_info.as_ref().and_then(|m| m.end_reason),
            "match ended"
        );
        self.events.publish(RelayEvent::MatchStatus {
            source: self.source.clone(),
            in_match: false,
        });
    }

    fn note_activity(&mut self, command: Command) {
        if self.active || !command.signals_activity() {
            return;
        }
        self.active = true;
        tracing::info!(source = %self.source, "source active");
        self.events.publish(RelayEvent::SourceActive {
            source: self.source.clone(),
        });
    }

    /// Called on read timeout
    ///
    /// Returns `true` if the source just went inactive. A source stays active
    /// while a match is in progress.
    pub fn mark_idle(&mut self) -> bool {
        if !self.active || self.in_match {
            return false;
        }
        self.active = false;
        tracing::info!(source = %self.source, "source inactive");
        self.events.publish(RelayEvent::SourceInactive {
            source: self.source.clone(),
        });
        true
    }
}

impl std::fmt::Debug for StreamParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamParser")
            .field("source", &self.source)
            .field("sizes", &self.sizes.len())
            .field("pending", &self.pending.len())
            .field("active", &self.active)
            .field("in_match", &self.in_match)
            .finish()
    }
}
