//! Game-state decoding
//!
//! Turns match-start, frame-update and match-end payloads into a structured
//! per-source [`GameState`].

pub mod decoder;
pub mod layout;
pub mod state;

pub use decoder::{
    decode_match_end, decode_match_start, decode_post_frame, decode_pre_frame, frame_header,
    FrameHeader,
};
pub use state::{Buttons, CharacterState, GameState, MatchInfo, SlotConfig, CHARACTER_SLOTS};
