//! Command payload decoder
//!
//! Pure functions from one command's bytes (id byte included) to mutations of
//! a [`GameState`]. No I/O happens here. Length is checked against the
//! command's layout before any field is written, so a rejected command leaves
//! the state untouched.

use crate::error::DecodeError;
use crate::protocol::constants::*;

use super::layout::*;
use super::state::{Buttons, CharacterState, GameState, MatchInfo};

/// Identity fields of a frame update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Signed frame number (negative during the countdown)
    pub frame: i32,
    pub slot: u8,
    pub is_follower: bool,
}

fn ensure_len(command: u8, bytes: &[u8], needed: usize) -> Result<(), DecodeError> {
    if bytes.len() < needed {
        return Err(DecodeError::Truncated {
            command,
            needed,
            available: bytes.len(),
        });
    }
    Ok(())
}

/// Read every field of `layout`; callers have already checked the length
fn fields<'a, F: Copy>(
    layout: &'a [Field<F>],
    bytes: &'a [u8],
    base: usize,
) -> impl Iterator<Item = (F, Value)> + 'a {
    layout
        .iter()
        .filter_map(move |f| f.read_at(bytes, base).map(|v| (f.field, v)))
}

/// Read the header shared by pre- and post-frame updates
pub fn frame_header(bytes: &[u8]) -> Result<FrameHeader, DecodeError> {
    let command = bytes.first().copied().unwrap_or(CMD_POST_FRAME);
    ensure_len(command, bytes, FRAME_HEADER_LEN)?;

    let mut header = FrameHeader {
        frame: 0,
        slot: 0,
        is_follower: false,
    };
    for (field, value) in fields(FRAME_HEADER_LAYOUT, bytes, 0) {
        match field {
            FrameHeaderField::FrameIndex => header.frame = value.as_i32(),
            FrameHeaderField::Slot => header.slot = value.as_u8(),
            FrameHeaderField::Follower => header.is_follower = value.as_flag(),
        }
    }
    Ok(header)
}

/// Decode a match-start command, replacing `state` with a fresh match
pub fn decode_match_start(state: &mut GameState, bytes: &[u8]) -> Result<(), DecodeError> {
    ensure_len(CMD_MATCH_START, bytes, MATCH_START_LEN)?;

    let mut info = MatchInfo::default();
    for (field, value) in fields(MATCH_START_LAYOUT, bytes, 0) {
        match field {
            MatchField::TeamMode => info.is_teams = value.as_flag(),
            MatchField::Stage => info.stage = value.as_u16(),
            MatchField::RandomSeed => info.random_seed = value.as_u32(),
        }
    }

    for (slot, config) in info.slots.iter_mut().enumerate() {
        for (field, value) in fields(SLOT_LAYOUT, bytes, slot * SLOT_STRIDE) {
            let v = value.as_u8();
            match field {
                SlotField::ExternalCharId => config.external_char_id = v,
                SlotField::PlayerType => config.player_type = v,
                SlotField::StockStartCount => config.stock_start_count = v,
                SlotField::CharacterColor => config.character_color = v,
                SlotField::TeamColor => config.team_color = v,
            }
        }
    }

    *state = GameState::for_match(info);
    Ok(())
}

fn target<'s>(
    state: &'s mut GameState,
    header: &FrameHeader,
) -> Result<&'s mut CharacterState, DecodeError> {
    if !state.has_match() {
        return Err(DecodeError::MatchNotStarted);
    }
    let index = GameState::index_of(header.slot, header.is_follower)?;
    Ok(&mut state.characters[index])
}

/// Decode a pre-frame update (controller inputs)
pub fn decode_pre_frame(state: &mut GameState, bytes: &[u8]) -> Result<FrameHeader, DecodeError> {
    ensure_len(CMD_PRE_FRAME, bytes, PRE_FRAME_LEN)?;
    let header = frame_header(bytes)?;
    let ch = target(state, &header)?;

    ch.is_follower = header.is_follower;
    for (field, value) in fields(PRE_FRAME_LAYOUT, bytes, 0) {
        match field {
            PreFrameField::ActionState => ch.action_state = value.as_u16(),
            PreFrameField::X => ch.x = value.as_f32(),
            PreFrameField::Y => ch.y = value.as_f32(),
            PreFrameField::Facing => ch.facing = value.as_f32(),
            PreFrameField::JoystickX => ch.joystick_x = value.as_f32(),
            PreFrameField::JoystickY => ch.joystick_y = value.as_f32(),
            PreFrameField::CStickX => ch.cstick_x = value.as_f32(),
            PreFrameField::CStickY => ch.cstick_y = value.as_f32(),
            PreFrameField::Buttons => {
                let [high, low] = value.as_u16().to_be_bytes();
                ch.buttons = Buttons::from_bytes(high, low);
            }
            PreFrameField::TriggerL => ch.trigger_l = value.as_f32(),
            PreFrameField::TriggerR => ch.trigger_r = value.as_f32(),
        }
    }
    Ok(header)
}

/// Decode a post-frame update (resulting character state)
///
/// Marks the state ready once a non-follower has been decoded.
pub fn decode_post_frame(state: &mut GameState, bytes: &[u8]) -> Result<FrameHeader, DecodeError> {
    ensure_len(CMD_POST_FRAME, bytes, POST_FRAME_LEN)?;
    let header = frame_header(bytes)?;
    let ch = target(state, &header)?;

    ch.is_follower = header.is_follower;
    for (field, value) in fields(POST_FRAME_LAYOUT, bytes, 0) {
        match field {
            PostFrameField::InternalCharId => ch.internal_char_id = value.as_u8(),
            PostFrameField::ActionState => ch.action_state = value.as_u16(),
            PostFrameField::X => ch.x = value.as_f32(),
            PostFrameField::Y => ch.y = value.as_f32(),
            PostFrameField::Facing => ch.facing = value.as_f32(),
            PostFrameField::Percent => ch.percent = value.as_f32(),
            PostFrameField::ShieldSize => ch.shield_size = value.as_f32(),
            PostFrameField::LastAttackLanded => ch.last_attack_landed = value.as_u8(),
            PostFrameField::ComboCount => ch.combo_count = value.as_u8(),
            PostFrameField::LastHitBy => ch.last_hit_by = value.as_u8(),
            PostFrameField::Stocks => ch.stocks = value.as_u8(),
            PostFrameField::ActionStateFrameCounter => {
                ch.action_state_frame_counter = value.as_f32()
            }
        }
    }

    if !header.is_follower {
        state.ready = true;
    }
    Ok(header)
}

/// Decode a match-end command, recording the end reason
pub fn decode_match_end(state: &mut GameState, bytes: &[u8]) -> Result<u8, DecodeError> {
    ensure_len(CMD_MATCH_END, bytes, MATCH_END_LEN)?;
    let info = state.match_info.as_mut().ok_or(DecodeError::MatchNotStarted)?;

    let mut reason = 0;
    for (field, value) in fields(MATCH_END_LAYOUT, bytes, 0) {
        match field {
            MatchEndField::Reason => reason = value.as_u8(),
        }
    }
    info.end_reason = Some(reason);
    Ok(reason)
}
