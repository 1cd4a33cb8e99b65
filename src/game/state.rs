//! Decoded match model
//!
//! One [`GameState`] per source. It is replaced wholesale whenever a new match
//! starts; nothing is cleared field by field.

use crate::error::DecodeError;
use crate::protocol::constants::PLAYER_SLOTS;

/// Character slots tracked: four players plus one follower each
pub const CHARACTER_SLOTS: usize = PLAYER_SLOTS * 2;

/// Digital button states from a pre-frame update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Buttons {
    pub start: bool,
    pub y: bool,
    pub x: bool,
    pub b: bool,
    pub a: bool,
    pub l: bool,
    pub r: bool,
    pub z: bool,
    pub d_up: bool,
    pub d_down: bool,
    pub d_left: bool,
    pub d_right: bool,
}

impl Buttons {
    /// Unpack from the two button bytes
    ///
    /// ```text
    /// high: ---S YXBA    low: -LRZ UDLR (d-pad)
    /// ```
    pub fn from_bytes(high: u8, low: u8) -> Self {
        let bit = |byte: u8, n: u8| (byte >> n) & 1 == 1;
        Self {
            start: bit(high, 4),
            y: bit(high, 3),
            x: bit(high, 2),
            b: bit(high, 1),
            a: bit(high, 0),
            l: bit(low, 6),
            r: bit(low, 5),
            z: bit(low, 4),
            d_up: bit(low, 3),
            d_down: bit(low, 2),
            d_left: bit(low, 1),
            d_right: bit(low, 0),
        }
    }

    pub fn any_pressed(&self) -> bool {
        *self != Self::default()
    }
}

/// Starting configuration for one player slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotConfig {
    pub external_char_id: u8,
    pub player_type: u8,
    pub stock_start_count: u8,
    pub character_color: u8,
    pub team_color: u8,
}

/// Match-level configuration and outcome
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchInfo {
    pub is_teams: bool,
    pub stage: u16,
    pub slots: [SlotConfig; PLAYER_SLOTS],
    pub random_seed: u32,
    /// Set once the match-end command arrives
    pub end_reason: Option<u8>,
}

/// State of one player or follower entity
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CharacterState {
    pub is_follower: bool,
    pub action_state: u16,
    pub internal_char_id: u8,
    pub external_char_id: u8,
    pub percent: f32,
    pub shield_size: f32,
    pub last_attack_landed: u8,
    pub combo_count: u8,
    pub last_hit_by: u8,
    pub stocks: u8,
    pub action_state_frame_counter: f32,
    pub x: f32,
    pub y: f32,
    pub facing: f32,
    pub joystick_x: f32,
    pub joystick_y: f32,
    pub cstick_x: f32,
    pub cstick_y: f32,
    pub trigger_l: f32,
    pub trigger_r: f32,
    pub buttons: Buttons,
}

/// Per-source decoded match
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GameState {
    /// `None` until a match-start has been decoded
    pub match_info: Option<MatchInfo>,
    /// Players in `0..4`, their followers in `4..8`
    pub characters: [CharacterState; CHARACTER_SLOTS],
    /// Set after the first post-frame for a non-follower
    pub ready: bool,
}

impl GameState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh state for a match that just started
    pub fn for_match(info: MatchInfo) -> Self {
        let mut state = Self::default();
        for (slot, config) in info.slots.iter().enumerate() {
            state.characters[slot].external_char_id = config.external_char_id;
            state.characters[slot + PLAYER_SLOTS].is_follower = true;
        }
        state.match_info = Some(info);
        state
    }

    pub fn has_match(&self) -> bool {
        self.match_info.is_some()
    }

    /// Whether the match-end command has been decoded
    pub fn has_ended(&self) -> bool {
        self.match_info
            .as_ref()
            .is_some_and(|m| m.end_reason.is_some())
    }

    /// Index into `characters` for a slot/follower pair
    pub fn index_of(slot: u8, is_follower: bool) -> Result<usize, DecodeError> {
        let slot_idx = slot as usize;
        if slot_idx >= PLAYER_SLOTS {
            return Err(DecodeError::InvalidSlot(slot));
        }
        Ok(if is_follower {
            slot_idx + PLAYER_SLOTS
        } else {
            slot_idx
        })
    }

    pub fn player(&self, slot: usize) -> Option<&CharacterState> {
        (slot < PLAYER_SLOTS).then(|| &self.characters[slot])
    }

    pub fn follower(&self, slot: usize) -> Option<&CharacterState> {
        (slot < PLAYER_SLOTS).then(|| &self.characters[slot + PLAYER_SLOTS])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buttons_from_bytes() {
        let buttons = Buttons::from_bytes(0b0001_0001, 0b0100_1001);
        assert!(buttons.start);
        assert!(buttons.a);
        assert!(!buttons.b);
        assert!(buttons.l);
        assert!(!buttons.r);
        assert!(buttons.d_up);
        assert!(buttons.d_right);
        assert!(!buttons.d_left);
        assert!(buttons.any_pressed());
        assert!(!Buttons::from_bytes(0, 0).any_pressed());
    }

    #[test]
    fn test_index_of() {
        assert_eq!(GameState::index_of(0, false), Ok(0));
        assert_eq!(GameState::index_of(3, true), Ok(7));
        assert_eq!(
            GameState::index_of(4, false),
            Err(DecodeError::InvalidSlot(4))
        );
    }

    #[test]
    fn test_for_match_seeds_slots() {
        let mut info = MatchInfo::default();
        info.slots[1].external_char_id = 0x14;
        let state = GameState::for_match(info);

        assert!(state.has_match());
        assert!(!state.ready);
        assert!(!state.has_ended());
        assert_eq!(state.player(1).unwrap().external_char_id, 0x14);
        assert!(state.follower(1).unwrap().is_follower);
        assert!(state.player(4).is_none());
    }
}
