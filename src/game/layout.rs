//! Fixed byte layouts of the decoded commands
//!
//! Each command is described as a table of `(offset, kind, field)` entries.
//! Offsets count from the command byte, so the first payload byte sits at
//! offset 1. All multi-byte values are big-endian.

use bytes::Buf;

/// Numeric encoding of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    U8,
    U16,
    U32,
    I32,
    F32,
}

impl Kind {
    pub const fn width(self) -> usize {
        match self {
            Kind::U8 => 1,
            Kind::U16 => 2,
            Kind::U32 | Kind::I32 | Kind::F32 => 4,
        }
    }
}

/// A value read out of a payload
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    U8(u8),
    U16(u16),
    U32(u32),
    I32(i32),
    F32(f32),
}

impl Value {
    pub fn as_u8(self) -> u8 {
        match self {
            Value::U8(v) => v,
            Value::U16(v) => v as u8,
            Value::U32(v) => v as u8,
            Value::I32(v) => v as u8,
            Value::F32(v) => v as u8,
        }
    }

    pub fn as_u16(self) -> u16 {
        match self {
            Value::U8(v) => v as u16,
            Value::U16(v) => v,
            Value::U32(v) => v as u16,
            Value::I32(v) => v as u16,
            Value::F32(v) => v as u16,
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            Value::U8(v) => v as u32,
            Value::U16(v) => v as u32,
            Value::U32(v) => v,
            Value::I32(v) => v as u32,
            Value::F32(v) => v as u32,
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            Value::I32(v) => v,
            other => other.as_u32() as i32,
        }
    }

    pub fn as_f32(self) -> f32 {
        match self {
            Value::F32(v) => v,
            Value::U8(v) => v as f32,
            Value::U16(v) => v as f32,
            Value::U32(v) => v as f32,
            Value::I32(v) => v as f32,
        }
    }

    pub fn as_flag(self) -> bool {
        self.as_u8() == 1
    }
}

/// One entry of a layout table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field<F> {
    pub offset: usize,
    pub kind: Kind,
    pub field: F,
}

impl<F> Field<F> {
    pub const fn new(offset: usize, kind: Kind, field: F) -> Self {
        Self {
            offset,
            kind,
            field,
        }
    }

    /// First offset past this field
    pub const fn end(&self) -> usize {
        self.offset + self.kind.width()
    }

    /// Read this field, shifted by `base`
    ///
    /// Returns `None` if the field does not fit in `bytes`.
    pub fn read_at(&self, bytes: &[u8], base: usize) -> Option<Value> {
        let start = base + self.offset;
        let mut buf = bytes.get(start..start + self.kind.width())?;
        Some(match self.kind {
            Kind::U8 => Value::U8(buf.get_u8()),
            Kind::U16 => Value::U16(buf.get_u16()),
            Kind::U32 => Value::U32(buf.get_u32()),
            Kind::I32 => Value::I32(buf.get_i32()),
            Kind::F32 => Value::F32(buf.get_f32()),
        })
    }

    pub fn read(&self, bytes: &[u8]) -> Option<Value> {
        self.read_at(bytes, 0)
    }
}

/// Smallest command length (id byte included) that holds every field
pub const fn required_len<F>(fields: &[Field<F>]) -> usize {
    let mut max = 0;
    let mut i = 0;
    while i < fields.len() {
        let end = fields[i].end();
        if end > max {
            max = end;
        }
        i += 1;
    }
    max
}

// Match start

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchField {
    TeamMode,
    Stage,
    RandomSeed,
}

pub const MATCH_START_LAYOUT: &[Field<MatchField>] = &[
    Field::new(0x0D, Kind::U8, MatchField::TeamMode),
    Field::new(0x13, Kind::U16, MatchField::Stage),
    Field::new(0x13D, Kind::U32, MatchField::RandomSeed),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotField {
    ExternalCharId,
    PlayerType,
    StockStartCount,
    CharacterColor,
    TeamColor,
}

/// Distance between consecutive player blocks in the match-start payload
pub const SLOT_STRIDE: usize = 0x24;

/// Offsets for slot 0; slot `i` adds `i * SLOT_STRIDE`
pub const SLOT_LAYOUT: &[Field<SlotField>] = &[
    Field::new(0x65, Kind::U8, SlotField::ExternalCharId),
    Field::new(0x66, Kind::U8, SlotField::PlayerType),
    Field::new(0x67, Kind::U8, SlotField::StockStartCount),
    Field::new(0x68, Kind::U8, SlotField::CharacterColor),
    Field::new(0x6E, Kind::U8, SlotField::TeamColor),
];

// Frame updates

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameHeaderField {
    FrameIndex,
    Slot,
    Follower,
}

/// Fields shared by pre- and post-frame updates
pub const FRAME_HEADER_LAYOUT: &[Field<FrameHeaderField>] = &[
    Field::new(0x01, Kind::I32, FrameHeaderField::FrameIndex),
    Field::new(0x05, Kind::U8, FrameHeaderField::Slot),
    Field::new(0x06, Kind::U8, FrameHeaderField::Follower),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreFrameField {
    ActionState,
    X,
    Y,
    Facing,
    JoystickX,
    JoystickY,
    CStickX,
    CStickY,
    Buttons,
    TriggerL,
    TriggerR,
}

pub const PRE_FRAME_LAYOUT: &[Field<PreFrameField>] = &[
    Field::new(0x0B, Kind::U16, PreFrameField::ActionState),
    Field::new(0x0D, Kind::F32, PreFrameField::X),
    Field::new(0x11, Kind::F32, PreFrameField::Y),
    Field::new(0x15, Kind::F32, PreFrameField::Facing),
    Field::new(0x19, Kind::F32, PreFrameField::JoystickX),
    Field::new(0x1D, Kind::F32, PreFrameField::JoystickY),
    Field::new(0x21, Kind::F32, PreFrameField::CStickX),
    Field::new(0x25, Kind::F32, PreFrameField::CStickY),
    // high byte at 0x31, low byte at 0x32
    Field::new(0x31, Kind::U16, PreFrameField::Buttons),
    Field::new(0x33, Kind::F32, PreFrameField::TriggerL),
    Field::new(0x37, Kind::F32, PreFrameField::TriggerR),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostFrameField {
    InternalCharId,
    ActionState,
    X,
    Y,
    Facing,
    Percent,
    ShieldSize,
    LastAttackLanded,
    ComboCount,
    LastHitBy,
    Stocks,
    ActionStateFrameCounter,
}

pub const POST_FRAME_LAYOUT: &[Field<PostFrameField>] = &[
    Field::new(0x07, Kind::U8, PostFrameField::InternalCharId),
    Field::new(0x08, Kind::U16, PostFrameField::ActionState),
    Field::new(0x0A, Kind::F32, PostFrameField::X),
    Field::new(0x0E, Kind::F32, PostFrameField::Y),
    Field::new(0x12, Kind::F32, PostFrameField::Facing),
    Field::new(0x16, Kind::F32, PostFrameField::Percent),
    Field::new(0x1A, Kind::F32, PostFrameField::ShieldSize),
    Field::new(0x1E, Kind::U8, PostFrameField::LastAttackLanded),
    Field::new(0x1F, Kind::U8, PostFrameField::ComboCount),
    Field::new(0x20, Kind::U8, PostFrameField::LastHitBy),
    Field::new(0x21, Kind::U8, PostFrameField::Stocks),
    Field::new(0x22, Kind::F32, PostFrameField::ActionStateFrameCounter),
];

// Match end

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchEndField {
    Reason,
}

pub const MATCH_END_LAYOUT: &[Field<MatchEndField>] =
    &[Field::new(0x01, Kind::U8, MatchEndField::Reason)];

const fn max(a: usize, b: usize) -> usize {
    if a > b {
        a
    } else {
        b
    }
}

pub const MATCH_START_LEN: usize = max(
    required_len(MATCH_START_LAYOUT),
    required_len(SLOT_LAYOUT) + SLOT_STRIDE * 3,
);
pub const FRAME_HEADER_LEN: usize = required_len(FRAME_HEADER_LAYOUT);
pub const PRE_FRAME_LEN: usize = max(FRAME_HEADER_LEN, required_len(PRE_FRAME_LAYOUT));
pub const POST_FRAME_LEN: usize = max(FRAME_HEADER_LEN, required_len(POST_FRAME_LAYOUT));
pub const MATCH_END_LEN: usize = required_len(MATCH_END_LAYOUT);
