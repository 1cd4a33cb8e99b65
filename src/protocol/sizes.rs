//! Payload-size table
//!
//! Learned from the handshake at the start of every match. The handshake body
//! is laid out as:
//!
//! ```text
//! +--------+------------------------------------------+
//! | N (1)  | (cmd (1), size (2 BE)) x (N - 1) / 3      |
//! +--------+------------------------------------------+
//! ```
//!
//! `N` counts itself, so the whole command occupies `1 + N` bytes.

use std::collections::HashMap;

use bytes::Buf;

use super::constants::{CMD_PAYLOAD_SIZES, SIZE_ENTRY_LEN};

/// Command id to payload length, scoped to one source and one match
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadSizeTable {
    sizes: HashMap<u8, u16>,
}

impl PayloadSizeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payload length announced for `command`
    pub fn get(&self, command: u8) -> Option<usize> {
        self.sizes.get(&command).map(|&s| s as usize)
    }

    pub fn insert(&mut self, command: u8, size: u16) {
        self.sizes.insert(command, size);
    }

    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    /// Build a table from a handshake body (starting at the `N` byte)
    ///
    /// Returns `None` if `body` is shorter than `N` says. A trailing partial
    /// entry is ignored, and `N` below 1 yields an empty table.
    pub fn from_handshake(body: &[u8]) -> Option<Self> {
        let declared = *body.first()? as usize;
        if body.len() < declared {
            return None;
        }

        let mut table = Self::new();
        let mut entries = body.get(1..declared).unwrap_or(&[]);
        while entries.remaining() >= SIZE_ENTRY_LEN {
            let command = entries.get_u8();
            let size = entries.get_u16();
            table.insert(command, size);
        }
        Some(table)
    }

    /// Encode as a complete handshake command, id byte included
    ///
    /// Returns `None` if the table has too many entries for the one-byte
    /// length field.
    pub fn to_handshake(&self) -> Option<Vec<u8>> {
        let mut entries: Vec<_> = self.sizes.iter().collect();
        entries.sort_by_key(|(cmd, _)| **cmd);

        let declared = u8::try_from(1 + entries.len() * SIZE_ENTRY_LEN).ok()?;
        let mut out = Vec::with_capacity(1 + declared as usize);
        out.push(CMD_PAYLOAD_SIZES);
        out.push(declared);
        for (cmd, size) in entries {
            out.push(*cmd);
            out.extend_from_slice(&size.to_be_bytes());
        }
        Some(out)
    }
}

impl FromIterator<(u8, u16)> for PayloadSizeTable {
    fn from_iter<I: IntoIterator<Item = (u8, u16)>>(iter: I) -> Self {
        Self {
            sizes: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_handshake() {
        // N = 7: two entries
        let body = [0x07, 0x36, 0x01, 0xA0, 0x39, 0x00, 0x02];
        let table = PayloadSizeTable::from_handshake(&body).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.get(0x36), Some(0x1A0));
        assert_eq!(table.get(0x39), Some(2));
        assert_eq!(table.get(0x37), None);
    }

    #[test]
    fn test_from_handshake_short_body() {
        assert!(PayloadSizeTable::from_handshake(&[]).is_none());
        assert!(PayloadSizeTable::from_handshake(&[0x07, 0x36, 0x01]).is_none());
    }

    #[test]
    fn test_from_handshake_zero_length() {
        let table = PayloadSizeTable::from_handshake(&[0x00]).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_handshake_encoding_too_many_entries() {
        // 1 + 84 * 3 = 253 fits, 1 + 85 * 3 = 256 does not
        let fits: PayloadSizeTable = (0..84u8).map(|cmd| (cmd, 1)).collect();
        assert_eq!(fits.to_handshake().unwrap()[1], 253);

        let too_many: PayloadSizeTable = (0..85u8).map(|cmd| (cmd, 1)).collect();
        assert!(too_many.to_handshake().is_none());
    }

    #[test]
    fn test_handshake_encoding() {
        let table: PayloadSizeTable = [(0x37, 64), (0x36, 416)].into_iter().collect();
        let encoded = table.to_handshake().unwrap();

        assert_eq!(encoded, vec![0x35, 0x07, 0x36, 0x01, 0xA0, 0x37, 0x00, 0x40]);
        assert_eq!(PayloadSizeTable::from_handshake(&encoded[1..]), Some(table));
    }
}
