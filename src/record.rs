//! On-flash record format.
//!
//! A record occupies a whole number of consecutive pages. The first page
//! starts with the [`Header`]; any following pages carry payload only.
//! Erased flash reads `0xFF`, so a slot whose header bytes are all
//! `0xFF` has never been programmed.

use core::convert::TryInto;

/// Length in bytes of the header as stored on flash.
pub const HEADER_LEN: usize = 8;

/// Value of every byte of an erased page.
pub const ERASED: u8 = 0xFF;

/// Header written at the start of every record, little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Tag identifying the queue the record belongs to.
    pub magic: u32,
    /// Monotonically increasing record id within that queue.
    pub id: u32,
}

impl Header {
    /// Serialises the header into its on-flash layout.
    pub fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut bytes = [0; HEADER_LEN];
        bytes[..4].copy_from_slice(&self.magic.to_le_bytes());
        bytes[4..].copy_from_slice(&self.id.to_le_bytes());
        bytes
    }

    /// Reads a header back from the first `HEADER_LEN` bytes of a page.
    pub fn from_bytes(bytes: &[u8]) -> Header {
        Header {
            magic: u32::from_le_bytes(bytes[..4].try_into().unwrap()),
            id: u32::from_le_bytes(bytes[4..HEADER_LEN].try_into().unwrap()),
        }
    }
}

/// What the first bytes of a scanned element slot turned out to hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// A record of the queue being scanned.
    Record(Header),
    /// Erased flash; the slot is free.
    Free,
    /// Another queue's record, or a torn write. Skipped during rebuild.
    Foreign,
}

impl Slot {
    /// Classifies a slot from its header bytes, for a queue tagged
    /// `magic`.
    pub fn classify(bytes: &[u8], magic: u32) -> Slot {
        let header = Header::from_bytes(bytes);
        if header.magic == magic {
            Slot::Record(header)
        } else if bytes[..HEADER_LEN].iter().all(|&b| b == ERASED) {
            Slot::Free
        } else {
            Slot::Foreign
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_little_endian() {
        let header = Header {
            magic: 0x1122_3344,
            id: 0xAABB_CCDD,
        };
        assert_eq!(
            header.to_bytes(),
            [0x44, 0x33, 0x22, 0x11, 0xDD, 0xCC, 0xBB, 0xAA]
        );
        assert_eq!(Header::from_bytes(&header.to_bytes()), header);
    }

    #[test]
    fn classify_record() {
        let bytes = Header { magic: 0xA, id: 7 }.to_bytes();
        assert_eq!(
            Slot::classify(&bytes, 0xA),
            Slot::Record(Header { magic: 0xA, id: 7 })
        );
    }

    #[test]
    fn classify_free() {
        assert_eq!(Slot::classify(&[ERASED; HEADER_LEN], 0xA), Slot::Free);
    }

    #[test]
    fn classify_foreign() {
        // another queue's record
        let bytes = Header { magic: 0xB, id: 7 }.to_bytes();
        assert_eq!(Slot::classify(&bytes, 0xA), Slot::Foreign);
        // torn write
        let mut torn = [ERASED; HEADER_LEN];
        torn[5] = 0x00;
        assert_eq!(Slot::classify(&torn, 0xA), Slot::Foreign);
    }
}
