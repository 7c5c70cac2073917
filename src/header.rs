//! The 4096-byte `regf` base block and the fixed coordinates derived from it.
//!
//! ```text
//! +0x0000  "regf"                        magic, validated
//! +0x0004  primary sequence number       u32
//! +0x0008  secondary sequence number     u32
//! +0x000C  last written                  FILETIME (u64)
//! +0x0014  major version                 u32
//! +0x0018  minor version                 u32
//! +0x0024  root cell offset              u32 (informational)
//! +0x0028  hive bins data size           u32
//! +0x0030  embedded file name            64 bytes UTF-16LE
//! +0x1000  first hive bin; every stored cell offset is relative to here
//! ```
//!
//! Only the magic is load-bearing. The walk always starts at
//! [`ROOT_KEY_OFFSET`], whatever the base block declares.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::{Read, Seek};

use crate::cell_reader::CellReader;
use crate::error::{HiveError, Result};

pub const MAGIC: &[u8; 4] = b"regf";

/// Size of the base block; stored offsets are measured from its end.
pub const HEADER_SIZE: u64 = 4096;

/// Absolute position of a cell body whose relative offset is 0: the header
/// plus the 4-byte size prefix every cell carries.
pub const CELL_BASE: u64 = HEADER_SIZE + 4;

/// Absolute position of the root key cell body.
pub const ROOT_KEY_OFFSET: u64 = 4132;

/// Root cell offset a well-formed base block declares (4132 - 4100).
pub const EXPECTED_ROOT_CELL: u32 = 0x20;

const FILE_NAME_OFFSET: u64 = 0x30;
const FILE_NAME_LEN:    usize = 64;

/// 100ns intervals between 1601-01-01 and 1970-01-01.
const FILETIME_UNIX_EPOCH: u64 = 116_444_736_000_000_000;

/// Absolute body position of the cell at hive-relative offset `rel`.
#[inline]
pub fn cell_body(rel: u32) -> u64 {
    CELL_BASE + u64::from(rel)
}

/// Check the magic and leave the cursor on the root key cell.
pub fn validate<R: Read + Seek>(reader: &mut CellReader<R>) -> Result<()> {
    reader.seek_absolute(0)?;
    let magic = match reader.read_fixed(MAGIC.len()) {
        Ok(m) => m,
        // A file too short to hold the magic cannot be a hive.
        Err(HiveError::Truncated { .. }) => return Err(HiveError::Format { found: Vec::new() }),
        Err(e) => return Err(e),
    };
    if magic.as_slice() != MAGIC {
        return Err(HiveError::Format { found: magic });
    }
    reader.seek_absolute(ROOT_KEY_OFFSET)
}

/// Descriptive fields of the base block, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BaseBlock {
    pub primary_sequence:   u32,
    pub secondary_sequence: u32,
    pub last_written:       Option<DateTime<Utc>>,
    pub major_version:      u32,
    pub minor_version:      u32,
    pub root_cell_offset:   u32,
    pub hive_bins_size:     u32,
    pub file_name:          String,
}

impl BaseBlock {
    /// Decode the base block. Validates the magic first.
    pub fn read<R: Read + Seek>(reader: &mut CellReader<R>) -> Result<Self> {
        validate(reader)?;
        reader.seek_absolute(4)?;
        let primary_sequence   = reader.read_u32()?;
        let secondary_sequence = reader.read_u32()?;
        let lo = reader.read_u32()?;
        let hi = reader.read_u32()?;
        let last_written = filetime_to_utc((u64::from(hi) << 32) | u64::from(lo));
        let major_version = reader.read_u32()?;
        let minor_version = reader.read_u32()?;
        reader.seek_absolute(0x24)?;
        let root_cell_offset = reader.read_u32()?;
        let hive_bins_size   = reader.read_u32()?;
        reader.seek_absolute(FILE_NAME_OFFSET)?;
        let raw = reader.read_fixed(FILE_NAME_LEN)?;
        Ok(Self {
            primary_sequence,
            secondary_sequence,
            last_written,
            major_version,
            minor_version,
            root_cell_offset,
            hive_bins_size,
            file_name: utf16le_until_nul(&raw),
        })
    }

    /// Sequence numbers differ when the hive was not cleanly flushed.
    pub fn is_dirty(&self) -> bool {
        self.primary_sequence != self.secondary_sequence
    }
}

fn filetime_to_utc(ft: u64) -> Option<DateTime<Utc>> {
    if ft < FILETIME_UNIX_EPOCH {
        return None;
    }
    let since_epoch = ft - FILETIME_UNIX_EPOCH;
    let secs  = i64::try_from(since_epoch / 10_000_000).ok()?;
    let nanos = (since_epoch % 10_000_000) as u32 * 100;
    DateTime::from_timestamp(secs, nanos)
}

fn utf16le_until_nul(raw: &[u8]) -> String {
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|&u| u != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn base_block_bytes() -> Vec<u8> {
        let mut b = vec![0u8; HEADER_SIZE as usize];
        b[0..4].copy_from_slice(MAGIC);
        b[4..8].copy_from_slice(&7u32.to_le_bytes());
        b[8..12].copy_from_slice(&7u32.to_le_bytes());
        // 2020-01-01T00:00:00Z
        let ft: u64 = FILETIME_UNIX_EPOCH + 1_577_836_800 * 10_000_000;
        b[0x0C..0x14].copy_from_slice(&ft.to_le_bytes());
        b[0x14..0x18].copy_from_slice(&1u32.to_le_bytes());
        b[0x18..0x1C].copy_from_slice(&5u32.to_le_bytes());
        b[0x24..0x28].copy_from_slice(&EXPECTED_ROOT_CELL.to_le_bytes());
        b[0x28..0x2C].copy_from_slice(&0x2000u32.to_le_bytes());
        for (i, unit) in "SYSTEM".encode_utf16().enumerate() {
            b[0x30 + 2 * i..0x32 + 2 * i].copy_from_slice(&unit.to_le_bytes());
        }
        b
    }

    #[test]
    fn test_validate_positions_cursor_at_root() {
        let mut r = CellReader::new(Cursor::new(base_block_bytes())).unwrap();
        validate(&mut r).unwrap();
        assert_eq!(r.position(), ROOT_KEY_OFFSET);
    }

    #[test]
    fn test_bad_magic_is_format_error() {
        let mut bytes = base_block_bytes();
        bytes[0] = b'x';
        let mut r = CellReader::new(Cursor::new(bytes)).unwrap();
        match validate(&mut r) {
            Err(HiveError::Format { found }) => assert_eq!(found, b"xegf"),
            other => panic!("expected format error, got {other:?}"),
        }
    }

    #[test]
    fn test_short_file_is_format_error() {
        let mut r = CellReader::new(Cursor::new(b"re".to_vec())).unwrap();
        assert!(matches!(validate(&mut r), Err(HiveError::Format { .. })));
    }

    #[test]
    fn test_base_block_fields() {
        let mut r = CellReader::new(Cursor::new(base_block_bytes())).unwrap();
        let bb = BaseBlock::read(&mut r).unwrap();
        assert_eq!(bb.primary_sequence, 7);
        assert!(!bb.is_dirty());
        assert_eq!(bb.major_version, 1);
        assert_eq!(bb.minor_version, 5);
        assert_eq!(bb.root_cell_offset, EXPECTED_ROOT_CELL);
        assert_eq!(bb.hive_bins_size, 0x2000);
        assert_eq!(bb.file_name, "SYSTEM");
        assert_eq!(bb.last_written.unwrap().to_rfc3339(), "2020-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_coordinates() {
        assert_eq!(cell_body(0), 4100);
        assert_eq!(cell_body(EXPECTED_ROOT_CELL), ROOT_KEY_OFFSET);
        assert_eq!(filetime_to_utc(0), None);
    }
}
