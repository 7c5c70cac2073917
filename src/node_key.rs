//! Key cells ("nk"): decoding one record and walking the decoded tree.
//!
//! Layout relative to the cell body B (the byte after the size prefix):
//!
//! ```text
//! B+0   "nk"                signature
//! B+2   flags               0x2C marks the hive root
//! B+4   reserved            4 bytes
//! B+8   parent offset       u32
//! B+12  subkeys count       u32
//! B+16  reserved            4 bytes
//! B+20  child-list offset   u32, 0xFFFFFFFF = no children
//! B+24  reserved            4 bytes
//! B+28  values count        u32
//! B+32  values-list offset  u32
//! B+36  security offset     u32
//! B+40  classname offset    u32
//! B+72  name length         u16
//! B+74  classname length    u16
//! B+76  name bytes
//! ```

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::borrow::Cow;
use std::io::{Read, Seek};

use crate::cell_reader::CellReader;
use crate::error::{HiveError, Result};
use crate::header::cell_body;

pub const NK_SIGNATURE: &[u8; 2] = b"nk";

/// Flag byte value carried by the hive's root key.
pub const ROOT_FLAG: u8 = 0x2C;

/// Child-list offset meaning "this key has no subkeys".
pub const NO_CHILDREN: u32 = u32::MAX;

/// Name and classname lengths sit this far past the signature word.
const NAME_FIELDS_DELTA: u64 = 68;

/// One decoded registry key and the subtree it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeKey {
    /// Absolute position of this key's cell body; identifies the node.
    pub cell_offset:         u64,
    pub children:            Vec<NodeKey>,
    /// Modification time of the backing file, identical for every key.
    pub timestamp:           DateTime<Utc>,
    pub subkeys_count:       u32,
    pub parent_offset:       u32,
    pub child_list_offset:   u32,
    pub classname_offset:    u32,
    pub security_key_offset: u32,
    pub values_count:        u32,
    pub values_list_offset:  u32,
    pub name_length:         u16,
    pub is_root:             bool,
    pub classname_length:    u16,
    #[serde(serialize_with = "lossy_text")]
    pub name:                Vec<u8>,
    #[serde(serialize_with = "hex_bytes")]
    pub classname_data:      Vec<u8>,
    /// `cell_offset` of the key owning this one in the tree.
    pub parent:              Option<u64>,
}

impl NodeKey {
    /// Decode the key cell whose body starts at the reader's cursor.
    ///
    /// Children are not touched; `children` comes back empty and `parent`
    /// unset. Any failure discards the whole record.
    pub fn decode<R: Read + Seek>(
        reader:    &mut CellReader<R>,
        timestamp: DateTime<Utc>,
    ) -> Result<Self> {
        let cell_offset = reader.position();
        let sig = reader.read_array::<4>()?;
        if &sig[..2] != NK_SIGNATURE {
            return Err(HiveError::BadSignature {
                offset: cell_offset,
                found:  [sig[0], sig[1]],
            });
        }
        let start = reader.position();
        let is_root = sig[2] == ROOT_FLAG;

        reader.seek_relative(4)?;
        let parent_offset = reader.read_u32()?;
        let subkeys_count = reader.read_u32()?;
        reader.seek_relative(4)?;
        let child_list_offset = reader.read_u32()?;
        reader.seek_relative(4)?;
        let values_count        = reader.read_u32()?;
        let values_list_offset  = reader.read_u32()?;
        let security_key_offset = reader.read_u32()?;
        let classname_offset    = reader.read_u32()?;

        reader.seek_absolute(start + NAME_FIELDS_DELTA)?;
        let name_length      = reader.read_u16()?;
        let classname_length = reader.read_u16()?;
        let name = reader.read_fixed(usize::from(name_length))?;

        let classname_data = if classname_length > 0 {
            reader.seek_absolute(cell_body(classname_offset))?;
            reader.read_fixed(usize::from(classname_length))?
        } else {
            Vec::new()
        };

        Ok(Self {
            cell_offset,
            children: Vec::new(),
            timestamp,
            subkeys_count,
            parent_offset,
            child_list_offset,
            classname_offset,
            security_key_offset,
            values_count,
            values_list_offset,
            name_length,
            is_root,
            classname_length,
            name,
            classname_data,
            parent: None,
        })
    }

    #[inline]
    pub fn has_child_list(&self) -> bool {
        self.child_list_offset != NO_CHILDREN
    }

    pub fn name_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.name)
    }

    /// Depth-first pre-order walk yielding `(depth, key)`, this key at 0.
    pub fn iter(&self) -> Walk<'_> {
        Walk { stack: vec![(0, self)] }
    }

    /// Number of keys in this subtree, this one included.
    pub fn key_count(&self) -> usize {
        self.iter().count()
    }

    /// BLAKE3 over the tree's shape and decoded fields.
    ///
    /// Timestamps are left out so two parses of the same bytes agree even
    /// when the file was touched in between.
    pub fn digest(&self) -> [u8; 32] {
        let mut h = blake3::Hasher::new();
        for (depth, key) in self.iter() {
            h.update(&(depth as u64).to_le_bytes());
            h.update(&key.cell_offset.to_le_bytes());
            for field in [
                key.subkeys_count,
                key.parent_offset,
                key.child_list_offset,
                key.classname_offset,
                key.security_key_offset,
                key.values_count,
                key.values_list_offset,
            ] {
                h.update(&field.to_le_bytes());
            }
            h.update(&[u8::from(key.is_root)]);
            h.update(&key.name_length.to_le_bytes());
            h.update(&key.name);
            h.update(&key.classname_length.to_le_bytes());
            h.update(&key.classname_data);
            h.update(&(key.children.len() as u64).to_le_bytes());
        }
        h.finalize().into()
    }
}

pub struct Walk<'a> {
    stack: Vec<(usize, &'a NodeKey)>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = (usize, &'a NodeKey);

    fn next(&mut self) -> Option<Self::Item> {
        let (depth, key) = self.stack.pop()?;
        self.stack.extend(key.children.iter().rev().map(|c| (depth + 1, c)));
        Some((depth, key))
    }
}

fn lossy_text<S: Serializer>(bytes: &[u8], s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&String::from_utf8_lossy(bytes))
}

fn hex_bytes<S: Serializer>(bytes: &[u8], s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&hex::encode(bytes))
}
