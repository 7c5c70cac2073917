//! Subkey list cells and their resolution into ordered child offsets.
//!
//! Three list flavours are recognised:
//!
//! | Tag  | Kind       | Slots                                        |
//! |------|------------|----------------------------------------------|
//! | `lf` | leaf list  | count × 8 bytes: child offset + name hint    |
//! | `lh` | leaf list  | count × 8 bytes: child offset + name hash    |
//! | `ri` | index list | count × 4 bytes: offset of an `lf`/`lh` cell |
//!
//! Every cell starts with a 2-byte tag and a u16 count. Offsets are
//! hive-relative; the list body lives at `HEADER_SIZE + offset + 4`.

use std::io::{Read, Seek};

use crate::cell_reader::CellReader;
use crate::error::{HiveError, Result};
use crate::header::cell_body;

pub const LF_SIGNATURE: &[u8; 2] = b"lf";
pub const LH_SIGNATURE: &[u8; 2] = b"lh";
pub const RI_SIGNATURE: &[u8; 2] = b"ri";

const LEAF_SLOT: u64  = 8;
const INDEX_SLOT: u64 = 4;

/// Which leaf flavour a list cell carried. The hint column is never used for
/// lookups, so the two behave identically here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafTag {
    Lf,
    Lh,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafEntry {
    /// Hive-relative offset of the child key cell.
    pub offset: u32,
    pub hint:   [u8; 4],
}

/// One decoded list cell, before index entries are followed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildListCell {
    LeafList { tag: LeafTag, count: u16, entries: Vec<LeafEntry> },
    IndexList { count: u16, entries: Vec<u32> },
}

/// Tag of a list cell, read before any slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListKind {
    Leaf(LeafTag),
    Index,
}

impl ChildListCell {
    /// Read the list cell at hive-relative `rel`.
    ///
    /// Leaves the cursor just past the cell's last slot. A short read on any
    /// slot fails the whole cell; use [`read_child_slots`] to keep the slots
    /// before it.
    pub fn read<R: Read + Seek>(reader: &mut CellReader<R>, rel: u32) -> Result<Self> {
        match read_kind(reader, rel)? {
            ListKind::Leaf(tag) => {
                let (count, entries, fault) = read_leaf_slots(reader);
                match fault {
                    Some(e) => Err(e),
                    None    => Ok(ChildListCell::LeafList { tag, count, entries }),
                }
            }
            ListKind::Index => {
                let (count, entries, fault) = read_index_slots(reader);
                match fault {
                    Some(e) => Err(e),
                    None    => Ok(ChildListCell::IndexList { count, entries }),
                }
            }
        }
    }

    pub fn count(&self) -> u16 {
        match self {
            ChildListCell::LeafList { count, .. } | ChildListCell::IndexList { count, .. } => *count,
        }
    }
}

fn read_kind<R: Read + Seek>(reader: &mut CellReader<R>, rel: u32) -> Result<ListKind> {
    let at = cell_body(rel);
    reader.seek_absolute(at)?;
    let tag = reader.read_array::<2>()?;
    match &tag {
        LF_SIGNATURE => Ok(ListKind::Leaf(LeafTag::Lf)),
        LH_SIGNATURE => Ok(ListKind::Leaf(LeafTag::Lh)),
        RI_SIGNATURE => Ok(ListKind::Index),
        _ => Err(HiveError::BadChildList { offset: at, found: tag }),
    }
}

/// Slots are read one at a time; on a short read the entries before it are
/// returned next to the fault.
fn read_leaf_slots<R: Read + Seek>(reader: &mut CellReader<R>) -> (u16, Vec<LeafEntry>, Option<HiveError>) {
    let count = match reader.read_u16() {
        Ok(c)  => c,
        Err(e) => return (0, Vec::new(), Some(e)),
    };
    let base = reader.position();
    let mut entries = Vec::with_capacity(usize::from(count));
    for i in 0..u64::from(count) {
        match read_leaf_slot(reader, base + i * LEAF_SLOT) {
            Ok(entry) => entries.push(entry),
            Err(e)    => return (count, entries, Some(e)),
        }
    }
    let fault = reader.seek_absolute(base + u64::from(count) * LEAF_SLOT).err();
    (count, entries, fault)
}

fn read_leaf_slot<R: Read + Seek>(reader: &mut CellReader<R>, at: u64) -> Result<LeafEntry> {
    reader.seek_absolute(at)?;
    let offset = reader.read_u32()?;
    let hint = reader.read_array::<4>()?;
    Ok(LeafEntry { offset, hint })
}

fn read_index_slots<R: Read + Seek>(reader: &mut CellReader<R>) -> (u16, Vec<u32>, Option<HiveError>) {
    let count = match reader.read_u16() {
        Ok(c)  => c,
        Err(e) => return (0, Vec::new(), Some(e)),
    };
    let mut entries = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        match reader.read_u32() {
            Ok(leaf) => entries.push(leaf),
            Err(e)   => return (count, entries, Some(e)),
        }
    }
    (count, entries, None)
}

/// Child key offsets gathered from one key's list, in slot order.
///
/// A list can fail part way through; the offsets collected before the
/// failure are kept next to the fault.
#[derive(Debug, Default)]
pub struct ChildSlots {
    pub offsets: Vec<u32>,
    pub fault:   Option<HiveError>,
}

impl ChildSlots {
    fn failed(offsets: Vec<u32>, fault: HiveError) -> Self {
        Self { offsets, fault: Some(fault) }
    }
}

/// Resolve the list at hive-relative `rel` to child key offsets.
///
/// A leaf list yields its entries directly. An index list is followed one
/// level: each slot must name a leaf list, whose entries are appended in
/// order. Index entries naming another index are rejected. A short read
/// anywhere keeps every child resolved before it.
pub fn read_child_slots<R: Read + Seek>(reader: &mut CellReader<R>, rel: u32) -> ChildSlots {
    let kind = match read_kind(reader, rel) {
        Ok(kind) => kind,
        Err(e)   => return ChildSlots::failed(Vec::new(), e),
    };

    let (leaves, index_fault) = match kind {
        ListKind::Leaf(_) => {
            let (_, entries, fault) = read_leaf_slots(reader);
            return ChildSlots {
                offsets: entries.into_iter().map(|e| e.offset).collect(),
                fault,
            };
        }
        ListKind::Index => {
            let (_, entries, fault) = read_index_slots(reader);
            (entries, fault)
        }
    };

    // Index slot i lives at `slots_base + 4i`, after the tag and count.
    let slots_base = cell_body(rel) + 4;
    let mut offsets = Vec::new();
    for (i, leaf) in leaves.into_iter().enumerate() {
        let saved = slots_base + i as u64 * INDEX_SLOT;
        match read_kind(reader, leaf) {
            Ok(ListKind::Leaf(_)) => {
                let (_, entries, fault) = read_leaf_slots(reader);
                offsets.extend(entries.into_iter().map(|e| e.offset));
                if let Some(e) = fault {
                    return ChildSlots::failed(offsets, e);
                }
            }
            Ok(ListKind::Index) => {
                let fault = HiveError::BadChildList { offset: cell_body(leaf), found: *RI_SIGNATURE };
                return ChildSlots::failed(offsets, fault);
            }
            Err(e) => return ChildSlots::failed(offsets, e),
        }
        if let Err(e) = reader.seek_absolute(saved + INDEX_SLOT) {
            return ChildSlots::failed(offsets, e);
        }
    }
    ChildSlots { offsets, fault: index_fault }
}
