//! Synthetic hive images for tests and benches.
//!
//! Integration tests and benches include this file with `#[path]`, so it
//! only depends on std.
#![allow(dead_code)]

use std::path::Path;

pub const NO_CHILDREN: u32 = u32::MAX;
pub const ROOT_FLAG: u8 = 0x2C;
pub const KEY_FLAG: u8 = 0x20;

const HEADER_SIZE: usize = 4096;
const HBIN_HEADER: usize = 32;

/// Description of one key cell to emit.
#[derive(Debug, Clone)]
pub struct KeySpec {
    pub name:      Vec<u8>,
    pub flags:     u8,
    pub parent:    u32,
    pub subkeys:   u32,
    pub values:    u32,
    pub classname: Vec<u8>,
}

impl KeySpec {
    pub fn root(name: &str) -> Self {
        Self {
            name:      name.as_bytes().to_vec(),
            flags:     ROOT_FLAG,
            parent:    0,
            subkeys:   0,
            values:    0,
            classname: Vec::new(),
        }
    }

    pub fn child(name: &str, parent: u32) -> Self {
        Self { flags: KEY_FLAG, parent, ..Self::root(name) }
    }

    pub fn raw_name(mut self, name: &[u8]) -> Self {
        self.name = name.to_vec();
        self
    }

    pub fn flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    pub fn subkeys(mut self, n: u32) -> Self {
        self.subkeys = n;
        self
    }

    pub fn values(mut self, n: u32) -> Self {
        self.values = n;
        self
    }

    pub fn classname(mut self, data: &[u8]) -> Self {
        self.classname = data.to_vec();
        self
    }
}

/// A hive under construction. The first key added becomes the cell at the
/// fixed root position.
pub struct HiveImage {
    bytes: Vec<u8>,
}

impl Default for HiveImage {
    fn default() -> Self {
        Self::new()
    }
}

impl HiveImage {
    pub fn new() -> Self {
        Self::with_magic(b"regf")
    }

    pub fn with_magic(magic: &[u8; 4]) -> Self {
        let mut bytes = vec![0u8; HEADER_SIZE + HBIN_HEADER];
        bytes[0..4].copy_from_slice(magic);
        bytes[4..8].copy_from_slice(&1u32.to_le_bytes());
        bytes[8..12].copy_from_slice(&1u32.to_le_bytes());
        bytes[0x14..0x18].copy_from_slice(&1u32.to_le_bytes());
        bytes[0x18..0x1C].copy_from_slice(&5u32.to_le_bytes());
        bytes[0x24..0x28].copy_from_slice(&0x20u32.to_le_bytes());
        bytes[HEADER_SIZE..HEADER_SIZE + 4].copy_from_slice(b"hbin");
        Self { bytes }
    }

    /// Append a cell; returns its hive-relative offset.
    pub fn add_cell(&mut self, body: &[u8]) -> u32 {
        let rel = (self.bytes.len() - HEADER_SIZE) as u32;
        let size = -((body.len() + 4) as i32);
        self.bytes.extend_from_slice(&size.to_le_bytes());
        self.bytes.extend_from_slice(body);
        rel
    }

    pub fn add_key(&mut self, spec: KeySpec) -> u32 {
        let mut body = vec![0u8; 76];
        body[0..2].copy_from_slice(b"nk");
        body[2] = spec.flags;
        body[8..12].copy_from_slice(&spec.parent.to_le_bytes());
        body[12..16].copy_from_slice(&spec.subkeys.to_le_bytes());
        body[20..24].copy_from_slice(&NO_CHILDREN.to_le_bytes());
        body[28..32].copy_from_slice(&spec.values.to_le_bytes());
        body[32..36].copy_from_slice(&NO_CHILDREN.to_le_bytes());
        body[36..40].copy_from_slice(&NO_CHILDREN.to_le_bytes());
        body[40..44].copy_from_slice(&NO_CHILDREN.to_le_bytes());
        body[72..74].copy_from_slice(&(spec.name.len() as u16).to_le_bytes());
        body[74..76].copy_from_slice(&(spec.classname.len() as u16).to_le_bytes());
        body.extend_from_slice(&spec.name);
        let key = self.add_cell(&body);

        if !spec.classname.is_empty() {
            let class = self.add_cell(&spec.classname);
            self.patch(key, 40, &class.to_le_bytes());
        }
        key
    }

    pub fn add_leaf_list(&mut self, tag: &[u8; 2], children: &[u32]) -> u32 {
        let mut body = tag.to_vec();
        body.extend_from_slice(&(children.len() as u16).to_le_bytes());
        for child in children {
            body.extend_from_slice(&child.to_le_bytes());
            body.extend_from_slice(&[0u8; 4]);
        }
        self.add_cell(&body)
    }

    pub fn add_index_list(&mut self, leaves: &[u32]) -> u32 {
        let mut body = b"ri".to_vec();
        body.extend_from_slice(&(leaves.len() as u16).to_le_bytes());
        for leaf in leaves {
            body.extend_from_slice(&leaf.to_le_bytes());
        }
        self.add_cell(&body)
    }

    pub fn set_child_list(&mut self, key: u32, list: u32) {
        self.patch(key, 20, &list.to_le_bytes());
    }

    /// Overwrite bytes at `at` within the body of the cell at `rel`.
    pub fn patch(&mut self, rel: u32, at: usize, data: &[u8]) {
        let start = HEADER_SIZE + rel as usize + 4 + at;
        self.bytes[start..start + data.len()].copy_from_slice(data);
    }

    /// Drop the last `n` bytes of the image.
    pub fn truncate(&mut self, n: usize) {
        self.bytes.truncate(self.bytes.len() - n);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, &self.bytes)
    }
}

/// Root with `fanout` children per key, `levels` deep below the root.
pub fn wide_hive(fanout: usize, levels: usize) -> HiveImage {
    let mut img = HiveImage::new();
    let root = img.add_key(KeySpec::root("ROOT"));
    let mut frontier = vec![root];
    for level in 0..levels {
        let mut next = Vec::new();
        for &parent in &frontier {
            let kids: Vec<u32> = (0..fanout)
                .map(|i| img.add_key(KeySpec::child(&format!("L{level}K{i}"), parent)))
                .collect();
            let list = img.add_leaf_list(b"lh", &kids);
            img.set_child_list(parent, list);
            img.patch(parent, 12, &(fanout as u32).to_le_bytes());
            next.extend(kids);
        }
        frontier = next;
    }
    img
}
