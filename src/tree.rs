//! Tree reconstruction from the root key downward.
//!
//! The walk is an explicit worklist instead of native recursion. Decoded keys
//! go into a flat arena with child indices and are folded into the owned
//! [`NodeKey`] tree once the worklist drains. Children are scheduled in
//! reverse so they are popped, and therefore attached, in slot order.
//!
//! Faults never abort the walk. Each one is recorded and only the subtree
//! below the failing cell is lost:
//!
//! - a key cell that fails to decode is dropped with its subtree;
//! - a list that fails part way keeps the children gathered before the fault;
//! - a cell reached a second time is skipped (`Cycle`);
//! - a cell deeper than the limit is skipped (`DepthExceeded`).
//!
//! Cancellation and the deadline are checked before every key cell; once
//! either fires the remaining work is abandoned and the partial tree returned.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::io::{Read, Seek};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace, warn};

use crate::cell_reader::CellReader;
use crate::child_list::read_child_slots;
use crate::error::HiveError;
use crate::header::{cell_body, ROOT_KEY_OFFSET};
use crate::node_key::NodeKey;

/// Walk bounds resolved at the start of one parse.
#[derive(Debug, Clone)]
pub struct Limits {
    pub max_depth: usize,
    pub deadline:  Option<Instant>,
    pub cancel:    Option<Arc<AtomicBool>>,
}

impl Limits {
    fn interrupted(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c.load(Ordering::Relaxed))
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Result of a walk: whatever tree was reconstructed plus every fault seen.
#[derive(Debug, Default)]
pub struct BuildOutcome {
    pub root:   Option<NodeKey>,
    pub errors: Vec<HiveError>,
}

struct Pending {
    cell:   u64,
    parent: Option<usize>,
    depth:  usize,
}

struct Slot {
    key:      Option<NodeKey>,
    children: Vec<usize>,
}

pub struct TreeBuilder<R> {
    reader:    CellReader<R>,
    timestamp: DateTime<Utc>,
    limits:    Limits,
    visited:   HashSet<u64>,
    errors:    Vec<HiveError>,
}

impl<R: Read + Seek> TreeBuilder<R> {
    pub fn new(reader: CellReader<R>, timestamp: DateTime<Utc>, limits: Limits) -> Self {
        Self {
            reader,
            timestamp,
            limits,
            visited: HashSet::new(),
            errors:  Vec::new(),
        }
    }

    /// Reconstruct the whole tree from the fixed root key offset.
    pub fn build(mut self) -> BuildOutcome {
        let root = self.build_subtree(ROOT_KEY_OFFSET, None, 0);
        BuildOutcome { root, errors: self.errors }
    }

    /// Decode the root key alone and resolve its child cells.
    ///
    /// Used to fan root subtrees out to independent readers.
    pub fn root_with_children(&mut self) -> Option<(NodeKey, Vec<u64>)> {
        if self.limits.interrupted() {
            self.errors.push(HiveError::Cancelled { offset: ROOT_KEY_OFFSET });
            return None;
        }
        self.visited.insert(ROOT_KEY_OFFSET);
        let key = self.decode_key(ROOT_KEY_OFFSET)?;
        let children = self.child_cells(&key);
        Some((key, children))
    }

    /// Mark `cell` as seen so a subtree walk will not re-enter it.
    pub fn exclude(&mut self, cell: u64) {
        self.visited.insert(cell);
    }

    pub fn into_errors(self) -> Vec<HiveError> {
        self.errors
    }

    /// Reconstruct the subtree whose key cell body is at absolute `cell`.
    ///
    /// `parent` becomes the new key's back-reference; `depth` is its distance
    /// from the hive root.
    pub fn build_subtree(&mut self, cell: u64, parent: Option<u64>, depth: usize) -> Option<NodeKey> {
        let mut arena: Vec<Slot> = Vec::new();
        let mut work = vec![Pending { cell, parent: None, depth }];

        while let Some(p) = work.pop() {
            if self.limits.interrupted() {
                warn!(offset = p.cell, "parse interrupted");
                self.errors.push(HiveError::Cancelled { offset: p.cell });
                break;
            }
            if p.depth > self.limits.max_depth {
                self.fault(HiveError::DepthExceeded { offset: p.cell, depth: self.limits.max_depth });
                continue;
            }
            if !self.visited.insert(p.cell) {
                self.fault(HiveError::Cycle { offset: p.cell });
                continue;
            }

            let Some(mut key) = self.decode_key(p.cell) else { continue };
            key.parent = match p.parent {
                Some(i) => arena[i].key.as_ref().map(|k| k.cell_offset),
                None    => parent,
            };

            let children = self.child_cells(&key);
            let idx = arena.len();
            if let Some(i) = p.parent {
                arena[i].children.push(idx);
            }
            arena.push(Slot { key: Some(key), children: Vec::new() });
            work.extend(children.into_iter().rev().map(|c| Pending {
                cell:   c,
                parent: Some(idx),
                depth:  p.depth + 1,
            }));
        }

        assemble(arena)
    }

    fn decode_key(&mut self, cell: u64) -> Option<NodeKey> {
        let decoded = self
            .reader
            .seek_absolute(cell)
            .and_then(|()| NodeKey::decode(&mut self.reader, self.timestamp));
        match decoded {
            Ok(key) => {
                debug!(
                    offset = cell,
                    name = %key.name_lossy(),
                    subkeys = key.subkeys_count,
                    values = key.values_count,
                    "decoded key"
                );
                Some(key)
            }
            Err(e) => {
                self.fault(e);
                None
            }
        }
    }

    /// Absolute cell offsets of `key`'s children, in slot order.
    fn child_cells(&mut self, key: &NodeKey) -> Vec<u64> {
        if !key.has_child_list() {
            return Vec::new();
        }
        let slots = read_child_slots(&mut self.reader, key.child_list_offset);
        trace!(offset = key.cell_offset, children = slots.offsets.len(), "resolved child list");
        if let Some(e) = slots.fault {
            self.fault(e);
        }
        slots.offsets.into_iter().map(cell_body).collect()
    }

    fn fault(&mut self, e: HiveError) {
        warn!("{e}");
        self.errors.push(e);
    }
}

/// Fold the arena into an owned tree. Children always sit at higher indices
/// than their parent, so a reverse sweep finishes every child first.
fn assemble(arena: Vec<Slot>) -> Option<NodeKey> {
    let (mut keys, links): (Vec<Option<NodeKey>>, Vec<Vec<usize>>) =
        arena.into_iter().map(|s| (s.key, s.children)).unzip();

    for i in (0..keys.len()).rev() {
        let children: Vec<NodeKey> = links[i].iter().filter_map(|&c| keys[c].take()).collect();
        if let Some(key) = keys[i].as_mut() {
            key.children = children;
        }
    }
    keys.into_iter().next().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{HiveImage, KeySpec};
    use std::io::Cursor;

    fn limits() -> Limits {
        Limits { max_depth: 64, deadline: None, cancel: None }
    }

    fn build(bytes: Vec<u8>, limits: Limits) -> BuildOutcome {
        let reader = CellReader::new(Cursor::new(bytes)).unwrap();
        TreeBuilder::new(reader, DateTime::<Utc>::UNIX_EPOCH, limits).build()
    }

    #[test]
    fn test_single_root() {
        let mut img = HiveImage::new();
        img.add_key(KeySpec::root("ROOT"));
        let out = build(img.into_bytes(), limits());
        assert!(out.errors.is_empty());
        let root = out.root.unwrap();
        assert!(root.is_root);
        assert!(root.children.is_empty());
        assert_eq!(root.parent, None);
    }

    #[test]
    fn test_parent_back_references() {
        let mut img = HiveImage::new();
        let root = img.add_key(KeySpec::root("ROOT"));
        let a = img.add_key(KeySpec::child("A", root));
        let a1 = img.add_key(KeySpec::child("A1", a));
        let l1 = img.add_leaf_list(b"lf", &[a1]);
        img.set_child_list(a, l1);
        let l0 = img.add_leaf_list(b"lf", &[a]);
        img.set_child_list(root, l0);

        let out = build(img.into_bytes(), limits());
        assert!(out.errors.is_empty(), "{:?}", out.errors);
        let root = out.root.unwrap();
        let a = &root.children[0];
        assert_eq!(a.parent, Some(root.cell_offset));
        assert_eq!(a.children[0].parent, Some(a.cell_offset));
        assert_eq!(a.children[0].name, b"A1");
    }

    #[test]
    fn test_cycle_is_skipped_once() {
        let mut img = HiveImage::new();
        let root = img.add_key(KeySpec::root("ROOT"));
        let a = img.add_key(KeySpec::child("A", root));
        // A lists the root as its own child.
        let back = img.add_leaf_list(b"lf", &[root]);
        img.set_child_list(a, back);
        let l0 = img.add_leaf_list(b"lf", &[a]);
        img.set_child_list(root, l0);

        let out = build(img.into_bytes(), limits());
        let root_key = out.root.unwrap();
        assert_eq!(root_key.key_count(), 2);
        assert_eq!(out.errors.len(), 1);
        assert!(matches!(out.errors[0], HiveError::Cycle { offset } if offset == ROOT_KEY_OFFSET));
    }

    #[test]
    fn test_depth_limit_keeps_shallow_keys() {
        let mut img = HiveImage::new();
        let root = img.add_key(KeySpec::root("ROOT"));
        let mut parent = root;
        for i in 0..5 {
            let k = img.add_key(KeySpec::child(&format!("K{i}"), parent));
            let list = img.add_leaf_list(b"lh", &[k]);
            img.set_child_list(parent, list);
            parent = k;
        }
        let out = build(img.into_bytes(), Limits { max_depth: 2, ..limits() });
        assert_eq!(out.root.unwrap().key_count(), 3);
        assert_eq!(out.errors.len(), 1);
        assert!(matches!(out.errors[0], HiveError::DepthExceeded { depth: 2, .. }));
    }

    #[test]
    fn test_cancelled_before_start() {
        let mut img = HiveImage::new();
        img.add_key(KeySpec::root("ROOT"));
        let cancel = Arc::new(AtomicBool::new(true));
        let out = build(img.into_bytes(), Limits { cancel: Some(cancel), ..limits() });
        assert!(out.root.is_none());
        assert!(matches!(out.errors[..], [HiveError::Cancelled { .. }]));
    }

    #[test]
    fn test_expired_deadline_stops_walk() {
        let mut img = HiveImage::new();
        img.add_key(KeySpec::root("ROOT"));
        let out = build(img.into_bytes(), Limits { deadline: Some(Instant::now()), ..limits() });
        assert!(out.root.is_none());
        assert_eq!(out.errors.len(), 1);
    }

    #[test]
    fn test_root_with_children_fan_out() {
        let mut img = HiveImage::new();
        let root = img.add_key(KeySpec::root("ROOT"));
        let a = img.add_key(KeySpec::child("A", root));
        let b = img.add_key(KeySpec::child("B", root));
        let l0 = img.add_leaf_list(b"lf", &[a, b]);
        img.set_child_list(root, l0);

        let reader = CellReader::new(Cursor::new(img.into_bytes())).unwrap();
        let mut builder = TreeBuilder::new(reader, DateTime::<Utc>::UNIX_EPOCH, limits());
        let (key, cells) = builder.root_with_children().unwrap();
        assert!(key.is_root);
        assert_eq!(cells, vec![cell_body(a), cell_body(b)]);
        assert!(builder.into_errors().is_empty());
    }
}
