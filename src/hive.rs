//! High-level [`Hive`] API, the primary embedding surface.
//!
//! ```no_run
//! use hivetree::{Hive, ParseOptions};
//!
//! let hive = Hive::parse_file("SYSTEM", &ParseOptions::default());
//! if let Some(root) = hive.root() {
//!     for (depth, key) in root.iter() {
//!         println!("{:indent$}{}", "", key.name_lossy(), indent = depth * 2);
//!     }
//! }
//! for err in hive.errors() {
//!     eprintln!("{err}");
//! }
//! ```

use serde::{Serialize, Serializer};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::cell_reader::CellReader;
use crate::error::HiveError;
use crate::header::{self, ROOT_KEY_OFFSET};
use crate::node_key::NodeKey;
use crate::source::{FileSource, HiveSource};
use crate::tree::{BuildOutcome, Limits, TreeBuilder};

/// Default cap on key nesting below the root.
pub const DEFAULT_MAX_DEPTH: usize = 512;

// ── ParseOptions ──────────────────────────────────────────────────────────────

/// Configuration for [`Hive::parse_file`] and [`Hive::parse_source`].
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Keys nested deeper than this are skipped and reported.
    pub max_depth: usize,
    /// Wall-clock budget for the whole walk.
    pub timeout:   Option<Duration>,
    /// Set from another thread to stop the walk at the next key.
    pub cancel:    Option<Arc<AtomicBool>>,
    /// Walk the root's subtrees concurrently. Only honoured when the crate
    /// is built with the `parallel` feature.
    pub parallel:  bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            timeout:   None,
            cancel:    None,
            parallel:  false,
        }
    }
}

impl ParseOptions {
    /// Resolve the options against the current instant.
    pub fn limits(&self) -> Limits {
        Limits {
            max_depth: self.max_depth,
            deadline:  self.timeout.map(|t| Instant::now() + t),
            cancel:    self.cancel.clone(),
        }
    }
}

// ── Hive ──────────────────────────────────────────────────────────────────────

/// One parsed hive file: the reconstructed key tree and every fault met on
/// the way. Read-only once built.
#[derive(Debug, Serialize)]
pub struct Hive {
    filepath:     PathBuf,
    header_valid: bool,
    root_offset:  u64,
    root_key:     Option<NodeKey>,
    parsed:       bool,
    #[serde(serialize_with = "display_all")]
    errors:       Vec<HiveError>,
}

impl Hive {
    /// Parse the hive at `path`.
    ///
    /// Never fails outright: a missing file or bad magic leaves the hive
    /// unparsed with the reason in [`Hive::errors`].
    pub fn parse_file<P: AsRef<Path>>(path: P, options: &ParseOptions) -> Self {
        let path = path.as_ref();
        match FileSource::open(path) {
            Ok(source) => Self::parse_source(path, &source, options),
            Err(e)     => Self::empty(path).fatal(e),
        }
    }

    /// Parse from any [`HiveSource`]; `label` is reported as the file path.
    pub fn parse_source<S>(label: impl Into<PathBuf>, source: &S, options: &ParseOptions) -> Self
    where
        S: HiveSource + Sync,
    {
        let hive = Self::empty(label);

        let timestamp = match source.modified() {
            Ok(t)  => t,
            Err(e) => {
                let err = HiveError::path(&hive.filepath, e);
                return hive.fatal(err);
            }
        };
        let mut reader = match source.open_reader().and_then(CellReader::new) {
            Ok(r)  => r,
            Err(e) => {
                let err = HiveError::path(&hive.filepath, e);
                return hive.fatal(err);
            }
        };
        if let Err(e) = header::validate(&mut reader) {
            return hive.fatal(e);
        }

        let outcome = build_tree(source, reader, timestamp, options);
        let parsed = outcome.root.is_some() && outcome.errors.is_empty();
        let hive = Self {
            header_valid: true,
            root_key:     outcome.root,
            parsed,
            errors:       outcome.errors,
            ..hive
        };
        info!(
            path = %hive.filepath.display(),
            keys = hive.key_count(),
            errors = hive.errors.len(),
            parsed,
            "hive walk finished"
        );
        hive
    }

    fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            filepath:     path.into(),
            header_valid: false,
            root_offset:  ROOT_KEY_OFFSET,
            root_key:     None,
            parsed:       false,
            errors:       Vec::new(),
        }
    }

    fn fatal(mut self, e: HiveError) -> Self {
        warn!(path = %self.filepath.display(), "{e}");
        self.errors.push(e);
        self
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn path(&self) -> &Path { &self.filepath }

    pub fn header_valid(&self) -> bool { self.header_valid }

    pub fn root_offset(&self) -> u64 { self.root_offset }

    pub fn root(&self) -> Option<&NodeKey> { self.root_key.as_ref() }

    /// True when the whole tree was reconstructed without a single fault.
    pub fn is_parsed(&self) -> bool { self.parsed }

    pub fn errors(&self) -> &[HiveError] { &self.errors }

    pub fn key_count(&self) -> usize {
        self.root_key.as_ref().map_or(0, NodeKey::key_count)
    }

    /// Structural digest of the tree, hex encoded; `None` without a tree.
    pub fn digest_hex(&self) -> Option<String> {
        self.root_key.as_ref().map(|r| hex::encode(r.digest()))
    }
}

fn display_all<S: Serializer>(errors: &[HiveError], s: S) -> Result<S::Ok, S::Error> {
    s.collect_seq(errors.iter().map(ToString::to_string))
}

// ── Walk dispatch ─────────────────────────────────────────────────────────────

fn build_tree<S: HiveSource + Sync>(
    source:    &S,
    reader:    CellReader<S::Reader>,
    timestamp: chrono::DateTime<chrono::Utc>,
    options:   &ParseOptions,
) -> BuildOutcome {
    let limits = options.limits();

    #[cfg(feature = "parallel")]
    if options.parallel {
        return build_parallel(source, reader, timestamp, limits);
    }

    #[cfg(not(feature = "parallel"))]
    {
        let _ = source;
        if options.parallel {
            debug!("built without the `parallel` feature; walking sequentially");
        }
    }

    TreeBuilder::new(reader, timestamp, limits).build()
}

/// Decode the root on the shared reader, then give every root subtree its
/// own reader. Subtrees come back in slot order.
#[cfg(feature = "parallel")]
fn build_parallel<S: HiveSource + Sync>(
    source:    &S,
    reader:    CellReader<S::Reader>,
    timestamp: chrono::DateTime<chrono::Utc>,
    limits:    Limits,
) -> BuildOutcome {
    use rayon::prelude::*;

    let mut head = TreeBuilder::new(reader, timestamp, limits.clone());
    let Some((mut root, cells)) = head.root_with_children() else {
        return BuildOutcome { root: None, errors: head.into_errors() };
    };
    let mut errors = head.into_errors();
    let root_cell = root.cell_offset;
    debug!(subtrees = cells.len(), "walking root subtrees in parallel");

    let subtrees: Vec<(Option<NodeKey>, Vec<HiveError>)> = cells
        .par_iter()
        .map(|&cell| {
            let reader = match source.open_reader().and_then(CellReader::new) {
                Ok(r)  => r,
                Err(e) => return (None, vec![HiveError::Io(e)]),
            };
            let mut walker = TreeBuilder::new(reader, timestamp, limits.clone());
            walker.exclude(root_cell);
            let key = walker.build_subtree(cell, Some(root_cell), 1);
            (key, walker.into_errors())
        })
        .collect();

    merge_subtrees(&mut root, &mut errors, subtrees);
    BuildOutcome { root: Some(root), errors }
}

/// Attach subtrees in slot order. An interruption hits every subtree still
/// running, so only the first `Cancelled` is kept.
#[cfg(feature = "parallel")]
fn merge_subtrees(
    root:     &mut NodeKey,
    errors:   &mut Vec<HiveError>,
    subtrees: Vec<(Option<NodeKey>, Vec<HiveError>)>,
) {
    let mut cancelled = errors.iter().any(|e| matches!(e, HiveError::Cancelled { .. }));
    for (key, errs) in subtrees {
        root.children.extend(key);
        for e in errs {
            if matches!(e, HiveError::Cancelled { .. }) {
                if cancelled {
                    continue;
                }
                cancelled = true;
            }
            errors.push(e);
        }
    }
}
