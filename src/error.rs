//! Error taxonomy for hive parsing.
//!
//! Two classes exist. Fatal errors ([`HiveError::Format`], [`HiveError::Path`])
//! mean no tree is produced at all. Every other variant is a per-node fault:
//! it is appended to the hive's error list and only the affected subtree is
//! dropped.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HiveError {
    #[error("Magic header is not 'regf' (found {}), cannot verify hive file", hex::encode(found))]
    Format { found: Vec<u8> },

    #[error("Cannot open hive file {}: {source}", path.display())]
    Path {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Truncated read at offset {offset}: wanted {wanted} bytes")]
    Truncated { offset: u64, wanted: usize },

    #[error("Invalid key cell signature {} at offset {offset}", show_tag(found))]
    BadSignature { offset: u64, found: [u8; 2] },

    #[error("Bad LF/LH/RI record {} at offset {offset}", show_tag(found))]
    BadChildList { offset: u64, found: [u8; 2] },

    #[error("Key cell at offset {offset} was already visited (cyclic offset graph)")]
    Cycle { offset: u64 },

    #[error("Key cell at offset {offset} exceeds maximum depth {depth}")]
    DepthExceeded { offset: u64, depth: usize },

    #[error("Parse interrupted before key cell at offset {offset}")]
    Cancelled { offset: u64 },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl HiveError {
    /// True when the error leaves the hive without any tree.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HiveError::Format { .. } | HiveError::Path { .. })
    }

    pub(crate) fn path(path: impl Into<PathBuf>, source: io::Error) -> Self {
        HiveError::Path { path: path.into(), source }
    }
}

fn show_tag(tag: &[u8; 2]) -> String {
    if tag.iter().all(|b| b.is_ascii_graphic()) {
        format!("'{}'", String::from_utf8_lossy(tag))
    } else {
        format!("0x{}", hex::encode(tag))
    }
}

pub type Result<T> = std::result::Result<T, HiveError>;
