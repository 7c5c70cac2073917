//! Backing byte sources for a parse.
//!
//! A source hands out independent readers, so concurrent subtree walks never
//! share a cursor, and supplies the single timestamp stamped on every key.

use chrono::{DateTime, Utc};
use std::fs::{self, File};
use std::io::{self, BufReader, Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{HiveError, Result};

pub trait HiveSource {
    type Reader: Read + Seek;

    /// A fresh reader positioned at offset 0.
    fn open_reader(&self) -> io::Result<Self::Reader>;

    /// Timestamp reported for every key of this hive.
    fn modified(&self) -> io::Result<DateTime<Utc>>;
}

/// A hive file on disk.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    /// Fails with [`HiveError::Path`] when `path` cannot be inspected.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let meta = fs::metadata(&path).map_err(|e| HiveError::path(&path, e))?;
        if meta.is_dir() {
            let e = io::Error::new(io::ErrorKind::Other, "is a directory");
            return Err(HiveError::path(&path, e));
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HiveSource for FileSource {
    type Reader = BufReader<File>;

    fn open_reader(&self) -> io::Result<Self::Reader> {
        Ok(BufReader::new(File::open(&self.path)?))
    }

    fn modified(&self) -> io::Result<DateTime<Utc>> {
        Ok(fs::metadata(&self.path)?.modified()?.into())
    }
}

/// Hive bytes already in memory, e.g. carved from an image.
#[derive(Debug, Clone)]
pub struct MemorySource {
    bytes:    Arc<[u8]>,
    modified: DateTime<Utc>,
}

impl MemorySource {
    pub fn new(bytes: impl Into<Arc<[u8]>>, modified: DateTime<Utc>) -> Self {
        Self { bytes: bytes.into(), modified }
    }
}

impl HiveSource for MemorySource {
    type Reader = Cursor<Arc<[u8]>>;

    fn open_reader(&self) -> io::Result<Self::Reader> {
        Ok(Cursor::new(Arc::clone(&self.bytes)))
    }

    fn modified(&self) -> io::Result<DateTime<Utc>> {
        Ok(self.modified)
    }
}
