//! Cursor-tracking primitive over a seekable byte source.
//!
//! Every decoder in the crate moves through the hive with this type. The
//! cursor is tracked locally so error messages can always name the offset a
//! read started at, even after the underlying stream failed mid-read.
//!
//! All multi-byte integers in a hive are little-endian unsigned.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{self, Read, Seek, SeekFrom};

use crate::error::{HiveError, Result};

pub struct CellReader<R> {
    inner: R,
    pos:   u64,
}

impl<R: Read + Seek> CellReader<R> {
    /// Wrap `inner`, picking up its current stream position.
    pub fn new(mut inner: R) -> io::Result<Self> {
        let pos = inner.stream_position()?;
        Ok(Self { inner, pos })
    }

    #[inline]
    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn seek_absolute(&mut self, pos: u64) -> Result<()> {
        self.pos = self.inner.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    pub fn seek_relative(&mut self, delta: i64) -> Result<()> {
        self.pos = self.inner.seek(SeekFrom::Current(delta))?;
        Ok(())
    }

    /// Read exactly `n` bytes or fail with [`HiveError::Truncated`].
    pub fn read_fixed(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.fill(&mut buf)?;
        Ok(buf)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.fill(&mut buf)?;
        Ok(buf)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let start = self.pos;
        let v = self.inner
            .read_u16::<LittleEndian>()
            .map_err(|e| truncated(e, start, 2))?;
        self.pos += 2;
        Ok(v)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let start = self.pos;
        let v = self.inner
            .read_u32::<LittleEndian>()
            .map_err(|e| truncated(e, start, 4))?;
        self.pos += 4;
        Ok(v)
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<()> {
        let start = self.pos;
        self.inner
            .read_exact(buf)
            .map_err(|e| truncated(e, start, buf.len()))?;
        self.pos += buf.len() as u64;
        Ok(())
    }
}

fn truncated(e: io::Error, offset: u64, wanted: usize) -> HiveError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        HiveError::Truncated { offset, wanted }
    } else {
        HiveError::Io(e)
    }
}
