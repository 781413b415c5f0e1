//! # Storage Module
//!
//! Random-access byte streams for transfer sources and destinations.
//!
//! ## Stream Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         BYTE STREAMS                                    │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ByteStream ─ a random-access sink/source with three operations:       │
//! │                                                                         │
//! │    read(buf)  → n       read at the cursor, 0 signals end-of-data      │
//! │    write(buf) → n       write at the cursor, cursor advances           │
//! │    seek_absolute(pos)   move the cursor; past-end seeks are allowed    │
//! │                                                                         │
//! │  Variants (tagged enum, no trait objects):                             │
//! │                                                                         │
//! │    Memory  - growable in-process buffer; gaps read as zeroes           │
//! │    File    - tokio-backed file; sparse-safe, create-or-open            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Chunk replies land at `chunk_index * chunk_size`, so a destination stream
//! must accept a seek past its current end followed by a write, leaving
//! unwritten regions zero-valued. Ownership of a stream is exclusive to the
//! transfer holding it; concurrent chunk writes serialize on the transfer's
//! stream lock, not here.

use std::io::SeekFrom;
use std::path::Path;

use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::error::{Error, Result};

/// A random-access byte stream with absolute-position seeking.
#[derive(Debug)]
pub enum ByteStream {
    /// Growable in-memory buffer. Used by tests and in-process embedders.
    Memory(MemoryStream),
    /// Filesystem-backed stream.
    File(FileStream),
}

impl ByteStream {
    /// An empty in-memory stream.
    pub fn memory() -> Self {
        ByteStream::Memory(MemoryStream::default())
    }

    /// An in-memory stream preloaded with `data`, cursor at 0.
    pub fn from_vec(data: Vec<u8>) -> Self {
        ByteStream::Memory(MemoryStream { buffer: data, pos: 0 })
    }

    /// Create-or-open a destination file. Never truncates: a resumed
    /// transfer reopening its destination keeps previously written chunks.
    pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)
            .await
            .map_err(|e| Error::StreamIo(format!("open {}: {e}", path.display())))?;
        Ok(ByteStream::File(FileStream { file }))
    }

    /// Open an existing file as a transfer source.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .open(path)
            .await
            .map_err(|e| Error::StreamIo(format!("open {}: {e}", path.display())))?;
        Ok(ByteStream::File(FileStream { file }))
    }

    /// Read up to `buf.len()` bytes at the cursor. Returns the count read;
    /// 0 signals end-of-data.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self {
            ByteStream::Memory(m) => Ok(m.read(buf)),
            ByteStream::File(f) => f
                .file
                .read(buf)
                .await
                .map_err(|e| Error::StreamIo(format!("read: {e}"))),
        }
    }

    /// Write `buf` at the cursor; the cursor advances by the count written.
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        match self {
            ByteStream::Memory(m) => Ok(m.write(buf)),
            ByteStream::File(f) => f
                .file
                .write(buf)
                .await
                .map_err(|e| Error::StreamIo(format!("write: {e}"))),
        }
    }

    /// Write the whole of `buf`, looping over short writes.
    pub async fn write_all(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self.write(buf).await?;
            if n == 0 {
                return Err(Error::StreamIo("write returned 0".to_string()));
            }
            buf = &buf[n..];
        }
        Ok(())
    }

    /// Move the cursor to an absolute position. Seeks past the current end
    /// are permitted; the stream grows on the next write and unwritten
    /// regions read as zeroes.
    pub async fn seek_absolute(&mut self, pos: u64) -> Result<()> {
        match self {
            ByteStream::Memory(m) => {
                m.pos = pos;
                Ok(())
            }
            ByteStream::File(f) => {
                f.file
                    .seek(SeekFrom::Start(pos))
                    .await
                    .map_err(|e| Error::StreamIo(format!("seek to {pos}: {e}")))?;
                Ok(())
            }
        }
    }

    /// Push any in-flight writes down to the OS. A no-op for memory
    /// streams; file durability beyond this is left to the filesystem.
    pub async fn flush(&mut self) -> Result<()> {
        match self {
            ByteStream::Memory(_) => Ok(()),
            ByteStream::File(f) => f
                .file
                .flush()
                .await
                .map_err(|e| Error::StreamIo(format!("flush: {e}"))),
        }
    }

    /// Read up to `len` bytes at the cursor, looping over short reads.
    /// Returns fewer than `len` bytes only at end-of-data.
    pub async fn read_up_to(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let n = self.read(&mut out[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        out.truncate(filled);
        Ok(out)
    }
}

/// Growable in-memory buffer with a cursor.
#[derive(Debug, Default)]
pub struct MemoryStream {
    buffer: Vec<u8>,
    pos: u64,
}

impl MemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> usize {
        let pos = self.pos as usize;
        if pos >= self.buffer.len() {
            return 0;
        }
        let n = buf.len().min(self.buffer.len() - pos);
        buf[..n].copy_from_slice(&self.buffer[pos..pos + n]);
        self.pos += n as u64;
        n
    }

    fn write(&mut self, buf: &[u8]) -> usize {
        let pos = self.pos as usize;
        let end = pos + buf.len();
        if end > self.buffer.len() {
            // Zero-fills any gap between the old end and the cursor.
            self.buffer.resize(end, 0);
        }
        self.buffer[pos..end].copy_from_slice(buf);
        self.pos = end as u64;
        buf.len()
    }

    /// The current buffer contents (tests compare against sources).
    pub fn contents(&self) -> &[u8] {
        &self.buffer
    }
}

/// Filesystem-backed stream.
#[derive(Debug)]
pub struct FileStream {
    file: tokio::fs::File,
}
