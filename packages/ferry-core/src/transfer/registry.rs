//! # Resumable-Transfer Registry
//!
//! Process-wide map of in-flight transfers, keyed by uuid.
//!
//! ## Resume Flow
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        REGISTRY LIFECYCLE                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  handshake(uuid) ──► get(uuid)                                          │
//! │        │                │                                               │
//! │        │           not found ──► create destination stream             │
//! │        │                │        insert ActiveTransfer                 │
//! │        │                │                                               │
//! │        │             found ──► size/chunk_size identical?              │
//! │        │                │        yes: reuse stream + received set,     │
//! │        │                │             overwrite availability           │
//! │        │                │        no:  MetadataConflict, entry intact   │
//! │        ▼                ▼                                               │
//! │     request only  available ∧ ¬received  chunks this round             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The registry never closes streams or evicts entries on its own; a
//! completed or aborted transfer stays resumable until the embedder calls
//! [`TransferRegistry::remove`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::storage::ByteStream;
use crate::transfer::metadata::FileMetadata;
use crate::transfer::progress::Progress;

/// Suffix appended to the advertised filename for destination files.
pub const RECV_SUFFIX: &str = ".recv";

/// One in-flight transfer: metadata, destination stream, and progress.
///
/// The geometry fields (`size`, `chunk_size`, `total_chunks`) are fixed at
/// first sighting; later frames for the same uuid may only refresh the
/// mutable metadata (availability, free-form bag, transport choice).
#[derive(Debug)]
pub struct ActiveTransfer {
    uuid: String,
    size: u64,
    chunk_size: u64,
    total_chunks: u64,
    meta: Mutex<FileMetadata>,
    /// Exclusive destination stream. Each chunk's seek+write pair holds
    /// this lock so concurrent chunks never interleave their placement.
    stream: tokio::sync::Mutex<ByteStream>,
    progress: Mutex<Progress>,
}

impl ActiveTransfer {
    fn new(meta: FileMetadata, stream: ByteStream) -> Self {
        let total_chunks = meta.total_chunks();
        Self {
            uuid: meta.uuid.clone(),
            size: meta.size,
            chunk_size: meta.chunk_size,
            total_chunks,
            meta: Mutex::new(meta),
            stream: tokio::sync::Mutex::new(stream),
            progress: Mutex::new(Progress::new(total_chunks)),
        }
    }

    /// Transfer identifier.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Total source length in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Chunk grid cell size in bytes.
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Number of chunks in the grid.
    pub fn total_chunks(&self) -> u64 {
        self.total_chunks
    }

    /// Snapshot of the current metadata frame.
    pub fn metadata(&self) -> FileMetadata {
        self.meta.lock().clone()
    }

    /// Fold a returning handshake's metadata into this transfer.
    ///
    /// `size` and `chunk_size` must match the first observed values; the
    /// availability map and free-form bag are overwritten, not reconciled.
    fn absorb(&self, meta: &FileMetadata) -> Result<()> {
        if meta.size != self.size {
            return Err(Error::MetadataConflict(format!(
                "uuid {}: size changed from {} to {}",
                self.uuid, self.size, meta.size
            )));
        }
        if meta.chunk_size != self.chunk_size {
            return Err(Error::MetadataConflict(format!(
                "uuid {}: chunk_size changed from {} to {}",
                self.uuid, self.chunk_size, meta.chunk_size
            )));
        }
        *self.meta.lock() = meta.clone();
        Ok(())
    }

    /// Chunk indices to request this round: advertised-available and not
    /// yet received.
    pub fn pending_chunks(&self) -> Vec<u64> {
        let meta = self.meta.lock();
        let progress = self.progress.lock();
        (0..self.total_chunks)
            .filter(|&i| meta.is_chunk_available(i) && !progress.is_received(i))
            .collect()
    }

    /// Mark chunk `index` received; idempotent. Returns `true` when newly
    /// marked.
    pub fn mark_received(&self, index: u64) -> bool {
        self.progress.lock().mark_received(index)
    }

    /// Number of chunks received so far.
    pub fn received_count(&self) -> u64 {
        self.progress.lock().received_count()
    }

    /// Whether every chunk in the grid has been received.
    pub fn is_complete(&self) -> bool {
        self.progress.lock().is_complete()
    }

    /// Place one reply payload at its absolute offset in the destination.
    ///
    /// Payloads that fall outside the grid or overrun the chunk's expected
    /// length are rejected as retryable chunk errors; destination I/O
    /// failures are fatal for the transfer.
    pub async fn write_chunk(&self, index: u64, data: &[u8]) -> Result<()> {
        if index >= self.total_chunks {
            return Err(Error::ChunkTransport(format!(
                "reply chunk_index {index} out of range (total {})",
                self.total_chunks
            )));
        }
        let expected = self.meta.lock().expected_chunk_len(index);
        if data.len() as u64 > expected {
            return Err(Error::ChunkTransport(format!(
                "reply for chunk {index} carries {} bytes, expected at most {expected}",
                data.len()
            )));
        }
        let mut stream = self.stream.lock().await;
        stream.seek_absolute(index * self.chunk_size).await?;
        stream.write_all(data).await
    }

    /// Exclusive access to the destination stream. Embedders use this to
    /// inspect or drain a destination after completion; chunk placement
    /// takes the same lock.
    pub async fn stream(&self) -> tokio::sync::MutexGuard<'_, ByteStream> {
        self.stream.lock().await
    }
}

/// Process-wide, mutex-guarded map from uuid to [`ActiveTransfer`].
#[derive(Debug)]
pub struct TransferRegistry {
    storage_dir: PathBuf,
    transfers: Mutex<HashMap<String, Arc<ActiveTransfer>>>,
}

impl TransferRegistry {
    /// Registry creating destination files under `storage_dir`.
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            transfers: Mutex::new(HashMap::new()),
        }
    }

    /// Registry configured from loaded [`Settings`].
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.storage_dir.clone())
    }

    /// Look up a live transfer.
    pub fn get(&self, uuid: &str) -> Option<Arc<ActiveTransfer>> {
        self.transfers.lock().get(uuid).cloned()
    }

    /// Admit a handshake: reuse the transfer if the uuid is known,
    /// otherwise create a destination stream under the storage directory
    /// and register a fresh one.
    pub async fn admit(&self, meta: &FileMetadata) -> Result<Arc<ActiveTransfer>> {
        meta.validate()?;
        if let Some(existing) = self.get(&meta.uuid) {
            existing.absorb(meta)?;
            return Ok(existing);
        }
        let stream = ByteStream::create(self.destination_path(&meta.filename)).await?;
        // A racing admit for the same uuid may have won while the file was
        // opening; admit_with re-checks under the map lock.
        self.admit_with(meta, stream)
    }

    /// Admit a handshake with a collaborator-supplied destination stream.
    /// Atomic with respect to `get`: the map lock covers the re-check and
    /// the insert.
    pub fn admit_with(
        &self,
        meta: &FileMetadata,
        stream: ByteStream,
    ) -> Result<Arc<ActiveTransfer>> {
        meta.validate()?;
        let mut map = self.transfers.lock();
        if let Some(existing) = map.get(&meta.uuid) {
            existing.absorb(meta)?;
            return Ok(existing.clone());
        }
        let transfer = Arc::new(ActiveTransfer::new(meta.clone(), stream));
        map.insert(meta.uuid.clone(), transfer.clone());
        Ok(transfer)
    }

    /// Remove a transfer. The destination stream is not closed here; the
    /// returned entry keeps it alive for the caller to drain or drop.
    pub fn remove(&self, uuid: &str) -> Option<Arc<ActiveTransfer>> {
        self.transfers.lock().remove(uuid)
    }

    /// Number of live transfers.
    pub fn len(&self) -> usize {
        self.transfers.lock().len()
    }

    /// Whether the registry holds no live transfers.
    pub fn is_empty(&self) -> bool {
        self.transfers.lock().is_empty()
    }

    fn destination_path(&self, filename: &str) -> PathBuf {
        // Only the final path component of the advertised name is used, so
        // a peer cannot steer the destination outside the storage dir.
        let name = Path::new(filename)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());
        self.storage_dir.join(format!("{name}{RECV_SUFFIX}"))
    }
}
