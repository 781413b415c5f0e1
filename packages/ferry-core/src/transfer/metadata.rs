//! Transfer metadata.
//!
//! One `FileMetadata` frame opens every transfer: it names the transfer
//! (`uuid`), describes the chunk grid (`size`, `chunk_size`), advertises
//! which chunks the sender currently holds (`availability`), and selects
//! the data-plane transport.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Wire value selecting the byte-stream (TCP + TLS) data plane.
pub const TCP_TRANSPORT: &str = "TCP";
/// Wire value selecting the session-multiplex (QUIC) data plane.
pub const QUIC_TRANSPORT: &str = "QUIC";

/// Upper bound on `chunk_size`. A reply frame carries one base64-coded
/// chunk and must fit the frame cap with headroom.
pub const MAX_CHUNK_SIZE: u64 = 4 * 1024 * 1024;

/// Parsed data-plane transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Handshake channel carries the data plane too.
    Tcp,
    /// Receiver dials back to the sender's QUIC endpoint.
    Quic,
}

impl Transport {
    /// Parse the wire value. Anything but `"TCP"` or `"QUIC"` is fatal.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            TCP_TRANSPORT => Ok(Transport::Tcp),
            QUIC_TRANSPORT => Ok(Transport::Quic),
            other => Err(Error::UnsupportedTransport(other.to_string())),
        }
    }
}

/// Metadata describing one file transfer, exchanged once at handshake time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Stable transfer identifier; primary key in the registry.
    pub uuid: String,
    /// Destination name hint, used only when creating a new destination.
    pub filename: String,
    /// Logical grouping tag (informational).
    #[serde(default)]
    pub flow_name: String,
    /// Total byte length of the source.
    pub size: u64,
    /// Fixed chunk size in bytes; defines the indexing grid.
    pub chunk_size: u64,
    /// Advertised chunk possession. Absent means all chunks available;
    /// present means only indices mapped to `true` are available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability: Option<HashMap<u64, bool>>,
    /// Free-form key/value bag; round-trips unchanged.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Data-plane selector: `"TCP"` or `"QUIC"`.
    #[serde(default)]
    pub transport: String,
    /// Sender's data-plane endpoint, required iff transport is QUIC.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quic_addr: Option<String>,
}

impl FileMetadata {
    /// Number of chunks in the grid: `ceil(size / chunk_size)`.
    pub fn total_chunks(&self) -> u64 {
        if self.chunk_size == 0 {
            return 0;
        }
        self.size.div_ceil(self.chunk_size)
    }

    /// Parsed transport selector.
    pub fn transport(&self) -> Result<Transport> {
        Transport::parse(&self.transport)
    }

    /// Whether chunk `index` is advertised as available.
    pub fn is_chunk_available(&self, index: u64) -> bool {
        match &self.availability {
            None => true,
            Some(map) => map.get(&index).copied().unwrap_or(false),
        }
    }

    /// Byte length chunk `index` is expected to carry: `chunk_size` for all
    /// but the last chunk, which may be shorter.
    pub fn expected_chunk_len(&self, index: u64) -> u64 {
        let offset = index * self.chunk_size;
        if offset >= self.size {
            return 0;
        }
        self.chunk_size.min(self.size - offset)
    }

    /// Check the structural invariants of a metadata frame.
    pub fn validate(&self) -> Result<()> {
        if self.uuid.is_empty() {
            return Err(Error::InvalidMetadata("uuid is empty".to_string()));
        }
        if self.chunk_size == 0 {
            return Err(Error::InvalidMetadata("chunk_size is zero".to_string()));
        }
        if self.chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::InvalidMetadata(format!(
                "chunk_size {} exceeds the {} byte cap",
                self.chunk_size, MAX_CHUNK_SIZE
            )));
        }
        let total = self.total_chunks();
        if let Some(map) = &self.availability {
            if let Some(bad) = map.keys().find(|&&i| i >= total) {
                return Err(Error::InvalidMetadata(format!(
                    "availability index {bad} out of range (total chunks {total})"
                )));
            }
        }
        if self.transport()? == Transport::Quic && self.quic_addr.is_none() {
            return Err(Error::InvalidMetadata(
                "quic_addr is required for the QUIC transport".to_string(),
            ));
        }
        Ok(())
    }
}
