//! # Error Handling
//!
//! Error types for the ferry transfer engine.
//!
//! ## Error Taxonomy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          ERROR TAXONOMY                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Channel-fatal (abort the serve call, surface to the caller)           │
//! │  ├── HandshakeFailed      - auth or metadata-decode failure            │
//! │  ├── UnsupportedTransport - unknown transport value                    │
//! │  ├── MetadataConflict     - returning uuid with altered geometry       │
//! │  ├── InvalidMetadata      - metadata violating its own invariants      │
//! │  ├── SenderTimeout        - sender wall-clock deadline exceeded        │
//! │  ├── StreamIo             - destination seek/write failure             │
//! │  └── Io                   - bind/accept/socket failure                 │
//! │                                                                         │
//! │  Chunk-local (downgraded to ok=false outcomes, never fatal)            │
//! │  └── ChunkTransport       - one request/reply exchange failed          │
//! │                                                                         │
//! │  Collaborator (before any channel exists)                              │
//! │  ├── Credentials          - credential material unusable               │
//! │  └── Config               - settings file unusable                     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Chunk-local errors are logged and converted into `ok = false` results by
//! the request pipeline; the transfer stays resumable under the same uuid.
//! Channel-fatal errors terminate the serve call and retain the registry
//! entry (except `HandshakeFailed`, which occurs before any registry
//! mutation).

use thiserror::Error;

/// Result type alias used throughout ferry-core.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for the transfer engine.
#[derive(Debug, Error)]
pub enum Error {
    // ========================================================================
    // Channel-fatal errors
    // ========================================================================

    /// Authentication or metadata-decode failure during the handshake.
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// The metadata frame named a transport this engine does not speak.
    #[error("Unsupported transport: {0:?}")]
    UnsupportedTransport(String),

    /// A returning uuid arrived with a different size or chunk size.
    #[error("Metadata conflict: {0}")]
    MetadataConflict(String),

    /// Metadata violating its own invariants (zero chunk size, empty uuid,
    /// availability index out of range).
    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    /// The sender's wall-clock deadline expired before the peer closed.
    #[error("Sender deadline exceeded")]
    SenderTimeout,

    /// Destination stream seek/write failure. Fatal for the transfer; the
    /// registry entry is retained for the caller to inspect.
    #[error("Stream I/O error: {0}")]
    StreamIo(String),

    // ========================================================================
    // Chunk-local errors
    // ========================================================================

    /// A single chunk exchange failed (socket or substream error). The
    /// pipeline downgrades this to an `ok = false` outcome.
    #[error("Chunk transport error: {0}")]
    ChunkTransport(String),

    // ========================================================================
    // Collaborator errors
    // ========================================================================

    /// Certificate or private-key material could not be loaded or used.
    #[error("Credential error: {0}")]
    Credentials(String),

    /// The settings file could not be read or parsed.
    #[error("Config error: {0}")]
    Config(String),

    /// Transport-level I/O failure (bind, accept, dial).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error leaves the transfer resumable under its uuid.
    ///
    /// Chunk-local errors never abort a transfer; everything else does,
    /// though the registry entry survives for a later resume attempt.
    pub fn is_chunk_local(&self) -> bool {
        matches!(self, Error::ChunkTransport(_))
    }
}
