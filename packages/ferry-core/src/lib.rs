//! # Ferry Core
//!
//! A resumable, chunked, bidirectional file-transfer engine. A **sender**
//! holds the source bytes; a **listener** drives the transfer by requesting
//! exactly the chunks it is missing. Transfers are keyed by a stable uuid so
//! partial progress survives disconnects.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          FERRY CORE MODULES                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌──────────────┐   ┌──────────────────┐   ┌────────────────────────┐  │
//! │  │   Network    │   │     Transfer     │   │        Storage         │  │
//! │  │              │   │                  │   │                        │  │
//! │  │ - Handshake  │──►│ - Metadata       │──►│ - ByteStream           │  │
//! │  │ - TCP plane  │   │ - Progress       │   │   (memory / file)      │  │
//! │  │ - QUIC plane │   │ - Registry       │   │ - Absolute seeks       │  │
//! │  │ - Codec      │   │   (resume by     │   │ - Sparse destinations  │  │
//! │  │ - Credentials│   │    uuid)         │   │                        │  │
//! │  └──────────────┘   └──────────────────┘   └────────────────────────┘  │
//! │                                                                         │
//! │  Supporting: error taxonomy, settings loader                           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Transfer Flow
//!
//! 1. The listener accepts a mutually authenticated TLS channel and decodes
//!    one [`FileMetadata`] frame.
//! 2. The registry admits the uuid: first sighting creates a destination
//!    stream; a returning uuid reuses the existing stream and received set.
//! 3. The listener requests every chunk that is advertised-available and
//!    not yet received, over the control channel (TCP) or a dialed-back
//!    QUIC session (one substream pair per chunk).
//! 4. Replies land at `chunk_index × chunk_size`; the transfer completes
//!    when every advertised chunk has been received, and stays resumable
//!    otherwise.

#![warn(missing_docs)]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod config;
pub mod error;
pub mod network;
pub mod storage;
pub mod transfer;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use config::Settings;
pub use error::{Error, Result};
pub use network::{accept_and_serve, run_sender, serve_on, Credentials};
pub use storage::ByteStream;
pub use transfer::{ActiveTransfer, FileMetadata, Progress, Transport, TransferRegistry};
