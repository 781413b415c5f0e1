//! # Network Module
//!
//! The transport state machine: authenticated channels, the metadata
//! handshake, and the chunk request/response data plane on both transports.
//!
//! ## Transport Split
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        TRANSPORT DISPATCH                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Control channel: TCP + TLS (mutual auth), always                      │
//! │      frame 1: FileMetadata                                             │
//! │                                                                         │
//! │  transport = "TCP"                                                     │
//! │      the same channel carries the data plane: request/reply frames,    │
//! │      serialized one exchange at a time                                 │
//! │                                                                         │
//! │  transport = "QUIC"                                                    │
//! │      receiver dials quic_addr with the same credentials; each chunk    │
//! │      exchange is a pair of one-shot unidirectional substreams,         │
//! │      independent and unordered                                         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod codec;
pub mod credentials;
mod listener;
mod quic;
mod sender;

pub use codec::{ChunkReply, ChunkRequest, MAX_FRAME_SIZE};
pub use credentials::{Credentials, ALPN_PROTOCOL};
pub use listener::{accept_and_serve, serve_on};
pub use sender::run_sender;
