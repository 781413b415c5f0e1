//! # Listener
//!
//! The receiver side of the engine: accepts authenticated channels, decodes
//! the metadata frame, consults the resumable-transfer registry, and drives
//! the chunk request/response pipeline until every advertised chunk has
//! arrived.
//!
//! ## Round Structure
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        ONE LISTENER ROUND                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  accept TCP ──► TLS (mutual auth) ──► decode FileMetadata              │
//! │                                            │                            │
//! │                               registry.admit(uuid)                     │
//! │                          new: create destination stream                │
//! │                          known: reuse stream + received set            │
//! │                                            │                            │
//! │              ┌─────────── transport? ──────┴────────────┐               │
//! │              ▼                                          ▼               │
//! │      TCP: one task per pending chunk,          QUIC: dial quic_addr,   │
//! │      request/reply serialized on the           one request per one-    │
//! │      control-channel lock                      shot substream pair     │
//! │              │                                          │               │
//! │              └───────────────► outcomes ◄───────────────┘               │
//! │                                                                         │
//! │  ok replies: seek(index × chunk_size), write, mark received            │
//! │  failures:   ok=false outcome; chunk stays requestable next round      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::network::codec::{self, ChunkReply, ChunkRequest};
use crate::network::credentials::Credentials;
use crate::network::quic;
use crate::transfer::{ActiveTransfer, FileMetadata, Transport, TransferRegistry};

type TlsServerStream = tokio_rustls::server::TlsStream<TcpStream>;

/// Result of one chunk-request task.
#[derive(Debug, Clone, Copy)]
struct ChunkOutcome {
    index: u64,
    ok: bool,
}

impl ChunkOutcome {
    fn miss(index: u64) -> Self {
        Self { index, ok: false }
    }
}

/// Summary of one served channel, logged at round end.
#[derive(Debug)]
struct RoundOutcome {
    uuid: String,
    dispatched: usize,
    received_round: u64,
    complete: bool,
}

/// Bind `addr` and serve `max_iterations` accepted channels.
///
/// Returns the first fatal error seen across accepted connections, or
/// `Ok(())` once `max_iterations` channels have been processed. Chunk-local
/// failures never surface here; they leave their transfer resumable.
pub async fn accept_and_serve(
    addr: &str,
    registry: Arc<TransferRegistry>,
    credentials: &Credentials,
    max_iterations: usize,
) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_on(listener, registry, credentials, max_iterations).await
}

/// [`accept_and_serve`] over a pre-bound listener, for embedders that need
/// the ephemeral port before serving starts.
pub async fn serve_on(
    listener: TcpListener,
    registry: Arc<TransferRegistry>,
    credentials: &Credentials,
    max_iterations: usize,
) -> Result<()> {
    let acceptor = TlsAcceptor::from(credentials.server_config()?);
    info!(addr = %listener.local_addr()?, "listening for transfers");

    for iteration in 0..max_iterations {
        let (socket, peer) = listener.accept().await?;
        debug!(%peer, iteration, "accepted connection");

        let tls = acceptor
            .accept(socket)
            .await
            .map_err(|e| Error::HandshakeFailed(format!("tls accept from {peer}: {e}")))?;

        let outcome = serve_channel(tls, &registry, credentials).await?;
        info!(
            uuid = %outcome.uuid,
            dispatched = outcome.dispatched,
            received = outcome.received_round,
            complete = outcome.complete,
            "transfer round finished"
        );
    }
    Ok(())
}

/// Handle one authenticated channel: handshake, registry admission, and a
/// data-plane round on the selected transport.
async fn serve_channel(
    mut tls: TlsServerStream,
    registry: &TransferRegistry,
    credentials: &Credentials,
) -> Result<RoundOutcome> {
    let meta: FileMetadata = codec::read_frame(&mut tls)
        .await
        .map_err(|e| Error::HandshakeFailed(format!("metadata decode: {e}")))?;
    let transport = meta.transport()?;

    let transfer = registry.admit(&meta).await?;
    info!(
        uuid = %transfer.uuid(),
        filename = %meta.filename,
        size = transfer.size(),
        chunk_size = transfer.chunk_size(),
        already_received = transfer.received_count(),
        ?transport,
        "transfer admitted"
    );

    match transport {
        Transport::Tcp => run_byte_stream_round(tls, transfer).await,
        Transport::Quic => {
            // The control channel's job ends with the metadata frame; it is
            // held open so its closure tells the sender to stop serving.
            let quic_addr = meta.quic_addr.clone().ok_or_else(|| {
                Error::InvalidMetadata("quic_addr is required for the QUIC transport".to_string())
            })?;
            let outcome = run_multiplex_round(&quic_addr, credentials, transfer).await;
            let _ = tls.shutdown().await;
            outcome
        }
    }
}

// ============================================================================
// BYTE-STREAM (TCP) ROUND
// ============================================================================

/// Drive one round over the control channel itself: requests and replies
/// are serialized on the channel lock, one exchange at a time.
async fn run_byte_stream_round(
    tls: TlsServerStream,
    transfer: Arc<ActiveTransfer>,
) -> Result<RoundOutcome> {
    let pending = transfer.pending_chunks();
    let channel = Arc::new(tokio::sync::Mutex::new(tls));

    let mut tasks: JoinSet<Result<ChunkOutcome>> = JoinSet::new();
    for index in &pending {
        let index = *index;
        let channel = channel.clone();
        let transfer = transfer.clone();
        tasks.spawn(async move { fetch_chunk_byte_stream(channel, transfer, index).await });
    }

    let outcome = collect_outcomes(tasks, &transfer, pending.len()).await;
    // Close the channel cleanly so the sender's serve loop sees EOF.
    let _ = channel.lock().await.shutdown().await;
    outcome
}

/// One chunk exchange on the shared control channel. The request encode and
/// the matching reply decode form a single critical section.
async fn fetch_chunk_byte_stream(
    channel: Arc<tokio::sync::Mutex<TlsServerStream>>,
    transfer: Arc<ActiveTransfer>,
    index: u64,
) -> Result<ChunkOutcome> {
    let exchange = {
        let mut chan = channel.lock().await;
        let request = ChunkRequest {
            request_chunk: index,
        };
        match codec::write_frame(&mut *chan, &request).await {
            Ok(()) => codec::read_frame::<_, ChunkReply>(&mut *chan).await,
            Err(e) => Err(e),
        }
    };

    match exchange {
        Ok(reply) => deliver_reply(&transfer, reply).await,
        Err(e) => {
            warn!(chunk = index, "chunk exchange failed: {e}");
            Ok(ChunkOutcome::miss(index))
        }
    }
}

// ============================================================================
// SESSION-MULTIPLEX (QUIC) ROUND
// ============================================================================

/// Drive one round over a dialed-back QUIC session: one request per
/// receiver-opened substream, one reply per sender-opened substream, all
/// independent and unordered.
async fn run_multiplex_round(
    quic_addr: &str,
    credentials: &Credentials,
    transfer: Arc<ActiveTransfer>,
) -> Result<RoundOutcome> {
    let (endpoint, connection) = quic::connect(quic_addr, credentials).await?;
    let pending = transfer.pending_chunks();

    let mut tasks: JoinSet<Result<ChunkOutcome>> = JoinSet::new();
    for index in &pending {
        let index = *index;
        let connection = connection.clone();
        let transfer = transfer.clone();
        tasks.spawn(async move { fetch_chunk_substream(connection, transfer, index).await });
    }

    let outcome = collect_outcomes(tasks, &transfer, pending.len()).await;
    connection.close(0u32.into(), b"round complete");
    endpoint.wait_idle().await;
    outcome
}

/// One chunk exchange as a pair of one-shot substreams.
async fn fetch_chunk_substream(
    connection: quinn::Connection,
    transfer: Arc<ActiveTransfer>,
    index: u64,
) -> Result<ChunkOutcome> {
    let exchange: std::io::Result<ChunkReply> = async {
        let mut send = connection.open_uni().await.map_err(std::io::Error::from)?;
        let request = ChunkRequest {
            request_chunk: index,
        };
        codec::write_frame(&mut send, &request).await?;
        let _ = send.finish();

        // Replies arrive on sender-opened substreams in arbitrary order;
        // whichever reply this task picks up is routed by its own index.
        let mut recv = connection.accept_uni().await.map_err(std::io::Error::from)?;
        codec::read_frame(&mut recv).await
    }
    .await;

    match exchange {
        Ok(reply) => deliver_reply(&transfer, reply).await,
        Err(e) => {
            warn!(chunk = index, "substream exchange failed: {e}");
            Ok(ChunkOutcome::miss(index))
        }
    }
}

// ============================================================================
// SHARED REPLY HANDLING
// ============================================================================

/// Route one reply: place good payloads at their absolute offset, downgrade
/// chunk-local problems to misses, surface destination I/O as fatal.
async fn deliver_reply(transfer: &ActiveTransfer, reply: ChunkReply) -> Result<ChunkOutcome> {
    if !reply.ok {
        debug!(chunk = reply.chunk_index, "sender reported chunk unavailable");
        return Ok(ChunkOutcome::miss(reply.chunk_index));
    }
    match transfer.write_chunk(reply.chunk_index, &reply.data).await {
        Ok(()) => Ok(ChunkOutcome {
            index: reply.chunk_index,
            ok: true,
        }),
        Err(e) if e.is_chunk_local() => {
            warn!(chunk = reply.chunk_index, "rejected reply: {e}");
            Ok(ChunkOutcome::miss(reply.chunk_index))
        }
        Err(e) => Err(e),
    }
}

/// Drain every chunk task, marking received chunks under the progress lock.
/// The first fatal error is remembered and returned only after all in-flight
/// tasks have settled, so the channel winds down in an orderly way.
async fn collect_outcomes(
    mut tasks: JoinSet<Result<ChunkOutcome>>,
    transfer: &Arc<ActiveTransfer>,
    dispatched: usize,
) -> Result<RoundOutcome> {
    let mut received_round = 0u64;
    let mut fatal: Option<Error> = None;

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(outcome)) => {
                if outcome.ok && transfer.mark_received(outcome.index) {
                    received_round += 1;
                    debug!(
                        chunk = outcome.index,
                        received = transfer.received_count(),
                        total = transfer.total_chunks(),
                        "chunk received"
                    );
                }
            }
            Ok(Err(e)) => {
                error!(uuid = %transfer.uuid(), "chunk task failed: {e}");
                fatal.get_or_insert(e);
            }
            Err(join_err) => {
                // A lost task costs one chunk this round, nothing more.
                error!(uuid = %transfer.uuid(), "chunk task aborted: {join_err}");
            }
        }
    }

    if let Some(e) = fatal {
        return Err(e);
    }
    Ok(RoundOutcome {
        uuid: transfer.uuid().to_string(),
        dispatched,
        received_round,
        complete: transfer.is_complete(),
    })
}
