//! # Sender
//!
//! The source side of the engine: dials the listener, authenticates, sends
//! the metadata frame, then answers chunk requests until the peer closes
//! the channel or the wall-clock deadline expires.
//!
//! The sender has no notion of completion: it never learns what the
//! receiver has durably written. It tracks transmitted chunks only for
//! observability.

use std::time::Duration;

use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::network::codec::{self, ChunkReply, ChunkRequest};
use crate::network::credentials::Credentials;
use crate::network::quic;
use crate::storage::ByteStream;
use crate::transfer::{FileMetadata, Progress, Transport};

type TlsClientStream = tokio_rustls::client::TlsStream<TcpStream>;

/// Dial `addr`, send the metadata frame for `meta`, and serve chunk
/// requests from `source` until the peer closes or `timeout` elapses.
///
/// For the QUIC transport the data-plane endpoint is bound at
/// `meta.quic_addr` before the control channel is dialed; a port of 0 binds
/// an ephemeral port and the advertised address is rewritten to match.
pub async fn run_sender(
    addr: &str,
    mut meta: FileMetadata,
    mut source: ByteStream,
    timeout: Duration,
    credentials: &Credentials,
) -> Result<()> {
    meta.validate()?;
    let transport = meta.transport()?;
    let deadline = Instant::now() + timeout;

    // QUIC: the data plane must be listening before the receiver can dial
    // back, so the endpoint comes up before the control channel.
    let data_endpoint = match transport {
        Transport::Tcp => None,
        Transport::Quic => {
            let advertised = meta.quic_addr.clone().ok_or_else(|| {
                Error::InvalidMetadata("quic_addr is required for the QUIC transport".to_string())
            })?;
            let (_, bind_addr) = quic::resolve(&advertised).await?;
            let endpoint = quic::server_endpoint(bind_addr, credentials)?;
            if bind_addr.port() == 0 {
                let bound = endpoint.local_addr()?.port();
                meta.quic_addr = Some(quic::with_port(&advertised, bound));
            }
            Some(endpoint)
        }
    };

    let mut control = dial_control(addr, credentials, deadline).await?;
    timeout_at(deadline, codec::write_frame(&mut control, &meta))
        .await
        .map_err(|_| Error::SenderTimeout)?
        .map_err(|e| Error::HandshakeFailed(format!("metadata send: {e}")))?;
    info!(
        uuid = %meta.uuid,
        size = meta.size,
        chunk_size = meta.chunk_size,
        ?transport,
        "metadata sent"
    );

    let mut progress = Progress::new(meta.total_chunks());
    match transport {
        Transport::Tcp => {
            serve_byte_stream(control, &meta, &mut source, &mut progress, deadline).await?
        }
        Transport::Quic => {
            // data_endpoint is always bound on this arm.
            let endpoint = data_endpoint.ok_or_else(|| {
                Error::InvalidMetadata("missing data-plane endpoint".to_string())
            })?;
            serve_multiplex(endpoint, control, &meta, &mut source, &mut progress, deadline).await?
        }
    }

    debug!(uuid = %meta.uuid, sent = progress.sent_count(), "sender finished");
    Ok(())
}

/// Dial and authenticate the control channel.
async fn dial_control(
    addr: &str,
    credentials: &Credentials,
    deadline: Instant,
) -> Result<TlsClientStream> {
    let (host, remote) = quic::resolve(addr).await?;
    let tcp = timeout_at(deadline, TcpStream::connect(remote))
        .await
        .map_err(|_| Error::SenderTimeout)??;

    let connector = TlsConnector::from(credentials.client_config()?);
    let server_name = ServerName::try_from(host)
        .map_err(|e| Error::HandshakeFailed(format!("bad server name in {addr}: {e}")))?;
    timeout_at(deadline, connector.connect(server_name, tcp))
        .await
        .map_err(|_| Error::SenderTimeout)?
        .map_err(|e| Error::HandshakeFailed(format!("tls connect to {addr}: {e}")))
}

/// Serve chunk requests on the control channel itself until clean
/// end-of-channel or the deadline.
async fn serve_byte_stream(
    mut control: TlsClientStream,
    meta: &FileMetadata,
    source: &mut ByteStream,
    progress: &mut Progress,
    deadline: Instant,
) -> Result<()> {
    loop {
        let request: Option<ChunkRequest> =
            match timeout_at(deadline, codec::read_frame_opt(&mut control)).await {
                Err(_) => return Err(Error::SenderTimeout),
                Ok(read) => read?,
            };
        let Some(request) = request else {
            // Peer closed the channel; the round is over.
            break;
        };

        let reply = build_reply(meta, source, request.request_chunk).await?;
        if reply.ok {
            progress.mark_sent(reply.chunk_index);
            debug!(
                chunk = reply.chunk_index,
                sent = progress.sent_count(),
                "serving chunk"
            );
        }
        match timeout_at(deadline, codec::write_frame(&mut control, &reply)).await {
            Err(_) => return Err(Error::SenderTimeout),
            Ok(written) => written?,
        }
    }
    Ok(())
}

/// Serve chunk requests from the data-plane endpoint: one request per
/// accepted substream, one reply per opened substream. Ends when the
/// session or the control channel closes, or the deadline passes.
async fn serve_multiplex(
    endpoint: quinn::Endpoint,
    mut control: TlsClientStream,
    meta: &FileMetadata,
    source: &mut ByteStream,
    progress: &mut Progress,
    deadline: Instant,
) -> Result<()> {
    let serve = async {
        let incoming = endpoint
            .accept()
            .await
            .ok_or_else(|| Error::HandshakeFailed("data-plane endpoint closed".to_string()))?;
        let connection = incoming
            .await
            .map_err(|e| Error::HandshakeFailed(format!("data-plane session accept: {e}")))?;
        info!(peer = %connection.remote_address(), "data-plane session established");

        loop {
            let mut recv = match connection.accept_uni().await {
                Ok(stream) => stream,
                Err(quinn::ConnectionError::ApplicationClosed { .. })
                | Err(quinn::ConnectionError::LocallyClosed) => break,
                Err(e) => return Err(Error::Io(std::io::Error::from(e))),
            };
            let request: ChunkRequest = match codec::read_frame(&mut recv).await {
                Ok(request) => request,
                Err(e) => {
                    warn!("request substream failed: {e}");
                    continue;
                }
            };

            let reply = build_reply(meta, source, request.request_chunk).await?;
            if reply.ok {
                progress.mark_sent(reply.chunk_index);
                debug!(
                    chunk = reply.chunk_index,
                    sent = progress.sent_count(),
                    "serving chunk"
                );
            }
            let sent: std::io::Result<()> = async {
                let mut send = connection.open_uni().await.map_err(std::io::Error::from)?;
                codec::write_frame(&mut send, &reply).await?;
                let _ = send.finish();
                Ok(())
            }
            .await;
            if let Err(e) = sent {
                warn!(chunk = request.request_chunk, "reply substream failed: {e}");
            }
        }
        Ok(())
    };

    // Nothing follows the metadata frame on the control channel; its close
    // is the receiver's signal that serving can stop.
    let control_closed = async {
        let _: std::io::Result<Option<ChunkRequest>> =
            codec::read_frame_opt(&mut control).await;
    };

    match timeout_at(deadline, async {
        tokio::select! {
            served = serve => served,
            _ = control_closed => Ok(()),
        }
    })
    .await
    {
        Err(_) => Err(Error::SenderTimeout),
        Ok(result) => result,
    }
}

/// Answer one chunk request from the source stream. Unavailable or
/// out-of-grid chunks get a miss reply; the payload is trimmed to the
/// chunk's expected length so a long source cannot overrun the grid.
async fn build_reply(
    meta: &FileMetadata,
    source: &mut ByteStream,
    index: u64,
) -> Result<ChunkReply> {
    if index >= meta.total_chunks() || !meta.is_chunk_available(index) {
        return Ok(ChunkReply::unavailable(index));
    }
    source.seek_absolute(index * meta.chunk_size).await?;
    let want = meta.expected_chunk_len(index) as usize;
    let data = source.read_up_to(want).await?;
    Ok(ChunkReply {
        chunk_index: index,
        data,
        ok: true,
    })
}
