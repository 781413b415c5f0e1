//! # Wire Codec
//!
//! Length-prefixed JSON framing for the handshake and the data plane.
//!
//! Every message is a 4-byte big-endian u32 length prefix followed by one
//! UTF-8 JSON object. Chunk payloads travel base64-coded inside the JSON
//! (`data` field). The same framing runs over the TLS control channel and
//! over QUIC substreams.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame size (8 MiB). A frame carries at most one base64-coded
/// chunk plus field overhead, so this leaves ample headroom over
/// [`crate::transfer::MAX_CHUNK_SIZE`].
pub const MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;

// ============================================================================
// DATA-PLANE MESSAGES
// ============================================================================

/// Receiver → sender: request one chunk by index.
///
/// Wire shape: `{"request_chunk": 3}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRequest {
    /// Zero-based index of the requested chunk.
    pub request_chunk: u64,
}

/// Sender → receiver: one chunk of data, or a miss.
///
/// `ok = false` means the sender does not currently hold the chunk; the
/// receiver treats it as retryable and may re-request later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkReply {
    /// Zero-based index of the chunk this reply answers.
    pub chunk_index: u64,
    /// Raw chunk bytes (base64 on the wire). Empty when `ok` is false; may
    /// be shorter than the chunk size for the final chunk.
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    /// Whether the sender produced the chunk.
    pub ok: bool,
}

impl ChunkReply {
    /// A miss reply for `index`.
    pub fn unavailable(index: u64) -> Self {
        Self {
            chunk_index: index,
            data: Vec::new(),
            ok: false,
        }
    }
}

// ============================================================================
// FRAME I/O
// ============================================================================

/// Write one length-prefixed JSON frame.
pub async fn write_frame<W, M>(io: &mut W, msg: &M) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
    M: Serialize,
{
    let body = serde_json::to_vec(msg).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("failed to serialize frame: {e}"),
        )
    })?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame too large: {} bytes (max {MAX_FRAME_SIZE})", body.len()),
        ));
    }

    // Prefix and body go out as one buffer so a frame is a single write.
    let mut frame = BytesMut::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    io.write_all(&frame).await?;
    io.flush().await
}

/// Read one length-prefixed JSON frame.
pub async fn read_frame<R, M>(io: &mut R) -> std::io::Result<M>
where
    R: AsyncRead + Unpin,
    M: for<'de> Deserialize<'de>,
{
    match read_frame_opt(io).await? {
        Some(msg) => Ok(msg),
        None => Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "channel closed before a frame arrived",
        )),
    }
}

/// Read one frame, or `None` if the peer closed the channel cleanly at a
/// frame boundary. A close mid-frame is still an error.
pub async fn read_frame_opt<R, M>(io: &mut R) -> std::io::Result<Option<M>>
where
    R: AsyncRead + Unpin,
    M: for<'de> Deserialize<'de>,
{
    let mut len_buf = [0u8; 4];
    match io.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame too large: {len} bytes (max {MAX_FRAME_SIZE})"),
        ));
    }

    let mut body = vec![0u8; len];
    io.read_exact(&mut body).await?;
    let msg = serde_json::from_slice(&body).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("failed to decode frame: {e}"),
        )
    })?;
    Ok(Some(msg))
}

// ============================================================================
// BASE64 PAYLOAD ADAPTER
// ============================================================================

/// Serde adapter coding `Vec<u8>` as a base64 string in JSON.
mod base64_bytes {
    use super::{Engine, BASE64};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(de)?;
        BASE64
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_request_frame_round_trip() {
        let mut buf = Cursor::new(Vec::new());
        write_frame(&mut buf, &ChunkRequest { request_chunk: 7 })
            .await
            .unwrap();

        let mut cursor = Cursor::new(buf.into_inner());
        let back: ChunkRequest = read_frame(&mut cursor).await.unwrap();
        assert_eq!(back.request_chunk, 7);
    }

    #[tokio::test]
    async fn test_reply_frame_round_trip() {
        let reply = ChunkReply {
            chunk_index: 3,
            data: b"TCP test data for file transfer! ".to_vec(),
            ok: true,
        };
        let mut buf = Cursor::new(Vec::new());
        write_frame(&mut buf, &reply).await.unwrap();

        let mut cursor = Cursor::new(buf.into_inner());
        let back: ChunkReply = read_frame(&mut cursor).await.unwrap();
        assert_eq!(back, reply);
    }

    #[tokio::test]
    async fn test_payload_is_base64_on_the_wire() {
        let reply = ChunkReply {
            chunk_index: 0,
            data: vec![0xde, 0xad, 0xbe, 0xef],
            ok: true,
        };
        let mut buf = Cursor::new(Vec::new());
        write_frame(&mut buf, &reply).await.unwrap();

        let body = String::from_utf8(buf.into_inner()[4..].to_vec()).unwrap();
        assert!(body.contains("\"data\":\"3q2+7w==\""), "wire: {body}");
    }

    #[tokio::test]
    async fn test_miss_reply_has_empty_payload() {
        let reply = ChunkReply::unavailable(5);
        assert!(!reply.ok);
        assert!(reply.data.is_empty());

        let mut buf = Cursor::new(Vec::new());
        write_frame(&mut buf, &reply).await.unwrap();
        let mut cursor = Cursor::new(buf.into_inner());
        let back: ChunkReply = read_frame(&mut cursor).await.unwrap();
        assert_eq!(back, reply);
    }

    #[tokio::test]
    async fn test_clean_eof_reads_as_none() {
        let mut cursor = Cursor::new(Vec::new());
        let got: Option<ChunkRequest> = read_frame_opt(&mut cursor).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_truncated_frame_is_an_error() {
        let mut writer = Cursor::new(Vec::new());
        write_frame(&mut writer, &ChunkRequest { request_chunk: 1 })
            .await
            .unwrap();
        let mut buf = writer.into_inner();
        buf.truncate(buf.len() - 2);

        let mut cursor = Cursor::new(buf);
        let got: std::io::Result<Option<ChunkRequest>> = read_frame_opt(&mut cursor).await;
        assert!(got.is_err());
    }

    #[tokio::test]
    async fn test_oversized_length_prefix_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&((MAX_FRAME_SIZE as u32) + 1).to_be_bytes());
        buf.extend_from_slice(&[0u8; 16]);

        let mut cursor = Cursor::new(buf);
        let got: std::io::Result<ChunkRequest> = read_frame(&mut cursor).await;
        assert!(got.is_err());
    }

    #[tokio::test]
    async fn test_back_to_back_frames() {
        let mut buf = Cursor::new(Vec::new());
        for i in 0..3u64 {
            write_frame(&mut buf, &ChunkRequest { request_chunk: i })
                .await
                .unwrap();
        }
        let mut cursor = Cursor::new(buf.into_inner());
        for i in 0..3u64 {
            let req: ChunkRequest = read_frame(&mut cursor).await.unwrap();
            assert_eq!(req.request_chunk, i);
        }
    }
}
