//! Shared helpers for the end-to-end transfer tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use ferry_core::transfer::TCP_TRANSPORT;
use ferry_core::{serve_on, Credentials, FileMetadata, TransferRegistry};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Self-signed credentials shared by both peers.
pub fn shared_credentials() -> Credentials {
    Credentials::self_signed(&["localhost", "127.0.0.1"]).expect("self-signed credentials")
}

/// A TCP-transport metadata frame with full availability.
pub fn metadata(uuid: &str, filename: &str, size: u64, chunk_size: u64) -> FileMetadata {
    FileMetadata {
        uuid: uuid.to_string(),
        filename: filename.to_string(),
        flow_name: String::new(),
        size,
        chunk_size,
        availability: None,
        metadata: HashMap::new(),
        transport: TCP_TRANSPORT.to_string(),
        quic_addr: None,
    }
}

/// Bind an ephemeral loopback port and serve `max_iterations` channels on a
/// background task. Returns the dialable address and the serve handle.
pub async fn start_listener(
    registry: Arc<TransferRegistry>,
    credentials: Credentials,
    max_iterations: usize,
) -> (String, JoinHandle<ferry_core::Result<()>>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind loopback");
    let addr = listener.local_addr().expect("local addr").to_string();
    let handle = tokio::spawn(async move {
        serve_on(listener, registry, &credentials, max_iterations).await
    });
    (addr, handle)
}

/// Read `len` bytes from offset 0 of a registered transfer's destination.
pub async fn destination_bytes(registry: &TransferRegistry, uuid: &str, len: usize) -> Vec<u8> {
    let transfer = registry.get(uuid).expect("transfer registered");
    let mut stream = transfer.stream().await;
    stream.seek_absolute(0).await.expect("seek destination");
    stream.read_up_to(len).await.expect("read destination")
}

/// Deterministic test payload.
pub fn patterned(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}
