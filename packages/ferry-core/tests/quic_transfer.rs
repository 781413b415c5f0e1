//! End-to-end transfers over the session-multiplex (QUIC) transport.

mod common;

use std::sync::Arc;
use std::time::Duration;

use ferry_core::transfer::QUIC_TRANSPORT;
use ferry_core::{run_sender, ByteStream, TransferRegistry};

use common::{destination_bytes, metadata, patterned, shared_credentials, start_listener};

const SEND_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::test(flavor = "multi_thread")]
async fn test_session_multiplex_transfer() {
    let data = b"QUIC test data for file transfer!".to_vec();
    assert_eq!(data.len(), 33);

    let creds = shared_credentials();
    let storage = tempfile::tempdir().unwrap();
    let registry = Arc::new(TransferRegistry::new(storage.path()));
    let (addr, listener) = start_listener(registry.clone(), creds.clone(), 1).await;

    // Port 0 binds an ephemeral data-plane port; the sender advertises the
    // rewritten address in the metadata frame.
    let mut meta = metadata("quic-basic", "quic.txt", 33, 16);
    meta.transport = QUIC_TRANSPORT.to_string();
    meta.quic_addr = Some("127.0.0.1:0".to_string());

    run_sender(&addr, meta, ByteStream::from_vec(data.clone()), SEND_TIMEOUT, &creds)
        .await
        .unwrap();
    listener.await.unwrap().unwrap();

    let transfer = registry.get("quic-basic").unwrap();
    assert_eq!(transfer.total_chunks(), 3);
    assert!(transfer.is_complete());
    assert_eq!(destination_bytes(&registry, "quic-basic", 33).await, data);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_session_multiplex_many_substreams() {
    // Enough chunks that substream exchanges genuinely overlap.
    let data = patterned(64 * 1024, 11);
    let creds = shared_credentials();
    let storage = tempfile::tempdir().unwrap();
    let registry = Arc::new(TransferRegistry::new(storage.path()));
    let (addr, listener) = start_listener(registry.clone(), creds.clone(), 1).await;

    let mut meta = metadata("quic-many", "many.bin", data.len() as u64, 1024);
    meta.transport = QUIC_TRANSPORT.to_string();
    meta.quic_addr = Some("127.0.0.1:0".to_string());

    run_sender(&addr, meta, ByteStream::from_vec(data.clone()), SEND_TIMEOUT, &creds)
        .await
        .unwrap();
    listener.await.unwrap().unwrap();

    let transfer = registry.get("quic-many").unwrap();
    assert_eq!(transfer.total_chunks(), 64);
    assert!(transfer.is_complete());
    assert_eq!(
        destination_bytes(&registry, "quic-many", data.len()).await,
        data
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_quic_resume_after_partial_availability() {
    let data = patterned(86, 13);
    let creds = shared_credentials();
    let storage = tempfile::tempdir().unwrap();
    let registry = Arc::new(TransferRegistry::new(storage.path()));
    let (addr, listener) = start_listener(registry.clone(), creds.clone(), 2).await;

    let mut meta = metadata("quic-resume", "resume.bin", 86, 16);
    meta.transport = QUIC_TRANSPORT.to_string();
    meta.quic_addr = Some("127.0.0.1:0".to_string());
    meta.availability = Some((0..3).map(|i| (i, true)).collect());

    run_sender(
        &addr,
        meta.clone(),
        ByteStream::from_vec(data.clone()),
        SEND_TIMEOUT,
        &creds,
    )
    .await
    .unwrap();
    assert_eq!(registry.get("quic-resume").unwrap().received_count(), 3);

    meta.availability = None;
    run_sender(
        &addr,
        meta,
        ByteStream::from_vec(data.clone()),
        SEND_TIMEOUT,
        &creds,
    )
    .await
    .unwrap();
    listener.await.unwrap().unwrap();

    let transfer = registry.get("quic-resume").unwrap();
    assert!(transfer.is_complete());
    assert_eq!(destination_bytes(&registry, "quic-resume", 86).await, data);
}
