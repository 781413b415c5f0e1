//! Property tests: arbitrary geometry, availability subsets, and arrival
//! orders.

mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use proptest::prelude::*;

use ferry_core::{run_sender, ByteStream, Credentials, TransferRegistry};

use common::{destination_bytes, metadata, patterned, shared_credentials, start_listener};

static RT: Lazy<tokio::runtime::Runtime> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("test runtime")
});

static CREDS: Lazy<Credentials> = Lazy::new(shared_credentials);

static CASE: AtomicUsize = AtomicUsize::new(0);

fn next_uuid(prefix: &str) -> String {
    format!("{prefix}-{}", CASE.fetch_add(1, Ordering::Relaxed))
}

/// Geometry plus a shuffled arrival order for every chunk in the grid.
fn placement_inputs() -> impl Strategy<Value = (usize, u64, Vec<u64>)> {
    (0usize..=4096, 1u64..=64u64).prop_flat_map(|(size, chunk_size)| {
        let total = (size as u64).div_ceil(chunk_size);
        let indices: Vec<u64> = (0..total).collect();
        (Just(size), Just(chunk_size), Just(indices).prop_shuffle())
    })
}

/// Geometry plus an arbitrary availability assignment per chunk. Chunk
/// sizes span the whole permitted range up to 2^20; sizes stay small so a
/// giant chunk simply means a one-chunk grid.
fn availability_inputs() -> impl Strategy<Value = (usize, u64, Vec<bool>)> {
    let chunk_sizes = prop_oneof![1u64..=256u64, Just(64u64 * 1024), Just(1u64 << 20)];
    (0usize..=2048, chunk_sizes).prop_flat_map(|(size, chunk_size)| {
        let total = (size as u64).div_ceil(chunk_size) as usize;
        (
            Just(size),
            Just(chunk_size),
            prop::collection::vec(any::<bool>(), total),
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Chunks written in any order land at `index * chunk_size` and
    /// reassemble the source exactly.
    #[test]
    fn prop_chunks_place_at_absolute_offsets(
        (size, chunk_size, order) in placement_inputs()
    ) {
        RT.block_on(async {
            let source = patterned(size, 17);
            let registry = TransferRegistry::new(".");
            let meta = metadata(&next_uuid("prop-place"), "p.bin", size as u64, chunk_size);
            let transfer = registry.admit_with(&meta, ByteStream::memory()).unwrap();

            for index in order {
                let start = (index * chunk_size) as usize;
                let end = source.len().min(start + chunk_size as usize);
                transfer.write_chunk(index, &source[start..end]).await.unwrap();
                transfer.mark_received(index);
            }

            assert!(transfer.is_complete());
            let out = destination_bytes(&registry, &meta.uuid, size).await;
            assert_eq!(out, source);
        });
    }

    /// The listener requests exactly the advertised-available chunks it has
    /// not yet received, in index order.
    #[test]
    fn prop_pending_is_available_minus_received(
        (size, chunk_size, avail) in availability_inputs(),
        received_mask in prop::collection::vec(any::<bool>(), 0..=2048)
    ) {
        let registry = TransferRegistry::new(".");
        let mut meta = metadata(&next_uuid("prop-pend"), "p.bin", size as u64, chunk_size);
        meta.availability = Some(
            avail.iter().enumerate().map(|(i, &a)| (i as u64, a)).collect(),
        );
        let transfer = registry.admit_with(&meta, ByteStream::memory()).unwrap();

        for (i, &done) in received_mask.iter().enumerate().take(avail.len()) {
            if done {
                transfer.mark_received(i as u64);
            }
        }

        let expected: Vec<u64> = (0..avail.len() as u64)
            .filter(|&i| avail[i as usize] && !received_mask.get(i as usize).copied().unwrap_or(false))
            .collect();
        assert_eq!(transfer.pending_chunks(), expected);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    /// A full loopback round delivers every advertised chunk and nothing
    /// else, for arbitrary geometry and availability.
    #[test]
    fn prop_round_trip_delivers_available_chunks(
        (size, chunk_size, avail) in availability_inputs(),
        advertise_all in any::<bool>()
    ) {
        RT.block_on(async {
            let source = patterned(size, 23);
            let uuid = next_uuid("prop-e2e");
            let registry = Arc::new(TransferRegistry::new("."));

            let mut meta = metadata(&uuid, "e2e.bin", size as u64, chunk_size);
            let availability: Option<HashMap<u64, bool>> = if advertise_all {
                None
            } else {
                Some(avail.iter().enumerate().map(|(i, &a)| (i as u64, a)).collect())
            };
            meta.availability = availability;
            registry.admit_with(&meta, ByteStream::memory()).unwrap();

            let (addr, listener) =
                start_listener(registry.clone(), CREDS.clone(), 1).await;
            run_sender(
                &addr,
                meta.clone(),
                ByteStream::from_vec(source.clone()),
                Duration::from_secs(30),
                &CREDS,
            )
            .await
            .unwrap();
            listener.await.unwrap().unwrap();

            let transfer = registry.get(&uuid).unwrap();
            let total = transfer.total_chunks();
            let is_available = |i: u64| advertise_all || avail[i as usize];
            let expected_received = (0..total).filter(|&i| is_available(i)).count() as u64;
            assert_eq!(transfer.received_count(), expected_received);

            let written = destination_bytes(&registry, &uuid, size).await;
            for i in 0..total {
                let start = (i * chunk_size) as usize;
                let end = source.len().min(start + chunk_size as usize);
                if is_available(i) {
                    assert_eq!(
                        &written[start..end],
                        &source[start..end],
                        "chunk {i} must match the source"
                    );
                } else {
                    // Unavailable chunks are never written: the range is
                    // zero-filled or past the buffer's end entirely.
                    let present = &written[start.min(written.len())..end.min(written.len())];
                    assert!(
                        present.iter().all(|&b| b == 0),
                        "chunk {i} must not carry source bytes"
                    );
                }
            }
        });
    }
}
