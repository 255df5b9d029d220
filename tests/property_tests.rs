//! Property-based tests using proptest.
//!
//! These tests verify invariants that should hold for all inputs,
//! helping catch edge cases that unit tests might miss.

mod common;

use feed_mirror::engine::{plan_blocks, resume_point};
use feed_mirror::{codec, LocalStore, MemoryStore, MirrorError, SqliteStore, StoreConfig};
use proptest::prelude::*;
use std::collections::BTreeSet;

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("build runtime")
        .block_on(future)
}

// =============================================================================
// Codec Properties
// =============================================================================

proptest! {
    /// decode(encode(b)) == b
    #[test]
    fn codec_roundtrip(data in prop::collection::vec(any::<u8>(), 0..4096)) {
        let encoded = codec::encode(&data).unwrap();
        prop_assert_eq!(codec::decode(&encoded).unwrap(), data);
    }

    /// Encoded payloads carry the raw length in the big-endian header
    #[test]
    fn codec_header_is_length(data in prop::collection::vec(any::<u8>(), 0..4096)) {
        let encoded = codec::encode(&data).unwrap();
        let header = u32::from_be_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]);
        prop_assert_eq!(header as usize, data.len());
    }

    /// Inputs shorter than the header are always MalformedPayload
    #[test]
    fn codec_rejects_short_input(data in prop::collection::vec(any::<u8>(), 0..codec::HEADER_LEN)) {
        let result = codec::decode(&data);
        prop_assert!(matches!(result, Err(MirrorError::MalformedPayload(_))));
    }

    /// A header that disagrees with the stream is always rejected
    #[test]
    fn codec_rejects_wrong_header(
        data in prop::collection::vec(any::<u8>(), 0..1024),
        delta in 1u32..1000,
    ) {
        let mut encoded = codec::encode(&data).unwrap();
        let wrong = (data.len() as u32).wrapping_add(delta);
        encoded[..4].copy_from_slice(&wrong.to_be_bytes());

        let err = codec::decode(&encoded).unwrap_err();
        prop_assert!(err.to_string().contains("size mismatch"));
    }

    /// Arbitrary bytes never panic the decoder
    #[test]
    fn codec_decode_never_panics(data in prop::collection::vec(any::<u8>(), 0..2048)) {
        let _ = codec::decode(&data);
    }
}

// =============================================================================
// Block Planning Properties
// =============================================================================

proptest! {
    /// Blocks are contiguous, ascending, bounded and cover the range exactly
    #[test]
    fn plan_blocks_partitions_range(
        start in 0i64..1_000_000,
        len in 0i64..50_000,
        block_size in 1i64..=1000,
    ) {
        let upper = start + len;
        let blocks = plan_blocks(start, upper, block_size);

        let expected_count = (len + block_size - 1) / block_size;
        prop_assert_eq!(blocks.len() as i64, expected_count);

        let mut cursor = start;
        for (i, block) in blocks.iter().enumerate() {
            prop_assert_eq!(block.min_id, cursor);
            prop_assert!(block.span() > 0);
            prop_assert!(block.span() <= block_size);
            if i + 1 < blocks.len() {
                prop_assert_eq!(block.span(), block_size);
            }
            cursor = block.max_id;
        }
        prop_assert_eq!(cursor, if len == 0 { start } else { upper });
    }

    /// The resume point never goes below the floor or back over stored ids
    #[test]
    fn resume_point_respects_floor_and_watermark(
        watermark in prop::option::of(0i64..1_000_000_000),
        floor in 0i64..1_000_000_000,
    ) {
        let start = resume_point(watermark, floor);
        prop_assert!(start >= floor);
        if let Some(w) = watermark {
            prop_assert!(start > w);
        } else {
            prop_assert_eq!(start, floor);
        }
    }
}

// =============================================================================
// Store Properties
// =============================================================================

fn batches() -> impl Strategy<Value = Vec<(i64, i64)>> {
    prop::collection::vec((0i64..2000, 0i64..300), 1..12)
}

async fn sqlite_store() -> SqliteStore {
    SqliteStore::from_config(&StoreConfig::in_memory())
        .await
        .expect("open in-memory store")
}

/// Append `batches` in order, checking after each one that the watermark
/// never decreases and equals the highest id appended so far.
async fn assert_watermark_monotonic<S: LocalStore>(store: &S, batches: &[(i64, i64)]) {
    let mut last: Option<i64> = None;
    let mut highest: Option<i64> = None;

    for &(start, len) in batches {
        let records: Vec<_> = (start..start + len).map(common::record).collect();
        store.append_batch(&records).await.unwrap();
        if len > 0 {
            highest = highest.max(Some(start + len - 1));
        }

        let watermark = store.current_watermark().await.unwrap();
        assert!(watermark >= last);
        assert_eq!(watermark, highest);
        last = watermark;
    }
}

/// Append `batches` piecewise, returning the total inserted count and the
/// union of ids.
async fn append_piecewise<S: LocalStore>(
    store: &S,
    batches: &[(i64, i64)],
) -> (usize, BTreeSet<i64>) {
    let mut union = BTreeSet::new();
    let mut inserted_total = 0;

    for &(start, len) in batches {
        let records: Vec<_> = (start..start + len).map(common::record).collect();
        inserted_total += store.append_batch(&records).await.unwrap();
        union.extend(start..start + len);
    }
    (inserted_total, union)
}

proptest! {
    /// After any sequence of successful appends the watermark never decreases
    /// and equals the highest id appended so far
    #[test]
    fn watermark_is_monotonic(batches in batches()) {
        block_on(async {
            assert_watermark_monotonic(&MemoryStore::new(), &batches).await;
        });
    }

    /// Overlapping appends leave the same state as one append of the union
    #[test]
    fn overlapping_appends_equal_union(batches in batches()) {
        block_on(async {
            let piecewise = MemoryStore::new();
            let (inserted_total, union) = append_piecewise(&piecewise, &batches).await;

            let at_once = MemoryStore::new();
            let records: Vec<_> = union.iter().copied().map(common::record).collect();
            at_once.append_batch(&records).await.unwrap();

            assert_eq!(piecewise.ids().await, at_once.ids().await);
            assert_eq!(inserted_total, union.len());
            assert_eq!(
                piecewise.current_watermark().await.unwrap(),
                at_once.current_watermark().await.unwrap()
            );
        });
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Same watermark property against SQLite
    #[test]
    fn sqlite_watermark_is_monotonic(batches in batches()) {
        block_on(async {
            let store = sqlite_store().await;
            assert_watermark_monotonic(&store, &batches).await;
            store.close().await;
        });
    }

    /// INSERT OR IGNORE across overlapping batches lands on the union
    #[test]
    fn sqlite_overlapping_appends_equal_union(batches in batches()) {
        block_on(async {
            let piecewise = sqlite_store().await;
            let (inserted_total, union) = append_piecewise(&piecewise, &batches).await;

            let at_once = sqlite_store().await;
            let records: Vec<_> = union.iter().copied().map(common::record).collect();
            assert_eq!(at_once.append_batch(&records).await.unwrap(), union.len());

            assert_eq!(inserted_total, union.len());
            assert_eq!(piecewise.count().await.unwrap() as usize, union.len());
            assert_eq!(
                piecewise.current_watermark().await.unwrap(),
                at_once.current_watermark().await.unwrap()
            );
            for id in [union.first(), union.last()].into_iter().flatten() {
                assert_eq!(piecewise.get(*id).await.unwrap(), Some(common::record(*id)));
            }

            piecewise.close().await;
            at_once.close().await;
        });
    }
}
