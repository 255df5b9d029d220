//! Mock RemoteFeed for testing.
//!
//! Holds ids `0..=max_id` (generated on demand) and records every call for
//! assertions. Failures, delays and corrupt payloads can be injected.

use super::record;
use feed_mirror::{BoxFuture, MirrorError, Record, RemoteFeed};
use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// A recorded fetch_range() call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCall {
    pub min_id: i64,
    pub max_id: i64,
    pub filter: Option<String>,
}

/// Mock implementation of RemoteFeed that records all calls.
///
/// # Example
/// ```rust,ignore
/// let feed = MockFeed::new(2499);
/// feed.fail_fetch_at(1000).await;
///
/// // Use in tests...
///
/// assert_eq!(feed.fetched_ranges().await, vec![(0, 1000), (1000, 2000)]);
/// ```
pub struct MockFeed {
    /// Current remote head
    max_id: AtomicI64,
    /// Recorded fetch_range() calls
    fetches: RwLock<Vec<FetchCall>>,
    /// Number of max_id() calls
    max_id_calls: AtomicUsize,
    /// Fail this many upcoming max_id() calls
    fail_max_id: AtomicUsize,
    /// Fail the next fetch whose min_id matches (one-shot)
    fail_fetch_at: RwLock<Option<i64>>,
    /// Ids served with a corrupt payload
    corrupt_ids: RwLock<HashSet<i64>>,
    /// Delay before each fetch returns
    fetch_delay: RwLock<Duration>,
}

impl MockFeed {
    pub fn new(max_id: i64) -> Self {
        Self {
            max_id: AtomicI64::new(max_id),
            fetches: RwLock::new(Vec::new()),
            max_id_calls: AtomicUsize::new(0),
            fail_max_id: AtomicUsize::new(0),
            fail_fetch_at: RwLock::new(None),
            corrupt_ids: RwLock::new(HashSet::new()),
            fetch_delay: RwLock::new(Duration::ZERO),
        }
    }

    /// Move the remote head.
    pub fn set_max_id(&self, max_id: i64) {
        self.max_id.store(max_id, Ordering::SeqCst);
    }

    /// Fail the next `times` calls to max_id().
    pub fn fail_max_id(&self, times: usize) {
        self.fail_max_id.store(times, Ordering::SeqCst);
    }

    /// Fail the next fetch starting at `min_id`.
    pub async fn fail_fetch_at(&self, min_id: i64) {
        *self.fail_fetch_at.write().await = Some(min_id);
    }

    /// Serve `id` with a payload that does not decode.
    pub async fn corrupt(&self, id: i64) {
        self.corrupt_ids.write().await.insert(id);
    }

    /// Delay every fetch (tokio time, so paused clocks apply).
    pub async fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.write().await = delay;
    }

    /// All recorded fetch calls.
    pub async fn fetches(&self) -> Vec<FetchCall> {
        self.fetches.read().await.clone()
    }

    /// Recorded fetches as `(min_id, max_id)` pairs.
    pub async fn fetched_ranges(&self) -> Vec<(i64, i64)> {
        self.fetches
            .read()
            .await
            .iter()
            .map(|c| (c.min_id, c.max_id))
            .collect()
    }

    pub async fn fetch_count(&self) -> usize {
        self.fetches.read().await.len()
    }

    pub async fn clear_fetches(&self) {
        self.fetches.write().await.clear();
    }

    pub fn max_id_calls(&self) -> usize {
        self.max_id_calls.load(Ordering::SeqCst)
    }

    fn take_max_id_failure(&self) -> bool {
        self.fail_max_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl RemoteFeed for MockFeed {
    fn max_id(&self) -> BoxFuture<'_, i64> {
        Box::pin(async move {
            self.max_id_calls.fetch_add(1, Ordering::SeqCst);
            if self.take_max_id_failure() {
                return Err(MirrorError::remote("stat", "connection refused (simulated)"));
            }
            Ok(self.max_id.load(Ordering::SeqCst))
        })
    }

    fn fetch_range<'a>(
        &'a self,
        min_id: i64,
        max_id: i64,
        filter: Option<&'a str>,
    ) -> BoxFuture<'a, Vec<Record>> {
        Box::pin(async move {
            self.fetches.write().await.push(FetchCall {
                min_id,
                max_id,
                filter: filter.map(str::to_string),
            });

            let delay = *self.fetch_delay.read().await;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            {
                let mut fail_at = self.fail_fetch_at.write().await;
                if *fail_at == Some(min_id) {
                    *fail_at = None;
                    return Err(MirrorError::remote(
                        "range",
                        format!("unexpected status: 503 Service Unavailable ({}..{})", min_id, max_id),
                    ));
                }
            }

            let head = self.max_id.load(Ordering::SeqCst);
            let upper = max_id.min(head.saturating_add(1));
            let corrupt = self.corrupt_ids.read().await;
            Ok((min_id..upper)
                .map(|id| {
                    let mut r = record(id);
                    if corrupt.contains(&id) {
                        r.payload = vec![0, 0, 0, 9, 0xDE, 0xAD];
                    }
                    r
                })
                .collect())
        })
    }
}
