// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The incremental pull protocol.
//!
//! # Algorithm
//!
//! 1. Ask the feed for its highest id; `upper_exclusive = max_id + 1`
//! 2. Ask the store for its watermark
//! 3. Resume at the floor (empty store) or `max(floor, watermark + 1)`
//! 4. Split `[start, upper_exclusive)` into `block_size` blocks
//! 5. For each block, ascending: fetch, then append in one transaction
//! 6. Sleep until the next scheduled cycle and go again
//!
//! Any error aborts the rest of the cycle. Blocks already appended stay, so
//! the next cycle resumes right after them. Nothing is retried inside a
//! cycle.

use super::schedule::PollSchedule;
use super::types::{Block, CycleStats, EngineState};
use crate::config::{PullConfig, SloConfig};
use crate::error::{MirrorError, Result};
use crate::feed::RemoteFeed;
use crate::metrics;
use crate::observe::{Observer, Step, StepTimer};
use crate::store::LocalStore;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn, Instrument};

/// First id to request given the store's watermark.
///
/// An empty store starts exactly at `floor`; otherwise the id after the
/// watermark, never below `floor`.
pub fn resume_point(watermark: Option<i64>, floor: i64) -> i64 {
    match watermark {
        None => floor,
        Some(watermark) => floor.max(watermark.saturating_add(1)),
    }
}

/// Partition `[start, upper_exclusive)` into contiguous ascending blocks of
/// at most `block_size` ids.
///
/// Returns no blocks for an empty range or a non-positive block size.
pub fn plan_blocks(start: i64, upper_exclusive: i64, block_size: i64) -> Vec<Block> {
    let mut blocks = Vec::new();
    if block_size <= 0 {
        return blocks;
    }

    let mut min_id = start;
    while min_id < upper_exclusive {
        let max_id = min_id.saturating_add(block_size).min(upper_exclusive);
        blocks.push(Block::new(min_id, max_id));
        min_id = max_id;
    }
    blocks
}

/// Log line for a failed cycle.
///
/// Retryable failures clear up on their own; a corrupt response keeps
/// failing on the same block until the feed is fixed.
fn failure_message(error: &MirrorError) -> &'static str {
    match error {
        e if e.is_retryable() => "Pull cycle failed, retrying next cycle",
        MirrorError::MalformedPayload(_) => {
            "Feed sent a corrupt response, the same block will fail every cycle until fixed upstream"
        }
        _ => "Pull cycle failed, not recoverable by retrying",
    }
}

/// Result of one fetched-and-appended block.
struct BlockOutcome {
    fetched: usize,
    inserted: usize,
    highest_id: Option<i64>,
}

/// Exclusive claim on the engine's single pull flow.
///
/// Released on drop.
pub(crate) struct FlowGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for FlowGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Everything one cycle (or the poll loop) needs, shareable with a spawned
/// task.
pub(crate) struct Puller<F: RemoteFeed, S: LocalStore> {
    pub(crate) feed: Arc<F>,
    pub(crate) store: Arc<S>,
    pub(crate) observer: Arc<dyn Observer>,
    pub(crate) pull: PullConfig,
    pub(crate) slo: SloConfig,
    pub(crate) schedule: PollSchedule,
    pub(crate) state_tx: Arc<watch::Sender<EngineState>>,
    /// Set while a cycle or the poll loop owns the flow
    pub(crate) busy: Arc<AtomicBool>,
}

impl<F: RemoteFeed, S: LocalStore> Clone for Puller<F, S> {
    fn clone(&self) -> Self {
        Self {
            feed: Arc::clone(&self.feed),
            store: Arc::clone(&self.store),
            observer: Arc::clone(&self.observer),
            pull: self.pull.clone(),
            slo: self.slo.clone(),
            schedule: self.schedule,
            state_tx: Arc::clone(&self.state_tx),
            busy: Arc::clone(&self.busy),
        }
    }
}

impl<F: RemoteFeed, S: LocalStore> Puller<F, S> {
    /// Claim the flow, or `None` if a cycle or the poll loop already holds it.
    pub(crate) fn try_claim(&self) -> Option<FlowGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlowGuard {
                busy: Arc::clone(&self.busy),
            })
    }

    /// Move to `next` unless the engine has already stopped.
    pub(crate) fn set_state(&self, next: EngineState) {
        let changed = self.state_tx.send_if_modified(|state| {
            if *state == EngineState::Stopped || *state == next {
                return false;
            }
            *state = next;
            true
        });
        if changed {
            metrics::set_engine_state(&next.to_string());
        }
    }

    pub(crate) fn mark_stopped(&self) {
        self.state_tx.send_replace(EngineState::Stopped);
        metrics::set_engine_state("Stopped");
    }

    /// Run one pull cycle.
    ///
    /// `shutdown_rx` is checked before every block; once it reads `true` the
    /// cycle returns early with `interrupted` set.
    pub(crate) async fn run_cycle(&self, shutdown_rx: &watch::Receiver<bool>) -> Result<CycleStats> {
        match self.cycle(shutdown_rx).await {
            Ok(stats) => Ok(stats),
            Err(e) => {
                metrics::record_cycle_failure(e.kind());
                Err(e)
            }
        }
    }

    #[instrument(skip_all, fields(floor = self.pull.floor_id, block_size = self.pull.block_size))]
    async fn cycle(&self, shutdown_rx: &watch::Receiver<bool>) -> Result<CycleStats> {
        let observer = self.observer.as_ref();
        let cycle_timer = StepTimer::start(observer, Step::Cycle);
        self.set_state(EngineState::ComputeRange);

        let timer = StepTimer::start(observer, Step::MaxId);
        let remote_max_id = self.feed.max_id().await?;
        timer.succeed();

        let timer = StepTimer::start(observer, Step::Watermark);
        let watermark = self.store.current_watermark().await?;
        timer.succeed();

        metrics::record_positions(remote_max_id, watermark);

        let start = resume_point(watermark, self.pull.floor_id);
        let upper_exclusive = remote_max_id.saturating_add(1);
        let blocks = plan_blocks(start, upper_exclusive, self.pull.block_size);

        let mut stats = CycleStats {
            start,
            upper_exclusive,
            watermark,
            ..Default::default()
        };

        if blocks.is_empty() {
            debug!(start, upper_exclusive, ?watermark, "Already up to date");
        } else {
            info!(
                start,
                upper_exclusive,
                blocks = blocks.len(),
                ?watermark,
                "Pulling new records"
            );
        }

        for block in blocks {
            if *shutdown_rx.borrow() {
                info!(next_block = %block, "Shutdown requested, stopping between blocks");
                stats.interrupted = true;
                break;
            }

            let outcome = self.pull_block(block).await?;
            stats.blocks += 1;
            stats.fetched += outcome.fetched;
            stats.inserted += outcome.inserted;
            if let Some(highest) = outcome.highest_id {
                let watermark = stats.watermark.map_or(highest, |w| w.max(highest));
                stats.watermark = Some(watermark);
                metrics::set_watermark(watermark);
            }
        }

        let elapsed = cycle_timer.succeed_with(stats.inserted);
        metrics::record_cycle(stats.blocks, stats.inserted, elapsed, stats.interrupted);

        if self.slo.is_cycle_violation(elapsed) {
            warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                threshold_ms = self.slo.max_cycle_latency_ms,
                blocks = stats.blocks,
                "Pull cycle exceeded latency threshold"
            );
            metrics::record_slo_violation("cycle", elapsed);
        }

        if stats.blocks > 0 {
            info!(
                blocks = stats.blocks,
                fetched = stats.fetched,
                inserted = stats.inserted,
                watermark = ?stats.watermark,
                interrupted = stats.interrupted,
                elapsed_ms = elapsed.as_millis() as u64,
                "Pull cycle complete"
            );
        }

        Ok(stats)
    }

    #[instrument(skip_all, fields(min_id = block.min_id, max_id = block.max_id))]
    async fn pull_block(&self, block: Block) -> Result<BlockOutcome> {
        let observer = self.observer.as_ref();

        self.set_state(EngineState::FetchBlock);
        let timer = StepTimer::start(observer, Step::FetchBlock(block));
        let records = self
            .feed
            .fetch_range(block.min_id, block.max_id, self.pull.filter())
            .await?;
        let fetch_elapsed = timer.succeed_with(records.len());

        self.set_state(EngineState::PersistBlock);
        let timer = StepTimer::start(observer, Step::AppendBlock(block));
        let inserted = self.store.append_batch(&records).await?;
        let append_elapsed = timer.succeed_with(inserted);

        let elapsed = fetch_elapsed + append_elapsed;
        let highest_id = records.iter().map(|r| r.id).max();
        metrics::record_block(records.len(), inserted, elapsed);

        debug!(
            fetched = records.len(),
            inserted,
            highest_id,
            elapsed_ms = elapsed.as_millis() as u64,
            "Block persisted"
        );

        if self.slo.is_block_violation(elapsed) {
            warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                threshold_ms = self.slo.max_block_latency_ms,
                "Block exceeded latency threshold"
            );
            metrics::record_slo_violation("block", elapsed);
        }

        Ok(BlockOutcome {
            fetched: records.len(),
            inserted,
            highest_id,
        })
    }

    /// Run cycles on the schedule until `shutdown_rx` reads `true` or its
    /// sender is dropped.
    ///
    /// A failed cycle is logged and the loop carries on with the next one.
    pub(crate) async fn run_loop(&self, mut shutdown_rx: watch::Receiver<bool>) {
        let span = tracing::info_span!("poll_loop");

        async move {
            info!(
                interval_secs = self.schedule.interval().as_secs(),
                schedule = ?self.schedule,
                floor = self.pull.floor_id,
                block_size = self.pull.block_size,
                filter = ?self.pull.filter,
                "Starting poll loop"
            );

            loop {
                if *shutdown_rx.borrow_and_update() {
                    break;
                }

                match self.run_cycle(&shutdown_rx).await {
                    Ok(stats) if stats.interrupted => break,
                    Ok(_) => {}
                    Err(e) if e.is_retryable() => {
                        warn!(error = %e, kind = e.kind(), "{}", failure_message(&e));
                    }
                    Err(e) => {
                        error!(error = %e, kind = e.kind(), "{}", failure_message(&e));
                    }
                }

                let delay = self.schedule.delay_until_next(Utc::now());
                self.set_state(EngineState::Sleeping);
                debug!(delay_ms = delay.as_millis() as u64, "Sleeping until next cycle");

                tokio::select! {
                    biased;

                    // Priority: check shutdown first
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }

                    _ = tokio::time::sleep(delay) => {}
                }
            }

            self.mark_stopped();
            info!("Poll loop stopped");
        }
        .instrument(span)
        .await
    }
}
