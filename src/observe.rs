// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Step timing and observers.
//!
//! Each engine step (reading the remote head, reading the watermark,
//! fetching a block, appending a block, the whole cycle) is wrapped in a
//! [`StepTimer`]. When the step ends the timer hands a [`StepEvent`] to an
//! [`Observer`].
//!
//! ```text
//! let timer = StepTimer::start(observer, Step::MaxId);
//! let max_id = feed.max_id().await?;   // early return → event with ok = false
//! timer.succeed();                     // event with ok = true
//! ```
//!
//! [`TracingObserver`] is the production observer (logs plus metrics).
//! [`RecordingObserver`] keeps events in memory so tests can assert on the
//! exact sequence.

use crate::engine::Block;
use crate::metrics;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// A unit of engine work that gets timed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Asking the feed for its highest id.
    MaxId,
    /// Asking the store for its highest id.
    Watermark,
    /// Fetching one block from the feed.
    FetchBlock(Block),
    /// Appending one block to the store.
    AppendBlock(Block),
    /// One full pull cycle.
    Cycle,
}

impl Step {
    /// Stable label for logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Step::MaxId => "max_id",
            Step::Watermark => "watermark",
            Step::FetchBlock(_) => "fetch_block",
            Step::AppendBlock(_) => "append_block",
            Step::Cycle => "cycle",
        }
    }

    /// The block this step works on, if any.
    pub fn block(&self) -> Option<Block> {
        match self {
            Step::FetchBlock(block) | Step::AppendBlock(block) => Some(*block),
            _ => None,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.block() {
            Some(block) => write!(f, "{} {}", self.name(), block),
            None => write!(f, "{}", self.name()),
        }
    }
}

/// A finished step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepEvent {
    pub step: Step,
    pub elapsed: Duration,
    pub ok: bool,
    /// Records fetched (fetch) or newly inserted (append, cycle).
    pub records: Option<usize>,
}

/// Receives step events.
pub trait Observer: Send + Sync {
    fn on_step(&self, event: &StepEvent);
}

/// Logs each step and records its duration as a metric.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn on_step(&self, event: &StepEvent) {
        debug!(
            step = %event.step,
            ok = event.ok,
            records = event.records,
            elapsed_ms = event.elapsed.as_millis() as u64,
            "took"
        );
        metrics::record_step_duration(event.step.name(), event.ok, event.elapsed);
    }
}

/// Keeps every event in memory, in arrival order.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<StepEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all events so far.
    pub fn events(&self) -> Vec<StepEvent> {
        self.lock().clone()
    }

    /// Just the steps, for order assertions.
    pub fn steps(&self) -> Vec<Step> {
        self.lock().iter().map(|e| e.step).collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<StepEvent>> {
        // A panicking observer call can't leave the Vec half-written
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Observer for RecordingObserver {
    fn on_step(&self, event: &StepEvent) {
        self.lock().push(event.clone());
    }
}

/// Scoped timer for one step.
///
/// Call [`succeed`](Self::succeed) or [`succeed_with`](Self::succeed_with)
/// when the step completes. A timer dropped without either (an early `?`
/// return, or a cancelled future) reports the step as failed.
#[must_use = "a dropped timer reports the step as failed"]
pub struct StepTimer<'a> {
    observer: &'a dyn Observer,
    step: Step,
    started: Instant,
    finished: bool,
}

impl<'a> StepTimer<'a> {
    pub fn start(observer: &'a dyn Observer, step: Step) -> Self {
        Self {
            observer,
            step,
            started: Instant::now(),
            finished: false,
        }
    }

    /// Report success and return the elapsed time.
    pub fn succeed(self) -> Duration {
        self.finish(true, None)
    }

    /// Report success with a record count and return the elapsed time.
    pub fn succeed_with(self, records: usize) -> Duration {
        self.finish(true, Some(records))
    }

    /// Report failure explicitly.
    pub fn fail(self) -> Duration {
        self.finish(false, None)
    }

    fn finish(mut self, ok: bool, records: Option<usize>) -> Duration {
        self.finished = true;
        self.emit(ok, records)
    }

    fn emit(&self, ok: bool, records: Option<usize>) -> Duration {
        let elapsed = self.started.elapsed();
        self.observer.on_step(&StepEvent {
            step: self.step,
            elapsed,
            ok,
            records,
        });
        elapsed
    }
}

impl Drop for StepTimer<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.emit(false, None);
        }
    }
}
