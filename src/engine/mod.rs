// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Mirror engine.
//!
//! Ties together:
//! - The remote feed via [`crate::feed::RemoteFeed`]
//! - The local store via [`crate::store::LocalStore`]
//! - Step timing via [`crate::observe::Observer`]
//!
//! # Architecture
//!
//! The engine runs one flow at a time:
//! 1. Computes the id range still missing locally
//! 2. Fetches and appends it block by block (see [`pull`])
//! 3. Sleeps until the next scheduled cycle
//! 4. On shutdown, lets the in-flight block finish persisting and stops
//!
//! The engine can also be driven one cycle at a time with
//! [`MirrorEngine::pull`], or on the caller's own task with
//! [`MirrorEngine::run_until_shutdown`].

mod pull;
mod schedule;
mod types;

pub use pull::{plan_blocks, resume_point};
pub use schedule::PollSchedule;
pub use types::{Block, CycleStats, EngineState};

use crate::config::MirrorConfig;
use crate::error::{MirrorError, Result};
use crate::feed::RemoteFeed;
use crate::observe::{Observer, TracingObserver};
use crate::store::LocalStore;
use pull::{FlowGuard, Puller};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long `shutdown()` waits for the in-flight block to persist.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// The main mirror engine.
///
/// Generic over the feed and the store so the core never depends on HTTP
/// or SQLite. Both are held in `Arc`s so the poll loop can run as a
/// spawned task.
pub struct MirrorEngine<F: RemoteFeed, S: LocalStore> {
    /// Configuration (immutable after construction)
    config: MirrorConfig,

    /// Shared with the poll loop task
    puller: Puller<F, S>,

    /// Engine state receiver
    state_rx: watch::Receiver<EngineState>,

    /// Shutdown signal sender
    shutdown_tx: watch::Sender<bool>,

    /// Shutdown signal receiver
    shutdown_rx: watch::Receiver<bool>,

    /// Poll loop task, once started
    loop_handle: Option<JoinHandle<()>>,
}

impl<F: RemoteFeed, S: LocalStore> MirrorEngine<F, S> {
    /// Create an engine over the given feed and store.
    ///
    /// The engine starts in `Idle` state. Fails with
    /// [`MirrorError::Config`] if the configuration is invalid.
    pub fn new(config: MirrorConfig, feed: Arc<F>, store: Arc<S>) -> Result<Self> {
        config.validate()?;

        let (state_tx, state_rx) = watch::channel(EngineState::Idle);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let puller = Puller {
            feed,
            store,
            observer: Arc::new(TracingObserver),
            pull: config.pull.clone(),
            slo: config.slo.clone(),
            schedule: config.pull.schedule(),
            state_tx: Arc::new(state_tx),
            busy: Arc::new(AtomicBool::new(false)),
        };

        Ok(Self {
            config,
            puller,
            state_rx,
            shutdown_tx,
            shutdown_rx,
            loop_handle: None,
        })
    }

    /// Replace the default [`TracingObserver`].
    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.puller.observer = observer;
        self
    }

    /// Override the cadence derived from the config.
    ///
    /// Fails with [`MirrorError::Config`] for a zero interval.
    pub fn with_schedule(mut self, schedule: PollSchedule) -> Result<Self> {
        if schedule.interval().is_zero() {
            return Err(MirrorError::Config(format!(
                "poll schedule interval must be non-zero, got {:?}",
                schedule
            )));
        }
        self.puller.schedule = schedule;
        Ok(self)
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    pub fn feed(&self) -> &Arc<F> {
        &self.puller.feed
    }

    pub fn store(&self) -> &Arc<S> {
        &self.puller.store
    }

    pub fn schedule(&self) -> PollSchedule {
        self.puller.schedule
    }

    /// Get current engine state.
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    /// Check if the poll loop task is running.
    pub fn is_running(&self) -> bool {
        self.loop_handle.is_some() && self.state() != EngineState::Stopped
    }

    /// Remote head and local watermark, without pulling anything.
    pub async fn positions(&self) -> Result<(i64, Option<i64>)> {
        let remote_max_id = self.puller.feed.max_id().await?;
        let watermark = self.puller.store.current_watermark().await?;
        Ok((remote_max_id, watermark))
    }

    /// Run exactly one pull cycle on the current task.
    ///
    /// A `shutdown()` issued meanwhile stops the cycle between blocks.
    /// Fails with [`MirrorError::InvalidState`] while another cycle or the
    /// poll loop is running.
    pub async fn pull(&self) -> Result<CycleStats> {
        let _flow = self.claim_flow()?;

        let result = self.puller.run_cycle(&self.shutdown_rx).await;
        self.puller.set_state(EngineState::Idle);
        result
    }

    /// Spawn the poll loop as a background task.
    pub fn start(&mut self) -> Result<()> {
        let flow = self.claim_flow()?;
        if self.state() != EngineState::Idle {
            return Err(MirrorError::InvalidState {
                expected: "Idle".to_string(),
                actual: self.state().to_string(),
            });
        }

        info!(
            feed = %self.config.remote.feed,
            store = %self.config.store.sqlite_path,
            schedule = ?self.puller.schedule,
            "Starting mirror engine"
        );

        let puller = self.puller.clone();
        let shutdown_rx = self.shutdown_rx.clone();
        self.loop_handle = Some(tokio::spawn(async move {
            let _flow = flow;
            puller.run_loop(shutdown_rx).await;
        }));

        Ok(())
    }

    /// Run the poll loop on the current task until `shutdown_rx` reads
    /// `true` (or its sender is dropped).
    pub async fn run_until_shutdown(&self, shutdown_rx: watch::Receiver<bool>) -> Result<()> {
        let _flow = self.claim_flow()?;
        self.puller.run_loop(shutdown_rx).await;
        Ok(())
    }

    /// Shutdown the engine gracefully.
    ///
    /// Shutdown sequence:
    /// 1. Signal the poll loop (and any running `pull()`) to stop
    /// 2. Wait for the in-flight block to persist (with timeout)
    /// 3. Mark the engine `Stopped`
    ///
    /// Closing the store is left to its owner.
    pub async fn shutdown(&mut self) {
        info!("Shutting down mirror engine");

        // Signal shutdown to the loop
        let _ = self.shutdown_tx.send(true);

        if let Some(mut handle) = self.loop_handle.take() {
            match tokio::time::timeout(DRAIN_TIMEOUT, &mut handle).await {
                Ok(Ok(())) => {
                    debug!("Poll loop completed gracefully");
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "Poll loop panicked during shutdown");
                }
                Err(_) => {
                    warn!(
                        timeout_secs = DRAIN_TIMEOUT.as_secs(),
                        "Poll loop timed out during shutdown, aborting (in-flight block is re-fetched next run)"
                    );
                    handle.abort();
                }
            }
        }

        self.puller.mark_stopped();
        info!("Mirror engine stopped");
    }

    /// Claim the single pull flow for a cycle or the poll loop.
    fn claim_flow(&self) -> Result<FlowGuard> {
        if self.state() == EngineState::Stopped {
            return Err(MirrorError::Shutdown);
        }
        self.puller.try_claim().ok_or_else(|| MirrorError::InvalidState {
            expected: "Idle".to_string(),
            actual: if self.loop_handle.is_some() {
                "polling".to_string()
            } else {
                "busy".to_string()
            },
        })
    }
}
