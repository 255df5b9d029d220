// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Engine state and cycle types.
//!
//! # State Transitions
//!
//! ```text
//!          pull() / start()
//! Idle ─────────────────────→ ComputeRange ──→ FetchBlock ⇄ PersistBlock
//!   ↑                              ↑                   │
//!   │ (pull() done)                │ (timer)           │ (range consumed
//!   └──────────────────────────────┼───────────────────┤  or cycle failed)
//!                                  │                   ↓
//!                               Sleeping ←─────────────┘
//!                                  │
//!                        shutdown()│ (checked between blocks too)
//!                                  ↓
//!                               Stopped
//! ```
//!
//! # State Descriptions
//!
//! - **Idle**: Created, or a one-shot `pull()` has returned.
//! - **ComputeRange**: Reading the remote head and the local watermark.
//! - **FetchBlock**: Waiting on the feed for one block.
//! - **PersistBlock**: Appending one block to the store.
//! - **Sleeping**: Waiting for the next scheduled cycle.
//! - **Stopped**: Shutdown observed. Terminal.

use std::fmt;

/// State of the mirror engine.
///
/// See module docs for the state transition diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Not running a cycle.
    Idle,
    /// Working out `[start, upper_exclusive)` for this cycle.
    ComputeRange,
    /// Fetching a block from the feed.
    FetchBlock,
    /// Appending a fetched block to the store.
    PersistBlock,
    /// Between cycles.
    Sleeping,
    /// Shut down. Safe to drop.
    Stopped,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Idle => write!(f, "Idle"),
            EngineState::ComputeRange => write!(f, "ComputeRange"),
            EngineState::FetchBlock => write!(f, "FetchBlock"),
            EngineState::PersistBlock => write!(f, "PersistBlock"),
            EngineState::Sleeping => write!(f, "Sleeping"),
            EngineState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// A half-open id range `[min_id, max_id)` fetched and persisted as a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Block {
    /// Inclusive lower bound.
    pub min_id: i64,
    /// Exclusive upper bound.
    pub max_id: i64,
}

impl Block {
    pub fn new(min_id: i64, max_id: i64) -> Self {
        Self { min_id, max_id }
    }

    /// Number of ids the block covers.
    pub fn span(&self) -> i64 {
        self.max_id - self.min_id
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.min_id, self.max_id)
    }
}

/// Statistics from one pull cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleStats {
    /// First id requested.
    pub start: i64,
    /// Remote head + 1.
    pub upper_exclusive: i64,
    /// Blocks fetched and persisted.
    pub blocks: usize,
    /// Records received from the feed.
    pub fetched: usize,
    /// Records newly written to the store.
    pub inserted: usize,
    /// Shutdown was observed before the range was consumed.
    pub interrupted: bool,
    /// Store watermark after the cycle.
    pub watermark: Option<i64>,
}

impl CycleStats {
    /// True when the cycle had nothing to fetch.
    pub fn is_up_to_date(&self) -> bool {
        self.start >= self.upper_exclusive
    }
}
