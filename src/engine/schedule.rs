// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Poll cadence.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// When the next cycle starts after the previous one ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollSchedule {
    /// Wake at the next multiple of the interval since the Unix epoch
    /// (`60s` → top of every wall-clock minute).
    Aligned(Duration),
    /// Wake a fixed interval after the previous cycle ended.
    Fixed(Duration),
}

impl Default for PollSchedule {
    fn default() -> Self {
        PollSchedule::Aligned(Duration::from_secs(60))
    }
}

impl PollSchedule {
    pub fn interval(&self) -> Duration {
        match self {
            PollSchedule::Aligned(interval) | PollSchedule::Fixed(interval) => *interval,
        }
    }

    /// How long to sleep, given the current wall-clock time.
    ///
    /// An aligned schedule sitting exactly on a boundary waits a full
    /// interval, so a fast cycle never runs twice in the same slot.
    pub fn delay_until_next(&self, now: DateTime<Utc>) -> Duration {
        match self {
            PollSchedule::Fixed(interval) => *interval,
            PollSchedule::Aligned(interval) => {
                let interval_ms = interval.as_millis().min(i64::MAX as u128) as i64;
                if interval_ms == 0 {
                    return Duration::ZERO;
                }
                let into_slot = now.timestamp_millis().rem_euclid(interval_ms);
                Duration::from_millis((interval_ms - into_slot) as u64)
            }
        }
    }
}
