// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the feed mirror.
//!
//! Configuration is supplied once at startup and is immutable for the
//! lifetime of the process. It can be built programmatically or
//! deserialized from JSON.
//!
//! # Quick Start
//!
//! ```rust
//! use feed_mirror::config::{MirrorConfig, PullConfig};
//!
//! let config = MirrorConfig {
//!     pull: PullConfig {
//!         floor_id: 149_470_000,
//!         filter: Some("%/s/%".into()),
//!         ..Default::default()
//!     },
//!     ..MirrorConfig::for_testing()
//! };
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! MirrorConfig
//! ├── remote: RemoteConfig   # Feed endpoint and credentials
//! ├── pull: PullConfig       # Block size, floor, filter, cadence
//! ├── store: StoreConfig     # SQLite location
//! └── slo: SloConfig         # Latency thresholds for warnings
//! ```
//!
//! # JSON Example
//!
//! ```json
//! {
//!   "remote": {
//!     "base_url": "https://feed.example.com/",
//!     "feed": "web",
//!     "username": "api_user",
//!     "password": "api_pass"
//!   },
//!   "pull": {
//!     "block_size": 1000,
//!     "floor_id": 149470000,
//!     "filter": "%/s/%",
//!     "poll_interval": "1m"
//!   },
//!   "store": { "sqlite_path": "/var/lib/feed-mirror/web.db" }
//! }
//! ```

use crate::engine::PollSchedule;
use crate::error::{MirrorError, Result};
use crate::feed::MAX_RANGE_SPAN;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object passed to `MirrorEngine::new()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Remote feed endpoint and credentials.
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Pull protocol settings.
    #[serde(default)]
    pub pull: PullConfig,

    /// Local store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Latency thresholds.
    #[serde(default)]
    pub slo: SloConfig,
}

impl MirrorConfig {
    /// Create a minimal config for testing (in-memory store, floor 0).
    pub fn for_testing() -> Self {
        Self {
            remote: RemoteConfig::default(),
            pull: PullConfig::default(),
            store: StoreConfig::in_memory(),
            slo: SloConfig::default(),
        }
    }

    /// Parse a config from a JSON string and validate it.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| MirrorError::Config(format!("Invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a JSON file and validate it.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            MirrorError::Config(format!("Cannot read config {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    /// Check the invariants the engine relies on.
    pub fn validate(&self) -> Result<()> {
        self.remote.validate()?;
        self.pull.validate()?;
        if self.store.sqlite_path.is_empty() {
            return Err(MirrorError::Config("store.sqlite_path must not be empty".into()));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RemoteConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Remote feed endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the feed API, e.g. `"https://feed.example.com/"`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Feed name used in request paths (`/v0/<feed>/stat`).
    #[serde(default = "default_feed")]
    pub feed: String,

    /// Basic auth username.
    #[serde(default)]
    pub username: String,

    /// Basic auth password.
    #[serde(default)]
    pub password: String,

    /// Per-request timeout as a duration string (e.g., "30s").
    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,

    /// Overrides the default `feed-mirror/<version> +<username>` agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080/".to_string()
}

fn default_feed() -> String {
    "web".to_string()
}

fn default_request_timeout() -> String {
    "30s".to_string()
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            feed: default_feed(),
            username: String::new(),
            password: String::new(),
            request_timeout: default_request_timeout(),
            user_agent: None,
        }
    }
}

impl RemoteConfig {
    /// Parse the request timeout, falling back to 30 seconds.
    pub fn request_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.request_timeout).unwrap_or(Duration::from_secs(30))
    }

    /// User agent sent with every request.
    pub fn effective_user_agent(&self) -> String {
        self.user_agent.clone().unwrap_or_else(|| {
            format!("feed-mirror/{} +{}", env!("CARGO_PKG_VERSION"), self.username)
        })
    }

    fn validate(&self) -> Result<()> {
        if self.feed.is_empty() || self.feed.contains('/') {
            return Err(MirrorError::Config(format!(
                "remote.feed must be a single path segment, got {:?}",
                self.feed
            )));
        }
        reqwest::Url::parse(&self.base_url).map_err(|e| {
            MirrorError::Config(format!("remote.base_url {:?} is invalid: {}", self.base_url, e))
        })?;
        humantime::parse_duration(&self.request_timeout).map_err(|e| {
            MirrorError::Config(format!("remote.request_timeout: {}", e))
        })?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PullConfig: the incremental pull protocol
// ═══════════════════════════════════════════════════════════════════════════════

/// Pull protocol configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullConfig {
    /// IDs per block. Each block is one fetch and one atomic append.
    #[serde(default = "default_block_size")]
    pub block_size: i64,

    /// Lowest ID the engine will ever resume from.
    #[serde(default)]
    pub floor_id: i64,

    /// Optional URL filter forwarded to the feed. `None` sends no filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,

    /// Time between cycles as a duration string (e.g., "60s", "1m").
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,

    /// Wake on multiples of `poll_interval` since the Unix epoch rather than
    /// `poll_interval` after each cycle.
    #[serde(default = "default_true")]
    pub align_to_boundary: bool,
}

fn default_block_size() -> i64 {
    1000
}

fn default_poll_interval() -> String {
    "60s".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for PullConfig {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            floor_id: 0,
            filter: None,
            poll_interval: default_poll_interval(),
            align_to_boundary: true,
        }
    }
}

impl PullConfig {
    /// Parse the poll interval, falling back to 60 seconds.
    pub fn poll_interval_duration(&self) -> Duration {
        humantime::parse_duration(&self.poll_interval).unwrap_or(Duration::from_secs(60))
    }

    /// Cadence of the poll loop.
    pub fn schedule(&self) -> PollSchedule {
        let interval = self.poll_interval_duration();
        if self.align_to_boundary {
            PollSchedule::Aligned(interval)
        } else {
            PollSchedule::Fixed(interval)
        }
    }

    /// Filter as a borrowed option, as the feed expects it.
    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    fn validate(&self) -> Result<()> {
        if self.block_size <= 0 || self.block_size > MAX_RANGE_SPAN {
            return Err(MirrorError::Config(format!(
                "pull.block_size must be in 1..={}, got {}",
                MAX_RANGE_SPAN, self.block_size
            )));
        }
        if self.floor_id < 0 {
            return Err(MirrorError::Config(format!(
                "pull.floor_id must not be negative, got {}",
                self.floor_id
            )));
        }
        let interval = humantime::parse_duration(&self.poll_interval)
            .map_err(|e| MirrorError::Config(format!("pull.poll_interval: {}", e)))?;
        if interval.is_zero() {
            return Err(MirrorError::Config("pull.poll_interval must be positive".into()));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// StoreConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Local store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,

    /// Whether to use WAL mode for SQLite (recommended).
    #[serde(default = "default_true")]
    pub wal_mode: bool,
}

fn default_sqlite_path() -> String {
    "feed_mirror.db".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_sqlite_path(),
            wal_mode: true,
        }
    }
}

impl StoreConfig {
    /// Create an in-memory config for testing.
    pub fn in_memory() -> Self {
        Self {
            sqlite_path: ":memory:".to_string(),
            wal_mode: false,
        }
    }

    /// Whether this config points at an in-memory database.
    pub fn is_in_memory(&self) -> bool {
        self.sqlite_path == ":memory:"
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SloConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Latency thresholds. Exceeding one logs a warning; nothing else changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SloConfig {
    /// Maximum acceptable duration of a whole cycle (ms).
    #[serde(default = "default_max_cycle_latency_ms")]
    pub max_cycle_latency_ms: u64,

    /// Maximum acceptable fetch+append duration of one block (ms).
    #[serde(default = "default_max_block_latency_ms")]
    pub max_block_latency_ms: u64,
}

fn default_max_cycle_latency_ms() -> u64 {
    30_000
}

fn default_max_block_latency_ms() -> u64 {
    5_000
}

impl Default for SloConfig {
    fn default() -> Self {
        Self {
            max_cycle_latency_ms: default_max_cycle_latency_ms(),
            max_block_latency_ms: default_max_block_latency_ms(),
        }
    }
}

impl SloConfig {
    /// Check if a cycle latency violates SLO.
    pub fn is_cycle_violation(&self, latency: Duration) -> bool {
        latency.as_millis() as u64 > self.max_cycle_latency_ms
    }

    /// Check if a block latency violates SLO.
    pub fn is_block_violation(&self, latency: Duration) -> bool {
        latency.as_millis() as u64 > self.max_block_latency_ms
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
