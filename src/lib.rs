//! # Feed Mirror
//!
//! Incrementally mirrors a remote append-only record feed into a local
//! SQLite store, resuming after restarts and polling forever on a
//! wall-clock cadence.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                              feed-mirror                                  │
//! │                                                                           │
//! │  ┌─────────────┐    ┌──────────────────┐    ┌─────────────────────────┐   │
//! │  │ RemoteFeed  │───►│ MirrorEngine     │───►│ LocalStore              │   │
//! │  │ (HttpFeed)  │    │ (block planner + │    │ (SqliteStore,           │   │
//! │  │ max_id /    │    │  poll loop)      │    │  INSERT OR IGNORE)      │   │
//! │  │ fetch_range │    └──────────────────┘    └─────────────────────────┘   │
//! │  └─────────────┘             │                          │                 │
//! │                              ▼                          ▼                 │
//! │                     ┌─────────────────┐        watermark = MAX(id)        │
//! │                     │ Observer        │                                   │
//! │                     │ (step timings)  │                                   │
//! │                     └─────────────────┘                                   │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Pull Protocol
//!
//! 1. **Range**: `[max(floor, watermark + 1), remote max_id + 1)`
//! 2. **Blocks**: the range split into `block_size` pieces, ascending
//! 3. **Persist**: each block appended in one transaction; duplicates ignored
//!
//! Payloads are stored exactly as received. [`codec::decode`] turns them
//! into raw bytes on demand.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use feed_mirror::{HttpFeed, MirrorConfig, MirrorEngine, SqliteStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> feed_mirror::Result<()> {
//!     let config = MirrorConfig::from_file("mirror.json")?;
//!     let feed = Arc::new(HttpFeed::new(&config.remote)?);
//!     let store = Arc::new(SqliteStore::from_config(&config.store).await?);
//!
//!     let mut engine = MirrorEngine::new(config, feed, store.clone())?;
//!     engine.start()?;
//!
//!     tokio::signal::ctrl_c().await.ok();
//!     engine.shutdown().await;
//!     store.close().await;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod feed;
pub mod metrics;
pub mod observe;
pub mod record;
pub mod store;

// Re-exports for convenience
pub use config::{MirrorConfig, PullConfig, RemoteConfig, SloConfig, StoreConfig};
pub use engine::{Block, CycleStats, EngineState, MirrorEngine, PollSchedule};
pub use error::{MirrorError, Result};
pub use feed::{BoxFuture, HttpFeed, RemoteFeed, MAX_RANGE_SPAN};
pub use observe::{Observer, RecordingObserver, Step, StepEvent, StepTimer, TracingObserver};
pub use record::{DecodedRecord, Record};
pub use store::{LocalStore, MemoryStore, SqliteStore};
