//! Shared test utilities for scenario, property and chaos tests.
//!
//! This module provides:
//! - A recording in-memory `RemoteFeed` with fault injection
//! - Record and config helpers

#![allow(dead_code)]

pub mod mock_feed;

pub use mock_feed::*;

use feed_mirror::{codec, MirrorConfig, Record};

/// Raw body stored for `id` by the mock feed.
pub fn body_for(id: i64) -> Vec<u8> {
    format!("body {}", id).into_bytes()
}

/// A well-formed record whose payload decodes to [`body_for`].
pub fn record(id: i64) -> Record {
    Record {
        id,
        created: "2023-06-01T23:24:25.065Z".to_string(),
        url: format!("https://example.com/s/{}/{}", id / 1000, id),
        status: 200,
        payload: codec::encode(&body_for(id)).expect("encode test payload"),
    }
}

/// In-memory config with the given block size and floor.
pub fn config(block_size: i64, floor_id: i64) -> MirrorConfig {
    let mut config = MirrorConfig::for_testing();
    config.pull.block_size = block_size;
    config.pull.floor_id = floor_id;
    config
}
