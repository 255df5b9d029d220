// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Remote feed access.
//!
//! The engine only sees the [`RemoteFeed`] trait. [`HttpFeed`] implements it
//! against the feed's JSON API:
//!
//! ```text
//! GET /v0/<feed>/stat                               → {"max_id": 2499}
//! GET /v0/<feed>/range?min_id=0&max_id=1000[&filter=%/s/%]
//!                                                   → {"entries": [{id, created, url, status, response}]}
//! ```
//!
//! `response` is base64 of the length-prefixed zlib payload. It is decoded
//! from base64 here but stays compressed; see [`crate::codec`].
//!
//! # Example
//!
//! ```rust,no_run
//! use feed_mirror::feed::{BoxFuture, RemoteFeed};
//! use feed_mirror::Record;
//!
//! struct StaticFeed(Vec<Record>);
//!
//! impl RemoteFeed for StaticFeed {
//!     fn max_id(&self) -> BoxFuture<'_, i64> {
//!         Box::pin(async move { Ok(self.0.iter().map(|r| r.id).max().unwrap_or(0)) })
//!     }
//!
//!     fn fetch_range<'a>(
//!         &'a self,
//!         min_id: i64,
//!         max_id: i64,
//!         _filter: Option<&'a str>,
//!     ) -> BoxFuture<'a, Vec<Record>> {
//!         Box::pin(async move {
//!             Ok(self.0.iter().filter(|r| r.id >= min_id && r.id < max_id).cloned().collect())
//!         })
//!     }
//! }
//! ```

use crate::config::RemoteConfig;
use crate::error::{MirrorError, Result};
use crate::record::{DecodedRecord, Record};
use base64::Engine;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, instrument, warn};

/// Widest `[min_id, max_id)` span the feed serves in one range request.
pub const MAX_RANGE_SPAN: i64 = 1000;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// What the engine needs from the remote feed.
///
/// Implementations must not retry internally; a failed call aborts the
/// current cycle and the next cycle starts over from the store's watermark.
pub trait RemoteFeed: Send + Sync + 'static {
    /// Highest ID the feed currently holds.
    fn max_id(&self) -> BoxFuture<'_, i64>;

    /// Records with `min_id <= id < max_id`, payloads still compressed.
    ///
    /// Ordering of the result is advisory.
    fn fetch_range<'a>(
        &'a self,
        min_id: i64,
        max_id: i64,
        filter: Option<&'a str>,
    ) -> BoxFuture<'a, Vec<Record>>;
}

/// Response of the `stat` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedStat {
    #[serde(alias = "max_wid")]
    pub max_id: i64,
}

/// One entry of the `range` endpoint, exactly as sent.
#[derive(Deserialize)]
struct WireEntry {
    id: i64,
    created: String,
    url: String,
    status: i64,
    response: String,
}

impl WireEntry {
    fn into_record(self) -> Result<Record> {
        let payload = base64::engine::general_purpose::STANDARD
            .decode(self.response.as_bytes())
            .map_err(|e| {
                MirrorError::malformed(format!("record {}: invalid base64 response: {}", self.id, e))
            })?;
        Ok(Record {
            id: self.id,
            created: self.created,
            url: self.url,
            status: self.status,
            payload,
        })
    }
}

#[derive(Deserialize)]
struct RangeResponse {
    entries: Vec<WireEntry>,
}

/// HTTP client for the feed API.
#[derive(Clone)]
pub struct HttpFeed {
    client: reqwest::Client,
    base_url: Url,
    feed: String,
    username: String,
    password: String,
    user_agent: String,
}

impl HttpFeed {
    /// Build a client from config, with the configured request timeout.
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout_duration())
            .build()
            .map_err(|e| MirrorError::Config(format!("HTTP client: {}", e)))?;
        Self::with_client(client, config)
    }

    /// Build on top of an existing `reqwest::Client`.
    pub fn with_client(client: reqwest::Client, config: &RemoteConfig) -> Result<Self> {
        let mut base_url = Url::parse(&config.base_url).map_err(|e| {
            MirrorError::Config(format!("Invalid base URL {:?}: {}", config.base_url, e))
        })?;
        // Url::join replaces the last segment unless the path ends in '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client,
            base_url,
            feed: config.feed.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            user_agent: config.effective_user_agent(),
        })
    }

    fn endpoint(&self, leaf: &str) -> Result<Url> {
        self.base_url
            .join(&format!("v0/{}/{}", self.feed, leaf))
            .map_err(|e| MirrorError::Config(format!("failed to build full url: {}", e)))
    }

    /// GET an endpoint and return the body of a 200 response.
    async fn get_text(
        &self,
        operation: &'static str,
        url: Url,
        query: &[(&str, String)],
    ) -> Result<String> {
        let res = self
            .client
            .get(url)
            .query(query)
            .basic_auth(&self.username, Some(&self.password))
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .send()
            .await
            .map_err(|e| MirrorError::remote(operation, format!("failed to send request: {}", e)))?;

        let status = res.status();
        if status != StatusCode::OK {
            return Err(match res.text().await {
                Ok(body) => MirrorError::remote(
                    operation,
                    format!("unexpected status: {}: {}", status, body),
                ),
                Err(e) => MirrorError::remote(
                    operation,
                    format!("unexpected status and failed to read body: {}: {}", status, e),
                ),
            });
        }

        res.text()
            .await
            .map_err(|e| MirrorError::remote(operation, format!("failed to read response body: {}", e)))
    }

    /// Fetch the current state of the upstream feed.
    #[instrument(skip(self), fields(feed = %self.feed), err)]
    pub async fn fetch_stat(&self) -> Result<FeedStat> {
        let body = self.get_text("stat", self.endpoint("stat")?, &[]).await?;
        serde_json::from_str::<FeedStat>(&body).map_err(|e| {
            MirrorError::malformed(format!("failed to deserialize stat body: {}", e))
        })
    }

    /// Fetch `[min_id, max_id)` with payloads left compressed.
    #[instrument(skip(self), fields(feed = %self.feed), err)]
    pub async fn fetch_range_compressed(
        &self,
        min_id: i64,
        max_id: i64,
        filter: Option<&str>,
    ) -> Result<Vec<Record>> {
        let span = max_id.saturating_sub(min_id);
        if span > MAX_RANGE_SPAN {
            return Err(MirrorError::RangeTooLarge {
                span,
                limit: MAX_RANGE_SPAN,
            });
        }
        if span <= 0 {
            return Ok(Vec::new());
        }

        let mut query = vec![("min_id", min_id.to_string()), ("max_id", max_id.to_string())];
        if let Some(filter) = filter {
            query.push(("filter", filter.to_string()));
        }

        let body = self.get_text("range", self.endpoint("range")?, &query).await?;
        let entries = serde_json::from_str::<RangeResponse>(&body)
            .map_err(|e| {
                MirrorError::malformed(format!("failed to deserialize range body: {}", e))
            })?
            .entries;

        let records = entries
            .into_iter()
            .map(WireEntry::into_record)
            .collect::<Result<Vec<_>>>()?;
        debug!(min_id, max_id, count = records.len(), "Fetched range");
        Ok(records)
    }

    /// Fetch `[min_id, max_id)` and decode every payload.
    ///
    /// Records whose payload does not decode are dropped with a warning. The
    /// call only fails when every record in a non-empty response failed.
    #[instrument(skip(self), fields(feed = %self.feed), err)]
    pub async fn fetch_range_decoded(
        &self,
        min_id: i64,
        max_id: i64,
        filter: Option<&str>,
    ) -> Result<Vec<DecodedRecord>> {
        let records = self.fetch_range_compressed(min_id, max_id, filter).await?;

        let mut decoded = Vec::with_capacity(records.len());
        let mut errors = Vec::new();
        for record in records {
            let id = record.id;
            match record.into_decoded() {
                Ok(record) => decoded.push(record),
                Err(MirrorError::MalformedPayload(msg)) => {
                    errors.push(format!("record {}: {}", id, msg));
                }
                Err(e) => return Err(e),
            }
        }

        if decoded.is_empty() && !errors.is_empty() {
            return Err(MirrorError::malformed(format!(
                "failed to decompress response: {}",
                errors.join("; ")
            )));
        }
        if !errors.is_empty() {
            warn!(
                min_id,
                max_id,
                skipped = errors.len(),
                first_error = %errors[0],
                "Dropped records with undecodable payloads"
            );
        }
        Ok(decoded)
    }
}

impl RemoteFeed for HttpFeed {
    fn max_id(&self) -> BoxFuture<'_, i64> {
        Box::pin(async move { Ok(self.fetch_stat().await?.max_id) })
    }

    fn fetch_range<'a>(
        &'a self,
        min_id: i64,
        max_id: i64,
        filter: Option<&'a str>,
    ) -> BoxFuture<'a, Vec<Record>> {
        Box::pin(self.fetch_range_compressed(min_id, max_id, filter))
    }
}
