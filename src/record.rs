// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The unit of replication.

use crate::codec;
use crate::error::Result;
use std::fmt;

/// A single feed record.
///
/// `id` is the only field the mirror looks at; everything else is carried
/// through untouched. `payload` stays in its compressed wire form.
#[derive(Clone, PartialEq, Eq)]
pub struct Record {
    /// Feed-assigned, monotonically increasing identifier.
    pub id: i64,
    /// Creation timestamp as sent by the feed. Never parsed.
    pub created: String,
    /// Resource the record was captured from.
    pub url: String,
    /// Remote response status code.
    pub status: i64,
    /// Length-prefixed zlib payload (see [`crate::codec`]).
    pub payload: Vec<u8>,
}

impl Record {
    /// Decode the payload into raw bytes.
    pub fn decode_payload(&self) -> Result<Vec<u8>> {
        codec::decode(&self.payload)
    }

    /// Consume the record, replacing the payload with its decoded body.
    pub fn into_decoded(self) -> Result<DecodedRecord> {
        let body = codec::decode(&self.payload)?;
        Ok(DecodedRecord {
            id: self.id,
            created: self.created,
            url: self.url,
            status: self.status,
            body,
        })
    }
}

/// A record whose payload has been decoded for reading.
#[derive(Clone, PartialEq, Eq)]
pub struct DecodedRecord {
    pub id: i64,
    pub created: String,
    pub url: String,
    pub status: i64,
    /// Raw response body.
    pub body: Vec<u8>,
}

impl DecodedRecord {
    /// Body as UTF-8 text, if it is valid UTF-8.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

impl fmt::Debug for DecodedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedRecord")
            .field("id", &self.id)
            .field("created", &self.created)
            .field("url", &self.url)
            .field("status", &self.status)
            .field("body.len", &self.body.len())
            .finish()
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("id", &self.id)
            .field("created", &self.created)
            .field("url", &self.url)
            .field("status", &self.status)
            .field("payload.len", &self.payload.len())
            .finish()
    }
}
