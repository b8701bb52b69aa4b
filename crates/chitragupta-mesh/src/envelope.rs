// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

use crate::now_ms;

/// `to` value that fans out to every registered actor and peer.
pub const BROADCAST_TARGET: &str = "*";
/// `to` value that fans out to the subscribers of `topic`.
pub const TOPIC_TARGET: &str = "__topic__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    /// Fire-and-forget.
    Tell,
    /// Expects a correlated reply.
    Ask,
    /// Carries the correlation id of the ask it answers.
    Reply,
}

/// A message in flight through the mesh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    pub from: String,
    /// Agent id, [`BROADCAST_TARGET`], or [`TOPIC_TARGET`].
    pub to: String,
    pub kind: EnvelopeKind,
    pub payload: serde_json::Value,
    /// 0 (low) … 3 (critical).
    pub priority: u8,
    /// Milliseconds since the Unix epoch at send time.
    pub timestamp_ms: u64,
    pub ttl_ms: u64,
    /// Agent ids traversed so far, in order.
    pub hops: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl Envelope {
    pub fn tell(
        from: impl Into<String>,
        to: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            from: from.into(),
            to: to.into(),
            kind: EnvelopeKind::Tell,
            payload,
            priority: 1,
            timestamp_ms: now_ms(),
            ttl_ms: 60_000,
            hops: Vec::new(),
            topic: None,
            correlation_id: None,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(3);
        self
    }

    pub fn with_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = ttl_ms;
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.to = TOPIC_TARGET.to_string();
        self.topic = Some(topic.into());
        self
    }

    /// Whether this envelope's time-to-live has elapsed.
    pub fn expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.timestamp_ms) >= self.ttl_ms
    }
}
