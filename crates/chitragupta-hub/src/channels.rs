// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::HubError;
use crate::now_ms;

/// Envelopes retained per (agent, topic) for later retrieval.
const RING_CAPACITY: usize = 100;

/// One message on a named channel.
#[derive(Debug, Clone)]
pub struct ChannelMessage {
    pub id: String,
    pub from: String,
    pub to: String,
    pub topic: String,
    pub payload: Value,
    pub timestamp_ms: u64,
    pub correlation_id: Option<String>,
}

impl ChannelMessage {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        topic: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            from: from.into(),
            to: to.into(),
            topic: topic.into(),
            payload,
            timestamp_ms: now_ms(),
            correlation_id: None,
        }
    }
}

type Callback = Arc<dyn Fn(&ChannelMessage) + Send + Sync>;

struct Subscriber {
    id: u64,
    agent: String,
    topic: String,
    callback: Callback,
}

/// Handle returned by `subscribe`; pass back to `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription(u64);

struct ChannelState {
    subscribers: Vec<Subscriber>,
    /// (agent, topic) → retained messages, oldest first.
    rings: HashMap<(String, String), VecDeque<ChannelMessage>>,
    pending: HashMap<String, oneshot::Sender<Result<Value, HubError>>>,
    total_messages: u64,
}

/// Named channels: durable-ish ring history per recipient plus push
/// dispatch to subscriber callbacks, with request/response correlation.
pub struct ChannelManager {
    destroyed: Arc<AtomicBool>,
    next_sub: AtomicU64,
    state: Mutex<ChannelState>,
}

impl ChannelManager {
    pub(crate) fn new(destroyed: Arc<AtomicBool>) -> Self {
        Self {
            destroyed,
            next_sub: AtomicU64::new(1),
            state: Mutex::new(ChannelState {
                subscribers: Vec::new(),
                rings: HashMap::new(),
                pending: HashMap::new(),
                total_messages: 0,
            }),
        }
    }

    fn check_destroyed(&self) -> Result<(), HubError> {
        if self.destroyed.load(Ordering::SeqCst) {
            Err(HubError::Destroyed)
        } else {
            Ok(())
        }
    }

    /// Subscribe `agent` to `topic`.  The callback runs inline on every
    /// matching send.
    pub fn subscribe(
        &self,
        agent: &str,
        topic: &str,
        callback: Callback,
    ) -> Result<Subscription, HubError> {
        self.check_destroyed()?;
        let id = self.next_sub.fetch_add(1, Ordering::SeqCst);
        self.state.lock().unwrap().subscribers.push(Subscriber {
            id,
            agent: agent.to_string(),
            topic: topic.to_string(),
            callback,
        });
        Ok(Subscription(id))
    }

    pub fn unsubscribe(&self, sub: Subscription) {
        self.state
            .lock()
            .unwrap()
            .subscribers
            .retain(|s| s.id != sub.0);
    }

    /// Deliver one message: persist to the recipient's ring, then invoke
    /// the recipient's subscriptions on that topic.
    pub fn send(&self, msg: ChannelMessage) -> Result<(), HubError> {
        self.check_destroyed()?;
        let callbacks: Vec<Callback> = {
            let mut state = self.state.lock().unwrap();
            state.total_messages += 1;
            let ring = state
                .rings
                .entry((msg.to.clone(), msg.topic.clone()))
                .or_default();
            if ring.len() >= RING_CAPACITY {
                ring.pop_front();
            }
            ring.push_back(msg.clone());
            state
                .subscribers
                .iter()
                .filter(|s| s.agent == msg.to && s.topic == msg.topic)
                .map(|s| s.callback.clone())
                .collect()
        };
        for cb in callbacks {
            cb(&msg);
        }
        Ok(())
    }

    /// Deliver `payload` to every subscriber of `topic` except the sender.
    /// Returns the recipient count.
    pub fn broadcast(
        &self,
        sender: &str,
        topic: &str,
        payload: Value,
    ) -> Result<usize, HubError> {
        self.check_destroyed()?;
        let recipients: Vec<String> = {
            let state = self.state.lock().unwrap();
            let mut agents: Vec<String> = state
                .subscribers
                .iter()
                .filter(|s| s.topic == topic && s.agent != sender)
                .map(|s| s.agent.clone())
                .collect();
            agents.sort();
            agents.dedup();
            agents
        };
        debug!(topic, count = recipients.len(), "channel broadcast");
        for agent in &recipients {
            self.send(ChannelMessage::new(sender, agent.clone(), topic, payload.clone()))?;
        }
        Ok(recipients.len())
    }

    /// Send to `target` and await a correlated [`respond`] call.
    ///
    /// [`respond`]: ChannelManager::respond
    pub async fn request(
        &self,
        target: &str,
        topic: &str,
        payload: Value,
        sender: &str,
        timeout: Duration,
    ) -> Result<Value, HubError> {
        self.check_destroyed()?;
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.state
            .lock()
            .unwrap()
            .pending
            .insert(correlation_id.clone(), tx);

        let mut msg = ChannelMessage::new(sender, target, topic, payload);
        msg.correlation_id = Some(correlation_id.clone());
        self.send(msg)?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(HubError::Destroyed),
            Err(_) => {
                self.state.lock().unwrap().pending.remove(&correlation_id);
                Err(HubError::Timeout(format!("request on {topic}")))
            }
        }
    }

    /// Resolve the pending request with this correlation id.
    pub fn respond(&self, correlation_id: &str, payload: Value) -> Result<(), HubError> {
        self.check_destroyed()?;
        let tx = self.state.lock().unwrap().pending.remove(correlation_id);
        match tx {
            Some(tx) => {
                let _ = tx.send(Ok(payload));
                Ok(())
            }
            None => Err(HubError::NotFound(format!(
                "pending request {correlation_id}"
            ))),
        }
    }

    /// Retained messages for (agent, topic), oldest first.
    pub fn messages(&self, agent: &str, topic: &str) -> Vec<ChannelMessage> {
        self.state
            .lock()
            .unwrap()
            .rings
            .get(&(agent.to_string(), topic.to_string()))
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn subscription_count(&self) -> usize {
        self.state.lock().unwrap().subscribers.len()
    }

    pub fn channel_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        let mut topics: Vec<&str> = state
            .subscribers
            .iter()
            .map(|s| s.topic.as_str())
            .collect();
        topics.sort();
        topics.dedup();
        topics.len()
    }

    pub fn total_messages(&self) -> u64 {
        self.state.lock().unwrap().total_messages
    }

    pub(crate) fn destroy(&self) {
        let pending: Vec<oneshot::Sender<Result<Value, HubError>>> = {
            let mut state = self.state.lock().unwrap();
            state.subscribers.clear();
            state.rings.clear();
            state.pending.drain().map(|(_, tx)| tx).collect()
        };
        for tx in pending {
            let _ = tx.send(Err(HubError::Destroyed));
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
