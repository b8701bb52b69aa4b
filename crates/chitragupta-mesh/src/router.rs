// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{oneshot, Notify};
use tracing::{debug, warn};

use crate::envelope::{Envelope, EnvelopeKind, BROADCAST_TARGET, TOPIC_TARGET};
use crate::mailbox::Mailbox;
use crate::now_ms;

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("ask timed out")]
    AskTimeout,
    #[error("router destroyed")]
    Destroyed,
    #[error("mailbox full for {0}")]
    MailboxFull(String),
}

/// A remote port to another node's router.
#[async_trait]
pub trait PeerChannel: Send + Sync {
    async fn deliver(&self, env: Envelope) -> anyhow::Result<()>;
}

/// Observable routing outcomes.
#[derive(Debug, Clone)]
pub enum RouterEvent {
    Delivered { envelope_id: String, to: String },
    Broadcast { envelope_id: String, recipient_count: usize },
    Undeliverable { envelope_id: String, reason: String },
}

/// A registered local actor's delivery surface.
#[derive(Clone)]
pub(crate) struct ActorHandle {
    pub mailbox: Arc<Mutex<Mailbox>>,
    pub notify: Arc<Notify>,
}

type Listener = Box<dyn Fn(&RouterEvent) + Send + Sync>;
type PendingAsk = oneshot::Sender<Result<Value, MeshError>>;

/// Delivers envelopes between local actors, remote peer channels, and
/// topic subscribers, with ask/reply correlation.
pub struct MeshRouter {
    id: String,
    actors: RwLock<HashMap<String, ActorHandle>>,
    peers: RwLock<HashMap<String, Arc<dyn PeerChannel>>>,
    topics: RwLock<HashMap<String, HashSet<String>>>,
    pending: Mutex<HashMap<String, PendingAsk>>,
    listeners: Mutex<Vec<Listener>>,
    destroyed: AtomicBool,
}

impl MeshRouter {
    pub fn new(id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            actors: RwLock::new(HashMap::new()),
            peers: RwLock::new(HashMap::new()),
            topics: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Register an observer for routing events.
    pub fn on(&self, cb: impl Fn(&RouterEvent) + Send + Sync + 'static) {
        self.listeners.lock().unwrap().push(Box::new(cb));
    }

    fn emit(&self, ev: RouterEvent) {
        let listeners = self.listeners.lock().unwrap();
        for cb in listeners.iter() {
            cb(&ev);
        }
    }

    pub(crate) fn register_actor(&self, id: &str, handle: ActorHandle) {
        self.actors.write().unwrap().insert(id.to_string(), handle);
    }

    pub fn deregister_actor(&self, id: &str) {
        self.actors.write().unwrap().remove(id);
        let mut topics = self.topics.write().unwrap();
        for subs in topics.values_mut() {
            subs.remove(id);
        }
    }

    pub fn register_peer(&self, id: impl Into<String>, channel: Arc<dyn PeerChannel>) {
        self.peers.write().unwrap().insert(id.into(), channel);
    }

    pub fn deregister_peer(&self, id: &str) {
        self.peers.write().unwrap().remove(id);
    }

    pub fn subscribe(&self, topic: impl Into<String>, actor_id: impl Into<String>) {
        self.topics
            .write()
            .unwrap()
            .entry(topic.into())
            .or_default()
            .insert(actor_id.into());
    }

    pub fn unsubscribe(&self, topic: &str, actor_id: &str) {
        if let Some(subs) = self.topics.write().unwrap().get_mut(topic) {
            subs.remove(actor_id);
        }
    }

    pub fn local_actor_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.actors.read().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Fire-and-forget send to exactly one target.
    pub async fn tell(&self, from: &str, to: &str, payload: Value) {
        self.route(Envelope::tell(from, to, payload)).await;
    }

    /// Send and await the correlated reply.
    pub async fn ask(
        &self,
        from: &str,
        to: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value, MeshError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(MeshError::Destroyed);
        }
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap()
            .insert(correlation_id.clone(), tx);

        let mut env = Envelope::tell(from, to, payload);
        env.kind = EnvelopeKind::Ask;
        env.correlation_id = Some(correlation_id.clone());
        self.route(env).await;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            // Sender dropped without a resolution means destroy raced us.
            Ok(Err(_)) => Err(MeshError::Destroyed),
            Err(_) => {
                self.pending.lock().unwrap().remove(&correlation_id);
                Err(MeshError::AskTimeout)
            }
        }
    }

    /// Apply the routing rules to one envelope.
    ///
    /// Rule order: reply correlation, TTL, loop prevention, then
    /// broadcast / topic / point-to-point dispatch.  `self` is appended to
    /// `hops` before dispatch.
    pub async fn route(&self, mut env: Envelope) {
        if self.destroyed.load(Ordering::SeqCst) {
            self.emit(RouterEvent::Undeliverable {
                envelope_id: env.id.clone(),
                reason: "router destroyed".into(),
            });
            return;
        }

        // A reply that matches a pending ask resolves it directly.
        if env.kind == EnvelopeKind::Reply {
            if let Some(corr) = env.correlation_id.as_deref() {
                let pending = self.pending.lock().unwrap().remove(corr);
                if let Some(tx) = pending {
                    let _ = tx.send(Ok(env.payload.clone()));
                    self.emit(RouterEvent::Delivered {
                        envelope_id: env.id.clone(),
                        to: env.to.clone(),
                    });
                    return;
                }
            }
        }

        if env.expired(now_ms()) {
            self.emit(RouterEvent::Undeliverable {
                envelope_id: env.id.clone(),
                reason: "TTL expired".into(),
            });
            return;
        }

        if env.hops.iter().any(|h| h == &env.to) {
            self.emit(RouterEvent::Undeliverable {
                envelope_id: env.id.clone(),
                reason: format!("loop detected via {}", env.to),
            });
            return;
        }

        env.hops.push(self.id.clone());

        if env.to == BROADCAST_TARGET {
            let mut count = 0usize;
            {
                let actors = self.actors.read().unwrap();
                for (id, handle) in actors.iter() {
                    if id == &env.from {
                        continue;
                    }
                    if self.push_local(handle, env.clone()) {
                        count += 1;
                    }
                }
            }
            let peers: Vec<(String, Arc<dyn PeerChannel>)> = {
                let peers = self.peers.read().unwrap();
                peers
                    .iter()
                    .filter(|(id, _)| *id != &env.from)
                    .map(|(id, ch)| (id.clone(), ch.clone()))
                    .collect()
            };
            for (id, channel) in peers {
                if let Err(e) = channel.deliver(env.clone()).await {
                    warn!(peer = %id, error = %e, "broadcast delivery to peer failed");
                } else {
                    count += 1;
                }
            }
            self.emit(RouterEvent::Broadcast {
                envelope_id: env.id.clone(),
                recipient_count: count,
            });
            return;
        }

        if env.to == TOPIC_TARGET {
            let Some(topic) = env.topic.clone() else {
                self.emit(RouterEvent::Undeliverable {
                    envelope_id: env.id.clone(),
                    reason: "topic envelope without topic".into(),
                });
                return;
            };
            let subscribers: Vec<String> = {
                let topics = self.topics.read().unwrap();
                topics
                    .get(&topic)
                    .map(|s| s.iter().filter(|id| **id != env.from).cloned().collect())
                    .unwrap_or_default()
            };
            if subscribers.is_empty() {
                self.emit(RouterEvent::Undeliverable {
                    envelope_id: env.id.clone(),
                    reason: format!("no subscribers for topic {topic}"),
                });
                return;
            }
            let mut count = 0usize;
            for sub in subscribers {
                if self.dispatch_one(&sub, env.clone()).await {
                    count += 1;
                }
            }
            debug!(topic = %topic, recipients = count, "topic fan-out");
            self.emit(RouterEvent::Broadcast {
                envelope_id: env.id.clone(),
                recipient_count: count,
            });
            return;
        }

        // Point-to-point: a local actor wins over a peer channel.
        let to = env.to.clone();
        let id = env.id.clone();
        if self.dispatch_one(&to, env).await {
            self.emit(RouterEvent::Delivered {
                envelope_id: id,
                to,
            });
        } else {
            self.emit(RouterEvent::Undeliverable {
                envelope_id: id,
                reason: format!("no route to {to}"),
            });
        }
    }

    /// Deliver to one recipient by id.  Returns success.
    async fn dispatch_one(&self, to: &str, env: Envelope) -> bool {
        let local = self.actors.read().unwrap().get(to).cloned();
        if let Some(handle) = local {
            return self.push_local(&handle, env);
        }
        let peer = self.peers.read().unwrap().get(to).cloned();
        if let Some(channel) = peer {
            return match channel.deliver(env).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(peer = to, error = %e, "peer delivery failed");
                    false
                }
            };
        }
        false
    }

    fn push_local(&self, handle: &ActorHandle, env: Envelope) -> bool {
        let accepted = handle.mailbox.lock().unwrap().push(env);
        if accepted {
            handle.notify.notify_one();
        }
        accepted
    }

    /// Reject every pending ask and refuse further routing.  Idempotent.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        let pending: Vec<PendingAsk> = {
            let mut g = self.pending.lock().unwrap();
            g.drain().map(|(_, tx)| tx).collect()
        };
        for tx in pending {
            let _ = tx.send(Err(MeshError::Destroyed));
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
