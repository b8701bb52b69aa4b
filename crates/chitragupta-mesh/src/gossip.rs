// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::debug;

use chitragupta_config::GossipConfig;

use crate::now_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerStatus {
    Alive,
    Suspect,
    Dead,
}

/// Membership record for one peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerState {
    pub actor_id: String,
    pub status: PeerStatus,
    /// Monotone counter; higher generation wins on merge.
    pub generation: u64,
    pub last_seen_ms: u64,
    pub expertise: Vec<String>,
    pub capabilities: Vec<String>,
}

impl PeerState {
    pub fn alive(actor_id: impl Into<String>, generation: u64) -> Self {
        Self {
            actor_id: actor_id.into(),
            status: PeerStatus::Alive,
            generation,
            last_seen_ms: now_ms(),
            expertise: Vec::new(),
            capabilities: Vec::new(),
        }
    }
}

/// Membership transitions observable by the embedding runtime.
#[derive(Debug, Clone)]
pub enum GossipEvent {
    PeerSuspect { actor_id: String },
    PeerDead { actor_id: String },
}

/// Transport used to push the local view to a peer during a gossip round.
#[async_trait]
pub trait GossipTransport: Send + Sync {
    async fn push(&self, peer_id: &str, view: Vec<PeerState>);
}

type Listener = Box<dyn Fn(&GossipEvent) + Send + Sync>;

/// Epidemic peer membership: periodic push of the full local view to a
/// random subset of alive peers, with alive → suspect → dead sweeps.
pub struct GossipProtocol {
    self_id: String,
    cfg: GossipConfig,
    peers: Mutex<HashMap<String, PeerState>>,
    listeners: Mutex<Vec<Listener>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl GossipProtocol {
    pub fn new(self_id: impl Into<String>, cfg: GossipConfig) -> Arc<Self> {
        Arc::new(Self {
            self_id: self_id.into(),
            cfg,
            peers: Mutex::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
            timer: Mutex::new(None),
        })
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    pub fn on(&self, cb: impl Fn(&GossipEvent) + Send + Sync + 'static) {
        self.listeners.lock().unwrap().push(Box::new(cb));
    }

    fn emit(&self, ev: GossipEvent) {
        for cb in self.listeners.lock().unwrap().iter() {
            cb(&ev);
        }
    }

    /// Record direct contact with a peer: bumps its generation and resets
    /// it to alive.
    pub fn observe(&self, peer: PeerState) {
        let mut peers = self.peers.lock().unwrap();
        peers.insert(peer.actor_id.clone(), peer);
    }

    /// Mark a peer as heard-from now, without changing its metadata.
    pub fn touch(&self, actor_id: &str) {
        if let Some(p) = self.peers.lock().unwrap().get_mut(actor_id) {
            p.last_seen_ms = now_ms();
            p.status = PeerStatus::Alive;
            p.generation += 1;
        }
    }

    /// Merge a remote view.  An entry is accepted iff its generation is
    /// strictly greater than the local one; ties keep the local value.
    /// Returns the ids of changed peers.
    pub fn merge(&self, remote_view: Vec<PeerState>) -> Vec<String> {
        let mut changed = Vec::new();
        let mut peers = self.peers.lock().unwrap();
        for remote in remote_view {
            if remote.actor_id == self.self_id {
                continue;
            }
            match peers.get(&remote.actor_id) {
                Some(local) if remote.generation <= local.generation => {}
                _ => {
                    changed.push(remote.actor_id.clone());
                    peers.insert(remote.actor_id.clone(), remote);
                }
            }
        }
        changed
    }

    /// The full local view, self excluded.
    pub fn view(&self) -> Vec<PeerState> {
        self.peers.lock().unwrap().values().cloned().collect()
    }

    pub fn find_alive(&self) -> Vec<PeerState> {
        self.peers
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.status == PeerStatus::Alive)
            .cloned()
            .collect()
    }

    pub fn find_by_expertise(&self, tag: &str) -> Vec<PeerState> {
        self.peers
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.expertise.iter().any(|e| e == tag))
            .cloned()
            .collect()
    }

    /// Run the alive → suspect → dead transitions and emit events for
    /// every change.
    pub fn sweep(&self) {
        let now = now_ms();
        let mut events = Vec::new();
        {
            let mut peers = self.peers.lock().unwrap();
            for p in peers.values_mut() {
                let silence = now.saturating_sub(p.last_seen_ms);
                match p.status {
                    PeerStatus::Alive if silence >= self.cfg.suspect_timeout_ms => {
                        p.status = PeerStatus::Suspect;
                        events.push(GossipEvent::PeerSuspect {
                            actor_id: p.actor_id.clone(),
                        });
                    }
                    PeerStatus::Suspect if silence >= self.cfg.dead_timeout_ms => {
                        p.status = PeerStatus::Dead;
                        events.push(GossipEvent::PeerDead {
                            actor_id: p.actor_id.clone(),
                        });
                    }
                    _ => {}
                }
            }
        }
        for ev in events {
            self.emit(ev);
        }
    }

    /// One gossip round: push the full local view to up to `fanout` alive
    /// peers.  Peer selection rotates by generation sum so repeated rounds
    /// spread across the membership without a PRNG.
    pub async fn gossip(&self, transport: &dyn GossipTransport) {
        let (targets, view) = {
            let peers = self.peers.lock().unwrap();
            let mut alive: Vec<&PeerState> = peers
                .values()
                .filter(|p| p.status == PeerStatus::Alive)
                .collect();
            alive.sort_by_key(|p| p.last_seen_ms);
            let targets: Vec<String> = alive
                .iter()
                .take(self.cfg.fanout)
                .map(|p| p.actor_id.clone())
                .collect();
            (targets, peers.values().cloned().collect::<Vec<_>>())
        };
        debug!(count = targets.len(), "gossip round");
        for t in targets {
            transport.push(&t, view.clone()).await;
        }
    }

    /// Start the periodic gossip + sweep timer.
    pub fn start(self: &Arc<Self>, transport: Arc<dyn GossipTransport>) {
        let this = self.clone();
        let interval = Duration::from_millis(self.cfg.interval_ms);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                this.sweep();
                this.gossip(transport.as_ref()).await;
            }
        });
        let mut timer = self.timer.lock().unwrap();
        if let Some(old) = timer.replace(handle) {
            old.abort();
        }
    }

    pub fn stop(&self) {
        if let Some(handle) = self.timer.lock().unwrap().take() {
            handle.abort();
        }
    }
}

impl Drop for GossipProtocol {
    fn drop(&mut self) {
        if let Some(handle) = self.timer.lock().unwrap().take() {
            handle.abort();
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
