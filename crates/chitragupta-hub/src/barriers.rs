// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::HubError;

struct Waiter {
    id: u64,
    tx: oneshot::Sender<Result<(), HubError>>,
}

struct Barrier {
    required: usize,
    arrived: HashSet<String>,
    released: bool,
    waiters: Vec<Waiter>,
}

/// N-party rendezvous points.  No arrival resolves before `required`
/// distinct agents have arrived.
pub struct BarrierManager {
    destroyed: Arc<AtomicBool>,
    next_waiter: AtomicU64,
    state: Mutex<HashMap<String, Barrier>>,
}

impl BarrierManager {
    pub(crate) fn new(destroyed: Arc<AtomicBool>) -> Self {
        Self {
            destroyed,
            next_waiter: AtomicU64::new(1),
            state: Mutex::new(HashMap::new()),
        }
    }

    fn check_destroyed(&self) -> Result<(), HubError> {
        if self.destroyed.load(Ordering::SeqCst) {
            Err(HubError::Destroyed)
        } else {
            Ok(())
        }
    }

    pub fn create(&self, name: &str, required: usize) -> Result<(), HubError> {
        self.check_destroyed()?;
        let mut state = self.state.lock().unwrap();
        if state.contains_key(name) {
            return Err(HubError::AlreadyExists(format!("barrier {name}")));
        }
        state.insert(
            name.to_string(),
            Barrier {
                required: required.max(1),
                arrived: HashSet::new(),
                released: false,
                waiters: Vec::new(),
            },
        );
        Ok(())
    }

    /// Record arrival and block until the barrier releases.  Duplicate
    /// arrivals from the same agent do not advance the count.
    pub async fn arrive(
        &self,
        name: &str,
        agent: &str,
        timeout: Option<Duration>,
    ) -> Result<(), HubError> {
        self.check_destroyed()?;
        let (rx, waiter_id) = {
            let mut state = self.state.lock().unwrap();
            let barrier = state
                .get_mut(name)
                .ok_or_else(|| HubError::NotFound(format!("barrier {name}")))?;
            if barrier.released {
                return Ok(());
            }
            barrier.arrived.insert(agent.to_string());
            if barrier.arrived.len() >= barrier.required {
                barrier.released = true;
                for w in barrier.waiters.drain(..) {
                    let _ = w.tx.send(Ok(()));
                }
                return Ok(());
            }
            let id = self.next_waiter.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = oneshot::channel();
            barrier.waiters.push(Waiter { id, tx });
            (rx, id)
        };

        let wait = async {
            match rx.await {
                Ok(result) => result,
                Err(_) => Err(HubError::Destroyed),
            }
        };
        match timeout {
            None => wait.await,
            Some(t) => match tokio::time::timeout(t, wait).await {
                Ok(result) => result,
                Err(_) => {
                    let mut state = self.state.lock().unwrap();
                    if let Some(b) = state.get_mut(name) {
                        b.waiters.retain(|w| w.id != waiter_id);
                    }
                    Err(HubError::Timeout(format!("barrier {name}")))
                }
            },
        }
    }

    pub fn remove(&self, name: &str) {
        let waiters: Vec<Waiter> = {
            let mut state = self.state.lock().unwrap();
            state
                .remove(name)
                .map(|b| b.waiters)
                .unwrap_or_default()
        };
        for w in waiters {
            let _ = w.tx.send(Err(HubError::NotFound(format!("barrier {name}"))));
        }
    }

    pub fn count(&self) -> usize {
        self.state.lock().unwrap().len()
    }

    pub(crate) fn destroy(&self) {
        let waiters: Vec<Waiter> = {
            let mut state = self.state.lock().unwrap();
            state
                .drain()
                .flat_map(|(_, b)| b.waiters.into_iter())
                .collect()
        };
        for w in waiters {
            let _ = w.tx.send(Err(HubError::Destroyed));
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
