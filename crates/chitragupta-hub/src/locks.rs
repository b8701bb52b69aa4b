// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;

use crate::error::HubError;
use crate::now_ms;

/// Snapshot of a held lock, returned by acquire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockGrant {
    pub resource: String,
    pub holder: String,
    pub acquired_at_ms: u64,
}

struct Waiter {
    id: u64,
    agent: String,
    tx: oneshot::Sender<Result<LockGrant, HubError>>,
}

struct LockRecord {
    holder: String,
    acquired_at_ms: u64,
    queue: VecDeque<Waiter>,
}

/// Exclusive per-resource locks with FIFO hand-off.
pub struct LockManager {
    destroyed: Arc<AtomicBool>,
    next_waiter: AtomicU64,
    state: Mutex<HashMap<String, LockRecord>>,
}

impl LockManager {
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

    /// Acquire `resource` for `agent`.
    ///
    /// Re-entrant: the current holder gets its existing grant back.  Other
    /// agents park in a FIFO queue; the timeout removes the waiter and
    /// rejects.
    pub async fn acquire(
        &self,
        resource: &str,
        agent: &str,
        timeout: Option<Duration>,
    ) -> Result<LockGrant, HubError> {
        self.check_destroyed()?;
        let (rx, waiter_id) = {
            let mut state = self.state.lock().unwrap();
            match state.entry(resource.to_string()) {
                std::collections::hash_map::Entry::Vacant(vacant) => {
                    let now = now_ms();
                    vacant.insert(LockRecord {
                        holder: agent.to_string(),
                        acquired_at_ms: now,
                        queue: VecDeque::new(),
                    });
                    return Ok(LockGrant {
                        resource: resource.to_string(),
                        holder: agent.to_string(),
                        acquired_at_ms: now,
                    });
                }
                std::collections::hash_map::Entry::Occupied(mut occupied) => {
                    let rec = occupied.get_mut();
                    if rec.holder == agent {
                        return Ok(LockGrant {
                            resource: resource.to_string(),
                            holder: agent.to_string(),
                            acquired_at_ms: rec.acquired_at_ms,
                        });
                    }
                    let id = self.next_waiter.fetch_add(1, Ordering::SeqCst);
                    let (tx, rx) = oneshot::channel();
                    rec.queue.push_back(Waiter {
                        id,
                        agent: agent.to_string(),
                        tx,
                    });
                    (rx, id)
                }
            }
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
                    self.remove_waiter(resource, waiter_id);
                    Err(HubError::Timeout(format!("lock {resource}")))
                }
            },
        }
    }

    fn remove_waiter(&self, resource: &str, waiter_id: u64) {
        let mut state = self.state.lock().unwrap();
        if let Some(rec) = state.get_mut(resource) {
            rec.queue.retain(|w| w.id != waiter_id);
        }
    }

    /// Release `resource`.  Fails unless `holder` actually holds it.
    pub fn release(&self, resource: &str, holder: &str) -> Result<(), HubError> {
        self.check_destroyed()?;
        let mut state = self.state.lock().unwrap();
        let rec = state.get_mut(resource).ok_or_else(|| HubError::LockNotHeld {
            resource: resource.to_string(),
            agent: holder.to_string(),
        })?;
        if rec.holder != holder {
            return Err(HubError::LockNotHeld {
                resource: resource.to_string(),
                agent: holder.to_string(),
            });
        }
        Self::promote_or_remove(&mut state, resource);
        Ok(())
    }

    /// Promote the next waiter or delete the lock, regardless of holder.
    pub fn force_release(&self, resource: &str) {
        let mut state = self.state.lock().unwrap();
        if state.contains_key(resource) {
            Self::promote_or_remove(&mut state, resource);
        }
    }

    fn promote_or_remove(state: &mut HashMap<String, LockRecord>, resource: &str) {
        let Some(rec) = state.get_mut(resource) else {
            return;
        };
        loop {
            match rec.queue.pop_front() {
                Some(waiter) => {
                    let now = now_ms();
                    rec.holder = waiter.agent.clone();
                    rec.acquired_at_ms = now;
                    let grant = LockGrant {
                        resource: resource.to_string(),
                        holder: waiter.agent,
                        acquired_at_ms: now,
                    };
                    // A closed receiver means the waiter timed out between
                    // our pop and its removal; hand the lock to the next.
                    if waiter.tx.send(Ok(grant)).is_ok() {
                        return;
                    }
                }
                None => {
                    state.remove(resource);
                    return;
                }
            }
        }
    }

    /// Force-release every lock held for at least `max_hold`.  Returns the
    /// affected resources.
    pub fn cleanup(&self, max_hold: Duration) -> Vec<String> {
        let cutoff = now_ms().saturating_sub(max_hold.as_millis() as u64);
        let expired: Vec<String> = {
            let state = self.state.lock().unwrap();
            state
                .iter()
                .filter(|(_, rec)| rec.acquired_at_ms <= cutoff)
                .map(|(res, _)| res.clone())
                .collect()
        };
        for res in &expired {
            debug!(resource = %res, "force-releasing expired lock");
            self.force_release(res);
        }
        expired
    }

    pub fn holder_of(&self, resource: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .get(resource)
            .map(|r| r.holder.clone())
    }

    pub fn count(&self) -> usize {
        self.state.lock().unwrap().len()
    }

    /// Reject every parked waiter.  Called from the hub's destroy path.
    pub(crate) fn destroy(&self) {
        let waiters: Vec<Waiter> = {
            let mut state = self.state.lock().unwrap();
            state
                .drain()
                .flat_map(|(_, rec)| rec.queue.into_iter())
                .collect()
        };
        for w in waiters {
            let _ = w.tx.send(Err(HubError::Destroyed));
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
