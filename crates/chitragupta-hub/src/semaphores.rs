// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::HubError;

struct Waiter {
    id: u64,
    tx: oneshot::Sender<Result<(), HubError>>,
}

struct Semaphore {
    max_permits: usize,
    permits: usize,
    queue: VecDeque<Waiter>,
}

/// Named counting semaphores capped at their configured maximum — excess
/// releases never mint extra permits.
pub struct SemaphoreManager {
    destroyed: Arc<AtomicBool>,
    next_waiter: AtomicU64,
    state: Mutex<HashMap<String, Semaphore>>,
}

impl SemaphoreManager {
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

    pub fn create(&self, name: &str, max_permits: usize) -> Result<(), HubError> {
        self.check_destroyed()?;
        let mut state = self.state.lock().unwrap();
        if state.contains_key(name) {
            return Err(HubError::AlreadyExists(format!("semaphore {name}")));
        }
        state.insert(
            name.to_string(),
            Semaphore {
                max_permits: max_permits.max(1),
                permits: max_permits.max(1),
                queue: VecDeque::new(),
            },
        );
        Ok(())
    }

    /// Take one permit, parking FIFO when none are free.
    pub async fn acquire(&self, name: &str, timeout: Option<Duration>) -> Result<(), HubError> {
        self.check_destroyed()?;
        let (rx, waiter_id) = {
            let mut state = self.state.lock().unwrap();
            let sem = state
                .get_mut(name)
                .ok_or_else(|| HubError::NotFound(format!("semaphore {name}")))?;
            if sem.permits > 0 {
                sem.permits -= 1;
                return Ok(());
            }
            let id = self.next_waiter.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = oneshot::channel();
            sem.queue.push_back(Waiter { id, tx });
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
                    if let Some(sem) = state.get_mut(name) {
                        sem.queue.retain(|w| w.id != waiter_id);
                    }
                    Err(HubError::Timeout(format!("semaphore {name}")))
                }
            },
        }
    }

    /// Return one permit: hand it to the queue head, or increment capped
    /// at `max_permits`.
    pub fn release(&self, name: &str) -> Result<(), HubError> {
        self.check_destroyed()?;
        let mut state = self.state.lock().unwrap();
        let sem = state
            .get_mut(name)
            .ok_or_else(|| HubError::NotFound(format!("semaphore {name}")))?;
        loop {
            match sem.queue.pop_front() {
                Some(waiter) => {
                    // A closed receiver is a waiter that timed out;
                    // hand the permit to the next one instead.
                    if waiter.tx.send(Ok(())).is_ok() {
                        return Ok(());
                    }
                }
                None => {
                    sem.permits = (sem.permits + 1).min(sem.max_permits);
                    return Ok(());
                }
            }
        }
    }

    pub fn available(&self, name: &str) -> Option<usize> {
        self.state.lock().unwrap().get(name).map(|s| s.permits)
    }

    pub fn count(&self) -> usize {
        self.state.lock().unwrap().len()
    }

    pub(crate) fn destroy(&self) {
        let waiters: Vec<Waiter> = {
            let mut state = self.state.lock().unwrap();
            state
                .drain()
                .flat_map(|(_, s)| s.queue.into_iter())
                .collect()
        };
        for w in waiters {
            let _ = w.tx.send(Err(HubError::Destroyed));
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> Arc<SemaphoreManager> {
        Arc::new(SemaphoreManager::new(Arc::new(AtomicBool::new(false))))
    }

    #[tokio::test]
    async fn acquire_up_to_max_then_block() {
        let m = manager();
        m.create("s", 2).unwrap();
        m.acquire("s", None).await.unwrap();
        m.acquire("s", None).await.unwrap();
        assert_eq!(m.available("s"), Some(0));
        let err = m
            .acquire("s", Some(Duration::from_millis(30)))
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::Timeout(_)));
    }

    #[tokio::test]
    async fn release_hands_permit_to_fifo_head() {
        let m = manager();
        m.create("s", 1).unwrap();
        m.acquire("s", None).await.unwrap();
        let m2 = m.clone();
        let waiting = tokio::spawn(async move { m2.acquire("s", None).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        m.release("s").unwrap();
        waiting.await.unwrap().unwrap();
        // Permit went straight to the waiter, not back to the pool.
        assert_eq!(m.available("s"), Some(0));
    }

    #[tokio::test]
    async fn release_never_exceeds_max() {
        let m = manager();
        m.create("s", 2).unwrap();
        m.release("s").unwrap();
        m.release("s").unwrap();
        m.release("s").unwrap();
        assert_eq!(m.available("s"), Some(2));
    }

    #[tokio::test]
    async fn holders_never_exceed_max() {
        let m = manager();
        m.create("s", 3).unwrap();
        let mut acquired = 0;
        for _ in 0..10 {
            if m.acquire("s", Some(Duration::from_millis(5))).await.is_ok() {
                acquired += 1;
            }
        }
        assert_eq!(acquired, 3);
    }

    #[tokio::test]
    async fn unknown_semaphore_is_not_found() {
        let m = manager();
        assert!(matches!(
            m.acquire("ghost", None).await,
            Err(HubError::NotFound(_))
        ));
        assert!(matches!(m.release("ghost"), Err(HubError::NotFound(_))));
    }

    #[tokio::test]
    async fn destroy_rejects_waiters() {
        let destroyed = Arc::new(AtomicBool::new(false));
        let m = Arc::new(SemaphoreManager::new(destroyed.clone()));
        m.create("s", 1).unwrap();
        m.acquire("s", None).await.unwrap();
        let m2 = m.clone();
        let waiting = tokio::spawn(async move { m2.acquire("s", None).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        destroyed.store(true, Ordering::SeqCst);
        m.destroy();
        assert_eq!(waiting.await.unwrap().unwrap_err(), HubError::Destroyed);
    }
}
