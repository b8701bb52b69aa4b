// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::HubError;

type ResultMap = HashMap<String, Value>;

struct Collector {
    expected: usize,
    results: ResultMap,
    errors: HashMap<String, String>,
    waiters: Vec<oneshot::Sender<Result<ResultMap, HubError>>>,
}

impl Collector {
    fn complete(&self) -> bool {
        self.results.len() + self.errors.len() >= self.expected
    }
}

/// Fan-in points for parallel work: N agents submit, one caller awaits the
/// combined result map.  Errors count toward completion but are tracked
/// separately from successes.
pub struct CollectorManager {
    destroyed: Arc<AtomicBool>,
    state: Mutex<HashMap<String, Collector>>,
}

impl CollectorManager {
    pub(crate) fn new(destroyed: Arc<AtomicBool>) -> Self {
        Self {
            destroyed,
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

    pub fn create(&self, id: &str, expected: usize) -> Result<(), HubError> {
        self.check_destroyed()?;
        let mut state = self.state.lock().unwrap();
        if state.contains_key(id) {
            return Err(HubError::AlreadyExists(format!("collector {id}")));
        }
        state.insert(
            id.to_string(),
            Collector {
                expected: expected.max(1),
                results: HashMap::new(),
                errors: HashMap::new(),
                waiters: Vec::new(),
            },
        );
        Ok(())
    }

    pub fn submit_result(&self, id: &str, agent: &str, value: Value) -> Result<(), HubError> {
        self.submit(id, agent, Ok(value))
    }

    pub fn submit_error(&self, id: &str, agent: &str, error: impl Into<String>) -> Result<(), HubError> {
        self.submit(id, agent, Err(error.into()))
    }

    fn submit(
        &self,
        id: &str,
        agent: &str,
        outcome: Result<Value, String>,
    ) -> Result<(), HubError> {
        self.check_destroyed()?;
        let mut state = self.state.lock().unwrap();
        let collector = state
            .get_mut(id)
            .ok_or_else(|| HubError::NotFound(format!("collector {id}")))?;
        match outcome {
            Ok(value) => {
                collector.results.insert(agent.to_string(), value);
            }
            Err(e) => {
                collector.errors.insert(agent.to_string(), e);
            }
        }
        if collector.complete() {
            let results = collector.results.clone();
            for tx in collector.waiters.drain(..) {
                let _ = tx.send(Ok(results.clone()));
            }
        }
        Ok(())
    }

    /// Await completion; resolves with the map of successful results.
    pub async fn wait_for_all(
        &self,
        id: &str,
        timeout: Duration,
    ) -> Result<ResultMap, HubError> {
        self.check_destroyed()?;
        let rx = {
            let mut state = self.state.lock().unwrap();
            let collector = state
                .get_mut(id)
                .ok_or_else(|| HubError::NotFound(format!("collector {id}")))?;
            if collector.complete() {
                return Ok(collector.results.clone());
            }
            let (tx, rx) = oneshot::channel();
            collector.waiters.push(tx);
            rx
        };
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(HubError::Destroyed),
            Err(_) => Err(HubError::Timeout(format!("collector {id}"))),
        }
    }

    /// Errors submitted so far, for callers that care which agents failed.
    pub fn errors(&self, id: &str) -> Option<HashMap<String, String>> {
        self.state.lock().unwrap().get(id).map(|c| c.errors.clone())
    }

    pub fn remove(&self, id: &str) {
        self.state.lock().unwrap().remove(id);
    }

    pub fn count(&self) -> usize {
        self.state.lock().unwrap().len()
    }

    pub(crate) fn destroy(&self) {
        let waiters: Vec<oneshot::Sender<Result<ResultMap, HubError>>> = {
            let mut state = self.state.lock().unwrap();
            state
                .drain()
                .flat_map(|(_, c)| c.waiters.into_iter())
                .collect()
        };
        for tx in waiters {
            let _ = tx.send(Err(HubError::Destroyed));
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn manager() -> Arc<CollectorManager> {
        Arc::new(CollectorManager::new(Arc::new(AtomicBool::new(false))))
    }

    #[tokio::test]
    async fn resolves_when_all_submitted() {
        let m = manager();
        m.create("c", 2).unwrap();
        let m2 = m.clone();
        let waiting =
            tokio::spawn(async move { m2.wait_for_all("c", Duration::from_secs(1)).await });
        m.submit_result("c", "a", json!(1)).unwrap();
        m.submit_result("c", "b", json!(2)).unwrap();
        let results = waiting.await.unwrap().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results["a"], json!(1));
    }

    #[tokio::test]
    async fn errors_count_toward_completion_but_not_results() {
        let m = manager();
        m.create("c", 2).unwrap();
        m.submit_result("c", "a", json!("ok")).unwrap();
        m.submit_error("c", "b", "boom").unwrap();
        let results = m.wait_for_all("c", Duration::from_millis(100)).await.unwrap();
        assert_eq!(results.len(), 1);
        let errors = m.errors("c").unwrap();
        assert_eq!(errors["b"], "boom");
    }

    #[tokio::test]
    async fn wait_after_completion_returns_immediately() {
        let m = manager();
        m.create("c", 1).unwrap();
        m.submit_result("c", "a", json!(null)).unwrap();
        let results = m.wait_for_all("c", Duration::from_millis(10)).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn wait_times_out_when_incomplete() {
        let m = manager();
        m.create("c", 3).unwrap();
        m.submit_result("c", "a", json!(1)).unwrap();
        let err = m
            .wait_for_all("c", Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::Timeout(_)));
    }

    #[tokio::test]
    async fn resubmission_by_same_agent_overwrites() {
        let m = manager();
        m.create("c", 2).unwrap();
        m.submit_result("c", "a", json!(1)).unwrap();
        m.submit_result("c", "a", json!(2)).unwrap();
        // Still only one distinct submitter; not complete.
        let err = m
            .wait_for_all("c", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::Timeout(_)));
    }

    #[tokio::test]
    async fn unknown_collector_is_not_found() {
        let m = manager();
        assert!(matches!(
            m.submit_result("ghost", "a", json!(null)),
            Err(HubError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn destroy_rejects_waiters() {
        let destroyed = Arc::new(AtomicBool::new(false));
        let m = Arc::new(CollectorManager::new(destroyed.clone()));
        m.create("c", 2).unwrap();
        let m2 = m.clone();
        let waiting =
            tokio::spawn(async move { m2.wait_for_all("c", Duration::from_secs(5)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        destroyed.store(true, Ordering::SeqCst);
        m.destroy();
        assert_eq!(waiting.await.unwrap().unwrap_err(), HubError::Destroyed);
    }
}
