// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chitragupta_config::BreakerConfig;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    half_open_successes: u32,
    opened_at: Option<Instant>,
}

/// Per-provider failure trip.  `allow_request` never blocks; it both
/// queries the state and performs the open → half-open transition once the
/// cooldown has elapsed.
#[derive(Debug)]
pub struct CircuitBreaker {
    cfg: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(cfg: BreakerConfig) -> Self {
        Self {
            cfg,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                opened_at: None,
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().unwrap().state
    }

    /// Whether a call may proceed right now.
    pub fn allow_request(&self) -> bool {
        let mut g = self.inner.lock().unwrap();
        match g.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = g
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= Duration::from_millis(self.cfg.cooldown_ms) {
                    g.state = BreakerState::HalfOpen;
                    g.half_open_successes = 0;
                    debug!("circuit breaker probing half-open");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut g = self.inner.lock().unwrap();
        match g.state {
            BreakerState::Closed => {
                g.consecutive_failures = 0;
            }
            BreakerState::HalfOpen => {
                g.half_open_successes += 1;
                if g.half_open_successes >= self.cfg.success_threshold {
                    g.state = BreakerState::Closed;
                    g.consecutive_failures = 0;
                    g.opened_at = None;
                    debug!("circuit breaker closed");
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut g = self.inner.lock().unwrap();
        match g.state {
            BreakerState::Closed => {
                g.consecutive_failures += 1;
                if g.consecutive_failures >= self.cfg.failure_threshold {
                    g.state = BreakerState::Open;
                    g.opened_at = Some(Instant::now());
                    debug!(
                        failures = g.consecutive_failures,
                        "circuit breaker opened"
                    );
                }
            }
            BreakerState::HalfOpen => {
                g.state = BreakerState::Open;
                g.opened_at = Some(Instant::now());
                g.half_open_successes = 0;
                debug!("half-open probe failed; breaker re-opened");
            }
            BreakerState::Open => {}
        }
    }

    #[cfg(test)]
    fn force_open_elapsed(&self) {
        // Backdate opened_at so the next allow_request sees an expired
        // cooldown without sleeping in tests.
        let mut g = self.inner.lock().unwrap();
        g.opened_at = Some(Instant::now() - Duration::from_millis(self.cfg.cooldown_ms + 1));
    }
}

/// One breaker per provider id.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    cfg: BreakerConfig,
    breakers: Mutex<HashMap<String, std::sync::Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(cfg: BreakerConfig) -> Self {
        Self {
            cfg,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn for_provider(&self, provider: &str) -> std::sync::Arc<CircuitBreaker> {
        let mut g = self.breakers.lock().unwrap();
        g.entry(provider.to_string())
            .or_insert_with(|| std::sync::Arc::new(CircuitBreaker::new(self.cfg.clone())))
            .clone()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig::default())
    }

    #[test]
    fn starts_closed_and_allows() {
        let b = breaker();
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(b.allow_request());
    }

    #[test]
    fn opens_after_failure_threshold() {
        let b = breaker();
        for _ in 0..5 {
            b.record_failure();
        }
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.allow_request());
    }

    #[test]
    fn success_in_closed_resets_failure_count() {
        let b = breaker();
        for _ in 0..4 {
            b.record_failure();
        }
        b.record_success();
        for _ in 0..4 {
            b.record_failure();
        }
        // 4 + reset + 4 never reaches the threshold of 5.
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn open_transitions_half_open_after_cooldown() {
        let b = breaker();
        for _ in 0..5 {
            b.record_failure();
        }
        assert!(!b.allow_request());
        b.force_open_elapsed();
        assert!(b.allow_request());
        assert_eq!(b.state(), BreakerState::HalfOpen);
    }

    #[test]
    fn half_open_closes_after_success_threshold() {
        let b = breaker();
        for _ in 0..5 {
            b.record_failure();
        }
        b.force_open_elapsed();
        assert!(b.allow_request());
        b.record_success();
        assert_eq!(b.state(), BreakerState::HalfOpen);
        b.record_success();
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let b = breaker();
        for _ in 0..5 {
            b.record_failure();
        }
        b.force_open_elapsed();
        assert!(b.allow_request());
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.allow_request());
    }

    #[test]
    fn registry_returns_same_breaker_per_provider() {
        let reg = BreakerRegistry::new(BreakerConfig::default());
        let a = reg.for_provider("p1");
        let b = reg.for_provider("p1");
        let c = reg.for_provider("p2");
        a.record_failure();
        assert!(std::sync::Arc::ptr_eq(&a, &b));
        assert!(!std::sync::Arc::ptr_eq(&a, &c));
    }
}
