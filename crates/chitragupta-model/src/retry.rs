// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use chitragupta_config::RetryConfig;
use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{ErrorClass, ProviderError};

/// Options for one `with_retry` call.
#[derive(Debug, Clone)]
pub struct RetryOptions {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub unknown_escalation_threshold: u32,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryOptions {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            base_delay_ms: cfg.base_delay_ms,
            max_delay_ms: cfg.max_delay_ms,
            unknown_escalation_threshold: cfg.unknown_escalation_threshold,
        }
    }
}

/// Tracks how often an unknown error message prefix has been seen, so that
/// a repeating unknown failure eventually escalates to fatal instead of
/// being retried forever.
#[derive(Debug, Default)]
pub struct RetryState {
    unknown_counts: HashMap<String, u32>,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one occurrence and return the running count.
    fn record_unknown(&mut self, message: &str) -> u32 {
        let prefix: String = message.chars().take(80).collect();
        let count = self.unknown_counts.entry(prefix).or_insert(0);
        *count += 1;
        *count
    }
}

/// `delay(i) = min(base * 2^i + random(0, base), max)`.
fn backoff_delay(opts: &RetryOptions, attempt: u32) -> Duration {
    let base = opts.base_delay_ms as f64;
    let exp = base * 2f64.powi(attempt as i32);
    let jitter = rand::thread_rng().gen_range(0.0..base.max(1.0));
    let ms = (exp + jitter).min(opts.max_delay_ms as f64);
    Duration::from_millis(ms as u64)
}

/// Run `op` with exponential backoff.
///
/// Fatal errors rethrow immediately.  Unknown errors retry like transient
/// ones, but a message prefix seen `unknown_escalation_threshold` times
/// escalates to fatal.  Transient errors honour `retry_after_ms` when the
/// provider supplied one, otherwise the computed backoff.
pub async fn with_retry<F, Fut, T>(
    opts: &RetryOptions,
    state: &mut RetryState,
    mut op: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                let class = match ErrorClass::from(&e) {
                    ErrorClass::Fatal => {
                        return Err(e);
                    }
                    ErrorClass::Unknown => {
                        let seen = state.record_unknown(&e.message);
                        if seen >= opts.unknown_escalation_threshold {
                            warn!(
                                provider = %e.provider,
                                occurrences = seen,
                                "repeating unknown error escalated to fatal"
                            );
                            return Err(e);
                        }
                        ErrorClass::Transient
                    }
                    c => c,
                };
                debug_assert_eq!(class, ErrorClass::Transient);

                if attempt >= opts.max_retries {
                    return Err(e);
                }
                let delay = e
                    .retry_after_ms
                    .map(Duration::from_millis)
                    .unwrap_or_else(|| backoff_delay(opts, attempt));
                debug!(
                    provider = %e.provider,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    kind = e.error_type.as_str(),
                    "retrying after transient provider error"
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::error::ErrorType;

    fn fast_opts() -> RetryOptions {
        RetryOptions {
            max_retries: 3,
            base_delay_ms: 1,
            max_delay_ms: 5,
            unknown_escalation_threshold: 3,
        }
    }

    fn transient(provider: &str) -> ProviderError {
        ProviderError::new(provider, ErrorType::Timeout, "timeout")
    }

    fn fatal(provider: &str) -> ProviderError {
        ProviderError::new(provider, ErrorType::Auth, "bad key")
    }

    fn unknown(provider: &str, msg: &str) -> ProviderError {
        ProviderError::new(provider, ErrorType::Unknown, msg)
    }

    #[tokio::test]
    async fn succeeds_first_try() {
        let mut state = RetryState::new();
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let out = with_retry(&fast_opts(), &mut state, move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ProviderError>(42)
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let mut state = RetryState::new();
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let out = with_retry(&fast_opts(), &mut state, move || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(transient("p"))
                } else {
                    Ok(7)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_rethrows_without_retry() {
        let mut state = RetryState::new();
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let err = with_retry(&fast_opts(), &mut state, move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<u32, _>(fatal("p"))
            }
        })
        .await
        .unwrap_err();
        assert_eq!(err.error_type, ErrorType::Auth);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_exhausts_max_retries() {
        let mut state = RetryState::new();
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let err = with_retry(&fast_opts(), &mut state, move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<u32, _>(transient("p"))
            }
        })
        .await
        .unwrap_err();
        assert_eq!(err.error_type, ErrorType::Timeout);
        // initial + 3 retries
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn repeating_unknown_escalates_to_fatal() {
        let mut state = RetryState::new();
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let opts = RetryOptions {
            max_retries: 10,
            ..fast_opts()
        };
        let err = with_retry(&opts, &mut state, move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<u32, _>(unknown("p", "mystery failure"))
            }
        })
        .await
        .unwrap_err();
        assert_eq!(err.error_type, ErrorType::Unknown);
        // Third occurrence of the same prefix trips the escalation.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unknown_counter_persists_across_calls() {
        let mut state = RetryState::new();
        let opts = RetryOptions {
            max_retries: 0,
            ..fast_opts()
        };
        for _ in 0..2 {
            let _ = with_retry(&opts, &mut state, || async {
                Err::<u32, _>(unknown("p", "same message"))
            })
            .await;
        }
        // Two prior occurrences recorded; the third attempt escalates
        // before any retry bookkeeping.
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let opts2 = RetryOptions {
            max_retries: 10,
            ..fast_opts()
        };
        let _ = with_retry(&opts2, &mut state, move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<u32, _>(unknown("p", "same message"))
            }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_is_bounded_by_max() {
        let opts = RetryOptions {
            max_retries: 10,
            base_delay_ms: 200,
            max_delay_ms: 8_000,
            unknown_escalation_threshold: 3,
        };
        for attempt in 0..12 {
            let d = backoff_delay(&opts, attempt);
            assert!(d <= Duration::from_millis(8_000));
        }
    }

    #[test]
    fn backoff_grows_with_attempt() {
        let opts = RetryOptions {
            max_retries: 10,
            base_delay_ms: 200,
            max_delay_ms: 1_000_000,
            unknown_escalation_threshold: 3,
        };
        // attempt 4 floor (3200ms) exceeds attempt 0 ceiling (400ms).
        let early = backoff_delay(&opts, 0);
        let late = backoff_delay(&opts, 4);
        assert!(late > early);
    }
}
