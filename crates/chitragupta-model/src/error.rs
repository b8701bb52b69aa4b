// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of provider-side error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    RateLimit,
    Auth,
    ContextLength,
    ContentFilter,
    Network,
    Timeout,
    ServerError,
    Overloaded,
    Unknown,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::RateLimit => "rate_limit",
            ErrorType::Auth => "auth",
            ErrorType::ContextLength => "context_length",
            ErrorType::ContentFilter => "content_filter",
            ErrorType::Network => "network",
            ErrorType::Timeout => "timeout",
            ErrorType::ServerError => "server_error",
            ErrorType::Overloaded => "overloaded",
            ErrorType::Unknown => "unknown",
        }
    }
}

/// A classified provider failure.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{provider}: {error_type:?}: {message}")]
pub struct ProviderError {
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub error_type: ErrorType,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    pub message: String,
}

impl ProviderError {
    pub fn new(provider: impl Into<String>, error_type: ErrorType, message: impl Into<String>) -> Self {
        let retryable = matches!(
            error_type,
            ErrorType::RateLimit
                | ErrorType::Network
                | ErrorType::Timeout
                | ErrorType::ServerError
                | ErrorType::Overloaded
        );
        Self {
            provider: provider.into(),
            status_code: None,
            error_type,
            retryable,
            retry_after_ms: None,
            message: message.into(),
        }
    }

    /// Human-readable failure with a remediation hint.
    pub fn user_message(&self) -> String {
        match self.error_type {
            ErrorType::Auth => format!(
                "Authentication failed for {} — check API key",
                self.provider
            ),
            ErrorType::RateLimit => format!(
                "Rate limited by {} — retry later or lower concurrency",
                self.provider
            ),
            ErrorType::ContextLength => format!(
                "Context window exceeded on {} — compact the session",
                self.provider
            ),
            ErrorType::ContentFilter => {
                format!("Request blocked by {}'s content filter", self.provider)
            }
            ErrorType::Overloaded => {
                format!("{} is overloaded — escalate or retry later", self.provider)
            }
            _ => format!("{}: {}", self.provider, self.message),
        }
    }
}

/// Raw failure as reported by a provider adapter, before classification.
#[derive(Debug, Clone, Default)]
pub struct RawProviderFailure {
    pub status: Option<u16>,
    pub message: String,
}

impl RawProviderFailure {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Retry decision derived from a classified error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Fatal,
    Unknown,
}

impl From<&ProviderError> for ErrorClass {
    fn from(e: &ProviderError) -> Self {
        match e.error_type {
            ErrorType::Unknown => ErrorClass::Unknown,
            _ if e.retryable => ErrorClass::Transient,
            _ => ErrorClass::Fatal,
        }
    }
}

const NETWORK_MARKERS: &[&str] = &[
    "ECONNREFUSED",
    "ECONNRESET",
    "ETIMEDOUT",
    "ENOTFOUND",
    "socket hang up",
    "EPIPE",
    "network",
    "fetch failed",
];

/// Classify a raw failure into a [`ProviderError`].
///
/// Rule order: status codes first, then message substrings, then unknown.
pub fn classify(provider: &str, raw: &RawProviderFailure) -> ProviderError {
    let msg_lower = raw.message.to_lowercase();

    let error_type = match raw.status {
        Some(401) | Some(403) => ErrorType::Auth,
        Some(400) if msg_lower.contains("context length exceeded") => ErrorType::ContextLength,
        Some(400) if msg_lower.contains("filter") => ErrorType::ContentFilter,
        Some(429) => ErrorType::RateLimit,
        Some(529) => ErrorType::Overloaded,
        Some(s) if (500..600).contains(&s) => ErrorType::ServerError,
        Some(_) => ErrorType::Unknown,
        None => {
            if NETWORK_MARKERS
                .iter()
                .any(|m| raw.message.contains(m) || msg_lower.contains(&m.to_lowercase()))
            {
                ErrorType::Network
            } else if msg_lower.contains("timeout") {
                ErrorType::Timeout
            } else if msg_lower.contains("rate limit") || msg_lower.contains("too many requests") {
                ErrorType::RateLimit
            } else {
                ErrorType::Unknown
            }
        }
    };

    let mut err = ProviderError::new(provider, error_type, raw.message.clone());
    err.status_code = raw.status;
    err.retry_after_ms = extract_retry_after(&msg_lower);
    err
}

/// `retry-after: N` anywhere in the message parses to `N * 1000` ms.
fn extract_retry_after(msg_lower: &str) -> Option<u64> {
    let idx = msg_lower.find("retry-after:")?;
    let rest = msg_lower[idx + "retry-after:".len()..].trim_start();
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    let secs: u64 = digits.parse().ok()?;
    Some(secs * 1000)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
