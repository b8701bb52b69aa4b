// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Provider abstraction for the runtime: a uniform event-stream contract,
//! per-provider circuit breaking, error classification, and retry.
//!
//! Providers are opaque stream factories.  The wire protocol behind a
//! provider (HTTP, local socket, in-process mock) is not this crate's
//! concern; consumers only ever see [`StreamEvent`]s.

mod abort;
mod breaker;
mod error;
mod mock;
mod provider;
mod registry;
mod retry;
mod types;

pub use abort::{AbortSignal, AbortSource};
pub use breaker::{BreakerState, CircuitBreaker, BreakerRegistry};
pub use error::{classify, ErrorClass, ErrorType, ProviderError, RawProviderFailure};
pub use mock::{EchoProvider, FailingProvider, ScriptedProvider};
pub use provider::{
    synthetic_done_stream, EventStream, ModelContext, ModelDescriptor, ProviderDefinition,
    ProviderRegistry, StreamProvider, ToolSchema,
};
pub use registry::{
    detect_api_keys, recommended_provider, HostEnvironment, ProviderKind, ProviderMeta, PROVIDERS,
};
pub use retry::{with_retry, RetryOptions, RetryState};
pub use types::{
    ContentPart, CostBreakdown, Message, ModelPricing, Role, StopReason, StreamEvent,
    StreamOptions, ThinkingBudget, ThinkingLevel, Usage,
};

/// 32-bit FNV-1a over normalized text, hex-encoded and zero-padded to 8.
///
/// Used everywhere a deterministic short identifier is derived from content
/// (project hashes, duty ids).  Normalization is trim + lowercase.
pub fn fnv1a_hex(text: &str) -> String {
    const OFFSET: u32 = 0x811c9dc5;
    const PRIME: u32 = 0x01000193;
    let mut hash = OFFSET;
    for b in text.trim().to_lowercase().bytes() {
        hash ^= b as u32;
        hash = hash.wrapping_mul(PRIME);
    }
    format!("{hash:08x}")
}
