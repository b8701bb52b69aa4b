// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde_json::Value;

/// Outcome of a policy check for one tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl PolicyDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Optional collaborator consulted before every tool execution.
///
/// The engine sees the tool name and the parsed arguments; it never sees
/// execution results.  A deny becomes an error tool result — it does not
/// abort the turn.
pub trait PolicyEngine: Send + Sync {
    fn check(&self, name: &str, args: &Value) -> PolicyDecision;
}

/// Null policy: everything is allowed.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAllPolicy;

impl PolicyEngine for AllowAllPolicy {
    fn check(&self, _name: &str, _args: &Value) -> PolicyDecision {
        PolicyDecision::allow()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
