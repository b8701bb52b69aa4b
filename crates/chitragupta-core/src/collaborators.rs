// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Optional collaborator contracts.  These subsystems live outside the
//! core; the agent holds trait objects with the minimal surface the loop
//! actually uses, and every method has a no-op default so partial
//! implementations stay cheap.

use serde_json::Value;

/// Tracks agent liveness and terminal outcomes.
pub trait LifecycleObserver: Send + Sync {
    fn register_agent(&self, _agent_id: &str, _purpose: &str) {}
    fn record_heartbeat(&self, _agent_id: &str) {}
    fn mark_completed(&self, _agent_id: &str) {}
    fn mark_error(&self, _agent_id: &str, _error: &str) {}
}

/// A post-execution observation raised by a tool auditor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub severity: String,
    pub message: String,
}

/// Inspects completed tool executions.
pub trait ToolAuditor: Send + Sync {
    fn after_tool_execution(
        &self,
        _name: &str,
        _args: &Value,
        _content: &str,
        _latency_ms: u64,
    ) -> Vec<Finding> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Null;
    impl LifecycleObserver for Null {}
    impl ToolAuditor for Null {}

    #[test]
    fn defaults_are_no_ops() {
        let n = Null;
        n.register_agent("a", "p");
        n.record_heartbeat("a");
        n.mark_completed("a");
        n.mark_error("a", "boom");
        assert!(n
            .after_tool_execution("t", &serde_json::json!({}), "out", 5)
            .is_empty());
    }
}
