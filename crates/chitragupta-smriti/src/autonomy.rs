// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use tracing::{debug, warn};

use chitragupta_config::AutonomyConfig;
use chitragupta_model::{ContentPart, Message};

/// What `recover_context` did to the message sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Sequence was valid; untouched.
    Intact,
    /// Restored to the longest valid prefix of the given length.
    Truncated(usize),
    /// Restored from the last-known-good snapshot.
    Snapshot,
    /// Nothing salvageable; starting fresh.
    Fresh,
}

/// One turn's health sample.
#[derive(Debug, Clone, Copy)]
pub struct TurnMetrics {
    pub latency_ms: u64,
    pub is_error: bool,
    /// Context window utilization in [0, 1].
    pub context_utilization: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HealthWarning {
    ErrorRate { rate: f64 },
    Latency { average_ms: u64 },
    ContextUtilization { utilization: f64 },
}

#[derive(Default)]
struct AutonomyState {
    consecutive_tool_failures: HashMap<String, u32>,
    disabled_tools: HashSet<String>,
    metrics: VecDeque<TurnMetrics>,
    snapshot: Option<Vec<Message>>,
}

/// Keeps a runtime healthy: context corruption recovery, tool
/// auto-disable after repeated failures, and health thresholds over a
/// sliding window of turn metrics.
pub struct AutonomyManager {
    cfg: AutonomyConfig,
    state: Mutex<AutonomyState>,
}

impl AutonomyManager {
    pub fn new(cfg: AutonomyConfig) -> Self {
        Self {
            cfg,
            state: Mutex::new(AutonomyState::default()),
        }
    }

    // ── Context validity ──────────────────────────────────────────────────────

    /// A sequence is valid iff every message has an id, a non-empty part
    /// list, and a monotone positive timestamp, and every tool result
    /// references a tool call from an earlier message.
    pub fn is_valid_sequence(messages: &[Message]) -> bool {
        Self::valid_prefix_len(messages) == messages.len()
    }

    fn valid_prefix_len(messages: &[Message]) -> usize {
        let mut seen_call_ids: HashSet<&str> = HashSet::new();
        let mut last_ts: Option<chrono::DateTime<chrono::Utc>> = None;
        for (i, m) in messages.iter().enumerate() {
            if m.id.is_empty() || m.parts.is_empty() {
                return i;
            }
            if m.timestamp.timestamp_millis() <= 0 {
                return i;
            }
            if let Some(prev) = last_ts {
                if m.timestamp < prev {
                    return i;
                }
            }
            for part in &m.parts {
                if let ContentPart::ToolResult { tool_call_id, .. } = part {
                    if !seen_call_ids.contains(tool_call_id.as_str()) {
                        return i;
                    }
                }
            }
            for part in &m.parts {
                if let ContentPart::ToolCall { id, .. } = part {
                    seen_call_ids.insert(id);
                }
            }
            last_ts = Some(m.timestamp);
        }
        messages.len()
    }

    /// Remember a known-good state for snapshot recovery.
    pub fn remember_good(&self, messages: &[Message]) {
        if Self::is_valid_sequence(messages) {
            self.state.lock().unwrap().snapshot = Some(messages.to_vec());
        }
    }

    /// Repair a possibly corrupted message sequence.
    ///
    /// Valid → untouched.  A non-empty valid prefix → truncate to it.
    /// Otherwise restore the last snapshot, or start fresh.
    pub fn recover_context(&self, messages: Vec<Message>) -> (Vec<Message>, RecoveryAction) {
        let prefix = Self::valid_prefix_len(&messages);
        if prefix == messages.len() {
            return (messages, RecoveryAction::Intact);
        }
        if prefix > 0 {
            warn!(
                kept = prefix,
                dropped = messages.len() - prefix,
                "context corrupted; truncating to valid prefix"
            );
            let mut messages = messages;
            messages.truncate(prefix);
            return (messages, RecoveryAction::Truncated(prefix));
        }
        let snapshot = self.state.lock().unwrap().snapshot.clone();
        match snapshot {
            Some(snap) => {
                warn!("context unusable; restoring last-known-good snapshot");
                (snap, RecoveryAction::Snapshot)
            }
            None => {
                warn!("context unusable and no snapshot held; starting fresh");
                (Vec::new(), RecoveryAction::Fresh)
            }
        }
    }

    // ── Tool auto-disable ─────────────────────────────────────────────────────

    /// Record one tool outcome.  Returns true when this failure crossed
    /// the disable threshold.
    pub fn record_tool_result(&self, tool: &str, success: bool) -> bool {
        let mut state = self.state.lock().unwrap();
        if success {
            state.consecutive_tool_failures.remove(tool);
            return false;
        }
        let count = {
            let count = state
                .consecutive_tool_failures
                .entry(tool.to_string())
                .or_insert(0);
            *count += 1;
            *count
        };
        if count >= self.cfg.tool_disable_threshold && state.disabled_tools.insert(tool.to_string())
        {
            warn!(tool, failures = count, "tool auto-disabled");
            return true;
        }
        false
    }

    pub fn is_tool_disabled(&self, tool: &str) -> bool {
        self.state.lock().unwrap().disabled_tools.contains(tool)
    }

    /// Manual or policy-driven re-enable.
    pub fn reset_tool(&self, tool: &str) {
        let mut state = self.state.lock().unwrap();
        state.disabled_tools.remove(tool);
        state.consecutive_tool_failures.remove(tool);
        debug!(tool, "tool re-enabled");
    }

    pub fn disabled_tools(&self) -> Vec<String> {
        let mut tools: Vec<String> = self
            .state
            .lock()
            .unwrap()
            .disabled_tools
            .iter()
            .cloned()
            .collect();
        tools.sort();
        tools
    }

    // ── Health thresholds ─────────────────────────────────────────────────────

    pub fn record_turn(&self, metrics: TurnMetrics) {
        let mut state = self.state.lock().unwrap();
        state.metrics.push_back(metrics);
        while state.metrics.len() > self.cfg.metrics_window {
            state.metrics.pop_front();
        }
    }

    /// Warnings over the current window.
    pub fn health_warnings(&self) -> Vec<HealthWarning> {
        let state = self.state.lock().unwrap();
        if state.metrics.is_empty() {
            return Vec::new();
        }
        let n = state.metrics.len() as f64;
        let mut warnings = Vec::new();

        let error_rate = state.metrics.iter().filter(|m| m.is_error).count() as f64 / n;
        if error_rate >= self.cfg.error_rate_warning_threshold {
            warnings.push(HealthWarning::ErrorRate { rate: error_rate });
        }

        let average_ms =
            (state.metrics.iter().map(|m| m.latency_ms).sum::<u64>() as f64 / n) as u64;
        if average_ms >= self.cfg.latency_warning_ms {
            warnings.push(HealthWarning::Latency { average_ms });
        }

        let utilization = state
            .metrics
            .iter()
            .map(|m| m.context_utilization)
            .fold(0.0, f64::max);
        if utilization >= self.cfg.context_utilization_warning {
            warnings.push(HealthWarning::ContextUtilization { utilization });
        }
        warnings
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use chitragupta_model::Role;

    use super::*;

    fn manager() -> AutonomyManager {
        AutonomyManager::new(AutonomyConfig::default())
    }

    fn user(text: &str) -> Message {
        Message::user("a", text)
    }

    fn assistant_with_call(call_id: &str) -> Message {
        Message::new(
            Role::Assistant,
            "a",
            vec![ContentPart::tool_call(call_id, "shell", "{}")],
        )
    }

    fn tool_result(call_id: &str) -> Message {
        Message::tool_result("a", call_id, "ok", false)
    }

    #[test]
    fn valid_sequence_is_intact() {
        let m = manager();
        let msgs = vec![user("hi"), assistant_with_call("c1"), tool_result("c1")];
        let (out, action) = m.recover_context(msgs.clone());
        assert_eq!(action, RecoveryAction::Intact);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn orphan_tool_result_truncates_to_prefix() {
        let m = manager();
        let msgs = vec![user("hi"), tool_result("never-issued")];
        let (out, action) = m.recover_context(msgs);
        assert_eq!(action, RecoveryAction::Truncated(1));
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn non_monotone_timestamps_truncate() {
        let m = manager();
        let first = user("a");
        let mut second = user("b");
        second.timestamp = first.timestamp - chrono::Duration::seconds(10);
        let (out, action) = m.recover_context(vec![first, second]);
        assert_eq!(action, RecoveryAction::Truncated(1));
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn empty_parts_invalidate_message() {
        let m = manager();
        let mut bad = user("x");
        bad.parts.clear();
        let (_, action) = m.recover_context(vec![bad]);
        assert_eq!(action, RecoveryAction::Fresh);
    }

    #[test]
    fn unusable_context_restores_snapshot() {
        let m = manager();
        let good = vec![user("known good")];
        m.remember_good(&good);
        let mut bad = user("x");
        bad.id.clear();
        let (out, action) = m.recover_context(vec![bad]);
        assert_eq!(action, RecoveryAction::Snapshot);
        assert_eq!(out[0].text(), "known good");
    }

    #[test]
    fn unusable_context_without_snapshot_starts_fresh() {
        let m = manager();
        let mut bad = user("x");
        bad.id.clear();
        let (out, action) = m.recover_context(vec![bad]);
        assert_eq!(action, RecoveryAction::Fresh);
        assert!(out.is_empty());
    }

    #[test]
    fn tool_disables_after_three_consecutive_failures() {
        let m = manager();
        assert!(!m.record_tool_result("shell", false));
        assert!(!m.record_tool_result("shell", false));
        assert!(m.record_tool_result("shell", false));
        assert!(m.is_tool_disabled("shell"));
    }

    #[test]
    fn success_resets_failure_streak() {
        let m = manager();
        m.record_tool_result("shell", false);
        m.record_tool_result("shell", false);
        m.record_tool_result("shell", true);
        m.record_tool_result("shell", false);
        m.record_tool_result("shell", false);
        assert!(!m.is_tool_disabled("shell"));
    }

    #[test]
    fn reset_reenables_tool() {
        let m = manager();
        for _ in 0..3 {
            m.record_tool_result("shell", false);
        }
        assert!(m.is_tool_disabled("shell"));
        m.reset_tool("shell");
        assert!(!m.is_tool_disabled("shell"));
        assert!(m.disabled_tools().is_empty());
    }

    #[test]
    fn failure_streaks_are_per_tool() {
        let m = manager();
        m.record_tool_result("a", false);
        m.record_tool_result("a", false);
        m.record_tool_result("b", false);
        assert!(!m.is_tool_disabled("a"));
        assert!(!m.is_tool_disabled("b"));
    }

    #[test]
    fn health_warnings_fire_on_thresholds() {
        let m = manager();
        for _ in 0..10 {
            m.record_turn(TurnMetrics {
                latency_ms: 60_000,
                is_error: true,
                context_utilization: 0.95,
            });
        }
        let warnings = m.health_warnings();
        assert!(warnings
            .iter()
            .any(|w| matches!(w, HealthWarning::ErrorRate { .. })));
        assert!(warnings
            .iter()
            .any(|w| matches!(w, HealthWarning::Latency { .. })));
        assert!(warnings
            .iter()
            .any(|w| matches!(w, HealthWarning::ContextUtilization { .. })));
    }

    #[test]
    fn healthy_window_has_no_warnings() {
        let m = manager();
        for _ in 0..10 {
            m.record_turn(TurnMetrics {
                latency_ms: 800,
                is_error: false,
                context_utilization: 0.2,
            });
        }
        assert!(m.health_warnings().is_empty());
    }

    #[test]
    fn metrics_window_is_bounded() {
        let m = AutonomyManager::new(AutonomyConfig {
            metrics_window: 5,
            ..Default::default()
        });
        // 5 errors pushed out by 5 clean turns: rate drops back to zero.
        for _ in 0..5 {
            m.record_turn(TurnMetrics {
                latency_ms: 10,
                is_error: true,
                context_utilization: 0.1,
            });
        }
        for _ in 0..5 {
            m.record_turn(TurnMetrics {
                latency_ms: 10,
                is_error: false,
                context_utilization: 0.1,
            });
        }
        assert!(m.health_warnings().is_empty());
    }
}
