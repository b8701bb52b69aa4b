// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::abort::AbortSignal;
use crate::error::ProviderError;

// ─── Content part types ───────────────────────────────────────────────────────

/// A single content part in a multi-part message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    /// Reasoning trace emitted by models with extended thinking.
    Thinking {
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        /// Complete JSON-encoded argument object.  Parsing is the
        /// consumer's responsibility.
        arguments: String,
    },
    ToolResult {
        tool_call_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
    Image {
        base64: String,
        media_type: String,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn thinking(text: impl Into<String>) -> Self {
        Self::Thinking { text: text.into() }
    }

    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self::ToolCall {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self::ToolResult {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    ToolResult,
}

/// A single message in an agent's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub timestamp: DateTime<Utc>,
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<CostBreakdown>,
    pub parts: Vec<ContentPart>,
}

impl Message {
    pub fn new(role: Role, agent_id: impl Into<String>, parts: Vec<ContentPart>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            timestamp: Utc::now(),
            agent_id: agent_id.into(),
            model: None,
            cost: None,
            parts,
        }
    }

    pub fn user(agent_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(Role::User, agent_id, vec![ContentPart::text(text)])
    }

    pub fn assistant(agent_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, agent_id, vec![ContentPart::text(text)])
    }

    pub fn system(agent_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(Role::System, agent_id, vec![ContentPart::text(text)])
    }

    pub fn tool_result(
        agent_id: impl Into<String>,
        tool_call_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self::new(
            Role::ToolResult,
            agent_id,
            vec![ContentPart::tool_result(tool_call_id, content, is_error)],
        )
    }

    /// The concatenated text parts of this message.  Thinking, tool calls
    /// and images are omitted.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Tool calls carried by this message, in declaration order.
    pub fn tool_calls(&self) -> Vec<(&str, &str, &str)> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolCall {
                    id,
                    name,
                    arguments,
                } => Some((id.as_str(), name.as_str(), arguments.as_str())),
                _ => None,
            })
            .collect()
    }

    /// Approximate token count (4 chars per token heuristic, images at a
    /// flat vision estimate).
    pub fn approx_tokens(&self) -> usize {
        let chars: usize = self
            .parts
            .iter()
            .map(|p| match p {
                ContentPart::Text { text } | ContentPart::Thinking { text } => text.len(),
                ContentPart::ToolCall {
                    name, arguments, ..
                } => name.len() + arguments.len(),
                ContentPart::ToolResult { content, .. } => content.len(),
                ContentPart::Image { .. } => 765 * 4,
            })
            .sum();
        (chars / 4).max(1)
    }
}

// ─── Cost accounting ──────────────────────────────────────────────────────────

/// Cost of one model call, additive across calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub input: f64,
    pub output: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_write: Option<f64>,
    pub total: f64,
    pub currency: String,
}

impl CostBreakdown {
    pub fn zero() -> Self {
        Self {
            currency: "USD".into(),
            ..Default::default()
        }
    }

    /// Sum two breakdowns.  `total` stays the invariant
    /// `input + output + cache_read + cache_write`.
    pub fn add(&self, other: &Self) -> Self {
        let cache_read = match (self.cache_read, other.cache_read) {
            (None, None) => None,
            (a, b) => Some(a.unwrap_or(0.0) + b.unwrap_or(0.0)),
        };
        let cache_write = match (self.cache_write, other.cache_write) {
            (None, None) => None,
            (a, b) => Some(a.unwrap_or(0.0) + b.unwrap_or(0.0)),
        };
        let input = self.input + other.input;
        let output = self.output + other.output;
        Self {
            input,
            output,
            cache_read,
            cache_write,
            total: input + output + cache_read.unwrap_or(0.0) + cache_write.unwrap_or(0.0),
            currency: self.currency.clone(),
        }
    }
}

/// Per-million-token USD pricing for one model tier.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
    pub cache_read_per_mtok: f64,
    pub cache_write_per_mtok: f64,
}

impl ModelPricing {
    pub fn cost_for(&self, usage: &Usage) -> CostBreakdown {
        let per = |tokens: u64, rate: f64| tokens as f64 * rate / 1_000_000.0;
        let input = per(usage.input_tokens, self.input_per_mtok);
        let output = per(usage.output_tokens, self.output_per_mtok);
        let cache_read = usage
            .cache_read_tokens
            .map(|t| per(t, self.cache_read_per_mtok));
        let cache_write = usage
            .cache_write_tokens
            .map(|t| per(t, self.cache_write_per_mtok));
        CostBreakdown {
            input,
            output,
            cache_read,
            cache_write,
            total: input + output + cache_read.unwrap_or(0.0) + cache_write.unwrap_or(0.0),
            currency: "USD".into(),
        }
    }
}

/// Cumulative token counts reported by a stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_write_tokens: Option<u64>,
}

// ─── Stream events ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
}

/// A single event on a provider stream.
///
/// Grammar: `Start` precedes all others; at most one `Done`; after `Done`
/// or `Error` no further events are emitted.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Start {
        message_id: String,
    },
    Text {
        text: String,
    },
    Thinking {
        text: String,
    },
    /// A complete tool call.  `arguments` is a full JSON string; malformed
    /// JSON is a consumer-side error, never a stream error.
    ToolCall {
        id: String,
        name: String,
        arguments: String,
    },
    Usage(Usage),
    Done {
        stop_reason: StopReason,
        usage: Usage,
        cost: CostBreakdown,
    },
    /// Fatal; terminates the stream.
    Error(ProviderError),
}

// ─── Stream options ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingLevel {
    #[default]
    None,
    Low,
    Medium,
    High,
}

impl ThinkingLevel {
    /// Token budget granted to the model's reasoning trace.
    pub fn budget(self) -> ThinkingBudget {
        let tokens = match self {
            ThinkingLevel::None => 0,
            ThinkingLevel::Low => 2_048,
            ThinkingLevel::Medium => 8_192,
            ThinkingLevel::High => 32_768,
        };
        ThinkingBudget {
            enabled: tokens > 0,
            budget_tokens: tokens,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThinkingBudget {
    pub enabled: bool,
    pub budget_tokens: u32,
}

/// Options for one `stream()` call.
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    /// Cancellation observed between events.
    pub signal: Option<AbortSignal>,
    pub temperature: Option<f32>,
    pub thinking: ThinkingBudget,
    /// Whether tool schemas are disclosed to the model for this call.
    pub disclose_tools: bool,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_has_role_and_text() {
        let m = Message::user("agent-1", "hello");
        assert_eq!(m.role, Role::User);
        assert_eq!(m.text(), "hello");
    }

    #[test]
    fn message_ids_are_unique() {
        let a = Message::user("a", "x");
        let b = Message::user("a", "x");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn tool_calls_preserve_declaration_order() {
        let m = Message::new(
            Role::Assistant,
            "a",
            vec![
                ContentPart::tool_call("c1", "read", "{}"),
                ContentPart::text("and"),
                ContentPart::tool_call("c2", "write", "{}"),
            ],
        );
        let calls = m.tool_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, "c1");
        assert_eq!(calls[1].0, "c2");
    }

    #[test]
    fn text_skips_thinking_and_tool_parts() {
        let m = Message::new(
            Role::Assistant,
            "a",
            vec![
                ContentPart::thinking("pondering"),
                ContentPart::text("answer"),
            ],
        );
        assert_eq!(m.text(), "answer");
    }

    #[test]
    fn approx_tokens_minimum_is_one() {
        let m = Message::user("a", "");
        assert_eq!(m.approx_tokens(), 1);
    }

    #[test]
    fn cost_add_sums_and_totals() {
        let a = CostBreakdown {
            input: 1.0,
            output: 2.0,
            cache_read: Some(0.5),
            cache_write: None,
            total: 3.5,
            currency: "USD".into(),
        };
        let b = CostBreakdown {
            input: 0.5,
            output: 0.5,
            cache_read: None,
            cache_write: Some(0.25),
            total: 1.25,
            currency: "USD".into(),
        };
        let sum = a.add(&b);
        assert_eq!(sum.input, 1.5);
        assert_eq!(sum.output, 2.5);
        assert_eq!(sum.cache_read, Some(0.5));
        assert_eq!(sum.cache_write, Some(0.25));
        assert!((sum.total - 4.75).abs() < 1e-12);
    }

    #[test]
    fn pricing_is_per_million_tokens() {
        let p = ModelPricing {
            input_per_mtok: 3.0,
            output_per_mtok: 15.0,
            cache_read_per_mtok: 0.3,
            cache_write_per_mtok: 3.75,
        };
        let usage = Usage {
            input_tokens: 1_000_000,
            output_tokens: 2_000_000,
            cache_read_tokens: None,
            cache_write_tokens: None,
        };
        let cost = p.cost_for(&usage);
        assert!((cost.input - 3.0).abs() < 1e-12);
        assert!((cost.output - 30.0).abs() < 1e-12);
        assert!((cost.total - 33.0).abs() < 1e-12);
        assert_eq!(cost.cache_read, None);
    }

    #[test]
    fn thinking_level_none_has_zero_budget() {
        let b = ThinkingLevel::None.budget();
        assert!(!b.enabled);
        assert_eq!(b.budget_tokens, 0);
    }

    #[test]
    fn thinking_levels_increase_monotonically() {
        let low = ThinkingLevel::Low.budget().budget_tokens;
        let med = ThinkingLevel::Medium.budget().budget_tokens;
        let high = ThinkingLevel::High.budget().budget_tokens;
        assert!(low < med && med < high);
    }

    #[test]
    fn message_round_trips_through_json() {
        let m = Message::new(
            Role::Assistant,
            "agent-7",
            vec![
                ContentPart::text("hi"),
                ContentPart::tool_call("c", "shell", r#"{"cmd":"ls"}"#),
            ],
        );
        let json = serde_json::to_string(&m).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, m.id);
        assert_eq!(back.parts, m.parts);
    }
}
