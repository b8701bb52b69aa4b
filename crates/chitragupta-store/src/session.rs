// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(TurnRole::User),
            "assistant" => Some(TurnRole::Assistant),
            _ => None,
        }
    }
}

/// One tool invocation recorded inside an assistant turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub name: String,
    /// JSON arguments as sent to the tool.
    pub input: serde_json::Value,
    /// Raw result text.
    pub result: String,
    #[serde(default)]
    pub is_error: bool,
}

/// One turn of a persisted session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub turn_number: u32,
    pub role: TurnRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,
}

impl Turn {
    pub fn user(turn_number: u32, content: impl Into<String>) -> Self {
        Self {
            turn_number,
            role: TurnRole::User,
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant(turn_number: u32, content: impl Into<String>) -> Self {
        Self {
            turn_number,
            role: TurnRole::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }
}

/// Session header metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub id: String,
    pub title: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub model: String,
    pub agent: String,
    pub project: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub total_cost: f64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// A full session: header plus ordered turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDocument {
    pub meta: SessionMeta,
    pub turns: Vec<Turn>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_as_str() {
        assert_eq!(TurnRole::parse("user"), Some(TurnRole::User));
        assert_eq!(TurnRole::parse("assistant"), Some(TurnRole::Assistant));
        assert_eq!(TurnRole::parse("system"), None);
        assert_eq!(TurnRole::User.as_str(), "user");
    }

    #[test]
    fn turn_constructors_set_fields() {
        let t = Turn::user(1, "hi");
        assert_eq!(t.role, TurnRole::User);
        assert!(t.tool_calls.is_empty());
    }

    #[test]
    fn tool_call_record_serializes() {
        let r = ToolCallRecord {
            name: "shell".into(),
            input: serde_json::json!({"cmd": "ls"}),
            result: "file.txt".into(),
            is_error: false,
        };
        let s = serde_json::to_string(&r).unwrap();
        let back: ToolCallRecord = serde_json::from_str(&s).unwrap();
        assert_eq!(back, r);
    }
}
