// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Version of the decision contract carried in [`Decision::contract_version`].
pub const CONTRACT_VERSION: &str = "1.1";

/// Closed set of task types the classifier can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    CodeGen,
    Chat,
    Reasoning,
    Search,
    FileOp,
    Heartbeat,
    Smalltalk,
    Summarize,
    Translate,
    Embedding,
    Memory,
    Vision,
    ToolExec,
    ApiCall,
    Compaction,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::CodeGen => "code-gen",
            TaskType::Chat => "chat",
            TaskType::Reasoning => "reasoning",
            TaskType::Search => "search",
            TaskType::FileOp => "file-op",
            TaskType::Heartbeat => "heartbeat",
            TaskType::Smalltalk => "smalltalk",
            TaskType::Summarize => "summarize",
            TaskType::Translate => "translate",
            TaskType::Embedding => "embedding",
            TaskType::Memory => "memory",
            TaskType::Vision => "vision",
            TaskType::ToolExec => "tool-exec",
            TaskType::ApiCall => "api-call",
            TaskType::Compaction => "compaction",
        }
    }

    /// Tasks answered without a model call.
    pub fn skips_llm(&self) -> bool {
        matches!(
            self,
            TaskType::Search
                | TaskType::Memory
                | TaskType::FileOp
                | TaskType::Heartbeat
                | TaskType::Smalltalk
                | TaskType::ApiCall
                | TaskType::Compaction
        )
    }
}

/// How the pipeline will produce an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resolution {
    Llm,
    LlmWithTools,
    ToolOnly,
    LocalCompute,
    Embedding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Trivial,
    Simple,
    Medium,
    Complex,
    Expert,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Complexity::Trivial => "trivial",
            Complexity::Simple => "simple",
            Complexity::Medium => "medium",
            Complexity::Complex => "complex",
            Complexity::Expert => "expert",
        }
    }
}

/// Smalltalk sub-classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckinSubtype {
    /// A bare acknowledgement ("ok", "thanks").
    Ack,
    /// A presence probe ("how are you", "still there?").
    Checkin,
}

/// Health of one provider as reported by an external monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub healthy: bool,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// The routing pipeline's output: the full binding of one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub contract_version: String,
    pub provider_id: String,
    pub model_id: String,
    pub task_type: TaskType,
    pub resolution: Resolution,
    pub complexity: Complexity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    pub skip_llm: bool,
    /// Tiers strictly stronger than the selected binding, weakest first.
    pub escalation_chain: Vec<EscalationStep>,
    pub rationale: String,
    /// Geometric mean of the sub-classifier confidences, clamped to
    /// [0.5, 1.0].
    pub confidence: f64,
    pub abstain: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abstain_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkin_subtype: Option<CheckinSubtype>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_task_type: Option<TaskType>,
    pub provider_health_hints: Vec<String>,
    pub details: serde_json::Value,
    pub decision_time_ms: u64,
}

/// One (provider, model) step of the escalation chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationStep {
    pub provider_id: String,
    pub model_id: String,
}

/// Caller-supplied binding overrides keyed by (task, complexity).
pub type BindingOverrides = HashMap<(TaskType, Complexity), EscalationStep>;
