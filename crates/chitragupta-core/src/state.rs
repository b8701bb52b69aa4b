// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chitragupta_model::{CostBreakdown, Message, ThinkingLevel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Idle,
    Running,
    Completed,
    Aborted,
    Error,
}

/// Mutable per-agent state: the message history and the knobs the loop
/// reads each turn.
#[derive(Debug, Clone)]
pub struct AgentState {
    pub messages: Vec<Message>,
    pub model: String,
    pub provider_id: String,
    /// Registered tool names disclosed to the model.
    pub tools: Vec<String>,
    pub system_prompt: Option<String>,
    pub thinking: ThinkingLevel,
    pub streaming: bool,
    pub session_id: String,
    pub profile_id: Option<String>,
    pub total_cost: CostBreakdown,
}

impl AgentState {
    pub fn new(model: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            messages: Vec::new(),
            model: model.into(),
            provider_id: String::new(),
            tools: Vec::new(),
            system_prompt: None,
            thinking: ThinkingLevel::None,
            streaming: false,
            session_id: session_id.into(),
            profile_id: None,
            total_cost: CostBreakdown::zero(),
        }
    }
}
