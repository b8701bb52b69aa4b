// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chitragupta_model::{StopReason, Usage};

/// Events emitted by an agent while it runs.  Fire-and-forget: slow or
/// dropped consumers never stall the loop.  The set is closed — consumers
/// match exhaustively.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    TurnStart {
        turn: u32,
        max_turns: u32,
    },
    TurnDone {
        turn: u32,
        reason: String,
    },
    StreamStart {
        message_id: String,
    },
    StreamText {
        text: String,
    },
    StreamThinking {
        text: String,
    },
    StreamToolCall {
        id: String,
        name: String,
        arguments: String,
    },
    StreamUsage(Usage),
    StreamDone {
        stop_reason: StopReason,
    },
    StreamError {
        error: String,
    },
    ToolStart {
        call_id: String,
        name: String,
    },
    ToolDone {
        call_id: String,
        name: String,
        latency_ms: u64,
        is_error: bool,
    },
    ToolError {
        call_id: String,
        name: String,
        error: String,
    },
    SubagentSpawn {
        agent_id: String,
        purpose: String,
    },
    SubagentDone {
        agent_id: String,
    },
    SubagentError {
        agent_id: String,
        error: String,
    },
    /// A child's event forwarded to the parent.
    SubagentEvent {
        source_agent_id: String,
        source_purpose: String,
        source_depth: usize,
        event: Box<AgentEvent>,
    },
    AgentSteer {
        text: String,
    },
    AgentAbort,
    AgentInputRequest {
        request_id: String,
        agent_id: String,
        prompt: String,
        choices: Vec<String>,
        default_value: Option<String>,
        timeout_ms: Option<u64>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subagent_event_wraps_original() {
        let inner = AgentEvent::TurnStart {
            turn: 1,
            max_turns: 25,
        };
        let wrapped = AgentEvent::SubagentEvent {
            source_agent_id: "child".into(),
            source_purpose: "research".into(),
            source_depth: 2,
            event: Box::new(inner),
        };
        match wrapped {
            AgentEvent::SubagentEvent { event, .. } => {
                assert!(matches!(*event, AgentEvent::TurnStart { turn: 1, .. }));
            }
            _ => panic!("wrong variant"),
        }
    }
}
