// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Loop-level tests driving the agent against scripted providers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use chitragupta_config::AgentConfig;
use chitragupta_model::{
    CostBreakdown, ErrorType, ProviderError, ScriptedProvider, StopReason, StreamEvent,
    StreamProvider, Usage,
};
use chitragupta_tools::{
    PolicyDecision, PolicyEngine, ToolContext, ToolDefinition, ToolHandler, ToolOutput,
    ToolRegistry,
};

use crate::agent::{Agent, InputRequestOptions, SpawnConfig, SubAgentStatus};
use crate::error::CoreError;
use crate::events::AgentEvent;
use crate::state::AgentStatus;

fn done(stop_reason: StopReason) -> StreamEvent {
    StreamEvent::Done {
        stop_reason,
        usage: Usage {
            input_tokens: 10,
            output_tokens: 5,
            cache_read_tokens: None,
            cache_write_tokens: None,
        },
        cost: CostBreakdown::zero(),
    }
}

fn text_script(text: &str) -> Vec<StreamEvent> {
    vec![
        StreamEvent::Start {
            message_id: "m".into(),
        },
        StreamEvent::Text { text: text.into() },
        done(StopReason::EndTurn),
    ]
}

fn tool_script(call_id: &str, tool: &str, args: &str) -> Vec<StreamEvent> {
    vec![
        StreamEvent::Start {
            message_id: "m".into(),
        },
        StreamEvent::ToolCall {
            id: call_id.into(),
            name: tool.into(),
            arguments: args.into(),
        },
        done(StopReason::ToolUse),
    ]
}

struct RecordingTool {
    calls: Arc<Mutex<Vec<serde_json::Value>>>,
    fail: bool,
}

#[async_trait]
impl ToolHandler for RecordingTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("recorder", "records calls", json!({ "type": "object" }))
    }

    async fn execute(&self, args: serde_json::Value, _ctx: &ToolContext) -> ToolOutput {
        self.calls.lock().unwrap().push(args);
        if self.fail {
            ToolOutput::err("it broke")
        } else {
            ToolOutput::ok("recorded")
        }
    }
}

fn agent_with_tools(
    scripts: Vec<Vec<StreamEvent>>,
    fail_tool: bool,
) -> (crate::agent::AgentHandle, Arc<Mutex<Vec<serde_json::Value>>>) {
    let agent = Agent::new("test", "scripted-model", AgentConfig::default());
    agent.set_provider(Arc::new(ScriptedProvider::new("scripted", scripts)));
    let calls = Arc::new(Mutex::new(Vec::new()));
    let registry = ToolRegistry::new();
    registry.register(Arc::new(RecordingTool {
        calls: calls.clone(),
        fail: fail_tool,
    }));
    agent.set_tools(Arc::new(registry));
    (agent, calls)
}

#[tokio::test]
async fn plain_text_prompt_returns_assistant_message() {
    let (agent, _) = agent_with_tools(vec![text_script("forty-two")], false);
    let msg = agent.prompt("meaning of life?").await.unwrap();
    assert_eq!(msg.text(), "forty-two");
    assert_eq!(agent.status(), AgentStatus::Completed);
    // History: user, assistant.
    assert_eq!(agent.state().messages.len(), 2);
}

#[tokio::test]
async fn tool_call_round_trips_through_registry() {
    let (agent, calls) = agent_with_tools(
        vec![
            tool_script("c1", "recorder", r#"{"x": 7}"#),
            text_script("tool said hi"),
        ],
        false,
    );
    let msg = agent.prompt("use the tool").await.unwrap();
    assert_eq!(msg.text(), "tool said hi");
    assert_eq!(calls.lock().unwrap().len(), 1);
    assert_eq!(calls.lock().unwrap()[0]["x"], 7);

    // History: user, assistant(tool_call), tool_result, assistant.
    let messages = agent.state().messages;
    assert_eq!(messages.len(), 4);
    assert!(messages[2]
        .parts
        .iter()
        .any(|p| matches!(p, chitragupta_model::ContentPart::ToolResult { tool_call_id, is_error, .. }
            if tool_call_id == "c1" && !is_error)));
}

#[tokio::test]
async fn failing_tool_appends_error_result_without_crashing() {
    let (agent, _) = agent_with_tools(
        vec![
            tool_script("c1", "recorder", "{}"),
            text_script("recovered"),
        ],
        true,
    );
    let msg = agent.prompt("go").await.unwrap();
    assert_eq!(msg.text(), "recovered");
    let messages = agent.state().messages;
    assert!(messages[2]
        .parts
        .iter()
        .any(|p| matches!(p, chitragupta_model::ContentPart::ToolResult { is_error, .. } if *is_error)));
}

#[tokio::test]
async fn malformed_tool_json_is_tool_level_error() {
    let (agent, calls) = agent_with_tools(
        vec![
            tool_script("c1", "recorder", "{not json"),
            text_script("moved on"),
        ],
        false,
    );
    let msg = agent.prompt("go").await.unwrap();
    assert_eq!(msg.text(), "moved on");
    // The handler never ran.
    assert!(calls.lock().unwrap().is_empty());
    let messages = agent.state().messages;
    let result_text = messages[2].parts.iter().find_map(|p| match p {
        chitragupta_model::ContentPart::ToolResult {
            content, is_error, ..
        } => Some((content.clone(), *is_error)),
        _ => None,
    });
    let (content, is_error) = result_text.unwrap();
    assert!(is_error);
    assert!(content.contains("malformed"));
}

#[tokio::test]
async fn unknown_tool_is_error_result() {
    let (agent, _) = agent_with_tools(
        vec![
            tool_script("c1", "no-such-tool", "{}"),
            text_script("fine"),
        ],
        false,
    );
    let msg = agent.prompt("go").await.unwrap();
    assert_eq!(msg.text(), "fine");
}

#[tokio::test]
async fn policy_deny_becomes_error_result() {
    struct DenyAll;
    impl PolicyEngine for DenyAll {
        fn check(&self, _name: &str, _args: &serde_json::Value) -> PolicyDecision {
            PolicyDecision::deny("not on my watch")
        }
    }

    let (agent, calls) = agent_with_tools(
        vec![tool_script("c1", "recorder", "{}"), text_script("ok then")],
        false,
    );
    agent.set_policy(Arc::new(DenyAll));
    let msg = agent.prompt("go").await.unwrap();
    assert_eq!(msg.text(), "ok then");
    assert!(calls.lock().unwrap().is_empty(), "denied tool must not run");
    let messages = agent.state().messages;
    assert!(messages[2]
        .parts
        .iter()
        .any(|p| matches!(p, chitragupta_model::ContentPart::ToolResult { content, is_error, .. }
            if *is_error && content.contains("policy denied"))));
}

#[tokio::test]
async fn steering_splices_system_message_before_next_turn() {
    let (agent, _) = agent_with_tools(vec![text_script("steered")], false);
    agent.steer("answer in French");
    agent.prompt("hello").await.unwrap();
    let messages = agent.state().messages;
    // user, then spliced system, then assistant — the steer queued
    // before the run lands at the top of turn 1.
    let system_pos = messages
        .iter()
        .position(|m| m.role == chitragupta_model::Role::System)
        .unwrap();
    let assistant_pos = messages
        .iter()
        .position(|m| m.role == chitragupta_model::Role::Assistant)
        .unwrap();
    assert!(system_pos < assistant_pos);
    assert_eq!(messages[system_pos].text(), "answer in French");
}

#[tokio::test]
async fn max_turns_synthesizes_terminal_message() {
    // Every turn requests another tool call; the loop must stop at the
    // configured ceiling.
    let limits = AgentConfig {
        max_turns: 3,
        ..Default::default()
    };
    let scripts: Vec<Vec<StreamEvent>> = (0..10)
        .map(|i| tool_script(&format!("c{i}"), "recorder", "{}"))
        .collect();
    let agent = Agent::new("test", "m", limits);
    agent.set_provider(Arc::new(ScriptedProvider::new("scripted", scripts)));
    let registry = ToolRegistry::new();
    registry.register(Arc::new(RecordingTool {
        calls: Arc::new(Mutex::new(Vec::new())),
        fail: false,
    }));
    agent.set_tools(Arc::new(registry));

    let msg = agent.prompt("loop forever").await.unwrap();
    assert_eq!(msg.text(), "max turns reached");
}

#[tokio::test]
async fn stream_error_event_is_retried_then_fatal_surfaces() {
    // First attempt ends in a retryable error event, second succeeds.
    let scripts = vec![
        vec![
            StreamEvent::Start {
                message_id: "m".into(),
            },
            StreamEvent::Error(ProviderError::new(
                "scripted",
                ErrorType::ServerError,
                "hiccup",
            )),
        ],
        text_script("second try worked"),
    ];
    let (agent, _) = agent_with_tools(scripts, false);
    let msg = agent.prompt("go").await.unwrap();
    assert_eq!(msg.text(), "second try worked");
}

#[tokio::test]
async fn fatal_stream_error_fails_the_prompt() {
    let scripts = vec![vec![
        StreamEvent::Start {
            message_id: "m".into(),
        },
        StreamEvent::Error(ProviderError::new("scripted", ErrorType::Auth, "bad key")),
    ]];
    let (agent, _) = agent_with_tools(scripts, false);
    let err = agent.prompt("go").await.unwrap_err();
    match err {
        CoreError::Provider(e) => assert_eq!(e.error_type, ErrorType::Auth),
        other => panic!("expected provider error, got {other}"),
    }
    assert_eq!(agent.status(), AgentStatus::Error);
}

#[tokio::test]
async fn abort_mid_run_sets_aborted_status() {
    struct SlowTool;
    #[async_trait]
    impl ToolHandler for SlowTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new("slow", "sleeps", json!({ "type": "object" }))
        }
        async fn execute(&self, _args: serde_json::Value, _ctx: &ToolContext) -> ToolOutput {
            tokio::time::sleep(Duration::from_secs(30)).await;
            ToolOutput::ok("never")
        }
    }

    let agent = Agent::new("test", "m", AgentConfig::default());
    agent.set_provider(Arc::new(ScriptedProvider::new(
        "scripted",
        vec![tool_script("c1", "slow", "{}")],
    )));
    let registry = ToolRegistry::new();
    registry.register(Arc::new(SlowTool));
    agent.set_tools(Arc::new(registry));

    let a2 = agent.clone();
    let run = tokio::spawn(async move { a2.prompt("go").await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    agent.abort();
    let err = run.await.unwrap().unwrap_err();
    assert!(matches!(err, CoreError::Aborted));
    assert_eq!(agent.status(), AgentStatus::Aborted);
}

#[tokio::test]
async fn events_are_emitted_in_turn_order() {
    let (agent, _) = agent_with_tools(vec![text_script("hi")], false);
    let mut rx = agent.subscribe();
    agent.prompt("hello").await.unwrap();

    let mut kinds = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        kinds.push(match ev {
            AgentEvent::TurnStart { .. } => "turn:start",
            AgentEvent::StreamStart { .. } => "stream:start",
            AgentEvent::StreamText { .. } => "stream:text",
            AgentEvent::StreamDone { .. } => "stream:done",
            AgentEvent::TurnDone { .. } => "turn:done",
            _ => "other",
        });
    }
    let start = kinds.iter().position(|k| *k == "turn:start").unwrap();
    let done = kinds.iter().position(|k| *k == "turn:done").unwrap();
    let text = kinds.iter().position(|k| *k == "stream:text").unwrap();
    assert!(start < text && text < done);
}

#[tokio::test]
async fn delegate_returns_result_and_never_throws() {
    let (agent, _) = agent_with_tools(vec![text_script("parent")], false);
    // The child inherits the scripted provider; its first (and only)
    // remaining script is consumed by the delegation.
    let result = agent
        .delegate(
            SpawnConfig {
                purpose: "summarize".into(),
                ..Default::default()
            },
            "summarize this",
        )
        .await;
    assert_eq!(result.status, SubAgentStatus::Completed);
    assert_eq!(result.response, "parent");
    assert!(result.error.is_none());
}

#[tokio::test]
async fn delegate_with_exhausted_fanout_reports_error() {
    let limits = AgentConfig {
        max_fanout: 0,
        ..Default::default()
    };
    let agent = Agent::new("test", "m", limits);
    agent.set_provider(Arc::new(ScriptedProvider::always_text("p", "x")));
    let result = agent
        .delegate(SpawnConfig::default(), "anything")
        .await;
    assert_eq!(result.status, SubAgentStatus::Error);
    assert!(result.error.unwrap().contains("fan-out"));
}

#[tokio::test]
async fn delegate_parallel_checks_total_fanout_up_front() {
    let limits = AgentConfig {
        max_fanout: 2,
        ..Default::default()
    };
    let agent = Agent::new("test", "m", limits);
    agent.set_provider(Arc::new(ScriptedProvider::always_text("p", "x")));
    let tasks: Vec<(SpawnConfig, String)> = (0..3)
        .map(|i| (SpawnConfig::default(), format!("task {i}")))
        .collect();
    let err = agent.delegate_parallel(tasks).await.unwrap_err();
    assert!(matches!(err, CoreError::FanoutExceeded(2)));
    assert_eq!(agent.children_count(), 0, "no child spawned on pre-check");
}

#[tokio::test]
async fn delegate_parallel_runs_all_tasks() {
    let agent = Agent::new("test", "m", AgentConfig::default());
    let provider = ScriptedProvider::new(
        "p",
        vec![text_script("one"), text_script("two"), text_script("three")],
    );
    agent.set_provider(Arc::new(provider));
    let tasks: Vec<(SpawnConfig, String)> = (0..3)
        .map(|i| (SpawnConfig::default(), format!("task {i}")))
        .collect();
    let results = agent.delegate_parallel(tasks).await.unwrap();
    assert_eq!(results.len(), 3);
    assert!(results
        .iter()
        .all(|r| r.status == SubAgentStatus::Completed));
}

#[tokio::test]
async fn child_events_bubble_wrapped_to_parent() {
    let agent = Agent::new("parent", "m", AgentConfig::default());
    agent.set_provider(Arc::new(ScriptedProvider::always_text("p", "child says hi")));
    let mut rx = agent.subscribe();
    let result = agent
        .delegate(
            SpawnConfig {
                purpose: "child-task".into(),
                ..Default::default()
            },
            "speak",
        )
        .await;
    assert_eq!(result.status, SubAgentStatus::Completed);

    let mut saw_wrapped_text = false;
    while let Ok(ev) = rx.try_recv() {
        if let AgentEvent::SubagentEvent {
            source_purpose,
            source_depth,
            event,
            ..
        } = ev
        {
            assert_eq!(source_purpose, "child-task");
            assert_eq!(source_depth, 1);
            if matches!(*event, AgentEvent::StreamText { .. }) {
                saw_wrapped_text = true;
            }
        }
    }
    assert!(saw_wrapped_text, "child stream events must bubble wrapped");
}

#[tokio::test]
async fn input_request_resolves_with_provided_value() {
    let agent = Agent::new("test", "m", AgentConfig::default());
    let mut rx = agent.subscribe();
    let a2 = agent.clone();
    let waiting = tokio::spawn(async move {
        a2.request_input("pick a color", InputRequestOptions::default())
            .await
    });
    // Find the request id in the emitted event and answer it.
    let request_id = loop {
        if let Some(AgentEvent::AgentInputRequest { request_id, .. }) = rx.recv().await {
            break request_id;
        }
    };
    assert!(agent.resolve_input(&request_id, "blue", false, None));
    assert_eq!(waiting.await.unwrap().unwrap(), "blue");
}

#[tokio::test]
async fn input_request_timeout_uses_default() {
    let agent = Agent::new("test", "m", AgentConfig::default());
    let value = agent
        .request_input(
            "pick",
            InputRequestOptions {
                default_value: Some("fallback".into()),
                timeout_ms: Some(30),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(value, "fallback");
}

#[tokio::test]
async fn input_request_timeout_without_default_fails() {
    let agent = Agent::new("test", "m", AgentConfig::default());
    let err = agent
        .request_input(
            "pick",
            InputRequestOptions {
                timeout_ms: Some(30),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InputTimeout(_)));
}

#[tokio::test]
async fn abort_rejects_pending_input_requests() {
    let agent = Agent::new("test", "m", AgentConfig::default());
    let a2 = agent.clone();
    let waiting = tokio::spawn(async move {
        a2.request_input("pick", InputRequestOptions::default()).await
    });
    tokio::time::sleep(Duration::from_millis(30)).await;
    agent.abort();
    let err = waiting.await.unwrap().unwrap_err();
    assert!(matches!(err, CoreError::Aborted));
}

#[tokio::test]
async fn denied_input_carries_reason() {
    let agent = Agent::new("test", "m", AgentConfig::default());
    let mut rx = agent.subscribe();
    let a2 = agent.clone();
    let waiting = tokio::spawn(async move {
        a2.request_input("pick", InputRequestOptions::default()).await
    });
    let request_id = loop {
        if let Some(AgentEvent::AgentInputRequest { request_id, .. }) = rx.recv().await {
            break request_id;
        }
    };
    agent.resolve_input(&request_id, "", true, Some("no colors today".into()));
    let err = waiting.await.unwrap().unwrap_err();
    match err {
        CoreError::InputDenied { reason, .. } => {
            assert_eq!(reason.as_deref(), Some("no colors today"));
        }
        other => panic!("expected denial, got {other}"),
    }
}

#[tokio::test]
async fn follow_ups_run_after_completion() {
    let provider = ScriptedProvider::new(
        "p",
        vec![text_script("first"), text_script("second")],
    );
    let agent = Agent::new("test", "m", AgentConfig::default());
    agent.set_provider(Arc::new(provider));
    agent.prompt("go").await.unwrap();
    agent.follow_up("and then?");
    let responses = agent.process_follow_ups().await.unwrap();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].text(), "second");
}

#[tokio::test]
async fn disabled_tool_returns_error_result_until_reset() {
    use chitragupta_config::AutonomyConfig;
    use chitragupta_smriti::AutonomyManager;

    let autonomy = Arc::new(AutonomyManager::new(AutonomyConfig::default()));
    // Pre-disable the tool by recording three failures.
    for _ in 0..3 {
        autonomy.record_tool_result("recorder", false);
    }
    let (agent, calls) = agent_with_tools(
        vec![tool_script("c1", "recorder", "{}"), text_script("done")],
        false,
    );
    agent.set_autonomy(autonomy.clone());
    agent.prompt("go").await.unwrap();
    assert!(calls.lock().unwrap().is_empty(), "disabled tool must not run");
    let messages = agent.state().messages;
    assert!(messages[2]
        .parts
        .iter()
        .any(|p| matches!(p, chitragupta_model::ContentPart::ToolResult { content, is_error, .. }
            if *is_error && content.contains("disabled"))));
}
