// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use crate::error::{ErrorType, ProviderError};
use crate::provider::{EventStream, ModelContext, ModelDescriptor, StreamProvider};
use crate::types::{
    CostBreakdown, Role, StopReason, StreamEvent, StreamOptions, Usage,
};

fn mock_descriptor(id: &str) -> ModelDescriptor {
    ModelDescriptor {
        id: id.to_string(),
        context_window: 128_000,
        max_output_tokens: 8_192,
        pricing: Default::default(),
        supports_thinking: false,
        supports_images: false,
    }
}

fn done_event() -> StreamEvent {
    StreamEvent::Done {
        stop_reason: StopReason::EndTurn,
        usage: Usage {
            input_tokens: 10,
            output_tokens: 10,
            cache_read_tokens: None,
            cache_write_tokens: None,
        },
        cost: CostBreakdown::zero(),
    }
}

/// Deterministic provider for tests: echoes the last user message back.
pub struct EchoProvider {
    id: String,
}

impl EchoProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait]
impl StreamProvider for EchoProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn models(&self) -> Vec<ModelDescriptor> {
        vec![mock_descriptor("echo-model")]
    }

    async fn stream(
        &self,
        _model: &str,
        context: ModelContext,
        _options: StreamOptions,
    ) -> Result<EventStream, ProviderError> {
        let reply = context
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.text())
            .unwrap_or_else(|| "[no input]".into());
        let events = vec![
            StreamEvent::Start {
                message_id: uuid::Uuid::new_v4().to_string(),
            },
            StreamEvent::Text {
                text: format!("ECHO: {reply}"),
            },
            done_event(),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

/// A pre-scripted provider.  Each `stream()` call pops the next event
/// script from the front of the queue, so tests can specify exact event
/// sequences — including tool calls and mid-stream errors — without any
/// transport behind them.
pub struct ScriptedProvider {
    id: String,
    scripts: Arc<Mutex<Vec<Vec<StreamEvent>>>>,
    /// The last context handed to `stream()`, for assertion in tests.
    pub last_context: Arc<Mutex<Option<ModelContext>>>,
}

impl ScriptedProvider {
    pub fn new(id: impl Into<String>, scripts: Vec<Vec<StreamEvent>>) -> Self {
        Self {
            id: id.into(),
            scripts: Arc::new(Mutex::new(scripts)),
            last_context: Arc::new(Mutex::new(None)),
        }
    }

    /// Provider that always streams a single text reply.
    pub fn always_text(id: impl Into<String>, reply: impl Into<String>) -> Self {
        let text = reply.into();
        Self::new(
            id,
            vec![vec![
                StreamEvent::Start {
                    message_id: "m-1".into(),
                },
                StreamEvent::Text { text },
                done_event(),
            ]],
        )
    }

    /// Provider whose first call emits a tool call, second a text reply.
    pub fn tool_then_text(
        id: impl Into<String>,
        call_id: impl Into<String>,
        tool: impl Into<String>,
        args_json: impl Into<String>,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(
            id,
            vec![
                vec![
                    StreamEvent::Start {
                        message_id: "m-1".into(),
                    },
                    StreamEvent::ToolCall {
                        id: call_id.into(),
                        name: tool.into(),
                        arguments: args_json.into(),
                    },
                    StreamEvent::Done {
                        stop_reason: StopReason::ToolUse,
                        usage: Usage::default(),
                        cost: CostBreakdown::zero(),
                    },
                ],
                vec![
                    StreamEvent::Start {
                        message_id: "m-2".into(),
                    },
                    StreamEvent::Text {
                        text: final_text.into(),
                    },
                    done_event(),
                ],
            ],
        )
    }

    /// Append another scripted call.
    pub fn push_script(&self, events: Vec<StreamEvent>) {
        self.scripts.lock().unwrap().push(events);
    }
}

#[async_trait]
impl StreamProvider for ScriptedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn models(&self) -> Vec<ModelDescriptor> {
        vec![mock_descriptor("scripted-model")]
    }

    async fn stream(
        &self,
        _model: &str,
        context: ModelContext,
        _options: StreamOptions,
    ) -> Result<EventStream, ProviderError> {
        *self.last_context.lock().unwrap() = Some(context);
        let events = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                vec![
                    StreamEvent::Start {
                        message_id: "m-exhausted".into(),
                    },
                    StreamEvent::Text {
                        text: "[no more scripts]".into(),
                    },
                    done_event(),
                ]
            } else {
                scripts.remove(0)
            }
        };
        Ok(Box::pin(stream::iter(events)))
    }
}

/// Provider whose stream always terminates with the given error.
pub struct FailingProvider {
    id: String,
    error_type: ErrorType,
}

impl FailingProvider {
    pub fn new(id: impl Into<String>, error_type: ErrorType) -> Self {
        Self {
            id: id.into(),
            error_type,
        }
    }
}

#[async_trait]
impl StreamProvider for FailingProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn models(&self) -> Vec<ModelDescriptor> {
        vec![mock_descriptor("failing-model")]
    }

    async fn stream(
        &self,
        _model: &str,
        _context: ModelContext,
        _options: StreamOptions,
    ) -> Result<EventStream, ProviderError> {
        let err = ProviderError::new(&self.id, self.error_type, "scripted failure");
        let events = vec![
            StreamEvent::Start {
                message_id: "m-fail".into(),
            },
            StreamEvent::Error(err),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::types::Message;

    fn ctx(text: &str) -> ModelContext {
        ModelContext {
            system_prompt: None,
            messages: vec![Message::user("a", text)],
            tools: vec![],
        }
    }

    #[tokio::test]
    async fn echo_replays_last_user_message() {
        let p = EchoProvider::new("echo");
        let mut s = p.stream("m", ctx("hi there"), StreamOptions::default()).await.unwrap();
        let mut saw_echo = false;
        while let Some(ev) = s.next().await {
            if let StreamEvent::Text { text } = ev {
                assert_eq!(text, "ECHO: hi there");
                saw_echo = true;
            }
        }
        assert!(saw_echo);
    }

    #[tokio::test]
    async fn echo_starts_with_start_and_ends_with_done() {
        let p = EchoProvider::new("echo");
        let s = p.stream("m", ctx("x"), StreamOptions::default()).await.unwrap();
        let events: Vec<StreamEvent> = s.collect().await;
        assert!(matches!(events.first(), Some(StreamEvent::Start { .. })));
        assert!(matches!(events.last(), Some(StreamEvent::Done { .. })));
    }

    #[tokio::test]
    async fn scripted_pops_scripts_in_order() {
        let p = ScriptedProvider::tool_then_text("s", "c1", "shell", "{}", "all done");
        let first: Vec<StreamEvent> = p
            .stream("m", ctx("go"), StreamOptions::default())
            .await
            .unwrap()
            .collect()
            .await;
        assert!(first
            .iter()
            .any(|e| matches!(e, StreamEvent::ToolCall { name, .. } if name == "shell")));
        let second: Vec<StreamEvent> = p
            .stream("m", ctx("next"), StreamOptions::default())
            .await
            .unwrap()
            .collect()
            .await;
        assert!(second
            .iter()
            .any(|e| matches!(e, StreamEvent::Text { text } if text == "all done")));
    }

    #[tokio::test]
    async fn scripted_records_last_context() {
        let p = ScriptedProvider::always_text("s", "ok");
        let _ = p.stream("m", ctx("payload"), StreamOptions::default()).await.unwrap();
        let last = p.last_context.lock().unwrap();
        assert_eq!(last.as_ref().unwrap().messages[0].text(), "payload");
    }

    #[tokio::test]
    async fn failing_provider_ends_with_error_event() {
        let p = FailingProvider::new("bad", ErrorType::ServerError);
        let events: Vec<StreamEvent> = p
            .stream("m", ctx("x"), StreamOptions::default())
            .await
            .unwrap()
            .collect()
            .await;
        assert!(matches!(
            events.last(),
            Some(StreamEvent::Error(e)) if e.error_type == ErrorType::ServerError
        ));
    }
}
