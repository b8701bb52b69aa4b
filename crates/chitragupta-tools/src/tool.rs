// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;

use chitragupta_model::AbortSignal;

/// Static description of a tool, disclosed to the model.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object.
    pub input_schema: Value,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// Per-call execution context.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub session_id: String,
    pub working_directory: PathBuf,
    /// Cancellation observed at the tool's own suspension points.
    pub signal: AbortSignal,
}

impl ToolContext {
    pub fn new(session_id: impl Into<String>, working_directory: impl Into<PathBuf>) -> Self {
        Self {
            session_id: session_id.into(),
            working_directory: working_directory.into(),
            signal: AbortSignal::never(),
        }
    }

    pub fn with_signal(mut self, signal: AbortSignal) -> Self {
        self.signal = signal;
        self
    }
}

/// The result of executing a tool.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            content: msg.into(),
            is_error: true,
        }
    }
}

/// Trait every tool implements.  Errors are wrapped in
/// [`ToolOutput::err`]; a handler returning `Err` through a panic is the
/// registry's problem, not the loop's.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    /// Execute with already-parsed JSON arguments.
    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolOutput;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct UpcaseTool;

    #[async_trait]
    impl ToolHandler for UpcaseTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new(
                "upcase",
                "uppercases the input",
                json!({ "type": "object", "properties": { "text": { "type": "string" } } }),
            )
        }

        async fn execute(&self, args: Value, _ctx: &ToolContext) -> ToolOutput {
            match args.get("text").and_then(|v| v.as_str()) {
                Some(t) => ToolOutput::ok(t.to_uppercase()),
                None => ToolOutput::err("missing required field: text"),
            }
        }
    }

    #[tokio::test]
    async fn tool_executes_with_parsed_args() {
        let ctx = ToolContext::new("s1", "/tmp");
        let out = UpcaseTool.execute(json!({"text": "abc"}), &ctx).await;
        assert!(!out.is_error);
        assert_eq!(out.content, "ABC");
    }

    #[tokio::test]
    async fn tool_reports_missing_args_as_error_output() {
        let ctx = ToolContext::new("s1", "/tmp");
        let out = UpcaseTool.execute(json!({}), &ctx).await;
        assert!(out.is_error);
    }

    #[test]
    fn definition_carries_schema() {
        let def = UpcaseTool.definition();
        assert_eq!(def.name, "upcase");
        assert!(def.input_schema.get("properties").is_some());
    }

    #[test]
    fn context_defaults_to_never_firing_signal() {
        let ctx = ToolContext::new("s1", "/work");
        assert!(!ctx.signal.is_aborted());
        assert_eq!(ctx.working_directory, PathBuf::from("/work"));
    }
}
