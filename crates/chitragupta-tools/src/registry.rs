// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tracing::warn;

use crate::tool::{ToolContext, ToolDefinition, ToolHandler, ToolOutput};

/// Central registry holding all available tools, keyed by name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn ToolHandler>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tool: Arc<dyn ToolHandler>) {
        let name = tool.definition().name;
        self.tools.write().unwrap().insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.read().unwrap().get(name).cloned()
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.tools.write().unwrap().remove(name).is_some()
    }

    /// Definitions for every registered tool, name-sorted for a stable
    /// disclosure order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .read()
            .unwrap()
            .values()
            .map(|t| t.definition())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// Dispatch a call.  Unknown tools produce an error output rather
    /// than an Err so the agent loop treats them uniformly.
    pub async fn execute(&self, name: &str, args: Value, ctx: &ToolContext) -> ToolOutput {
        let tool = self.get(name);
        match tool {
            Some(t) => t.execute(args, ctx).await,
            None => {
                warn!(tool = name, "dispatch to unknown tool");
                ToolOutput::err(format!("unknown tool: {name}"))
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;

    struct EchoTool {
        name: &'static str,
    }

    #[async_trait]
    impl ToolHandler for EchoTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new(self.name, "echoes its input", json!({ "type": "object" }))
        }

        async fn execute(&self, args: Value, _ctx: &ToolContext) -> ToolOutput {
            ToolOutput::ok(format!("echo:{args}"))
        }
    }

    fn ctx() -> ToolContext {
        ToolContext::new("s", "/tmp")
    }

    #[test]
    fn register_and_get() {
        let reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool { name: "echo" }));
        assert!(reg.get("echo").is_some());
        assert!(reg.get("nope").is_none());
    }

    #[test]
    fn definitions_are_name_sorted() {
        let reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool { name: "zulu" }));
        reg.register(Arc::new(EchoTool { name: "alpha" }));
        let defs = reg.definitions();
        assert_eq!(defs[0].name, "alpha");
        assert_eq!(defs[1].name, "zulu");
    }

    #[tokio::test]
    async fn execute_known_tool() {
        let reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool { name: "echo" }));
        let out = reg.execute("echo", json!({"x": 1}), &ctx()).await;
        assert!(!out.is_error);
        assert!(out.content.starts_with("echo:"));
    }

    #[tokio::test]
    async fn execute_unknown_tool_is_error_output() {
        let reg = ToolRegistry::new();
        let out = reg.execute("missing", json!({}), &ctx()).await;
        assert!(out.is_error);
        assert!(out.content.contains("unknown tool"));
    }

    #[test]
    fn unregister_removes_tool() {
        let reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool { name: "t" }));
        assert!(reg.unregister("t"));
        assert!(!reg.unregister("t"));
        assert!(reg.get("t").is_none());
    }

    #[test]
    fn registering_same_name_twice_overwrites() {
        let reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool { name: "t" }));
        reg.register(Arc::new(EchoTool { name: "t" }));
        assert_eq!(reg.names().len(), 1);
    }
}
