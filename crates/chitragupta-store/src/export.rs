// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use anyhow::{bail, Context};
use chrono::Utc;
use serde_json::{json, Value};

use crate::session::{SessionDocument, SessionMeta, ToolCallRecord, Turn, TurnRole};

pub const EXPORT_VERSION: u32 = 1;

/// Serialize a session into the version-1 export envelope.
pub fn export_to_json(doc: &SessionDocument) -> Value {
    let meta = &doc.meta;
    json!({
        "version": EXPORT_VERSION,
        "exportedAt": Utc::now().to_rfc3339(),
        "session": {
            "id": meta.id,
            "title": meta.title,
            "createdAt": meta.created.to_rfc3339(),
            "updatedAt": meta.updated.to_rfc3339(),
            "model": meta.model,
            "agent": meta.agent,
            "project": meta.project,
            "parent": meta.parent,
            "branch": meta.branch,
            "tags": meta.tags,
            "messages": doc.turns.iter().map(|t| {
                let mut msg = json!({
                    "role": t.role.as_str(),
                    "content": t.content,
                    "turnNumber": t.turn_number,
                });
                if !t.tool_calls.is_empty() {
                    msg["toolCalls"] = json!(t.tool_calls.iter().map(|tc| json!({
                        "name": tc.name,
                        "input": tc.input,
                        "result": tc.result,
                        "isError": tc.is_error,
                    })).collect::<Vec<_>>());
                }
                msg
            }).collect::<Vec<_>>(),
        },
        "stats": {
            "turnCount": doc.turns.len(),
            "totalCost": meta.total_cost,
            "totalTokens": meta.total_tokens,
        },
    })
}

/// Parse and validate a version-1 export document.
///
/// Rejects unknown versions; requires string `id`, `title`, `createdAt`
/// and a `messages` array of user/assistant entries with string content.
/// Missing `tags` default to empty, missing `parent`/`branch` to null,
/// missing `stats` to zero.
pub fn import_from_json(value: &Value) -> anyhow::Result<SessionDocument> {
    let version = value
        .get("version")
        .and_then(Value::as_u64)
        .context("export missing `version`")?;
    if version != EXPORT_VERSION as u64 {
        bail!("unknown export version: {version}");
    }

    let session = value
        .get("session")
        .and_then(Value::as_object)
        .context("export missing `session`")?;

    let required_str = |key: &str| -> anyhow::Result<String> {
        session
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .with_context(|| format!("session missing string `{key}`"))
    };

    let id = required_str("id")?;
    let title = required_str("title")?;
    let created = chrono::DateTime::parse_from_rfc3339(&required_str("createdAt")?)
        .context("invalid `createdAt`")?
        .with_timezone(&Utc);
    let updated = session
        .get("updatedAt")
        .and_then(Value::as_str)
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(created);

    let opt_str = |key: &str| -> Option<String> {
        session
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let messages = session
        .get("messages")
        .and_then(Value::as_array)
        .context("session missing `messages` array")?;

    let mut turns = Vec::with_capacity(messages.len());
    for (i, msg) in messages.iter().enumerate() {
        let role_str = msg
            .get("role")
            .and_then(Value::as_str)
            .with_context(|| format!("message {i} missing `role`"))?;
        let role = TurnRole::parse(role_str)
            .with_context(|| format!("message {i} has invalid role `{role_str}`"))?;
        let content = msg
            .get("content")
            .and_then(Value::as_str)
            .with_context(|| format!("message {i} missing string `content`"))?
            .to_string();
        let turn_number = msg
            .get("turnNumber")
            .and_then(Value::as_u64)
            .map(|n| n as u32)
            .unwrap_or(i as u32 + 1);
        let tool_calls = msg
            .get("toolCalls")
            .and_then(Value::as_array)
            .map(|calls| {
                calls
                    .iter()
                    .filter_map(|tc| {
                        Some(ToolCallRecord {
                            name: tc.get("name")?.as_str()?.to_string(),
                            input: tc.get("input").cloned().unwrap_or(json!({})),
                            result: tc
                                .get("result")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                            is_error: tc
                                .get("isError")
                                .and_then(Value::as_bool)
                                .unwrap_or(false),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        turns.push(Turn {
            turn_number,
            role,
            content,
            tool_calls,
        });
    }

    let stats = value.get("stats");
    let total_cost = stats
        .and_then(|s| s.get("totalCost"))
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    let total_tokens = stats
        .and_then(|s| s.get("totalTokens"))
        .and_then(Value::as_u64)
        .unwrap_or(0);

    Ok(SessionDocument {
        meta: SessionMeta {
            id,
            title,
            created,
            updated,
            model: opt_str("model").unwrap_or_default(),
            agent: opt_str("agent").unwrap_or_default(),
            project: opt_str("project").unwrap_or_default(),
            parent: opt_str("parent"),
            branch: opt_str("branch"),
            tags: session
                .get("tags")
                .and_then(Value::as_array)
                .map(|a| {
                    a.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            total_cost,
            total_tokens,
        },
        turns,
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
