// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Session transcript codec.  One markdown document per session: a
//! labelled header block, then `## User` / `## Assistant` sections with
//! `### Tool:` sub-blocks carrying fenced JSON input and raw result.

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};

use crate::session::{SessionDocument, SessionMeta, ToolCallRecord, Turn, TurnRole};

pub fn render_session(doc: &SessionDocument) -> String {
    let meta = &doc.meta;
    let mut out = String::new();
    out.push_str(&format!("# Session: {}\n\n", meta.title));
    out.push_str(&format!("- id: {}\n", meta.id));
    out.push_str(&format!("- title: {}\n", meta.title));
    out.push_str(&format!("- created: {}\n", meta.created.to_rfc3339()));
    out.push_str(&format!("- updated: {}\n", meta.updated.to_rfc3339()));
    out.push_str(&format!("- model: {}\n", meta.model));
    out.push_str(&format!("- agent: {}\n", meta.agent));
    out.push_str(&format!("- project: {}\n", meta.project));
    out.push_str(&format!(
        "- parent: {}\n",
        meta.parent.as_deref().unwrap_or("-")
    ));
    out.push_str(&format!(
        "- branch: {}\n",
        meta.branch.as_deref().unwrap_or("-")
    ));
    out.push_str(&format!("- tags: {}\n", meta.tags.join(", ")));
    out.push_str(&format!("- turns: {}\n", doc.turns.len()));
    out.push_str(&format!("- cost: {:.6}\n", meta.total_cost));
    out.push_str(&format!("- tokens: {}\n", meta.total_tokens));

    for turn in &doc.turns {
        let heading = match turn.role {
            TurnRole::User => "## User",
            TurnRole::Assistant => "## Assistant",
        };
        out.push_str(&format!("\n{heading}\n\n"));
        if !turn.content.is_empty() {
            out.push_str(&turn.content);
            out.push('\n');
        }
        for tc in &turn.tool_calls {
            let suffix = if tc.is_error { " (error)" } else { "" };
            out.push_str(&format!("\n### Tool: {}{suffix}\n\n", tc.name));
            out.push_str("```json\n");
            out.push_str(
                &serde_json::to_string_pretty(&tc.input).unwrap_or_else(|_| "{}".into()),
            );
            out.push_str("\n```\n\n```\n");
            out.push_str(&tc.result);
            out.push_str("\n```\n");
        }
    }
    out
}

pub fn parse_session(text: &str) -> anyhow::Result<SessionDocument> {
    let mut lines = text.lines().peekable();

    // Header: labelled `- key: value` lines until the first `## ` section.
    let mut fields: std::collections::HashMap<String, String> = std::collections::HashMap::new();
    while let Some(line) = lines.peek() {
        if line.starts_with("## ") {
            break;
        }
        let line = lines.next().unwrap();
        if let Some(rest) = line.strip_prefix("- ") {
            if let Some((key, value)) = rest.split_once(':') {
                fields.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
    }

    let get = |key: &str| -> anyhow::Result<String> {
        fields
            .get(key)
            .cloned()
            .with_context(|| format!("session header missing `{key}`"))
    };
    let opt = |key: &str| -> Option<String> {
        fields
            .get(key)
            .filter(|v| !v.is_empty() && *v != "-")
            .cloned()
    };
    let parse_time = |s: &str| -> anyhow::Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .with_context(|| format!("invalid timestamp: {s}"))
    };

    let meta = SessionMeta {
        id: get("id")?,
        title: get("title")?,
        created: parse_time(&get("created")?)?,
        updated: parse_time(&get("updated")?)?,
        model: opt("model").unwrap_or_default(),
        agent: opt("agent").unwrap_or_default(),
        project: opt("project").unwrap_or_default(),
        parent: opt("parent"),
        branch: opt("branch"),
        tags: opt("tags")
            .map(|t| {
                t.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default(),
        total_cost: opt("cost").and_then(|c| c.parse().ok()).unwrap_or(0.0),
        total_tokens: opt("tokens").and_then(|t| t.parse().ok()).unwrap_or(0),
    };

    // Body: sections.
    let mut turns: Vec<Turn> = Vec::new();
    let mut current: Option<Turn> = None;
    let mut content_buf = String::new();
    let mut turn_number = 0u32;

    // Appends rather than assigns: a turn's text may be flushed once
    // before its tool blocks and again (usually empty) at the section end.
    let flush_content = |turn: &mut Turn, buf: &mut String| {
        let text = buf.trim();
        if !text.is_empty() {
            if !turn.content.is_empty() {
                turn.content.push('\n');
            }
            turn.content.push_str(text);
        }
        buf.clear();
    };

    let mut lines = text.lines().peekable();
    // Skip to the first section heading.
    while let Some(line) = lines.peek() {
        if line.starts_with("## ") {
            break;
        }
        lines.next();
    }

    while let Some(line) = lines.next() {
        if let Some(role_str) = line.strip_prefix("## ") {
            if let Some(mut turn) = current.take() {
                flush_content(&mut turn, &mut content_buf);
                turns.push(turn);
            }
            let role = match role_str.trim() {
                "User" => TurnRole::User,
                "Assistant" => TurnRole::Assistant,
                other => bail!("unknown section heading: {other}"),
            };
            turn_number += 1;
            current = Some(Turn {
                turn_number,
                role,
                content: String::new(),
                tool_calls: Vec::new(),
            });
        } else if let Some(tool_line) = line.strip_prefix("### Tool: ") {
            let Some(turn) = current.as_mut() else {
                bail!("tool block outside a turn section");
            };
            flush_content(turn, &mut content_buf);
            let (name, is_error) = match tool_line.trim().strip_suffix(" (error)") {
                Some(name) => (name.to_string(), true),
                None => (tool_line.trim().to_string(), false),
            };
            let input_text = read_fence(&mut lines).context("tool block missing input fence")?;
            let result_text = read_fence(&mut lines).context("tool block missing result fence")?;
            let input: serde_json::Value = serde_json::from_str(&input_text)
                .with_context(|| format!("tool `{name}` input is not valid JSON"))?;
            turn.tool_calls.push(ToolCallRecord {
                name,
                input,
                result: result_text,
                is_error,
            });
        } else if current.is_some() {
            content_buf.push_str(line);
            content_buf.push('\n');
        }
    }
    if let Some(mut turn) = current.take() {
        flush_content(&mut turn, &mut content_buf);
        turns.push(turn);
    }

    Ok(SessionDocument { meta, turns })
}

/// Consume lines until the next fenced block and return its body.
fn read_fence<'a, I>(lines: &mut std::iter::Peekable<I>) -> Option<String>
where
    I: Iterator<Item = &'a str>,
{
    // Skip blanks before the opening fence.
    while let Some(line) = lines.peek() {
        if line.trim().is_empty() {
            lines.next();
        } else {
            break;
        }
    }
    let opening = lines.next()?;
    if !opening.trim_start().starts_with("```") {
        return None;
    }
    let mut body = String::new();
    for line in lines.by_ref() {
        if line.trim_start().starts_with("```") {
            return Some(body.trim_end_matches('\n').to_string());
        }
        body.push_str(line);
        body.push('\n');
    }
    None
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
