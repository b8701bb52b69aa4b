// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chitragupta_model::{ContentPart, Message, Role};

/// Deterministic history compaction used when a session outgrows its
/// context budget.
///
/// Drops all but the last `keep_n` non-system messages and prepends a
/// notice.  No model call is made; the operation always succeeds
/// regardless of session size.  The split point moves backward until the
/// preserved tail starts at a turn boundary — a tail beginning with a
/// tool result would reference a tool call that was dropped, and
/// providers reject such histories.
pub fn emergency_compact(messages: &mut Vec<Message>, agent_id: &str, keep_n: usize) -> usize {
    let before = messages.len();
    let system: Vec<Message> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .cloned()
        .collect();
    let non_system: Vec<Message> = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .cloned()
        .collect();

    let mut split = non_system.len().saturating_sub(keep_n);
    while split > 0 && split < non_system.len() && starts_inside_tool_group(&non_system[split]) {
        split -= 1;
    }
    let preserved = non_system[split..].to_vec();

    let notice = Message::assistant(
        agent_id,
        "[Context compacted: earlier history was dropped to prevent a context-window \
         overflow. Ask the user to re-state anything that is missing.]",
    );
    messages.clear();
    messages.extend(system);
    messages.push(notice);
    messages.extend(preserved);
    before
}

fn starts_inside_tool_group(message: &Message) -> bool {
    message.parts.iter().any(|p| {
        matches!(
            p,
            ContentPart::ToolResult { .. } | ContentPart::ToolCall { .. }
        )
    })
}

/// Truncate an oversized tool result, keeping the head and tail around a
/// marker.  Tool output is most informative at its edges: the preamble
/// and the final result lines.
pub fn truncate_middle(content: &str, cap_chars: usize) -> String {
    if content.len() <= cap_chars {
        return content.to_string();
    }
    let half = cap_chars / 2;
    let head_end = content
        .char_indices()
        .take_while(|(i, _)| *i < half)
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    let tail_start = content
        .char_indices()
        .find(|(i, _)| *i >= content.len().saturating_sub(half))
        .map(|(i, _)| i)
        .unwrap_or(content.len());
    format!(
        "{}\n[... {} bytes truncated ...]\n{}",
        &content[..head_end],
        content.len() - head_end - (content.len() - tail_start),
        &content[tail_start..]
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn user(text: &str) -> Message {
        Message::user("a", text)
    }

    fn assistant_with_call(call_id: &str) -> Message {
        Message::new(
            Role::Assistant,
            "a",
            vec![ContentPart::tool_call(call_id, "shell", "{}")],
        )
    }

    fn tool_result(call_id: &str) -> Message {
        Message::tool_result("a", call_id, "ok", false)
    }

    #[test]
    fn keeps_recent_tail_and_system_messages() {
        let mut messages = vec![
            Message::system("a", "prompt"),
            user("one"),
            user("two"),
            user("three"),
            user("four"),
        ];
        let before = emergency_compact(&mut messages, "a", 2);
        assert_eq!(before, 5);
        // system + notice + last two.
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[2].text(), "three");
        assert_eq!(messages[3].text(), "four");
    }

    #[test]
    fn split_never_orphans_a_tool_result() {
        let mut messages = vec![
            user("start"),
            user("middle"),
            assistant_with_call("c1"),
            tool_result("c1"),
            user("end"),
        ];
        // keep_n = 2 would split inside the tool group; the split must
        // back up to include the whole call/result pair.
        emergency_compact(&mut messages, "a", 2);
        let first_kept_after_notice = &messages[1..];
        // The notice is followed by the intact tool group.
        let has_call = first_kept_after_notice
            .iter()
            .any(|m| m.parts.iter().any(|p| matches!(p, ContentPart::ToolCall { .. })));
        let has_result = first_kept_after_notice
            .iter()
            .any(|m| m.parts.iter().any(|p| matches!(p, ContentPart::ToolResult { .. })));
        assert!(has_call && has_result);
    }

    #[test]
    fn compacting_an_empty_history_only_adds_notice() {
        let mut messages = Vec::new();
        emergency_compact(&mut messages, "a", 5);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].text().contains("compacted"));
    }

    #[test]
    fn truncate_middle_keeps_short_content() {
        assert_eq!(truncate_middle("short", 100), "short");
    }

    #[test]
    fn truncate_middle_keeps_head_and_tail() {
        let content = format!("{}MIDDLE{}", "head ".repeat(100), " tail".repeat(100));
        let out = truncate_middle(&content, 200);
        assert!(out.len() < content.len());
        assert!(out.starts_with("head "));
        assert!(out.ends_with(" tail"));
        assert!(out.contains("truncated"));
    }
}
