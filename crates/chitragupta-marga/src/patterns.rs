// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::OnceLock;

use regex::Regex;

use crate::types::{CheckinSubtype, TaskType};

/// A group of patterns voting for one task type.
struct PatternGroup {
    task: TaskType,
    /// Score contributed by each matching pattern.
    weight: f64,
    /// Wins ties between equal scores; higher is stronger.
    priority: u8,
    patterns: &'static [&'static str],
}

/// The scored outcome of task classification.
#[derive(Debug, Clone)]
pub struct TaskScore {
    pub task: TaskType,
    pub score: f64,
    /// Runner-up, when any second group scored at all.
    pub secondary: Option<TaskType>,
    pub secondary_score: f64,
    /// Winner/runner-up scores within the tie band.
    pub near_tie: bool,
    /// Sub-classification when the winner is smalltalk.
    pub checkin_subtype: Option<CheckinSubtype>,
    /// Confidence of this stage, in (0, 1].
    pub confidence: f64,
}

const GROUPS: &[PatternGroup] = &[
    PatternGroup {
        task: TaskType::CodeGen,
        weight: 2.0,
        priority: 6,
        patterns: &[
            r"(?i)\b(write|implement|refactor|fix|debug)\b.*\b(code|function|class|method|test|bug)\b",
            r"(?i)\b(compile|syntax|stack trace|unit test)\b",
            r"```",
            r"(?i)\b(rust|python|typescript|javascript|golang)\b",
        ],
    },
    PatternGroup {
        task: TaskType::Reasoning,
        weight: 2.0,
        priority: 5,
        patterns: &[
            r"(?i)\b(prove|derive|analyze|reason|deduce)\b",
            r"(?i)\bwhy (does|is|would|did)\b",
            r"(?i)\b(trade-?offs?|pros and cons|compare and contrast)\b",
            r"(?i)\bstep[- ]by[- ]step\b",
        ],
    },
    PatternGroup {
        task: TaskType::Search,
        weight: 3.0,
        priority: 7,
        patterns: &[
            r"(?i)^(search|find|locate|grep)\b",
            r"(?i)\b(search|look) for\b",
            r"(?i)\bfiles? (named|matching|containing)\b",
        ],
    },
    PatternGroup {
        task: TaskType::FileOp,
        weight: 3.0,
        priority: 7,
        patterns: &[
            r"(?i)^(rename|move|copy|delete|mkdir|touch)\b",
            r"(?i)\b(create|delete|rename) (a |the )?(file|folder|directory)\b",
        ],
    },
    PatternGroup {
        task: TaskType::Summarize,
        weight: 2.5,
        priority: 5,
        patterns: &[
            r"(?i)\b(summari[sz]e|tl;?dr|condense|recap)\b",
            r"(?i)\bin (a )?(few|one|two) sentences?\b",
        ],
    },
    PatternGroup {
        task: TaskType::Translate,
        weight: 2.5,
        priority: 5,
        patterns: &[
            r"(?i)\btranslate\b",
            r"(?i)\b(into|to|from) (english|french|german|spanish|japanese|hindi|sanskrit)\b",
        ],
    },
    PatternGroup {
        task: TaskType::Embedding,
        weight: 3.0,
        priority: 6,
        patterns: &[r"(?i)\b(embed|embedding|vectori[sz]e)\b"],
    },
    PatternGroup {
        task: TaskType::Memory,
        weight: 3.0,
        priority: 6,
        patterns: &[
            r"(?i)\b(remember|recall|forget) (that|this|what)\b",
            r"(?i)\bwhat did (i|we|you) (say|discuss|decide)\b",
        ],
    },
    PatternGroup {
        task: TaskType::Heartbeat,
        weight: 4.0,
        priority: 8,
        patterns: &[r"(?i)^(ping|heartbeat|healthcheck)$"],
    },
    PatternGroup {
        task: TaskType::ApiCall,
        weight: 2.5,
        priority: 5,
        patterns: &[
            r"(?i)\b(call|hit|query) (the |an? )?(api|endpoint|webhook)\b",
            r"(?i)\b(get|post|put|delete) request\b",
        ],
    },
    PatternGroup {
        task: TaskType::Compaction,
        weight: 4.0,
        priority: 8,
        patterns: &[r"(?i)\b(compact|compaction|trim) (the )?(context|history|session)\b"],
    },
    PatternGroup {
        task: TaskType::ToolExec,
        weight: 2.0,
        priority: 4,
        patterns: &[
            r"(?i)\b(run|execute|invoke)\b.*\b(tool|command|script|shell)\b",
            r"(?i)^(run|exec)\b",
        ],
    },
    PatternGroup {
        task: TaskType::Vision,
        weight: 2.0,
        priority: 4,
        patterns: &[
            r"(?i)\b(image|picture|photo|screenshot|diagram)\b",
            r"(?i)\bwhat('?s| is) (in|on) (this|the) (image|picture|screen)\b",
        ],
    },
    PatternGroup {
        task: TaskType::Smalltalk,
        weight: 1.5,
        priority: 2,
        patterns: &[
            r"(?i)^(hi|hello|hey|yo|good (morning|afternoon|evening))\b",
            r"(?i)^(hi|hello|hey|yo)[!., ]*$",
            r"(?i)^(thanks|thank you|ok|okay|cool|got it|great)[!. ]*$",
            r"(?i)^how (are|r) (you|u)\b",
            r"(?i)^(what'?s up|sup|still there\??)",
        ],
    },
    PatternGroup {
        task: TaskType::Chat,
        weight: 1.0,
        priority: 1,
        patterns: &[
            r"(?i)^(what|who|when|where|which)\b",
            r"(?i)\b(tell me|explain|describe)\b",
            r"\?",
        ],
    },
];

/// Action-bearing tasks that override a smalltalk win for mixed
/// "greeting + request" messages.
const ACTION_TASKS: &[TaskType] = &[
    TaskType::CodeGen,
    TaskType::Search,
    TaskType::FileOp,
    TaskType::Reasoning,
    TaskType::Summarize,
    TaskType::Translate,
    TaskType::ToolExec,
    TaskType::ApiCall,
];

struct CompiledGroup {
    task: TaskType,
    weight: f64,
    priority: u8,
    patterns: Vec<Regex>,
}

fn compiled() -> &'static Vec<CompiledGroup> {
    static COMPILED: OnceLock<Vec<CompiledGroup>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        GROUPS
            .iter()
            .map(|g| CompiledGroup {
                task: g.task,
                weight: g.weight,
                priority: g.priority,
                patterns: g
                    .patterns
                    .iter()
                    .map(|p| Regex::new(p).expect("static pattern must compile"))
                    .collect(),
            })
            .collect()
    })
}

fn checkin_subtype_of(message: &str) -> CheckinSubtype {
    static CHECKIN: OnceLock<Regex> = OnceLock::new();
    let re = CHECKIN.get_or_init(|| {
        Regex::new(r"(?i)^(how (are|r) (you|u)|what'?s up|sup|still there|checking in|you there)")
            .expect("static pattern must compile")
    });
    if re.is_match(message.trim()) {
        CheckinSubtype::Checkin
    } else {
        CheckinSubtype::Ack
    }
}

/// Score the message against every pattern group and pick the winner.
///
/// `tools_available` / `images_present` force tool-exec and vision
/// respectively when those groups matched at all.  A smalltalk win over a
/// message that also scored on an action group is reclassified to the
/// action group: "hi! also rename this file" is a file-op, not smalltalk.
pub fn classify_task(
    message: &str,
    tools_available: bool,
    images_present: bool,
    tie_band: f64,
) -> TaskScore {
    let mut scores: Vec<(TaskType, f64, u8)> = compiled()
        .iter()
        .map(|g| {
            let hits = g.patterns.iter().filter(|p| p.is_match(message)).count();
            (g.task, hits as f64 * g.weight, g.priority)
        })
        .filter(|(_, score, _)| *score > 0.0)
        .collect();

    // Forced classifications ride on top of the pattern scores.
    if images_present && scores.iter().any(|(t, _, _)| *t == TaskType::Vision) {
        scores.push((TaskType::Vision, 100.0, 10));
    }
    if tools_available && scores.iter().any(|(t, _, _)| *t == TaskType::ToolExec) {
        scores.push((TaskType::ToolExec, 100.0, 10));
    }

    scores.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.2.cmp(&a.2))
    });

    let (mut task, mut score) = match scores.first() {
        Some(&(t, s, _)) => (t, s),
        None => {
            // Nothing matched at all; default to chat with floor confidence.
            return TaskScore {
                task: TaskType::Chat,
                score: 0.0,
                secondary: None,
                secondary_score: 0.0,
                near_tie: false,
                checkin_subtype: None,
                confidence: 0.5,
            };
        }
    };

    let mut secondary = scores.get(1).map(|&(t, _, _)| t);
    let mut secondary_score = scores.get(1).map(|&(_, s, _)| s).unwrap_or(0.0);

    // Mixed greeting + action: the action wins, smalltalk demotes.
    if task == TaskType::Smalltalk {
        if let Some(&(action, action_score, _)) = scores
            .iter()
            .find(|(t, _, _)| ACTION_TASKS.contains(t))
        {
            secondary = Some(TaskType::Smalltalk);
            secondary_score = score;
            task = action;
            score = action_score;
        }
    }

    let near_tie = secondary_score > 0.0 && (score - secondary_score) / score <= tie_band;

    let checkin_subtype = (task == TaskType::Smalltalk).then(|| checkin_subtype_of(message));

    // Winner's share of the top-two mass, floored so a lone weak match
    // still reports a usable confidence.
    let confidence = if secondary_score > 0.0 {
        (score / (score + secondary_score)).clamp(0.5, 1.0)
    } else {
        0.9
    };

    TaskScore {
        task,
        score,
        secondary,
        secondary_score,
        near_tie,
        checkin_subtype,
        confidence,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(msg: &str) -> TaskScore {
        classify_task(msg, false, false, 0.1)
    }

    #[test]
    fn capital_question_is_chat() {
        let s = classify("What is the capital of France?");
        assert_eq!(s.task, TaskType::Chat);
    }

    #[test]
    fn search_message_classifies_search() {
        let s = classify("search for all files named *.ts");
        assert_eq!(s.task, TaskType::Search);
    }

    #[test]
    fn code_request_classifies_code_gen() {
        let s = classify("Please implement a function that parses dates and fix the bug in it");
        assert_eq!(s.task, TaskType::CodeGen);
    }

    #[test]
    fn greeting_alone_is_smalltalk_ack() {
        let s = classify("hello!");
        assert_eq!(s.task, TaskType::Smalltalk);
        assert_eq!(s.checkin_subtype, Some(CheckinSubtype::Ack));
    }

    #[test]
    fn how_are_you_is_smalltalk_checkin() {
        let s = classify("how are you");
        assert_eq!(s.task, TaskType::Smalltalk);
        assert_eq!(s.checkin_subtype, Some(CheckinSubtype::Checkin));
    }

    #[test]
    fn greeting_plus_action_is_not_smalltalk() {
        let s = classify("hello! search for files named config.yaml please");
        assert_ne!(s.task, TaskType::Smalltalk);
        assert_eq!(s.task, TaskType::Search);
        assert_eq!(s.secondary, Some(TaskType::Smalltalk));
    }

    #[test]
    fn images_present_forces_vision_when_pattern_matches() {
        let s = classify_task("what is in this image?", false, true, 0.1);
        assert_eq!(s.task, TaskType::Vision);
    }

    #[test]
    fn images_absent_does_not_force_vision() {
        let s = classify_task("describe the architecture", false, false, 0.1);
        assert_ne!(s.task, TaskType::Vision);
    }

    #[test]
    fn tools_available_forces_tool_exec_when_pattern_matches() {
        let s = classify_task("run the linter tool now", true, false, 0.1);
        assert_eq!(s.task, TaskType::ToolExec);
    }

    #[test]
    fn ping_is_heartbeat() {
        let s = classify("ping");
        assert_eq!(s.task, TaskType::Heartbeat);
    }

    #[test]
    fn unmatched_text_defaults_to_chat_with_floor_confidence() {
        let s = classify("zzzz qqqq");
        assert_eq!(s.task, TaskType::Chat);
        assert_eq!(s.confidence, 0.5);
    }

    #[test]
    fn secondary_task_is_reported() {
        let s = classify("summarize why the algorithm fails step by step");
        assert!(s.secondary.is_some());
    }

    #[test]
    fn confidence_is_in_unit_range() {
        for msg in ["hello", "fix the bug in this code", "translate to french"] {
            let s = classify(msg);
            assert!((0.0..=1.0).contains(&s.confidence), "confidence for {msg}");
        }
    }
}
