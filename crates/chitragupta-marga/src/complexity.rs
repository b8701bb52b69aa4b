// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::OnceLock;

use regex::Regex;

use crate::types::{Complexity, TaskType};

/// Scored complexity plus the sub-classifier's confidence.
#[derive(Debug, Clone, Copy)]
pub struct ComplexityScore {
    pub complexity: Complexity,
    pub confidence: f64,
}

fn verb_count(message: &str) -> usize {
    static VERBS: OnceLock<Regex> = OnceLock::new();
    let re = VERBS.get_or_init(|| {
        Regex::new(
            r"(?i)\b(write|implement|create|build|design|refactor|fix|debug|test|deploy|analyze|compare|optimize|migrate|review|explain|translate|summarize|search|find|run|verify)\b",
        )
        .expect("static pattern must compile")
    });
    re.find_iter(message).count()
}

fn has_multi_step_connectives(message: &str) -> bool {
    static CONNECTIVES: OnceLock<Regex> = OnceLock::new();
    let re = CONNECTIVES.get_or_init(|| {
        Regex::new(r"(?i)\b(then|after that|first|second|finally|next,|step \d|followed by)\b")
            .expect("static pattern must compile")
    });
    re.is_match(message)
}

fn domain_keyword_count(message: &str) -> usize {
    static DOMAIN: OnceLock<Regex> = OnceLock::new();
    let re = DOMAIN.get_or_init(|| {
        Regex::new(
            r"(?i)\b(architecture|algorithm|distributed|concurrency|consensus|cryptograph|complexity|invariant|protocol|scalab|optimi[sz]ation|formal(ly)? verif)\w*\b",
        )
        .expect("static pattern must compile")
    });
    re.find_iter(message).count().min(3)
}

/// Score message complexity from surface features, then apply the
/// per-task floor (reasoning is never below complex; vision never below
/// medium).
pub fn score_complexity(message: &str, task: TaskType, tools_available: bool) -> ComplexityScore {
    let mut points = 0usize;

    let len = message.chars().count();
    if len > 400 {
        points += 2;
    } else if len > 150 {
        points += 1;
    }

    let verbs = verb_count(message);
    if verbs > 5 {
        points += 2;
    } else if verbs > 2 {
        points += 1;
    }

    if has_multi_step_connectives(message) {
        points += 2;
    }

    points += domain_keyword_count(message);

    if tools_available {
        points += 1;
    }

    let mut complexity = match points {
        0 => Complexity::Trivial,
        1 | 2 => Complexity::Simple,
        3 | 4 => Complexity::Medium,
        5 | 6 => Complexity::Complex,
        _ => Complexity::Expert,
    };

    // Per-task minimums.
    let floor = match task {
        TaskType::Reasoning => Some(Complexity::Complex),
        TaskType::Vision => Some(Complexity::Medium),
        _ => None,
    };
    let floored = matches!(floor, Some(f) if complexity < f);
    if let Some(f) = floor {
        complexity = complexity.max(f);
    }

    // Surface features are a weak signal; report high confidence only at
    // the extremes, and discount floored results.
    let confidence = if floored {
        0.7
    } else {
        match points {
            0 | 1 => 0.9,
            2 | 3 => 0.75,
            4 | 5 => 0.7,
            _ => 0.8,
        }
    };

    ComplexityScore {
        complexity,
        confidence,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
