// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::debug;

use crate::cron::cron_matches;
use crate::duty::{Trigger, TriggerType};

/// Everything a trigger can see during one evaluation tick.
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    pub now: Option<DateTime<Utc>>,
    pub events: Vec<String>,
    pub metrics: HashMap<String, f64>,
    pub patterns: Vec<String>,
}

impl EvalContext {
    pub fn now(&self) -> DateTime<Utc> {
        self.now.unwrap_or_else(Utc::now)
    }
}

/// Whether `trigger` matches the tick context.  Cooldown and rate caps
/// are the engine's concern, not this function's.
pub fn evaluate_trigger(trigger: &Trigger, ctx: &EvalContext) -> bool {
    match trigger.trigger_type {
        TriggerType::Cron => cron_matches(&trigger.condition, ctx.now()),
        TriggerType::Event => ctx.events.iter().any(|e| e == &trigger.condition),
        TriggerType::Threshold => evaluate_threshold(&trigger.condition, &ctx.metrics),
        TriggerType::Pattern => evaluate_pattern(&trigger.condition, &ctx.patterns),
    }
}

/// Parse `metric op value` with op ∈ {>, <, >=, <=, ==}.  Unknown
/// metrics and parse failures never fire.
fn evaluate_threshold(condition: &str, metrics: &HashMap<String, f64>) -> bool {
    let parts: Vec<&str> = condition.split_whitespace().collect();
    if parts.len() != 3 {
        debug!(condition, "threshold condition is not `metric op value`");
        return false;
    }
    let Some(current) = metrics.get(parts[0]) else {
        return false;
    };
    let Ok(target) = parts[2].parse::<f64>() else {
        return false;
    };
    match parts[1] {
        ">" => *current > target,
        "<" => *current < target,
        ">=" => *current >= target,
        "<=" => *current <= target,
        "==" => (*current - target).abs() < f64::EPSILON,
        _ => false,
    }
}

/// Regex over each candidate; substring match when the regex fails to
/// compile.
fn evaluate_pattern(condition: &str, candidates: &[String]) -> bool {
    match Regex::new(condition) {
        Ok(re) => candidates.iter().any(|c| re.is_match(c)),
        Err(_) => candidates.iter().any(|c| c.contains(condition)),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
