// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Datelike, Timelike, Utc};

/// Match a 5-field cron expression (`minute hour day-of-month month
/// day-of-week`) against an instant.
///
/// Supported field syntax: `*`, `*/n` steps, plain numbers, `a-b` ranges,
/// and comma lists of the above.  Malformed expressions return `false`
/// rather than firing a duty on garbage.
pub fn cron_matches(expr: &str, at: DateTime<Utc>) -> bool {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return false;
    }
    let values = [
        at.minute(),
        at.hour(),
        at.day(),
        at.month(),
        at.weekday().num_days_from_sunday(),
    ];
    fields
        .iter()
        .zip(values.iter())
        .all(|(field, value)| field_matches(field, *value))
}

fn field_matches(field: &str, value: u32) -> bool {
    field.split(',').any(|part| part_matches(part, value))
}

fn part_matches(part: &str, value: u32) -> bool {
    if part == "*" {
        return true;
    }
    if let Some(step) = part.strip_prefix("*/") {
        return match step.parse::<u32>() {
            Ok(n) if n > 0 => value % n == 0,
            _ => false,
        };
    }
    if let Some((lo, hi)) = part.split_once('-') {
        return match (lo.parse::<u32>(), hi.parse::<u32>()) {
            (Ok(lo), Ok(hi)) => (lo..=hi).contains(&value),
            _ => false,
        };
    }
    part.parse::<u32>().map(|n| n == value).unwrap_or(false)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
