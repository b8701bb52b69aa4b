// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};

/// 8-hex FNV-1a over the canonical project path.
pub fn project_hash(project: &str) -> String {
    chitragupta_model::fnv1a_hex(project)
}

/// Build the next free session id for (date, project).
///
/// Ids have the form `session-YYYY-MM-DD-<hash8>` with a `-N` suffix when
/// the base id is already taken on the same day; `taken` reports whether a
/// candidate id exists.
pub fn next_session_id(
    date: DateTime<Utc>,
    project: &str,
    mut taken: impl FnMut(&str) -> bool,
) -> String {
    let base = format!(
        "session-{}-{}",
        date.format("%Y-%m-%d"),
        project_hash(project)
    );
    if !taken(&base) {
        return base;
    }
    let mut n = 2u32;
    loop {
        let candidate = format!("{base}-{n}");
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Relative transcript path for a session id under the nested layout:
/// `sessions/<YYYY>/<MM>/<projectHash>/<id>.md`.
pub fn nested_relative_path(id: &str, created: DateTime<Utc>, project: &str) -> std::path::PathBuf {
    std::path::PathBuf::from("sessions")
        .join(created.format("%Y").to_string())
        .join(created.format("%m").to_string())
        .join(project_hash(project))
        .join(format!("{id}.md"))
}

/// Legacy flat layout: `sessions/<projectHash>/<id>.md`.
pub fn legacy_relative_path(id: &str, project: &str) -> std::path::PathBuf {
    std::path::PathBuf::from("sessions")
        .join(project_hash(project))
        .join(format!("{id}.md"))
}
