// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! On-disk session transcripts with a write-through SQLite index.
//!
//! The markdown files under `sessions/` are the source of truth; the
//! database is an index for listing and full-text search and can always
//! be rebuilt from disk via [`SessionStore::migrate_existing_sessions`].

mod db;
mod export;
mod markdown;
mod naming;
mod search;
mod session;
mod store;

pub use db::{Database, SessionRow};
pub use export::{export_to_json, import_from_json, EXPORT_VERSION};
pub use markdown::{parse_session, render_session};
pub use naming::{next_session_id, project_hash};
pub use search::{cosine_similarity, sanitize_query, search_memory, MemoryHit};
pub use session::{SessionDocument, SessionMeta, ToolCallRecord, Turn, TurnRole};
pub use store::{SearchResult, SessionStore, StoreError};
