// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::db::{Database, SessionRow};
use crate::markdown::{parse_session, render_session};
use crate::naming::{nested_relative_path, next_session_id};
use crate::search::sanitize_query;
use crate::session::{SessionDocument, SessionMeta, Turn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// One `search_sessions` hit.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub session: SessionRow,
    /// FTS relevance plus recency boost; higher is better.
    pub score: f64,
}

/// Transcript store rooted at one directory, with the index database at
/// `<root>/index.db`.  One writer per session id at a time; distinct
/// sessions proceed in parallel.
pub struct SessionStore {
    root: PathBuf,
    db: Mutex<Database>,
    writers: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(root.join("sessions"))
            .with_context(|| format!("creating store root {}", root.display()))?;
        let db = Database::open(&root.join("index.db"))?;
        Ok(Self {
            root,
            db: Mutex::new(db),
            writers: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run a closure against the index database.  Used by the learning
    /// subsystems to persist their own rows.
    pub fn with_db<R>(&self, f: impl FnOnce(&Database) -> R) -> R {
        let db = self.db.lock().unwrap();
        f(&db)
    }

    fn writer_for(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut writers = self.writers.lock().unwrap();
        writers
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Create a new session and write its (empty) transcript.
    pub async fn create_session(
        &self,
        project: &str,
        title: &str,
        agent: &str,
        model: &str,
    ) -> Result<SessionMeta, StoreError> {
        let now = Utc::now();
        let id = {
            let db = self.db.lock().unwrap();
            let root = self.root.clone();
            next_session_id(now, project, |candidate| {
                db.get_session(candidate).ok().flatten().is_some()
                    || root
                        .join(nested_relative_path(candidate, now, project))
                        .exists()
            })
        };
        let meta = SessionMeta {
            id: id.clone(),
            title: title.to_string(),
            created: now,
            updated: now,
            model: model.to_string(),
            agent: agent.to_string(),
            project: project.to_string(),
            parent: None,
            branch: None,
            tags: Vec::new(),
            total_cost: 0.0,
            total_tokens: 0,
        };
        let doc = SessionDocument {
            meta: meta.clone(),
            turns: Vec::new(),
        };

        let guard = self.writer_for(&id);
        let _held = guard.lock().await;
        let rel = nested_relative_path(&id, now, project);
        self.write_document(&doc, &rel)?;
        debug!(session = %id, "created session");
        Ok(meta)
    }

    /// Append one turn: rewrite the transcript, then write through to the
    /// index.
    pub async fn add_turn(&self, session_id: &str, turn: Turn) -> Result<(), StoreError> {
        let guard = self.writer_for(session_id);
        let _held = guard.lock().await;

        let (mut doc, rel) = self.load_with_path(session_id)?;
        let mut turn = turn;
        if turn.turn_number == 0 {
            turn.turn_number = doc.turns.len() as u32 + 1;
        }
        doc.turns.push(turn.clone());
        doc.meta.updated = Utc::now();
        self.write_document(&doc, &rel)?;

        let db = self.db.lock().unwrap();
        db.insert_turn(
            session_id,
            turn.turn_number,
            turn.role.as_str(),
            &turn.content,
            &doc.meta.updated.to_rfc3339(),
        )?;
        db.upsert_session(&row_from_doc(&doc, &rel))?;
        Ok(())
    }

    /// Load a session by id, resolving the nested layout first and the
    /// legacy flat layout second.
    pub fn load_session(&self, session_id: &str) -> Result<SessionDocument, StoreError> {
        self.load_with_path(session_id).map(|(doc, _)| doc)
    }

    fn load_with_path(&self, session_id: &str) -> Result<(SessionDocument, PathBuf), StoreError> {
        // The index knows the path for indexed sessions.
        let indexed = {
            let db = self.db.lock().unwrap();
            db.get_session(session_id)?.map(|row| row.file_path)
        };
        if let Some(rel) = indexed {
            let path = self.root.join(&rel);
            if path.exists() {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?;
                return Ok((parse_session(&text)?, PathBuf::from(rel)));
            }
        }
        // Fall back to scanning both layouts on disk.
        if let Some(rel) = self.find_on_disk(session_id)? {
            let text = std::fs::read_to_string(self.root.join(&rel))
                .with_context(|| format!("reading {}", rel.display()))?;
            return Ok((parse_session(&text)?, rel));
        }
        Err(StoreError::NotFound(session_id.to_string()))
    }

    fn find_on_disk(&self, session_id: &str) -> Result<Option<PathBuf>, StoreError> {
        let target = format!("{session_id}.md");
        let sessions_dir = self.root.join("sessions");
        let mut stack = vec![sessions_dir.clone()];
        while let Some(dir) = stack.pop() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(e) => e,
                Err(_) => continue,
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if path.file_name().map(|n| n == target.as_str()).unwrap_or(false) {
                    let rel = path
                        .strip_prefix(&self.root)
                        .map(Path::to_path_buf)
                        .unwrap_or(path);
                    return Ok(Some(rel));
                }
            }
        }
        Ok(None)
    }

    fn write_document(&self, doc: &SessionDocument, rel: &Path) -> Result<(), StoreError> {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        std::fs::write(&path, render_session(doc))
            .with_context(|| format!("writing {}", path.display()))?;
        let db = self.db.lock().unwrap();
        db.upsert_session(&row_from_doc(doc, rel))?;
        Ok(())
    }

    pub fn list_sessions(&self, project: Option<&str>) -> Result<Vec<SessionRow>, StoreError> {
        let db = self.db.lock().unwrap();
        Ok(db.list_sessions(project)?)
    }

    /// Sanitized full-text search with a recency boost: later-updated
    /// sessions rank higher on relevance ties.
    pub fn search_sessions(
        &self,
        query: &str,
        project: Option<&str>,
    ) -> Result<Vec<SearchResult>, StoreError> {
        let sanitized = sanitize_query(query);
        if sanitized.is_empty() {
            return Ok(Vec::new());
        }
        let hits = {
            let db = self.db.lock().unwrap();
            db.fts_search(&sanitized)?
        };
        let now = Utc::now();
        let mut results = Vec::new();
        for (session_id, relevance) in hits {
            let row = {
                let db = self.db.lock().unwrap();
                db.get_session(&session_id)?
            };
            let Some(row) = row else {
                warn!(session = %session_id, "FTS hit for unindexed session");
                continue;
            };
            if let Some(p) = project {
                if row.project != p {
                    continue;
                }
            }
            let age_days = chrono::DateTime::parse_from_rfc3339(&row.updated)
                .map(|u| (now - u.with_timezone(&Utc)).num_seconds().max(0) as f64 / 86_400.0)
                .unwrap_or(365.0);
            let score = relevance + 0.5 / (1.0 + age_days);
            results.push(SearchResult {
                session: row,
                score,
            });
        }
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(results)
    }

    /// Import a session document wholesale (export/import path).
    pub async fn import_session(&self, doc: SessionDocument) -> Result<(), StoreError> {
        let guard = self.writer_for(&doc.meta.id);
        let _held = guard.lock().await;
        let rel = nested_relative_path(&doc.meta.id, doc.meta.created, &doc.meta.project);
        self.write_document(&doc, &rel)?;
        let db = self.db.lock().unwrap();
        for turn in &doc.turns {
            db.insert_turn(
                &doc.meta.id,
                turn.turn_number,
                turn.role.as_str(),
                &turn.content,
                &doc.meta.updated.to_rfc3339(),
            )?;
        }
        Ok(())
    }

    /// Delete the transcript, its index rows, and any directories the
    /// removal leaves empty.
    pub async fn delete_session(&self, session_id: &str) -> Result<(), StoreError> {
        let guard = self.writer_for(session_id);
        let _held = guard.lock().await;

        let rel = match self.load_with_path(session_id) {
            Ok((_, rel)) => Some(rel),
            Err(StoreError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        if let Some(rel) = rel {
            let path = self.root.join(&rel);
            if path.exists() {
                std::fs::remove_file(&path)
                    .with_context(|| format!("removing {}", path.display()))?;
            }
            // Prune now-empty parents up to the sessions root.
            let sessions_root = self.root.join("sessions");
            let mut dir = path.parent().map(Path::to_path_buf);
            while let Some(d) = dir {
                if d == sessions_root || !d.starts_with(&sessions_root) {
                    break;
                }
                if std::fs::read_dir(&d).map(|mut e| e.next().is_none()).unwrap_or(false) {
                    let _ = std::fs::remove_dir(&d);
                    dir = d.parent().map(Path::to_path_buf);
                } else {
                    break;
                }
            }
        }
        let db = self.db.lock().unwrap();
        db.delete_session(session_id)?;
        Ok(())
    }

    /// Scan the transcript tree and index any sessions missing from the
    /// database.  Returns `(migrated, skipped)`.
    pub fn migrate_existing_sessions(&self) -> Result<(usize, usize), StoreError> {
        let mut migrated = 0usize;
        let mut skipped = 0usize;
        let sessions_dir = self.root.join("sessions");
        let mut stack = vec![sessions_dir];
        while let Some(dir) = stack.pop() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(e) => e,
                Err(_) => continue,
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                    continue;
                }
                if path.extension().map(|e| e != "md").unwrap_or(true) {
                    continue;
                }
                let text = match std::fs::read_to_string(&path) {
                    Ok(t) => t,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "skipping unreadable transcript");
                        skipped += 1;
                        continue;
                    }
                };
                let doc = match parse_session(&text) {
                    Ok(d) => d,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "skipping unparsable transcript");
                        skipped += 1;
                        continue;
                    }
                };
                let already = {
                    let db = self.db.lock().unwrap();
                    db.get_session(&doc.meta.id)?.is_some()
                };
                if already {
                    skipped += 1;
                    continue;
                }
                let rel = path
                    .strip_prefix(&self.root)
                    .map(Path::to_path_buf)
                    .unwrap_or(path.clone());
                let db = self.db.lock().unwrap();
                db.upsert_session(&row_from_doc(&doc, &rel))?;
                for turn in &doc.turns {
                    db.insert_turn(
                        &doc.meta.id,
                        turn.turn_number,
                        turn.role.as_str(),
                        &turn.content,
                        &doc.meta.updated.to_rfc3339(),
                    )?;
                }
                migrated += 1;
            }
        }
        Ok((migrated, skipped))
    }
}

fn row_from_doc(doc: &SessionDocument, rel: &Path) -> SessionRow {
    let meta = &doc.meta;
    SessionRow {
        id: meta.id.clone(),
        project: meta.project.clone(),
        title: meta.title.clone(),
        created: meta.created.to_rfc3339(),
        updated: meta.updated.to_rfc3339(),
        agent: meta.agent.clone(),
        model: meta.model.clone(),
        cost: meta.total_cost,
        tokens: meta.total_tokens as i64,
        tags: meta.tags.join(","),
        parent: meta.parent.clone(),
        branch: meta.branch.clone(),
        turn_count: doc.turns.len() as i64,
        file_path: rel.to_string_lossy().into_owned(),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use crate::export::{export_to_json, import_from_json};
    use crate::naming::legacy_relative_path as legacy_path;
    use crate::session::{ToolCallRecord, TurnRole};

    use super::*;

    fn store() -> (tempfile::TempDir, SessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn create_and_load_round_trip() {
        let (_tmp, store) = store();
        let meta = store
            .create_session("/p", "hello", "root", "model-x")
            .await
            .unwrap();
        let doc = store.load_session(&meta.id).unwrap();
        assert_eq!(doc.meta.title, "hello");
        assert!(doc.turns.is_empty());
    }

    #[tokio::test]
    async fn same_day_sessions_get_collision_suffix() {
        let (_tmp, store) = store();
        let a = store.create_session("/p", "a", "r", "m").await.unwrap();
        let b = store.create_session("/p", "b", "r", "m").await.unwrap();
        assert_ne!(a.id, b.id);
        assert!(b.id.ends_with("-2"), "second id was {}", b.id);
    }

    #[tokio::test]
    async fn add_turn_updates_file_and_index() {
        let (_tmp, store) = store();
        let meta = store.create_session("/p", "t", "r", "m").await.unwrap();
        store
            .add_turn(&meta.id, Turn::user(0, "first message"))
            .await
            .unwrap();
        store
            .add_turn(&meta.id, Turn::assistant(0, "reply"))
            .await
            .unwrap();

        let doc = store.load_session(&meta.id).unwrap();
        assert_eq!(doc.turns.len(), 2);
        assert_eq!(doc.turns[0].turn_number, 1);
        assert_eq!(doc.turns[1].turn_number, 2);

        // Index turn_count equals the file's turn count.
        let rows = store.list_sessions(Some("/p")).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].turn_count, 2);
        let db_count = store.with_db(|db| db.turn_count(&meta.id).unwrap());
        assert_eq!(db_count, 2);
    }

    #[tokio::test]
    async fn list_sessions_returns_each_session_once() {
        let (_tmp, store) = store();
        let a = store.create_session("/p", "a", "r", "m").await.unwrap();
        store.add_turn(&a.id, Turn::user(0, "x")).await.unwrap();
        store.add_turn(&a.id, Turn::assistant(0, "y")).await.unwrap();
        let rows = store.list_sessions(Some("/p")).unwrap();
        assert_eq!(rows.iter().filter(|r| r.id == a.id).count(), 1);
    }

    #[tokio::test]
    async fn search_finds_matching_project_sessions() {
        let (_tmp, store) = store();
        let a = store.create_session("/p1", "a", "r", "m").await.unwrap();
        store
            .add_turn(&a.id, Turn::user(0, "the borrow checker is strict"))
            .await
            .unwrap();
        let b = store.create_session("/p2", "b", "r", "m").await.unwrap();
        store
            .add_turn(&b.id, Turn::user(0, "borrowing books from the library"))
            .await
            .unwrap();

        let hits = store.search_sessions("borrow", Some("/p1")).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].session.id, a.id);
        assert_eq!(hits[0].session.project, "/p1");

        let all = store.search_sessions("borrow", None).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn search_with_only_noise_tokens_is_empty() {
        let (_tmp, store) = store();
        let a = store.create_session("/p", "a", "r", "m").await.unwrap();
        store.add_turn(&a.id, Turn::user(0, "hello")).await.unwrap();
        assert!(store.search_sessions("a * (", None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_removes_file_index_and_empty_dirs() {
        let (_tmp, store) = store();
        let meta = store.create_session("/p", "t", "r", "m").await.unwrap();
        store.add_turn(&meta.id, Turn::user(0, "x")).await.unwrap();
        store.delete_session(&meta.id).await.unwrap();

        assert!(matches!(
            store.load_session(&meta.id),
            Err(StoreError::NotFound(_))
        ));
        assert!(store.list_sessions(None).unwrap().is_empty());
        // The per-project directory was pruned.
        let hash_dir = store
            .root()
            .join("sessions")
            .join(meta.created.format("%Y").to_string())
            .join(meta.created.format("%m").to_string());
        assert!(!hash_dir.join(crate::naming::project_hash("/p")).exists());
    }

    #[tokio::test]
    async fn legacy_flat_layout_is_resolvable() {
        let (_tmp, store) = store();
        let created = Utc::now();
        let doc = SessionDocument {
            meta: SessionMeta {
                id: "session-2025-01-01-deadbeef".into(),
                title: "old".into(),
                created,
                updated: created,
                model: "m".into(),
                agent: "r".into(),
                project: "/old".into(),
                parent: None,
                branch: None,
                tags: vec![],
                total_cost: 0.0,
                total_tokens: 0,
            },
            turns: vec![Turn::user(1, "legacy content")],
        };
        let rel = legacy_path(&doc.meta.id, "/old");
        let path = store.root().join(&rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, render_session(&doc)).unwrap();

        let loaded = store.load_session("session-2025-01-01-deadbeef").unwrap();
        assert_eq!(loaded.turns[0].content, "legacy content");
    }

    #[tokio::test]
    async fn migrate_indexes_unknown_files_and_skips_known() {
        let (_tmp, store) = store();
        // One indexed session.
        let known = store.create_session("/p", "known", "r", "m").await.unwrap();
        store.add_turn(&known.id, Turn::user(0, "x")).await.unwrap();
        // One on-disk-only session in the legacy layout.
        let created = Utc::now();
        let doc = SessionDocument {
            meta: SessionMeta {
                id: "session-2025-06-01-cafebabe".into(),
                title: "orphan".into(),
                created,
                updated: created,
                model: "m".into(),
                agent: "r".into(),
                project: "/q".into(),
                parent: None,
                branch: None,
                tags: vec![],
                total_cost: 0.0,
                total_tokens: 0,
            },
            turns: vec![Turn::user(1, "catalog me")],
        };
        let rel = legacy_path(&doc.meta.id, "/q");
        let path = store.root().join(&rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, render_session(&doc)).unwrap();

        let (migrated, skipped) = store.migrate_existing_sessions().unwrap();
        assert_eq!(migrated, 1);
        assert_eq!(skipped, 1);
        // The orphan is now searchable.
        let hits = store.search_sessions("catalog", Some("/q")).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn export_import_into_fresh_store_preserves_session() {
        // Scenario: a session with a successful and a failed tool call
        // survives export → import into a new store.
        let (_tmp, store) = store();
        let meta = store.create_session("/p", "rt", "r", "m").await.unwrap();
        store
            .add_turn(&meta.id, Turn::user(0, "run the build"))
            .await
            .unwrap();
        store
            .add_turn(
                &meta.id,
                Turn {
                    turn_number: 0,
                    role: TurnRole::Assistant,
                    content: "building".into(),
                    tool_calls: vec![
                        ToolCallRecord {
                            name: "shell".into(),
                            input: serde_json::json!({"cmd": "make"}),
                            result: "ok".into(),
                            is_error: false,
                        },
                        ToolCallRecord {
                            name: "shell".into(),
                            input: serde_json::json!({"cmd": "make deploy"}),
                            result: "denied".into(),
                            is_error: true,
                        },
                    ],
                },
            )
            .await
            .unwrap();

        let exported = export_to_json(&store.load_session(&meta.id).unwrap());

        let (_tmp2, fresh) = {
            let dir = tempfile::tempdir().unwrap();
            let s = SessionStore::open(dir.path()).unwrap();
            (dir, s)
        };
        let imported = import_from_json(&exported).unwrap();
        fresh.import_session(imported).await.unwrap();

        let loaded = fresh.load_session(&meta.id).unwrap();
        assert_eq!(loaded.meta.title, "rt");
        assert_eq!(loaded.turns.len(), 2);
        let calls = &loaded.turns[1].tool_calls;
        assert!(!calls[0].is_error);
        assert!(calls[1].is_error);
    }
}
