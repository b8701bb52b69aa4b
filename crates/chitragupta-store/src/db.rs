// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

// Schema version (increment when changing table definitions).
pub const SCHEMA_VERSION: i32 = 1;

/// Per-session row in the write-through index.
#[derive(Debug, Clone)]
pub struct SessionRow {
    pub id: String,
    pub project: String,
    pub title: String,
    pub created: String,
    pub updated: String,
    pub agent: String,
    pub model: String,
    pub cost: f64,
    pub tokens: i64,
    pub tags: String,
    pub parent: Option<String>,
    pub branch: Option<String>,
    pub turn_count: i64,
    pub file_path: String,
}

/// The local relational store behind the session index and the learning
/// subsystems.  The transcript files are the source of truth; everything
/// here can be rebuilt from disk.
pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open database: {}", db_path.display()))?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Create all tables.  Idempotent; versioned via `PRAGMA user_version`.
    pub fn init_schema(&self) -> Result<()> {
        let current_version: i32 =
            self.conn
                .query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if current_version != 0 && current_version != SCHEMA_VERSION {
            self.drop_all_tables()?;
        }

        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                project TEXT NOT NULL,
                title TEXT NOT NULL,
                created TEXT NOT NULL,
                updated TEXT NOT NULL,
                agent TEXT,
                model TEXT,
                cost REAL DEFAULT 0,
                tokens INTEGER DEFAULT 0,
                tags TEXT DEFAULT '',
                parent TEXT,
                branch TEXT,
                turn_count INTEGER DEFAULT 0,
                file_path TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS turns (
                session_id TEXT NOT NULL,
                turn_number INTEGER NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created TEXT NOT NULL,
                PRIMARY KEY (session_id, turn_number),
                FOREIGN KEY (session_id) REFERENCES sessions(id)
            );

            CREATE VIRTUAL TABLE IF NOT EXISTS turns_fts USING fts5(
                session_id UNINDEXED,
                turn_number UNINDEXED,
                content,
                tokenize='porter'
            );

            CREATE TABLE IF NOT EXISTS vasanas (
                id TEXT PRIMARY KEY,
                tendency TEXT NOT NULL,
                description TEXT,
                strength REAL NOT NULL,
                stability REAL NOT NULL,
                valence TEXT NOT NULL,
                sources TEXT DEFAULT '',
                reinforcement_count INTEGER DEFAULT 0,
                last_activated TEXT,
                predictive_accuracy REAL DEFAULT 0,
                project TEXT NOT NULL,
                created TEXT NOT NULL,
                updated TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS consolidation_rules (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                rule TEXT NOT NULL,
                created TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS samskaras (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS decisions (
                id TEXT PRIMARY KEY,
                created TEXT NOT NULL,
                task_type TEXT NOT NULL,
                complexity TEXT NOT NULL,
                provider TEXT NOT NULL,
                model TEXT NOT NULL,
                confidence REAL NOT NULL,
                raw TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS kartavyas (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                trigger TEXT NOT NULL,
                action TEXT NOT NULL,
                confidence REAL NOT NULL,
                success_count INTEGER DEFAULT 0,
                failure_count INTEGER DEFAULT 0,
                last_executed TEXT,
                project TEXT NOT NULL,
                created TEXT NOT NULL,
                updated TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS niyama_proposals (
                id TEXT PRIMARY KEY,
                kartavya_id TEXT NOT NULL,
                status TEXT NOT NULL,
                payload TEXT NOT NULL,
                created TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_project ON sessions(project);
            CREATE INDEX IF NOT EXISTS idx_sessions_updated ON sessions(updated DESC);
            CREATE INDEX IF NOT EXISTS idx_turns_session ON turns(session_id);
            CREATE INDEX IF NOT EXISTS idx_vasanas_project ON vasanas(project);
            CREATE INDEX IF NOT EXISTS idx_kartavyas_status ON kartavyas(status);
            "#,
        )?;

        self.conn
            .execute(&format!("PRAGMA user_version = {SCHEMA_VERSION}"), [])?;
        Ok(())
    }

    fn drop_all_tables(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            DROP TABLE IF EXISTS turns_fts;
            DROP TABLE IF EXISTS turns;
            DROP TABLE IF EXISTS sessions;
            DROP TABLE IF EXISTS vasanas;
            DROP TABLE IF EXISTS consolidation_rules;
            DROP TABLE IF EXISTS samskaras;
            DROP TABLE IF EXISTS decisions;
            DROP TABLE IF EXISTS kartavyas;
            DROP TABLE IF EXISTS niyama_proposals;
            "#,
        )?;
        Ok(())
    }

    pub fn upsert_session(&self, row: &SessionRow) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO sessions
                (id, project, title, created, updated, agent, model, cost,
                 tokens, tags, parent, branch, turn_count, file_path)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(id) DO UPDATE SET
                project = ?2, title = ?3, created = ?4, updated = ?5,
                agent = ?6, model = ?7, cost = ?8, tokens = ?9, tags = ?10,
                parent = ?11, branch = ?12, turn_count = ?13, file_path = ?14
            "#,
            params![
                &row.id,
                &row.project,
                &row.title,
                &row.created,
                &row.updated,
                &row.agent,
                &row.model,
                row.cost,
                row.tokens,
                &row.tags,
                &row.parent,
                &row.branch,
                row.turn_count,
                &row.file_path,
            ],
        )?;
        Ok(())
    }

    pub fn insert_turn(
        &self,
        session_id: &str,
        turn_number: u32,
        role: &str,
        content: &str,
        created: &str,
    ) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO turns (session_id, turn_number, role, content, created)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(session_id, turn_number) DO UPDATE SET
                role = ?3, content = ?4
            "#,
            params![session_id, turn_number, role, content, created],
        )?;
        // Write-through to the FTS table; re-indexing a turn replaces its
        // previous row.
        self.conn.execute(
            "DELETE FROM turns_fts WHERE session_id = ?1 AND turn_number = ?2",
            params![session_id, turn_number],
        )?;
        self.conn.execute(
            "INSERT INTO turns_fts (session_id, turn_number, content) VALUES (?1, ?2, ?3)",
            params![session_id, turn_number, content],
        )?;
        Ok(())
    }

    /// Append one routing decision to the decision log.
    pub fn record_decision(
        &self,
        task_type: &str,
        complexity: &str,
        provider: &str,
        model: &str,
        confidence: f64,
        raw: &str,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO decisions (id, created, task_type, complexity, provider, model, confidence, raw) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                uuid::Uuid::new_v4().to_string(),
                chrono::Utc::now().to_rfc3339(),
                task_type,
                complexity,
                provider,
                model,
                confidence,
                raw
            ],
        )?;
        Ok(())
    }

    pub fn decision_count(&self) -> Result<i64> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM decisions", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn get_session(&self, id: &str) -> Result<Option<SessionRow>> {
        self.conn
            .query_row(
                "SELECT id, project, title, created, updated, agent, model, cost, \
                 tokens, tags, parent, branch, turn_count, file_path \
                 FROM sessions WHERE id = ?1",
                [id],
                Self::row_to_session,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn list_sessions(&self, project: Option<&str>) -> Result<Vec<SessionRow>> {
        let mut out = Vec::new();
        match project {
            Some(p) => {
                let mut stmt = self.conn.prepare(
                    "SELECT id, project, title, created, updated, agent, model, cost, \
                     tokens, tags, parent, branch, turn_count, file_path \
                     FROM sessions WHERE project = ?1 ORDER BY updated DESC",
                )?;
                let rows = stmt.query_map([p], Self::row_to_session)?;
                for r in rows {
                    out.push(r?);
                }
            }
            None => {
                let mut stmt = self.conn.prepare(
                    "SELECT id, project, title, created, updated, agent, model, cost, \
                     tokens, tags, parent, branch, turn_count, file_path \
                     FROM sessions ORDER BY updated DESC",
                )?;
                let rows = stmt.query_map([], Self::row_to_session)?;
                for r in rows {
                    out.push(r?);
                }
            }
        }
        Ok(out)
    }

    fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
        Ok(SessionRow {
            id: row.get(0)?,
            project: row.get(1)?,
            title: row.get(2)?,
            created: row.get(3)?,
            updated: row.get(4)?,
            agent: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
            model: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
            cost: row.get(7)?,
            tokens: row.get(8)?,
            tags: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
            parent: row.get(10)?,
            branch: row.get(11)?,
            turn_count: row.get(12)?,
            file_path: row.get(13)?,
        })
    }

    /// MATCH the sanitized query against the FTS index.  Returns
    /// `(session_id, relevance)` deduplicated by session, best first;
    /// relevance is positive, higher is better.
    pub fn fts_search(&self, match_query: &str) -> Result<Vec<(String, f64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT session_id, bm25(turns_fts) AS rank \
             FROM turns_fts WHERE turns_fts MATCH ?1 ORDER BY rank",
        )?;
        let rows = stmt.query_map([match_query], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?;
        let mut best: std::collections::HashMap<String, f64> = std::collections::HashMap::new();
        for r in rows {
            let (session_id, rank) = r?;
            // bm25 ranks are lower-is-better; flip the sign.
            let relevance = -rank;
            let entry = best.entry(session_id).or_insert(f64::MIN);
            if relevance > *entry {
                *entry = relevance;
            }
        }
        let mut out: Vec<(String, f64)> = best.into_iter().collect();
        out.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(out)
    }

    pub fn delete_session(&self, id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM turns_fts WHERE session_id = ?1", [id])?;
        self.conn
            .execute("DELETE FROM turns WHERE session_id = ?1", [id])?;
        self.conn
            .execute("DELETE FROM sessions WHERE id = ?1", [id])?;
        Ok(())
    }

    pub fn turn_count(&self, session_id: &str) -> Result<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM turns WHERE session_id = ?1",
            [session_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ── Key-value blobs (samskaras) ───────────────────────────────────────────

    pub fn put_blob(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO samskaras (key, value, updated) VALUES (?1, ?2, ?3) \
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated = ?3",
            params![key, value, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get_blob(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row("SELECT value FROM samskaras WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(Into::into)
    }

    pub fn delete_blob(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM samskaras WHERE key = ?1", [key])?;
        Ok(())
    }

    /// Raw connection access for sibling crates persisting their own rows
    /// (vasanas, kartavyas, decisions).
    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn session_row(id: &str, project: &str, updated: &str) -> SessionRow {
        SessionRow {
            id: id.into(),
            project: project.into(),
            title: "t".into(),
            created: "2026-08-01T00:00:00Z".into(),
            updated: updated.into(),
            agent: "root".into(),
            model: "m".into(),
            cost: 0.0,
            tokens: 0,
            tags: String::new(),
            parent: None,
            branch: None,
            turn_count: 0,
            file_path: format!("sessions/x/{id}.md"),
        }
    }

    #[test]
    fn schema_initializes_idempotently() {
        let db = Database::open_in_memory().unwrap();
        db.init_schema().unwrap();
        db.init_schema().unwrap();
        assert!(db.list_sessions(None).unwrap().is_empty());
    }

    #[test]
    fn upsert_and_get_session() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_session(&session_row("s1", "/p", "2026-08-01T01:00:00Z"))
            .unwrap();
        let row = db.get_session("s1").unwrap().unwrap();
        assert_eq!(row.project, "/p");
        // Upsert updates in place.
        let mut updated = session_row("s1", "/p", "2026-08-01T02:00:00Z");
        updated.title = "new".into();
        db.upsert_session(&updated).unwrap();
        assert_eq!(db.get_session("s1").unwrap().unwrap().title, "new");
        assert_eq!(db.list_sessions(None).unwrap().len(), 1);
    }

    #[test]
    fn list_sessions_filters_by_project() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_session(&session_row("a", "/p1", "2026-08-01T01:00:00Z"))
            .unwrap();
        db.upsert_session(&session_row("b", "/p2", "2026-08-01T01:00:00Z"))
            .unwrap();
        assert_eq!(db.list_sessions(Some("/p1")).unwrap().len(), 1);
        assert_eq!(db.list_sessions(None).unwrap().len(), 2);
    }

    #[test]
    fn fts_search_finds_stemmed_content() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_session(&session_row("s1", "/p", "2026-08-01T01:00:00Z"))
            .unwrap();
        db.insert_turn("s1", 1, "user", "debugging the renderer", "2026-08-01T01:00:00Z")
            .unwrap();
        // Porter stemming: "debug" matches "debugging".
        let hits = db.fts_search("debug").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "s1");
        assert!(hits[0].1.is_finite());
    }

    #[test]
    fn fts_search_dedupes_by_session() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_session(&session_row("s1", "/p", "2026-08-01T01:00:00Z"))
            .unwrap();
        for n in 1..=3 {
            db.insert_turn("s1", n, "user", "rust borrow checker", "2026-08-01T01:00:00Z")
                .unwrap();
        }
        let hits = db.fts_search("borrow").unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn delete_session_removes_turns_and_fts_rows() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_session(&session_row("s1", "/p", "2026-08-01T01:00:00Z"))
            .unwrap();
        db.insert_turn("s1", 1, "user", "hello world", "2026-08-01T01:00:00Z")
            .unwrap();
        db.delete_session("s1").unwrap();
        assert!(db.get_session("s1").unwrap().is_none());
        assert_eq!(db.turn_count("s1").unwrap(), 0);
        assert!(db.fts_search("hello").unwrap().is_empty());
    }

    #[test]
    fn decisions_append_to_log() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.decision_count().unwrap(), 0);
        db.record_decision("chat", "simple", "ollama", "llama3.2-3b", 0.8, "{}")
            .unwrap();
        db.record_decision("code-gen", "complex", "anthropic", "claude-sonnet-4-5", 0.9, "{}")
            .unwrap();
        assert_eq!(db.decision_count().unwrap(), 2);
    }

    #[test]
    fn reindexing_a_turn_does_not_duplicate_fts_rows() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_session(&session_row("s1", "/p", "2026-08-01T01:00:00Z"))
            .unwrap();
        db.insert_turn("s1", 1, "user", "gossip protocol", "2026-08-01T01:00:00Z")
            .unwrap();
        db.insert_turn("s1", 1, "user", "gossip protocol", "2026-08-01T01:00:00Z")
            .unwrap();
        let hits = db.fts_search("gossip").unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn blob_round_trip() {
        let db = Database::open_in_memory().unwrap();
        db.put_blob("bocpd_state", "{\"features\":{}}").unwrap();
        assert_eq!(
            db.get_blob("bocpd_state").unwrap().as_deref(),
            Some("{\"features\":{}}")
        );
        db.put_blob("bocpd_state", "{}").unwrap();
        assert_eq!(db.get_blob("bocpd_state").unwrap().as_deref(), Some("{}"));
        db.delete_blob("bocpd_state").unwrap();
        assert!(db.get_blob("bocpd_state").unwrap().is_none());
    }
}
