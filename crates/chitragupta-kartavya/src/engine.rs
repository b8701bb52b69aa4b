// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::params;
use tracing::{debug, info, warn};

use chitragupta_config::{DutyConfig, COOLDOWN_FLOOR_MS, MAX_ACTIVE_CEILING, MAX_HOURLY_CEILING};
use chitragupta_model::fnv1a_hex;
use chitragupta_smriti::Vasana;
use chitragupta_store::SessionStore;

use crate::duty::{DutyAction, DutyError, DutyStatus, Kartavya, Trigger};
use crate::triggers::{evaluate_trigger, EvalContext};

const RATE_WINDOW_MS: u64 = 3_600_000;

/// Lifecycle owner for duties: propose → approve → active ↔ paused →
/// {completed, failed, retired}, with trigger evaluation under cooldown
/// and hourly rate caps.
pub struct DutyEngine {
    cfg: DutyConfig,
    duties: Mutex<HashMap<String, Kartavya>>,
}

impl DutyEngine {
    pub fn new(cfg: DutyConfig) -> Self {
        let mut cfg = cfg;
        cfg.max_active = cfg.max_active.min(MAX_ACTIVE_CEILING);
        cfg.max_executions_per_hour = cfg.max_executions_per_hour.min(MAX_HOURLY_CEILING);
        Self {
            cfg,
            duties: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, id: &str) -> Option<Kartavya> {
        self.duties.lock().unwrap().get(id).cloned()
    }

    pub fn all(&self) -> Vec<Kartavya> {
        let mut duties: Vec<Kartavya> = self.duties.lock().unwrap().values().cloned().collect();
        duties.sort_by(|a, b| a.id.cmp(&b.id));
        duties
    }

    fn active_count(&self) -> usize {
        self.duties
            .lock()
            .unwrap()
            .values()
            .filter(|d| d.status == DutyStatus::Active)
            .count()
    }

    /// Propose a duty.  Confidence below the threshold rejects;
    /// cooldowns below the hard floor are clamped up.
    pub fn propose(
        &self,
        name: &str,
        vasana_id: Option<&str>,
        mut trigger: Trigger,
        action: DutyAction,
        confidence: f64,
        project: &str,
    ) -> Result<Kartavya, DutyError> {
        if confidence < self.cfg.min_confidence_for_proposal {
            return Err(DutyError::ConfidenceTooLow {
                confidence: format!("{confidence:.2}"),
                threshold: format!("{:.2}", self.cfg.min_confidence_for_proposal),
            });
        }
        trigger.cooldown_ms = trigger.cooldown_ms.max(COOLDOWN_FLOOR_MS);
        let now = Utc::now();
        let duty = Kartavya {
            id: fnv1a_hex(&format!("{name}|{}", vasana_id.unwrap_or(""))),
            name: name.to_string(),
            status: DutyStatus::Proposed,
            trigger,
            action,
            confidence,
            success_count: 0,
            failure_count: 0,
            last_executed: None,
            project: project.to_string(),
            created: now,
            updated: now,
            execution_stamps: Vec::new(),
        };
        info!(duty = %duty.id, name, "duty proposed");
        self.duties
            .lock()
            .unwrap()
            .insert(duty.id.clone(), duty.clone());
        Ok(duty)
    }

    /// Approve a proposal into the active set.
    pub fn approve(&self, id: &str) -> Result<(), DutyError> {
        if self.active_count() >= self.cfg.max_active {
            return Err(DutyError::TooManyActive(self.cfg.max_active));
        }
        let mut duties = self.duties.lock().unwrap();
        let duty = duties
            .get_mut(id)
            .ok_or_else(|| DutyError::NotFound(id.to_string()))?;
        if !matches!(duty.status, DutyStatus::Proposed | DutyStatus::Approved) {
            return Err(DutyError::InvalidTransition {
                id: id.to_string(),
                from: duty.status.as_str().to_string(),
            });
        }
        duty.status = DutyStatus::Active;
        duty.success_count = 0;
        duty.failure_count = 0;
        duty.updated = Utc::now();
        Ok(())
    }

    pub fn reject(&self, id: &str) -> Result<(), DutyError> {
        self.transition(id, &[DutyStatus::Proposed], DutyStatus::Rejected)
    }

    pub fn pause(&self, id: &str) -> Result<(), DutyError> {
        self.transition(id, &[DutyStatus::Active], DutyStatus::Paused)
    }

    pub fn resume(&self, id: &str) -> Result<(), DutyError> {
        if self.active_count() >= self.cfg.max_active {
            return Err(DutyError::TooManyActive(self.cfg.max_active));
        }
        self.transition(id, &[DutyStatus::Paused], DutyStatus::Active)
    }

    pub fn complete(&self, id: &str) -> Result<(), DutyError> {
        self.transition(
            id,
            &[DutyStatus::Active, DutyStatus::Paused],
            DutyStatus::Completed,
        )
    }

    pub fn retire(&self, id: &str) -> Result<(), DutyError> {
        self.transition(
            id,
            &[DutyStatus::Active, DutyStatus::Paused],
            DutyStatus::Retired,
        )
    }

    fn transition(
        &self,
        id: &str,
        from: &[DutyStatus],
        to: DutyStatus,
    ) -> Result<(), DutyError> {
        let mut duties = self.duties.lock().unwrap();
        let duty = duties
            .get_mut(id)
            .ok_or_else(|| DutyError::NotFound(id.to_string()))?;
        if !from.contains(&duty.status) {
            return Err(DutyError::InvalidTransition {
                id: id.to_string(),
                from: duty.status.as_str().to_string(),
            });
        }
        duty.status = to;
        duty.updated = Utc::now();
        Ok(())
    }

    /// Rank crystallized tendencies by `strength × predictive accuracy`
    /// and auto-approve those above the threshold, up to the active cap.
    /// Returns the promoted duty ids.
    pub fn auto_promote(&self, candidates: &[Vasana]) -> Vec<String> {
        let mut ranked: Vec<&Vasana> = candidates.iter().collect();
        ranked.sort_by(|a, b| {
            let sa = a.strength * a.predictive_accuracy;
            let sb = b.strength * b.predictive_accuracy;
            sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut promoted = Vec::new();
        for vasana in ranked {
            let composite = vasana.strength * vasana.predictive_accuracy;
            if composite < self.cfg.auto_approve_threshold {
                break;
            }
            if self.active_count() >= self.cfg.max_active {
                break;
            }
            let trigger = Trigger {
                trigger_type: crate::duty::TriggerType::Pattern,
                condition: regex_escape(&vasana.tendency),
                cooldown_ms: COOLDOWN_FLOOR_MS,
                last_fired: None,
            };
            let action = DutyAction {
                action_type: "reinforce-tendency".into(),
                payload: serde_json::json!({ "vasana": vasana.id }),
            };
            let proposal = self.propose(
                &vasana.tendency,
                Some(&vasana.id),
                trigger,
                action,
                composite.max(self.cfg.min_confidence_for_proposal),
                &vasana.project,
            );
            match proposal.and_then(|duty| self.approve(&duty.id).map(|()| duty.id)) {
                Ok(id) => {
                    debug!(duty = %id, "auto-promoted from vasana");
                    promoted.push(id);
                }
                Err(e) => warn!(error = %e, "auto-promotion failed"),
            }
        }
        promoted
    }

    /// Evaluate every active duty against the tick context; returns the
    /// ids that fired.  A firing records `last_fired` and a rate stamp.
    pub fn evaluate(&self, ctx: &EvalContext) -> Vec<String> {
        let now_ms = ctx.now().timestamp_millis().max(0) as u64;
        let mut fired = Vec::new();
        let mut duties = self.duties.lock().unwrap();
        for duty in duties.values_mut() {
            if duty.status != DutyStatus::Active {
                continue;
            }
            if !evaluate_trigger(&duty.trigger, ctx) {
                continue;
            }
            if let Some(last) = duty.trigger.last_fired {
                if now_ms.saturating_sub(last) < duty.trigger.cooldown_ms {
                    continue;
                }
            }
            duty.execution_stamps
                .retain(|stamp| now_ms.saturating_sub(*stamp) < RATE_WINDOW_MS);
            if duty.execution_stamps.len() >= self.cfg.max_executions_per_hour {
                debug!(duty = %duty.id, "hourly rate cap suppressed firing");
                continue;
            }
            duty.trigger.last_fired = Some(now_ms);
            duty.execution_stamps.push(now_ms);
            fired.push(duty.id.clone());
        }
        fired
    }

    /// Record one execution outcome.  Success bumps confidence with
    /// diminishing returns; failure decays it.  A duty executed at least
    /// five times with a failure rate above 50 % auto-pauses as failed.
    pub fn record_execution(&self, id: &str, success: bool) -> Result<(), DutyError> {
        let mut duties = self.duties.lock().unwrap();
        let duty = duties
            .get_mut(id)
            .ok_or_else(|| DutyError::NotFound(id.to_string()))?;
        if success {
            duty.success_count += 1;
            let delta = 0.05 / (1.0 + (1.0 + duty.success_count as f64).ln());
            duty.confidence = (duty.confidence + delta).min(1.0);
        } else {
            duty.failure_count += 1;
            duty.confidence = (duty.confidence * 0.9).max(0.0);
        }
        duty.last_executed = Some(Utc::now());
        duty.updated = Utc::now();
        if duty.executions() >= 5 && duty.failure_rate() > 0.5 {
            warn!(duty = %duty.id, rate = duty.failure_rate(), "auto-pausing failing duty");
            duty.status = DutyStatus::Failed;
        }
        Ok(())
    }

    // ── Persistence ───────────────────────────────────────────────────────────

    /// Write every duty into the `kartavyas` table.
    pub fn persist(&self, store: &SessionStore) -> anyhow::Result<()> {
        let duties = self.all();
        store.with_db(|db| {
            for duty in &duties {
                db.conn().execute(
                    "INSERT INTO kartavyas \
                     (id, name, status, trigger, action, confidence, success_count, \
                      failure_count, last_executed, project, created, updated) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12) \
                     ON CONFLICT(id) DO UPDATE SET \
                       name = ?2, status = ?3, trigger = ?4, action = ?5, \
                       confidence = ?6, success_count = ?7, failure_count = ?8, \
                       last_executed = ?9, project = ?10, created = ?11, updated = ?12",
                    params![
                        duty.id,
                        duty.name,
                        duty.status.as_str(),
                        serde_json::to_string(&duty.trigger)?,
                        serde_json::to_string(&duty.action)?,
                        duty.confidence,
                        duty.success_count,
                        duty.failure_count,
                        duty.last_executed.map(|t| t.to_rfc3339()),
                        duty.project,
                        duty.created.to_rfc3339(),
                        duty.updated.to_rfc3339(),
                    ],
                )?;
            }
            Ok(())
        })
    }

    /// Load every persisted duty, replacing the in-memory set.
    pub fn restore(&self, store: &SessionStore) -> anyhow::Result<usize> {
        let loaded: Vec<Kartavya> = store.with_db(|db| {
            let mut stmt = db.conn().prepare(
                "SELECT id, name, status, trigger, action, confidence, success_count, \
                 failure_count, last_executed, project, created, updated FROM kartavyas",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, f64>(5)?,
                    row.get::<_, u32>(6)?,
                    row.get::<_, u32>(7)?,
                    row.get::<_, Option<String>>(8)?,
                    row.get::<_, String>(9)?,
                    row.get::<_, String>(10)?,
                    row.get::<_, String>(11)?,
                ))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (
                    id,
                    name,
                    status,
                    trigger,
                    action,
                    confidence,
                    success_count,
                    failure_count,
                    last_executed,
                    project,
                    created,
                    updated,
                ) = row?;
                let parse_time = |s: &str| {
                    chrono::DateTime::parse_from_rfc3339(s)
                        .map(|t| t.with_timezone(&Utc))
                        .map_err(|e| anyhow::anyhow!("bad timestamp {s}: {e}"))
                };
                out.push(Kartavya {
                    id,
                    name,
                    status: serde_json::from_str(&format!("\"{status}\""))?,
                    trigger: serde_json::from_str(&trigger)?,
                    action: serde_json::from_str(&action)?,
                    confidence,
                    success_count,
                    failure_count,
                    last_executed: last_executed.as_deref().map(parse_time).transpose()?,
                    project,
                    created: parse_time(&created)?,
                    updated: parse_time(&updated)?,
                    execution_stamps: Vec::new(),
                });
            }
            Ok::<_, anyhow::Error>(out)
        })?;
        let count = loaded.len();
        let mut duties = self.duties.lock().unwrap();
        duties.clear();
        for duty in loaded {
            duties.insert(duty.id.clone(), duty);
        }
        Ok(count)
    }
}

/// Escape regex metacharacters so a tendency key can be used as a
/// pattern condition verbatim.
fn regex_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if "\\.+*?()|[]{}^$".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
