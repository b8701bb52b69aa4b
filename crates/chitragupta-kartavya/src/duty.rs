// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DutyError {
    #[error("confidence {confidence} below proposal threshold {threshold}")]
    ConfidenceTooLow { confidence: String, threshold: String },

    #[error("duty not found: {0}")]
    NotFound(String),

    #[error("active duty limit reached ({0})")]
    TooManyActive(usize),

    #[error("invalid transition from {from} for duty {id}")]
    InvalidTransition { id: String, from: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DutyStatus {
    Proposed,
    Approved,
    Active,
    Paused,
    Completed,
    Failed,
    Retired,
    Rejected,
}

impl DutyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DutyStatus::Proposed => "proposed",
            DutyStatus::Approved => "approved",
            DutyStatus::Active => "active",
            DutyStatus::Paused => "paused",
            DutyStatus::Completed => "completed",
            DutyStatus::Failed => "failed",
            DutyStatus::Retired => "retired",
            DutyStatus::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Cron,
    Event,
    Threshold,
    Pattern,
}

/// When a duty fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    /// Cron expression, event name, `metric op value`, or regex —
    /// depending on the type.
    pub condition: String,
    pub cooldown_ms: u64,
    /// Epoch milliseconds of the last firing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fired: Option<u64>,
}

/// What a duty does when it fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DutyAction {
    #[serde(rename = "type")]
    pub action_type: String,
    pub payload: serde_json::Value,
}

/// A recurring duty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Kartavya {
    pub id: String,
    pub name: String,
    pub status: DutyStatus,
    pub trigger: Trigger,
    pub action: DutyAction,
    pub confidence: f64,
    pub success_count: u32,
    pub failure_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_executed: Option<DateTime<Utc>>,
    pub project: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    /// Epoch-ms stamps of executions within the rate-cap horizon.
    #[serde(default)]
    pub execution_stamps: Vec<u64>,
}

impl Kartavya {
    pub fn executions(&self) -> u32 {
        self.success_count + self.failure_count
    }

    pub fn failure_rate(&self) -> f64 {
        let total = self.executions();
        if total == 0 {
            return 0.0;
        }
        self.failure_count as f64 / total as f64
    }
}
