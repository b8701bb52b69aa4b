// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use chitragupta_config::BocpdConfig;
use chitragupta_model::fnv1a_hex;

use crate::math::SIGMA_EPS;

/// Project scope marking a tendency as cross-project.
pub const GLOBAL_SCOPE: &str = "__global__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Valence {
    Positive,
    Negative,
    Neutral,
}

/// A crystallized stable tendency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vasana {
    pub id: String,
    pub tendency: String,
    pub description: String,
    /// How strongly the tendency expresses, in [0, 1].
    pub strength: f64,
    /// How resistant it is to change, in [0, 1].
    pub stability: f64,
    pub valence: Valence,
    /// Feature keys whose observations produced this tendency.
    pub sources: Vec<String>,
    pub reinforcement_count: u32,
    pub last_activated: Option<DateTime<Utc>>,
    pub predictive_accuracy: f64,
    /// Project path, or [`GLOBAL_SCOPE`].
    pub project: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

/// 70/30 holdout: train on the first 70 %, accuracy is the fraction of
/// test points within 1.5 σ of the train mean.
pub fn holdout_accuracy(values: &[f64]) -> f64 {
    if values.len() < 4 {
        return 0.0;
    }
    let split = (values.len() as f64 * 0.7).floor() as usize;
    let (train, test) = values.split_at(split.clamp(1, values.len() - 1));
    let mean = train.iter().sum::<f64>() / train.len() as f64;
    let var = train.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / train.len() as f64;
    let sigma = var.sqrt().max(SIGMA_EPS);
    let within = test
        .iter()
        .filter(|v| (**v - mean).abs() <= 1.5 * sigma)
        .count();
    within as f64 / test.len() as f64
}

/// Crystallize a tendency when a feature has stayed stable long enough
/// and its holdout accuracy clears the threshold.
///
/// `stable_sessions` is the caller's count of consecutive sessions with
/// no change-point on this feature.
pub fn crystallize(
    cfg: &BocpdConfig,
    feature_key: &str,
    description: &str,
    observations: &[f64],
    stable_sessions: usize,
    project: &str,
) -> Option<Vasana> {
    if stable_sessions < cfg.stability_window {
        return None;
    }
    let accuracy = holdout_accuracy(observations);
    if accuracy < cfg.accuracy_threshold {
        return None;
    }
    let now = Utc::now();
    let mean = observations.iter().sum::<f64>() / observations.len().max(1) as f64;
    Some(Vasana {
        id: fnv1a_hex(&format!("{feature_key}|{project}")),
        tendency: feature_key.to_string(),
        description: description.to_string(),
        strength: 0.5,
        stability: (stable_sessions as f64 / (cfg.stability_window as f64 * 2.0)).min(1.0),
        valence: if mean >= 0.0 {
            Valence::Positive
        } else {
            Valence::Negative
        },
        sources: vec![feature_key.to_string()],
        reinforcement_count: 0,
        last_activated: Some(now),
        predictive_accuracy: accuracy,
        project: project.to_string(),
        created: now,
        updated: now,
    })
}

/// Reinforce with diminishing returns:
/// `Δ = 0.1 / (1 + ln(1 + reinforcement_count))`.
pub fn reinforce(vasana: &mut Vasana) {
    let delta = 0.1 / (1.0 + (1.0 + vasana.reinforcement_count as f64).ln());
    vasana.strength = (vasana.strength + delta).min(1.0);
    vasana.reinforcement_count += 1;
    vasana.last_activated = Some(Utc::now());
    vasana.updated = Utc::now();
}

/// Merge same-tendency vasanas from distinct projects into one global
/// vasana: strength is the mean, stability the max of the contributors.
/// Returns `None` below the promotion threshold.
pub fn promote_global(cfg: &BocpdConfig, contributors: &[Vasana]) -> Option<Vasana> {
    let mut projects: Vec<&str> = contributors
        .iter()
        .map(|v| v.project.as_str())
        .filter(|p| *p != GLOBAL_SCOPE)
        .collect();
    projects.sort_unstable();
    projects.dedup();
    if projects.len() < cfg.promotion_min_projects {
        return None;
    }
    let first = contributors.first()?;
    let n = contributors.len() as f64;
    let now = Utc::now();
    Some(Vasana {
        id: fnv1a_hex(&format!("{}|{GLOBAL_SCOPE}", first.tendency)),
        tendency: first.tendency.clone(),
        description: first.description.clone(),
        strength: contributors.iter().map(|v| v.strength).sum::<f64>() / n,
        stability: contributors
            .iter()
            .map(|v| v.stability)
            .fold(0.0, f64::max),
        valence: first.valence,
        sources: {
            let mut s: Vec<String> = contributors
                .iter()
                .flat_map(|v| v.sources.iter().cloned())
                .collect();
            s.sort();
            s.dedup();
            s
        },
        reinforcement_count: contributors.iter().map(|v| v.reinforcement_count).sum(),
        last_activated: contributors.iter().filter_map(|v| v.last_activated).max(),
        predictive_accuracy: contributors
            .iter()
            .map(|v| v.predictive_accuracy)
            .sum::<f64>()
            / n,
        project: GLOBAL_SCOPE.to_string(),
        created: now,
        updated: now,
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
