// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{HashMap, VecDeque};

use chitragupta_config::{BocpdConfig, MAX_RUN_LENGTH_CEILING};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::math::{logsumexp, student_t_logpdf, SIGMA_EPS};

/// Normal-Gamma sufficient statistics for one run-length hypothesis.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct NormalGamma {
    mu: f64,
    kappa: f64,
    alpha: f64,
    beta: f64,
}

impl NormalGamma {
    fn prior() -> Self {
        Self {
            mu: 0.0,
            kappa: 1.0,
            alpha: 1.0,
            beta: 1.0,
        }
    }

    fn predictive_logpdf(&self, x: f64) -> f64 {
        let nu = 2.0 * self.alpha;
        let scale =
            (self.beta * (self.kappa + 1.0) / (self.alpha * self.kappa)).sqrt().max(SIGMA_EPS);
        student_t_logpdf(x, nu, self.mu, scale)
    }

    fn updated(&self, x: f64) -> Self {
        let kappa1 = self.kappa + 1.0;
        Self {
            mu: (self.kappa * self.mu + x) / kappa1,
            kappa: kappa1,
            alpha: self.alpha + 0.5,
            beta: self.beta + self.kappa * (x - self.mu).powi(2) / (2.0 * kappa1),
        }
    }
}

/// A triggered change-point hypothesis awaiting confirmation.
///
/// The change-point mass spikes for a single observation; whether the
/// spike was a regime break or an outlier shows up only in the following
/// observations — a break keeps the posterior mode at a young run length,
/// an outlier reverts to the old long regime.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct PendingChangePoint {
    /// Observations seen since the trigger.
    since: usize,
    /// How many of them kept the posterior mode young.
    confirms: usize,
    /// Change-point mass at the trigger.
    trigger_probability: f64,
}

/// Run-length posterior for one feature dimension, in log-domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureState {
    log_r: Vec<f64>,
    stats: Vec<NormalGamma>,
    /// Actual run length per bucket; diverges from the index once the
    /// posterior has been pruned.
    run_lengths: Vec<usize>,
    /// Recent change-point probabilities, newest last.
    recent_cp: VecDeque<f64>,
    pending: Option<PendingChangePoint>,
    pub observation_count: u64,
}

impl FeatureState {
    fn new() -> Self {
        Self {
            log_r: vec![0.0],
            stats: vec![NormalGamma::prior()],
            run_lengths: vec![0],
            recent_cp: VecDeque::new(),
            pending: None,
            observation_count: 0,
        }
    }

    /// The posterior masses, for invariant checks.
    pub fn run_length_probs(&self) -> Vec<f64> {
        self.log_r.iter().map(|l| l.exp()).collect()
    }

    pub fn bucket_count(&self) -> usize {
        self.log_r.len()
    }

    /// Run length carrying the most posterior mass.
    pub fn mode_run_length(&self) -> usize {
        let mut best = 0usize;
        let mut best_log = f64::NEG_INFINITY;
        for (i, l) in self.log_r.iter().enumerate() {
            if *l > best_log {
                best_log = *l;
                best = self.run_lengths[i];
            }
        }
        best
    }
}

/// Outcome of one observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ObservationOutcome {
    Normal { cp_probability: f64 },
    /// High change-point mass, unconfirmed by the recent window.
    Anomaly { cp_probability: f64 },
    ChangePoint { cp_probability: f64 },
}

impl ObservationOutcome {
    pub fn cp_probability(&self) -> f64 {
        match self {
            ObservationOutcome::Normal { cp_probability }
            | ObservationOutcome::Anomaly { cp_probability }
            | ObservationOutcome::ChangePoint { cp_probability } => *cp_probability,
        }
    }
}

/// Serialized engine state: run-length posteriors plus raw observations,
/// per feature.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct EngineSnapshot {
    features: HashMap<String, FeatureState>,
    observations: HashMap<String, Vec<f64>>,
}

/// Bayesian online change-point detection over independent feature
/// streams.
pub struct BocpdEngine {
    cfg: BocpdConfig,
    features: HashMap<String, FeatureState>,
    observations: HashMap<String, Vec<f64>>,
}

impl BocpdEngine {
    pub fn new(cfg: BocpdConfig) -> Self {
        let mut cfg = cfg;
        cfg.max_run_length = cfg.max_run_length.min(MAX_RUN_LENGTH_CEILING).max(2);
        Self {
            cfg,
            features: HashMap::new(),
            observations: HashMap::new(),
        }
    }

    pub fn feature(&self, key: &str) -> Option<&FeatureState> {
        self.features.get(key)
    }

    pub fn observations_for(&self, key: &str) -> &[f64] {
        self.observations
            .get(key)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Feed one observation into `feature`'s detector.
    pub fn observe(&mut self, feature: &str, x: f64) -> ObservationOutcome {
        let hazard = 1.0 / self.cfg.hazard_lambda;
        let log_h = hazard.ln();
        let log_1mh = (1.0 - hazard).ln();

        let state = self
            .features
            .entry(feature.to_string())
            .or_insert_with(FeatureState::new);
        self.observations
            .entry(feature.to_string())
            .or_default()
            .push(x);

        let r = state.log_r.len();
        let log_pred: Vec<f64> = state
            .stats
            .iter()
            .map(|ng| ng.predictive_logpdf(x))
            .collect();

        // Growth probabilities shift every hypothesis one step right.
        // The restart mass at r = 0 uses the PRIOR predictive: under the
        // restart hypothesis the observation belongs to a fresh regime.
        // Scoring it with the per-run predictives instead would pin
        // exp(logR[0]) at the hazard rate and no threshold could fire.
        let mut new_log_r = vec![f64::NEG_INFINITY; r + 1];
        let joint: Vec<f64> = (0..r).map(|i| log_pred[i] + state.log_r[i]).collect();
        for i in 0..r {
            new_log_r[i + 1] = joint[i] + log_1mh;
        }
        new_log_r[0] =
            NormalGamma::prior().predictive_logpdf(x) + log_h + logsumexp(&state.log_r);

        // Normalize in log-domain.
        let norm = logsumexp(&new_log_r);
        for v in new_log_r.iter_mut() {
            *v -= norm;
        }

        // Conjugate updates; r = 0 restarts from the prior.
        let mut new_stats = Vec::with_capacity(r + 1);
        new_stats.push(NormalGamma::prior());
        for ng in &state.stats {
            new_stats.push(ng.updated(x));
        }
        let mut new_run_lengths = Vec::with_capacity(r + 1);
        new_run_lengths.push(0);
        new_run_lengths.extend(state.run_lengths.iter().map(|rl| rl + 1));

        let cp_probability = new_log_r[0].exp();

        state.log_r = new_log_r;
        state.stats = new_stats;
        state.run_lengths = new_run_lengths;
        state.observation_count += 1;

        // Bound the posterior: keep the top buckets by mass, always
        // including r = 0, then renormalize.
        if state.log_r.len() > self.cfg.max_run_length {
            prune(state, self.cfg.max_run_length);
        }

        state.recent_cp.push_back(cp_probability);
        while state.recent_cp.len() > self.cfg.anomaly_revert_window {
            state.recent_cp.pop_front();
        }

        self.classify(feature, cp_probability)
    }

    /// Anomaly vs change-point.
    ///
    /// A threshold crossing only *triggers* a pending change-point — the
    /// mass at r = 0 spikes for a single observation either way.  What
    /// separates a regime break from an outlier is the revert window: a
    /// break keeps the posterior mode at a young run length on the
    /// following observations, an outlier reverts to the old regime.
    fn classify(&mut self, feature: &str, cp_probability: f64) -> ObservationOutcome {
        let window = self.cfg.anomaly_revert_window.max(1);
        let confirm_ratio = self.cfg.anomaly_confirm_ratio;
        let threshold = self.cfg.change_point_threshold;
        let state = self
            .features
            .get_mut(feature)
            .expect("feature exists: observe inserted it");

        if let Some(mut pending) = state.pending.take() {
            pending.since += 1;
            // The mode stayed young iff it is no older than the trigger.
            if state.mode_run_length() <= pending.since + 1 {
                pending.confirms += 1;
            }
            let ratio = pending.confirms as f64 / pending.since as f64;
            if pending.since >= 2 && ratio >= confirm_ratio {
                debug!(feature, cp_probability = pending.trigger_probability, "change-point confirmed");
                return ObservationOutcome::ChangePoint {
                    cp_probability: pending.trigger_probability,
                };
            }
            if pending.since >= window {
                // Reverted to the old regime: the trigger was an outlier.
                return ObservationOutcome::Normal { cp_probability };
            }
            state.pending = Some(pending);
            return ObservationOutcome::Normal { cp_probability };
        }

        // Burn-in: the posterior is all young run lengths at first, so a
        // trigger there would always self-confirm.
        if cp_probability > threshold && state.observation_count as usize > window {
            state.pending = Some(PendingChangePoint {
                since: 0,
                confirms: 0,
                trigger_probability: cp_probability,
            });
            return ObservationOutcome::Anomaly { cp_probability };
        }

        ObservationOutcome::Normal { cp_probability }
    }

    // ── Persistence ───────────────────────────────────────────────────────────

    /// Serialize the full engine state as a single JSON blob.
    pub fn snapshot_json(&self) -> String {
        let snap = EngineSnapshot {
            features: self.features.clone(),
            observations: self.observations.clone(),
        };
        serde_json::to_string(&snap).unwrap_or_else(|_| "{}".into())
    }

    /// Restore from a snapshot blob.  A parse failure clears the state
    /// and continues — losing learned posteriors is recoverable, a
    /// poisoned engine is not.
    pub fn restore_json(&mut self, blob: &str) {
        match serde_json::from_str::<EngineSnapshot>(blob) {
            Ok(snap) => {
                self.features = snap.features;
                self.observations = snap.observations;
            }
            Err(e) => {
                warn!(error = %e, "bocpd snapshot unreadable; starting fresh");
                self.features.clear();
                self.observations.clear();
            }
        }
    }

    /// Persist into the relational store under a fixed key.
    pub fn save_to(&self, store: &chitragupta_store::SessionStore) {
        let blob = self.snapshot_json();
        if let Err(e) = store.with_db(|db| db.put_blob("bocpd_state", &blob)) {
            warn!(error = %e, "failed to persist bocpd state");
        }
    }

    /// Load from the relational store; absent or unreadable state leaves
    /// a fresh engine.
    pub fn load_from(&mut self, store: &chitragupta_store::SessionStore) {
        let blob = store.with_db(|db| db.get_blob("bocpd_state"));
        match blob {
            Ok(Some(blob)) => self.restore_json(&blob),
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "failed to load bocpd state; starting fresh");
                self.features.clear();
                self.observations.clear();
            }
        }
    }
}

/// Partial selection by log probability, keeping r = 0 unconditionally,
/// then renormalize.  O(R log R).
fn prune(state: &mut FeatureState, max_run_length: usize) {
    let mut indices: Vec<usize> = (1..state.log_r.len()).collect();
    indices.sort_by(|&a, &b| {
        state.log_r[b]
            .partial_cmp(&state.log_r[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    indices.truncate(max_run_length - 1);
    indices.push(0);
    indices.sort_unstable();

    let log_r: Vec<f64> = indices.iter().map(|&i| state.log_r[i]).collect();
    let stats: Vec<NormalGamma> = indices.iter().map(|&i| state.stats[i]).collect();
    let run_lengths: Vec<usize> = indices.iter().map(|&i| state.run_lengths[i]).collect();
    let norm = logsumexp(&log_r);
    state.log_r = log_r.into_iter().map(|v| v - norm).collect();
    state.stats = stats;
    state.run_lengths = run_lengths;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
