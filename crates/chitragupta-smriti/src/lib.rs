// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Behavioral learning ("smriti" — memory): Bayesian online change-point
//! detection over per-feature observation streams, crystallization of
//! stable tendencies, and the autonomy manager that keeps a misbehaving
//! runtime on its feet.

mod autonomy;
mod bocpd;
mod math;
mod vasana;

pub use autonomy::{
    AutonomyManager, HealthWarning, RecoveryAction, TurnMetrics,
};
pub use bocpd::{BocpdEngine, FeatureState, ObservationOutcome};
pub use math::{lgamma, logsumexp, student_t_logpdf};
pub use vasana::{
    crystallize, holdout_accuracy, promote_global, reinforce, Valence, Vasana, GLOBAL_SCOPE,
};
