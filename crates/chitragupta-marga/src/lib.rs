// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The routing pipeline ("marga" — path).  Classifies an incoming message
//! into a task type and complexity, binds it to a provider/model tier, and
//! attaches the escalation chain used when that tier fails.
//!
//! The pipeline is pure table lookup and regex scoring; it makes no model
//! calls and completes well inside its 150 ms contract.

mod binding;
mod complexity;
mod escalate;
mod patterns;
mod pipeline;
mod types;

pub use binding::{binding_for, temperature_base, Binding, EscalationTier, ESCALATION_TIERS};
pub use complexity::{score_complexity, ComplexityScore};
pub use escalate::open_stream;
pub use patterns::{classify_task, TaskScore};
pub use pipeline::{RouteRequest, RoutingPipeline};
pub use types::{
    BindingOverrides, CheckinSubtype, Complexity, Decision, EscalationStep, ProviderHealth,
    Resolution, TaskType, CONTRACT_VERSION,
};
