// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `false`, so fields
/// that should be on unless explicitly disabled need a named function.
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub mesh: MeshConfig,
    #[serde(default)]
    pub gossip: GossipConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub bocpd: BocpdConfig,
    #[serde(default)]
    pub autonomy: AutonomyConfig,
    #[serde(default)]
    pub duty: DutyConfig,
}

/// Limits and defaults for the agent loop and the agent tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum reason-act iterations per `prompt()` call.
    #[serde(default = "AgentConfig::default_max_turns")]
    pub max_turns: u32,
    /// Maximum direct children per agent.
    #[serde(default = "AgentConfig::default_max_fanout")]
    pub max_fanout: usize,
    /// Maximum tree depth (root is depth 0).
    #[serde(default = "AgentConfig::default_max_depth")]
    pub max_depth: usize,
    /// Forward child events to the parent wrapped as sub-agent events.
    #[serde(default = "default_true")]
    pub bubble_events: bool,
}

impl AgentConfig {
    fn default_max_turns() -> u32 {
        25
    }
    fn default_max_fanout() -> usize {
        10
    }
    fn default_max_depth() -> usize {
        5
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: Self::default_max_turns(),
            max_fanout: Self::default_max_fanout(),
            max_depth: Self::default_max_depth(),
            bubble_events: true,
        }
    }
}

/// Exponential backoff parameters for `with_retry`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "RetryConfig::default_max_retries")]
    pub max_retries: u32,
    /// Base delay in milliseconds; doubled per attempt before jitter.
    #[serde(default = "RetryConfig::default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Hard ceiling on a single sleep.
    #[serde(default = "RetryConfig::default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// How many times the same unknown error message prefix may repeat
    /// before it is escalated to fatal.
    #[serde(default = "RetryConfig::default_unknown_escalation")]
    pub unknown_escalation_threshold: u32,
}

impl RetryConfig {
    fn default_max_retries() -> u32 {
        3
    }
    fn default_base_delay_ms() -> u64 {
        200
    }
    fn default_max_delay_ms() -> u64 {
        8_000
    }
    fn default_unknown_escalation() -> u32 {
        3
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: Self::default_max_retries(),
            base_delay_ms: Self::default_base_delay_ms(),
            max_delay_ms: Self::default_max_delay_ms(),
            unknown_escalation_threshold: Self::default_unknown_escalation(),
        }
    }
}

/// Per-provider circuit breaker thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the breaker open.
    #[serde(default = "BreakerConfig::default_failure_threshold")]
    pub failure_threshold: u32,
    /// Time the breaker stays open before probing half-open.
    #[serde(default = "BreakerConfig::default_cooldown_ms")]
    pub cooldown_ms: u64,
    /// Half-open successes required to close again.
    #[serde(default = "BreakerConfig::default_success_threshold")]
    pub success_threshold: u32,
}

impl BreakerConfig {
    fn default_failure_threshold() -> u32 {
        5
    }
    fn default_cooldown_ms() -> u64 {
        30_000
    }
    fn default_success_threshold() -> u32 {
        2
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: Self::default_failure_threshold(),
            cooldown_ms: Self::default_cooldown_ms(),
            success_threshold: Self::default_success_threshold(),
        }
    }
}

/// Binding strategy for the routing pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingStrategy {
    /// Prefer on-host models at every tier.
    Local,
    /// Prefer hosted tiers even for small tasks.
    Cloud,
    /// Local for small tasks, cloud escalation as complexity grows.
    #[default]
    Hybrid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default)]
    pub strategy: RoutingStrategy,
    /// Winning/runner-up score ratio below which the classifier abstains.
    #[serde(default = "RoutingConfig::default_tie_band")]
    pub tie_band: f64,
}

impl RoutingConfig {
    fn default_tie_band() -> f64 {
        0.1
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            strategy: RoutingStrategy::default(),
            tie_band: Self::default_tie_band(),
        }
    }
}

/// Mailbox and router limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshConfig {
    /// Total envelope capacity per mailbox across all priority lanes.
    #[serde(default = "MeshConfig::default_mailbox_capacity")]
    pub mailbox_capacity: usize,
    /// Default envelope time-to-live in milliseconds.
    #[serde(default = "MeshConfig::default_ttl_ms")]
    pub default_ttl_ms: u64,
    /// Default ask timeout in milliseconds.
    #[serde(default = "MeshConfig::default_ask_timeout_ms")]
    pub ask_timeout_ms: u64,
}

impl MeshConfig {
    fn default_mailbox_capacity() -> usize {
        1024
    }
    fn default_ttl_ms() -> u64 {
        60_000
    }
    fn default_ask_timeout_ms() -> u64 {
        5_000
    }
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: Self::default_mailbox_capacity(),
            default_ttl_ms: Self::default_ttl_ms(),
            ask_timeout_ms: Self::default_ask_timeout_ms(),
        }
    }
}

/// Peer membership timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipConfig {
    /// Silence after which a peer moves alive → suspect.
    #[serde(default = "GossipConfig::default_suspect_timeout_ms")]
    pub suspect_timeout_ms: u64,
    /// Silence after which a peer moves suspect → dead.
    #[serde(default = "GossipConfig::default_dead_timeout_ms")]
    pub dead_timeout_ms: u64,
    /// Alive peers contacted per gossip round.
    #[serde(default = "GossipConfig::default_fanout")]
    pub fanout: usize,
    /// Interval between gossip rounds.
    #[serde(default = "GossipConfig::default_interval_ms")]
    pub interval_ms: u64,
}

impl GossipConfig {
    fn default_suspect_timeout_ms() -> u64 {
        5_000
    }
    fn default_dead_timeout_ms() -> u64 {
        30_000
    }
    fn default_fanout() -> usize {
        3
    }
    fn default_interval_ms() -> u64 {
        1_000
    }
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            suspect_timeout_ms: Self::default_suspect_timeout_ms(),
            dead_timeout_ms: Self::default_dead_timeout_ms(),
            fanout: Self::default_fanout(),
            interval_ms: Self::default_interval_ms(),
        }
    }
}

/// Session store location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Root directory for transcripts and the index database.
    /// Defaults to `~/.chitragupta` when unset.
    pub root: Option<std::path::PathBuf>,
}

/// Change-point detector tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BocpdConfig {
    /// Expected run length; the hazard rate is `1 / lambda`.
    #[serde(default = "BocpdConfig::default_hazard_lambda")]
    pub hazard_lambda: f64,
    /// Run-length buckets retained after each observation.
    #[serde(default = "BocpdConfig::default_max_run_length")]
    pub max_run_length: usize,
    /// Posterior mass at r=0 above which a change-point is declared.
    #[serde(default = "BocpdConfig::default_change_point_threshold")]
    pub change_point_threshold: f64,
    /// Observations inspected when deciding anomaly vs change-point.
    #[serde(default = "BocpdConfig::default_anomaly_revert_window")]
    pub anomaly_revert_window: usize,
    /// Fraction of the revert window that must agree before a change-point
    /// is confirmed rather than reported as an anomaly.
    #[serde(default = "BocpdConfig::default_anomaly_confirm_ratio")]
    pub anomaly_confirm_ratio: f64,
    /// Consecutive stable sessions required before crystallization.
    #[serde(default = "BocpdConfig::default_stability_window")]
    pub stability_window: usize,
    /// Holdout predictive accuracy required to crystallize a tendency.
    #[serde(default = "BocpdConfig::default_accuracy_threshold")]
    pub accuracy_threshold: f64,
    /// Distinct projects required before a tendency is promoted global.
    #[serde(default = "BocpdConfig::default_promotion_min_projects")]
    pub promotion_min_projects: usize,
}

impl BocpdConfig {
    fn default_hazard_lambda() -> f64 {
        50.0
    }
    fn default_max_run_length() -> usize {
        200
    }
    fn default_change_point_threshold() -> f64 {
        0.3
    }
    fn default_anomaly_revert_window() -> usize {
        5
    }
    fn default_anomaly_confirm_ratio() -> f64 {
        0.6
    }
    fn default_stability_window() -> usize {
        3
    }
    fn default_accuracy_threshold() -> f64 {
        0.7
    }
    fn default_promotion_min_projects() -> usize {
        3
    }
}

impl Default for BocpdConfig {
    fn default() -> Self {
        Self {
            hazard_lambda: Self::default_hazard_lambda(),
            max_run_length: Self::default_max_run_length(),
            change_point_threshold: Self::default_change_point_threshold(),
            anomaly_revert_window: Self::default_anomaly_revert_window(),
            anomaly_confirm_ratio: Self::default_anomaly_confirm_ratio(),
            stability_window: Self::default_stability_window(),
            accuracy_threshold: Self::default_accuracy_threshold(),
            promotion_min_projects: Self::default_promotion_min_projects(),
        }
    }
}

/// Hard ceiling on retained run-length buckets regardless of configuration.
pub const MAX_RUN_LENGTH_CEILING: usize = 2_000;

/// Autonomy manager thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutonomyConfig {
    /// Consecutive failures after which a tool is disabled.
    #[serde(default = "AutonomyConfig::default_tool_disable_threshold")]
    pub tool_disable_threshold: u32,
    /// Error rate over the metrics window that triggers a health warning.
    #[serde(default = "AutonomyConfig::default_error_rate_warning")]
    pub error_rate_warning_threshold: f64,
    /// Average turn latency that triggers a health warning.
    #[serde(default = "AutonomyConfig::default_latency_warning_ms")]
    pub latency_warning_ms: u64,
    /// Context utilization fraction that triggers a health warning.
    #[serde(default = "AutonomyConfig::default_context_warning")]
    pub context_utilization_warning: f64,
    /// Turn samples kept in the sliding metrics window.
    #[serde(default = "AutonomyConfig::default_metrics_window")]
    pub metrics_window: usize,
}

impl AutonomyConfig {
    fn default_tool_disable_threshold() -> u32 {
        3
    }
    fn default_error_rate_warning() -> f64 {
        0.3
    }
    fn default_latency_warning_ms() -> u64 {
        30_000
    }
    fn default_context_warning() -> f64 {
        0.85
    }
    fn default_metrics_window() -> usize {
        50
    }
}

impl Default for AutonomyConfig {
    fn default() -> Self {
        Self {
            tool_disable_threshold: Self::default_tool_disable_threshold(),
            error_rate_warning_threshold: Self::default_error_rate_warning(),
            latency_warning_ms: Self::default_latency_warning_ms(),
            context_utilization_warning: Self::default_context_warning(),
            metrics_window: Self::default_metrics_window(),
        }
    }
}

/// Duty engine limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DutyConfig {
    /// Minimum confidence for a proposal to be accepted.
    #[serde(default = "DutyConfig::default_min_confidence")]
    pub min_confidence_for_proposal: f64,
    /// Maximum duties in active state.  Clamped to [`MAX_ACTIVE_CEILING`].
    #[serde(default = "DutyConfig::default_max_active")]
    pub max_active: usize,
    /// Per-duty executions per hour.  Clamped to [`MAX_HOURLY_CEILING`].
    #[serde(default = "DutyConfig::default_max_executions_per_hour")]
    pub max_executions_per_hour: usize,
    /// Composite score above which vasana candidates auto-promote.
    #[serde(default = "DutyConfig::default_auto_approve_threshold")]
    pub auto_approve_threshold: f64,
}

/// Hard ceiling on simultaneously active duties.
pub const MAX_ACTIVE_CEILING: usize = 100;
/// Hard ceiling on per-duty executions per hour.
pub const MAX_HOURLY_CEILING: usize = 60;
/// Cooldowns shorter than this are clamped up.
pub const COOLDOWN_FLOOR_MS: u64 = 10_000;

impl DutyConfig {
    fn default_min_confidence() -> f64 {
        0.7
    }
    fn default_max_active() -> usize {
        MAX_ACTIVE_CEILING
    }
    fn default_max_executions_per_hour() -> usize {
        MAX_HOURLY_CEILING
    }
    fn default_auto_approve_threshold() -> f64 {
        0.8
    }
}

impl Default for DutyConfig {
    fn default() -> Self {
        Self {
            min_confidence_for_proposal: Self::default_min_confidence(),
            max_active: Self::default_max_active(),
            max_executions_per_hour: Self::default_max_executions_per_hour(),
            auto_approve_threshold: Self::default_auto_approve_threshold(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
