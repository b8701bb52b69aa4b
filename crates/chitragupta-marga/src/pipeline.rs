// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chitragupta_config::RoutingConfig;
use serde_json::json;
use tracing::debug;

use crate::binding::{binding_for, temperature_base};
use crate::complexity::score_complexity;
use crate::patterns::classify_task;
use crate::types::{
    BindingOverrides, Decision, ProviderHealth, Resolution, TaskType, CONTRACT_VERSION,
};

/// Inputs to one routing decision.
#[derive(Default)]
pub struct RouteRequest<'a> {
    pub message: &'a str,
    pub tools_available: bool,
    pub images_present: bool,
    pub provider_health: Option<&'a HashMap<String, ProviderHealth>>,
    pub overrides: Option<&'a BindingOverrides>,
}

impl<'a> RouteRequest<'a> {
    pub fn message(message: &'a str) -> Self {
        Self {
            message,
            ..Default::default()
        }
    }
}

type TemperatureHook = Arc<dyn Fn(TaskType, f32) -> f32 + Send + Sync>;

/// The routing pipeline.  Stateless apart from configuration and the
/// optional caller-supplied temperature hook.
pub struct RoutingPipeline {
    cfg: RoutingConfig,
    temperature_hook: Option<TemperatureHook>,
}

impl RoutingPipeline {
    pub fn new(cfg: RoutingConfig) -> Self {
        Self {
            cfg,
            temperature_hook: None,
        }
    }

    /// Install a hook that adjusts the base temperature per task.
    pub fn with_temperature_hook(
        mut self,
        hook: impl Fn(TaskType, f32) -> f32 + Send + Sync + 'static,
    ) -> Self {
        self.temperature_hook = Some(Arc::new(hook));
        self
    }

    /// Classify, bind, and assemble a [`Decision`].
    pub fn decide(&self, req: &RouteRequest<'_>) -> Decision {
        let started = Instant::now();

        let task_score = classify_task(
            req.message,
            req.tools_available,
            req.images_present,
            self.cfg.tie_band,
        );
        let complexity_score =
            score_complexity(req.message, task_score.task, req.tools_available);

        let task = task_score.task;
        let complexity = complexity_score.complexity;
        let skip_llm = task.skips_llm();

        let empty = BindingOverrides::new();
        let overrides = req.overrides.unwrap_or(&empty);
        let binding = binding_for(task, complexity, self.cfg.strategy, overrides);

        let resolution = if skip_llm {
            Resolution::LocalCompute
        } else {
            match task {
                TaskType::Embedding => Resolution::Embedding,
                TaskType::ToolExec => Resolution::ToolOnly,
                _ if req.tools_available => Resolution::LlmWithTools,
                _ => Resolution::Llm,
            }
        };

        let temperature = if skip_llm {
            None
        } else {
            let base = temperature_base(task);
            Some(match &self.temperature_hook {
                Some(hook) => hook(task, base),
                None => base,
            })
        };

        // Geometric mean of the two stage confidences, clamped.
        let confidence =
            (task_score.confidence * complexity_score.confidence).sqrt().clamp(0.5, 1.0);

        let (abstain, abstain_reason) = if task_score.near_tie {
            (true, Some("near_tie_top2".to_string()))
        } else {
            (false, None)
        };

        let provider_health_hints = match req.provider_health {
            Some(health) => health
                .get(&binding.selected.provider_id)
                .filter(|h| !h.healthy)
                .map(|h| {
                    vec![format!(
                        "selected provider {} is unhealthy: {}{}",
                        binding.selected.provider_id,
                        h.status,
                        h.note
                            .as_deref()
                            .map(|n| format!(" ({n})"))
                            .unwrap_or_default()
                    )]
                })
                .unwrap_or_default(),
            None => Vec::new(),
        };

        let rationale = format!(
            "task={} complexity={} strategy={:?} tier={}/{}{}",
            task.as_str(),
            complexity.as_str(),
            self.cfg.strategy,
            binding.selected.provider_id,
            binding.selected.model_id,
            if skip_llm { " (skip-llm)" } else { "" },
        );
        debug!(%rationale, "routing decision");

        let details = json!({
            "task_score": task_score.score,
            "secondary_score": task_score.secondary_score,
            "task_confidence": task_score.confidence,
            "complexity_confidence": complexity_score.confidence,
            "message_chars": req.message.chars().count(),
        });

        Decision {
            contract_version: CONTRACT_VERSION.to_string(),
            provider_id: binding.selected.provider_id.clone(),
            model_id: binding.selected.model_id.clone(),
            task_type: task,
            resolution,
            complexity,
            temperature,
            skip_llm,
            escalation_chain: binding.chain,
            rationale,
            confidence,
            abstain,
            abstain_reason,
            checkin_subtype: task_score.checkin_subtype,
            secondary_task_type: task_score.secondary,
            provider_health_hints,
            details,
            decision_time_ms: started.elapsed().as_millis() as u64,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use chitragupta_config::RoutingStrategy;

    use super::*;
    use crate::types::Complexity;

    fn pipeline() -> RoutingPipeline {
        RoutingPipeline::new(RoutingConfig::default())
    }

    #[test]
    fn simple_chat_decision() {
        // Scenario: routing a simple chat question.
        let d = pipeline().decide(&RouteRequest::message("What is the capital of France?"));
        assert_eq!(d.task_type, TaskType::Chat);
        assert!(d.complexity <= Complexity::Simple);
        assert!(!d.skip_llm);
        assert!(!d.escalation_chain.is_empty());
        assert!((0.5..=1.0).contains(&d.confidence));
        assert!(d.decision_time_ms < 150);
        assert_eq!(d.contract_version, "1.1");
    }

    #[test]
    fn search_skips_llm_with_local_compute() {
        let d = pipeline().decide(&RouteRequest::message("search for all files named *.ts"));
        assert_eq!(d.task_type, TaskType::Search);
        assert_eq!(d.resolution, Resolution::LocalCompute);
        assert!(d.skip_llm);
        assert!(d.temperature.is_none());
    }

    #[test]
    fn tools_available_yields_llm_with_tools() {
        let req = RouteRequest {
            message: "explain the failure and propose a fix for the flaky test",
            tools_available: true,
            ..Default::default()
        };
        let d = pipeline().decide(&req);
        assert!(!d.skip_llm);
        assert_eq!(d.resolution, Resolution::LlmWithTools);
    }

    #[test]
    fn temperature_hook_adjusts_base() {
        let p = pipeline().with_temperature_hook(|_, base| base / 2.0);
        let d = p.decide(&RouteRequest::message("What is the capital of France?"));
        assert_eq!(d.temperature, Some(0.35));
    }

    #[test]
    fn unhealthy_provider_attaches_hint_without_rebinding() {
        let p = RoutingPipeline::new(RoutingConfig {
            strategy: RoutingStrategy::Cloud,
            ..Default::default()
        });
        let mut health = HashMap::new();
        health.insert(
            "groq".to_string(),
            ProviderHealth {
                healthy: false,
                status: "degraded".into(),
                note: Some("elevated error rate".into()),
            },
        );
        let req = RouteRequest {
            message: "What is the capital of France?",
            provider_health: Some(&health),
            ..Default::default()
        };
        let d = p.decide(&req);
        assert_eq!(d.provider_id, "groq");
        assert_eq!(d.provider_health_hints.len(), 1);
        assert!(d.provider_health_hints[0].contains("groq"));
    }

    #[test]
    fn healthy_provider_has_no_hints() {
        let mut health = HashMap::new();
        health.insert(
            "ollama".to_string(),
            ProviderHealth {
                healthy: true,
                status: "ok".into(),
                note: None,
            },
        );
        let req = RouteRequest {
            message: "hello there, quick question: what is rust?",
            provider_health: Some(&health),
            ..Default::default()
        };
        let d = pipeline().decide(&req);
        assert!(d.provider_health_hints.is_empty());
    }

    #[test]
    fn smalltalk_has_checkin_subtype() {
        let d = pipeline().decide(&RouteRequest::message("how are you"));
        assert_eq!(d.task_type, TaskType::Smalltalk);
        assert!(d.checkin_subtype.is_some());
        assert!(d.skip_llm);
    }

    #[test]
    fn reasoning_complexity_floor_reflects_in_decision() {
        let d = pipeline().decide(&RouteRequest::message(
            "prove why this deadlock can occur, step by step",
        ));
        assert_eq!(d.task_type, TaskType::Reasoning);
        assert!(d.complexity >= Complexity::Complex);
    }

    #[test]
    fn rationale_names_tier_and_task() {
        let d = pipeline().decide(&RouteRequest::message("What is the capital of France?"));
        assert!(d.rationale.contains("task=chat"));
        assert!(d.rationale.contains(&d.provider_id));
    }

    #[test]
    fn decision_serializes_to_json() {
        let d = pipeline().decide(&RouteRequest::message("hello"));
        let s = serde_json::to_string(&d).unwrap();
        assert!(s.contains("\"contract_version\":\"1.1\""));
    }
}
