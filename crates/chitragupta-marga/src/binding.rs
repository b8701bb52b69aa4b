// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chitragupta_config::RoutingStrategy;

use crate::types::{BindingOverrides, Complexity, EscalationStep, TaskType};

/// One tier of the global escalation ladder.
#[derive(Debug, Clone)]
pub struct EscalationTier {
    pub provider_id: &'static str,
    pub model_id: &'static str,
    /// Position in the ladder; higher is strictly stronger.
    pub strength: u8,
}

/// The globally-defined 7-tier ladder, weakest local to strongest cloud.
pub static ESCALATION_TIERS: &[EscalationTier] = &[
    EscalationTier {
        provider_id: "ollama",
        model_id: "llama3.2-3b",
        strength: 0,
    },
    EscalationTier {
        provider_id: "ollama",
        model_id: "qwen2.5-7b",
        strength: 1,
    },
    EscalationTier {
        provider_id: "local-gpu",
        model_id: "llama3.3-70b",
        strength: 2,
    },
    EscalationTier {
        provider_id: "groq",
        model_id: "llama-3.3-70b-versatile",
        strength: 3,
    },
    EscalationTier {
        provider_id: "openai",
        model_id: "gpt-4o-mini",
        strength: 4,
    },
    EscalationTier {
        provider_id: "anthropic",
        model_id: "claude-sonnet-4-5",
        strength: 5,
    },
    EscalationTier {
        provider_id: "anthropic",
        model_id: "claude-opus-4-5",
        strength: 6,
    },
];

fn tier(strength: u8) -> &'static EscalationTier {
    // The ladder is indexed by strength; a miss here is a table bug.
    &ESCALATION_TIERS[strength as usize]
}

/// Default tier index for (strategy, complexity).
fn default_strength(strategy: RoutingStrategy, complexity: Complexity) -> u8 {
    match strategy {
        RoutingStrategy::Local => match complexity {
            Complexity::Trivial => 0,
            Complexity::Simple => 1,
            _ => 2,
        },
        RoutingStrategy::Cloud => match complexity {
            Complexity::Trivial | Complexity::Simple => 3,
            Complexity::Medium => 4,
            Complexity::Complex => 5,
            Complexity::Expert => 6,
        },
        RoutingStrategy::Hybrid => match complexity {
            Complexity::Trivial => 0,
            Complexity::Simple => 1,
            Complexity::Medium => 3,
            Complexity::Complex => 5,
            Complexity::Expert => 6,
        },
    }
}

/// The selected binding plus its escalation tail.
#[derive(Debug, Clone)]
pub struct Binding {
    pub selected: EscalationStep,
    /// Tiers strictly stronger than the selection, weakest first.  Empty
    /// at the strongest tier.
    pub chain: Vec<EscalationStep>,
}

/// Resolve (task, complexity) to a binding under the given strategy,
/// honouring caller overrides.  An override outside the ladder gets the
/// full chain above the default tier for its complexity.
pub fn binding_for(
    task: TaskType,
    complexity: Complexity,
    strategy: RoutingStrategy,
    overrides: &BindingOverrides,
) -> Binding {
    if let Some(step) = overrides.get(&(task, complexity)) {
        let strength = ESCALATION_TIERS
            .iter()
            .find(|t| t.provider_id == step.provider_id && t.model_id == step.model_id)
            .map(|t| t.strength)
            .unwrap_or_else(|| default_strength(strategy, complexity));
        return Binding {
            selected: step.clone(),
            chain: chain_above(strength),
        };
    }

    let mut strength = default_strength(strategy, complexity);
    // Code generation benefits from one extra tier at medium and above.
    if task == TaskType::CodeGen && complexity >= Complexity::Medium {
        strength = (strength + 1).min(6);
    }
    let t = tier(strength);
    Binding {
        selected: EscalationStep {
            provider_id: t.provider_id.to_string(),
            model_id: t.model_id.to_string(),
        },
        chain: chain_above(strength),
    }
}

fn chain_above(strength: u8) -> Vec<EscalationStep> {
    ESCALATION_TIERS
        .iter()
        .filter(|t| t.strength > strength)
        .map(|t| EscalationStep {
            provider_id: t.provider_id.to_string(),
            model_id: t.model_id.to_string(),
        })
        .collect()
}

/// Base sampling temperature per task type.
pub fn temperature_base(task: TaskType) -> f32 {
    match task {
        TaskType::CodeGen => 0.2,
        TaskType::Reasoning => 0.5,
        TaskType::Chat => 0.7,
        TaskType::Summarize | TaskType::Translate => 0.3,
        TaskType::Smalltalk => 0.8,
        TaskType::Vision => 0.4,
        _ => 0.5,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
