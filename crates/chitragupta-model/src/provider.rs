// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::types::{CostBreakdown, Message, ModelPricing, StopReason, StreamEvent, StreamOptions, Usage};

pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// A tool schema disclosed to the model.
///
/// Mirrors the tool crate's definition to keep this crate free of a
/// dependency on tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object.
    pub parameters: serde_json::Value,
}

/// Everything a provider needs to produce one completion.
#[derive(Debug, Clone, Default)]
pub struct ModelContext {
    pub system_prompt: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
}

/// Static description of one model offered by a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub context_window: u32,
    pub max_output_tokens: u32,
    #[serde(default)]
    pub pricing: ModelPricing,
    #[serde(default)]
    pub supports_thinking: bool,
    #[serde(default)]
    pub supports_images: bool,
}

/// Open a unidirectional event stream for one model call.
#[async_trait]
pub trait StreamProvider: Send + Sync {
    /// Stable provider id (e.g. `"local-small"`, `"cloud-frontier"`).
    fn id(&self) -> &str;

    /// Models this provider serves.
    fn models(&self) -> Vec<ModelDescriptor>;

    /// Open the stream.  Implementations must emit `Start` first, at most
    /// one `Done`, and nothing after `Done` or `Error`.
    async fn stream(
        &self,
        model: &str,
        context: ModelContext,
        options: StreamOptions,
    ) -> Result<EventStream, ProviderError>;
}

/// A provider as a value: the stream factory plus its model descriptors.
#[derive(Clone)]
pub struct ProviderDefinition {
    pub id: String,
    pub provider: Arc<dyn StreamProvider>,
}

impl std::fmt::Debug for ProviderDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderDefinition")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Registry of providers keyed by id.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, ProviderDefinition>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, provider: Arc<dyn StreamProvider>) {
        let def = ProviderDefinition {
            id: provider.id().to_string(),
            provider,
        };
        self.providers
            .write()
            .unwrap()
            .insert(def.id.clone(), def);
    }

    pub fn get(&self, id: &str) -> Option<ProviderDefinition> {
        self.providers.read().unwrap().get(id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.read().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Two-event synthetic stream for decisions that skip the model entirely:
/// `Start` then `Done { end_turn, zero usage, zero cost }`.
pub fn synthetic_done_stream() -> EventStream {
    let events = vec![
        StreamEvent::Start {
            message_id: uuid::Uuid::new_v4().to_string(),
        },
        StreamEvent::Done {
            stop_reason: StopReason::EndTurn,
            usage: Usage::default(),
            cost: CostBreakdown::zero(),
        },
    ];
    Box::pin(futures::stream::iter(events))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
