// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Chitragupta: a supervised multi-agent LLM runtime.
//!
//! This crate assembles the workspace's subsystems — routing, providers,
//! the agent tree, the actor mesh, the coordination hub, the session
//! ledger, and the learning layer — into one runtime value.  Embedding
//! applications (a CLI, a service façade) depend on this crate alone.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;

pub use chitragupta_config as config;
pub use chitragupta_core as agents;
pub use chitragupta_hub as hub;
pub use chitragupta_kartavya as kartavya;
pub use chitragupta_marga as marga;
pub use chitragupta_mesh as mesh;
pub use chitragupta_model as model;
pub use chitragupta_smriti as smriti;
pub use chitragupta_store as store;

pub use chitragupta_config::RuntimeConfig;
pub use chitragupta_core::{Agent, AgentEvent, AgentHandle, SpawnConfig, SubAgentResult};
pub use chitragupta_hub::CommHub;
pub use chitragupta_kartavya::DutyEngine;
pub use chitragupta_marga::{Decision, RouteRequest, RoutingPipeline};
pub use chitragupta_mesh::MeshRouter;
pub use chitragupta_model::{
    BreakerRegistry, ProviderRegistry, StreamEvent, StreamProvider,
};
pub use chitragupta_smriti::{AutonomyManager, BocpdEngine};
pub use chitragupta_store::SessionStore;

/// The assembled runtime: one of each subsystem, wired together.
pub struct Runtime {
    pub config: RuntimeConfig,
    pub providers: Arc<ProviderRegistry>,
    pub breakers: Arc<BreakerRegistry>,
    pub pipeline: RoutingPipeline,
    pub router: Arc<MeshRouter>,
    pub hub: Arc<CommHub>,
    pub store: Arc<SessionStore>,
    pub autonomy: Arc<AutonomyManager>,
    pub duties: Arc<DutyEngine>,
}

impl Runtime {
    /// Assemble a runtime from configuration.  The store root defaults
    /// to `~/.chitragupta` when the config does not name one.
    pub fn new(config: RuntimeConfig) -> anyhow::Result<Self> {
        let store_root: PathBuf = match &config.store.root {
            Some(root) => root.clone(),
            None => dirs::home_dir()
                .context("cannot resolve home directory for the store root")?
                .join(".chitragupta"),
        };
        let store = Arc::new(
            SessionStore::open(&store_root)
                .with_context(|| format!("opening store at {}", store_root.display()))?,
        );
        Ok(Self {
            providers: Arc::new(ProviderRegistry::new()),
            breakers: Arc::new(BreakerRegistry::new(config.breaker.clone())),
            pipeline: RoutingPipeline::new(config.routing.clone()),
            router: MeshRouter::new("chitragupta"),
            hub: CommHub::new(),
            store,
            autonomy: Arc::new(AutonomyManager::new(config.autonomy.clone())),
            duties: Arc::new(DutyEngine::new(config.duty.clone())),
            config,
        })
    }

    /// Register a provider for routing and escalation.
    pub fn register_provider(&self, provider: Arc<dyn StreamProvider>) {
        self.providers.register(provider);
    }

    /// Route one message to a decision and append it to the decision log.
    pub fn route(&self, message: &str) -> Decision {
        let decision = self.pipeline.decide(&RouteRequest::message(message));
        let raw = serde_json::to_string(&decision).unwrap_or_else(|_| "{}".into());
        let logged = self.store.with_db(|db| {
            db.record_decision(
                decision.task_type.as_str(),
                decision.complexity.as_str(),
                &decision.provider_id,
                &decision.model_id,
                decision.confidence,
                &raw,
            )
        });
        if let Err(e) = logged {
            tracing::warn!(error = %e, "failed to log routing decision");
        }
        decision
    }

    /// Open the stream a decision calls for, with automatic escalation.
    pub async fn open_stream(
        &self,
        decision: &Decision,
        context: chitragupta_model::ModelContext,
        options: chitragupta_model::StreamOptions,
    ) -> chitragupta_model::EventStream {
        chitragupta_marga::open_stream(
            self.providers.clone(),
            self.breakers.clone(),
            decision,
            context,
            options,
            true,
        )
        .await
    }

    /// Build a root agent wired into this runtime's subsystems.
    pub fn root_agent(&self, purpose: &str, provider_id: &str, model: &str) -> anyhow::Result<AgentHandle> {
        let provider = self
            .providers
            .get(provider_id)
            .with_context(|| format!("provider {provider_id} is not registered"))?;
        let agent = Agent::new(purpose, model, self.config.agent.clone());
        agent.set_provider(provider.provider);
        agent.set_autonomy(self.autonomy.clone());
        agent.set_router(self.router.clone());
        Ok(agent)
    }

    /// Flush learned state and tear down coordination surfaces.
    pub fn shutdown(&self) {
        if let Err(e) = self.duties.persist(&self.store) {
            tracing::warn!(error = %e, "failed to persist duties on shutdown");
        }
        self.hub.destroy();
        self.router.destroy();
    }
}
