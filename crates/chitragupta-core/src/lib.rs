// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The agent tree and loop: stateful reason-act-observe cycles over a
//! streaming provider, sub-agent spawning with depth and fan-out bounds,
//! steering, input requests, and abort propagation.

mod agent;
mod collaborators;
mod compact;
mod error;
mod events;
mod state;
#[cfg(test)]
mod tests;

pub use agent::{
    Agent, AgentHandle, InputRequestOptions, SpawnConfig, SubAgentResult, SubAgentStatus,
};
pub use collaborators::{Finding, LifecycleObserver, ToolAuditor};
pub use compact::{emergency_compact, truncate_middle};
pub use error::CoreError;
pub use events::AgentEvent;
pub use state::{AgentState, AgentStatus};
