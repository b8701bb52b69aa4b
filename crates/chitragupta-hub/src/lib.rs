// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Process-wide coordination surface for cooperating agents: named
//! channels with ring history, versioned shared-memory regions, FIFO
//! locks, barriers, capped semaphores, and result collectors.
//!
//! Every waiter is a parked oneshot with an explicit removal path — a
//! timeout or a hub destroy always removes the waiter from its queue;
//! nothing relies on dropping a forgotten timer.

mod barriers;
mod channels;
mod collectors;
mod error;
mod hub;
mod locks;
mod memory;
mod semaphores;

pub use barriers::BarrierManager;
pub use channels::{ChannelManager, ChannelMessage, Subscription};
pub use collectors::CollectorManager;
pub use error::HubError;
pub use hub::{CommHub, HubStats};
pub use locks::{LockGrant, LockManager};
pub use memory::{RegionManager, RegionWatcher};
pub use semaphores::SemaphoreManager;

pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
