// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::barriers::BarrierManager;
use crate::channels::ChannelManager;
use crate::collectors::CollectorManager;
use crate::locks::LockManager;
use crate::memory::RegionManager;
use crate::semaphores::SemaphoreManager;

/// Aggregate counters for monitoring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubStats {
    pub channels: usize,
    pub subscriptions: usize,
    pub regions: usize,
    pub locks: usize,
    pub barriers: usize,
    pub semaphores: usize,
    pub collectors: usize,
    pub total_messages: u64,
}

/// The single process-wide coordination surface.
///
/// All sub-managers share one destroyed flag: `destroy()` flips it, drains
/// every parked waiter with a destroyed error, and every later operation
/// fails fast.
pub struct CommHub {
    destroyed: Arc<AtomicBool>,
    pub channels: ChannelManager,
    pub regions: RegionManager,
    pub locks: LockManager,
    pub barriers: BarrierManager,
    pub semaphores: SemaphoreManager,
    pub collectors: CollectorManager,
}

impl CommHub {
    pub fn new() -> Arc<Self> {
        let destroyed = Arc::new(AtomicBool::new(false));
        Arc::new(Self {
            channels: ChannelManager::new(destroyed.clone()),
            regions: RegionManager::new(destroyed.clone()),
            locks: LockManager::new(destroyed.clone()),
            barriers: BarrierManager::new(destroyed.clone()),
            semaphores: SemaphoreManager::new(destroyed.clone()),
            collectors: CollectorManager::new(destroyed.clone()),
            destroyed,
        })
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            channels: self.channels.channel_count(),
            subscriptions: self.channels.subscription_count(),
            regions: self.regions.count(),
            locks: self.locks.count(),
            barriers: self.barriers.count(),
            semaphores: self.semaphores.count(),
            collectors: self.collectors.count(),
            total_messages: self.channels.total_messages(),
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Tear down.  Idempotent; every pending waiter across all
    /// sub-managers rejects with a destroyed error.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.channels.destroy();
        self.regions.destroy();
        self.locks.destroy();
        self.barriers.destroy();
        self.semaphores.destroy();
        self.collectors.destroy();
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
