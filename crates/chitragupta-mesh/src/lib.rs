// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The in-process actor mesh: bounded priority mailboxes, single-consumer
//! actors with hot-swappable behavior, an envelope router with broadcast,
//! topic pub/sub and ask/reply correlation, and gossip-based peer
//! membership.

mod actor;
mod envelope;
mod gossip;
mod mailbox;
mod router;

pub use actor::{Actor, ActorContext, Behavior};
pub use envelope::{Envelope, EnvelopeKind, BROADCAST_TARGET, TOPIC_TARGET};
pub use gossip::{GossipEvent, GossipProtocol, GossipTransport, PeerState, PeerStatus};
pub use mailbox::Mailbox;
pub use router::{MeshError, MeshRouter, PeerChannel, RouterEvent};

/// Milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
