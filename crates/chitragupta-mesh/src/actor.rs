// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;
use tracing::warn;

use crate::envelope::{Envelope, EnvelopeKind};
use crate::mailbox::Mailbox;
use crate::router::{ActorHandle, MeshError, MeshRouter};

/// An actor's message handler.  Invoked for one envelope at a time; the
/// drain loop never runs two receives concurrently on the same actor.
/// Errors are logged and the actor stays alive — supervision belongs to a
/// higher layer.
#[async_trait]
pub trait Behavior: Send + Sync {
    async fn receive(&mut self, env: Envelope, ctx: &mut ActorContext) -> anyhow::Result<()>;
}

/// Capabilities handed to a behavior while it processes one envelope.
pub struct ActorContext {
    self_id: String,
    router: Arc<MeshRouter>,
    /// (from, correlation id) of the envelope currently being processed.
    current: Option<(String, Option<String>)>,
    pending_become: Option<Box<dyn Behavior>>,
    stop_requested: bool,
}

impl ActorContext {
    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    /// Reply to the sender of the current envelope, carrying its
    /// correlation id when it was an ask.
    pub async fn reply(&self, payload: Value) {
        let Some((from, correlation_id)) = self.current.clone() else {
            return;
        };
        let mut env = Envelope::tell(self.self_id.clone(), from, payload);
        env.kind = EnvelopeKind::Reply;
        env.correlation_id = correlation_id;
        self.router.route(env).await;
    }

    /// Fire-and-forget send to the target only.
    pub async fn send(&self, to: &str, payload: Value) {
        self.router.tell(&self.self_id, to, payload).await;
    }

    pub async fn ask(
        &self,
        to: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value, MeshError> {
        self.router.ask(&self.self_id, to, payload, timeout).await
    }

    /// Swap in a new behavior starting with the next envelope.
    pub fn become_behavior(&mut self, behavior: Box<dyn Behavior>) {
        self.pending_become = Some(behavior);
    }

    /// Stop after the current envelope.
    pub fn stop(&mut self) {
        self.stop_requested = true;
    }
}

/// Handle to a spawned actor.
pub struct Actor {
    id: String,
    mailbox: Arc<Mutex<Mailbox>>,
    notify: Arc<Notify>,
    alive: Arc<AtomicBool>,
    router: Arc<MeshRouter>,
}

impl Actor {
    /// Spawn an actor, register it with the router, and start its
    /// single-consumer drain loop.
    pub fn spawn(
        id: impl Into<String>,
        behavior: Box<dyn Behavior>,
        router: Arc<MeshRouter>,
        mailbox_capacity: usize,
    ) -> Self {
        let id = id.into();
        let mailbox = Arc::new(Mutex::new(Mailbox::new(mailbox_capacity)));
        let notify = Arc::new(Notify::new());
        let alive = Arc::new(AtomicBool::new(true));

        router.register_actor(
            &id,
            ActorHandle {
                mailbox: mailbox.clone(),
                notify: notify.clone(),
            },
        );

        tokio::spawn(drain_loop(
            id.clone(),
            behavior,
            mailbox.clone(),
            notify.clone(),
            alive.clone(),
            router.clone(),
        ));

        Self {
            id,
            mailbox,
            notify,
            alive,
            router,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Hand an envelope directly to this actor's mailbox.  After `stop()`
    /// the envelope is silently dropped.
    pub fn receive(&self, env: Envelope) -> bool {
        if !self.alive.load(Ordering::SeqCst) {
            return false;
        }
        let accepted = self.mailbox.lock().unwrap().push(env);
        if accepted {
            self.notify.notify_one();
        }
        accepted
    }

    /// Stop the drain loop and deregister from the router.
    pub fn stop(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.notify.notify_one();
        self.router.deregister_actor(&self.id);
    }
}

async fn drain_loop(
    id: String,
    mut behavior: Box<dyn Behavior>,
    mailbox: Arc<Mutex<Mailbox>>,
    notify: Arc<Notify>,
    alive: Arc<AtomicBool>,
    router: Arc<MeshRouter>,
) {
    let mut ctx = ActorContext {
        self_id: id.clone(),
        router: router.clone(),
        current: None,
        pending_become: None,
        stop_requested: false,
    };

    while alive.load(Ordering::SeqCst) {
        let next = mailbox.lock().unwrap().pop();
        let Some(env) = next else {
            notify.notified().await;
            continue;
        };

        ctx.current = Some((env.from.clone(), env.correlation_id.clone()));
        if let Err(e) = behavior.receive(env, &mut ctx).await {
            warn!(actor = %id, error = %e, "actor behavior failed; actor stays alive");
        }
        ctx.current = None;

        if let Some(next_behavior) = ctx.pending_become.take() {
            behavior = next_behavior;
        }
        if ctx.stop_requested {
            alive.store(false, Ordering::SeqCst);
            router.deregister_actor(&id);
            break;
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
