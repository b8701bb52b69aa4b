// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use tokio::sync::watch;

/// The owning half of a cancellation pair.  Dropping the source does NOT
/// cancel; cancellation is always an explicit `abort()` call.
#[derive(Debug)]
pub struct AbortSource {
    tx: watch::Sender<bool>,
    signal: AbortSignal,
}

/// Cloneable cancellation signal observed at suspension points.
///
/// Every clone sees the same flag; a parent hands clones to its stream,
/// tool executions, and children so one `abort()` reaches all of them.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortSource {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx,
            signal: AbortSignal { rx },
        }
    }

    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    /// Flip the flag.  Idempotent.
    pub fn abort(&self) {
        // send_replace never fails: the source holds its own receiver.
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for AbortSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve when the flag flips.  Returns immediately if already set.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        // The sender lives inside AbortSource; when it is dropped without
        // aborting, the wait simply never resolves for that source, which
        // callers treat as "no cancellation".
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
        // Sender dropped without abort: park forever.
        std::future::pending::<()>().await;
    }

    /// A signal that never fires, for call sites with no cancellation.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        // Leak the sender so the channel stays open; one allocation per
        // call site that opts out of cancellation.
        std::mem::forget(tx);
        Self { rx }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
