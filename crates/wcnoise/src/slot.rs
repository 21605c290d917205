// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Single-slot handoff of completed pings to a consumer thread.
//!
//! The receive thread publishes, the consumer polls and clears. Only the most
//! recent ping is kept: a ping that was never taken is overwritten by the
//! next one.

use crate::reassembly::AssembledPing;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct SlotState {
    latest: Option<Arc<AssembledPing>>,
    ready: bool,
    published: u64,
    overwritten: u64,
}

/// Latest-wins mailbox for [`AssembledPing`]s.
#[derive(Default)]
pub struct PingSlot {
    state: Mutex<SlotState>,
    cond: Condvar,
}

impl PingSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a completed ping and raise the ready flag.
    pub fn publish(&self, ping: Arc<AssembledPing>) {
        let mut state = self.state.lock();
        if state.ready {
            state.overwritten += 1;
        }
        state.latest = Some(ping);
        state.ready = true;
        state.published += 1;
        drop(state);
        self.cond.notify_all();
    }

    /// Whether a ping has been published since the last [`take`](Self::take).
    pub fn is_ready(&self) -> bool {
        self.state.lock().ready
    }

    /// Most recent ping, ready or not. `None` until the first ping completes.
    pub fn latest(&self) -> Option<Arc<AssembledPing>> {
        self.state.lock().latest.clone()
    }

    /// Poll-and-clear: the new ping if one is ready.
    pub fn take(&self) -> Option<Arc<AssembledPing>> {
        let mut state = self.state.lock();
        if !state.ready {
            return None;
        }
        state.ready = false;
        state.latest.clone()
    }

    /// Block until a ping is ready or `timeout` elapses, then take it.
    pub fn wait(&self, timeout: Duration) -> Option<Arc<AssembledPing>> {
        let mut state = self.state.lock();
        if !state.ready {
            let _ = self
                .cond
                .wait_while_for(&mut state, |s| !s.ready, timeout);
        }
        if !state.ready {
            return None;
        }
        state.ready = false;
        state.latest.clone()
    }

    /// Total pings published.
    pub fn published(&self) -> u64 {
        self.state.lock().published
    }

    /// Pings replaced before a consumer took them.
    pub fn overwritten(&self) -> u64 {
        self.state.lock().overwritten
    }
}

impl std::fmt::Debug for PingSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PingSlot")
            .field("ready", &state.ready)
            .field("latest", &state.latest.as_ref().map(|p| p.ping_id))
            .field("published", &state.published)
            .field("overwritten", &state.overwritten)
            .finish()
    }
}
