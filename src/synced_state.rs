//! The shared control-mode document and its propagation arbiter.
//!
//! Both sides of the link hold a copy of one tiny [`SyncedState`] document.
//! Propagation is fire-and-forget and last-writer-wins; each side emits only
//! when the value actually changes, which bounds wire traffic and makes
//! retransmission of an unchanged value a no-op.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// The single shared control-mode document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncedState {
    /// Whether the game is currently driven by the external controller.
    /// When false, a human at the keyboard has the game.
    pub controlled_by_external: bool,
    /// Whether the game should force its debug/play mode back to normal
    /// every tick.
    pub override_debug_mode: bool,
}

impl Default for SyncedState {
    fn default() -> Self {
        Self {
            controlled_by_external: true,
            override_debug_mode: false,
        }
    }
}

/// The control-mode transition observed by [`SyncedStateArbiter::receive`].
///
/// A `Lost` edge must be acted on synchronously with receipt (abort any
/// in-flight frame batch) to bound manual-control latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlModeEdge {
    /// `controlled_by_external` flipped true → false.
    ExternalControlLost,
    /// `controlled_by_external` flipped false → true.
    ExternalControlGained,
}

/// Debounced, bidirectional propagation of the [`SyncedState`] document.
///
/// One arbiter lives on each side of the link. Locally originated changes go
/// through [`propagate`](Self::propagate) and are queued for the wire only on
/// value change; remote updates come in through [`receive`](Self::receive),
/// which atomically replaces the cached copy and reports the control-mode
/// edge, if any.
#[derive(Debug)]
pub struct SyncedStateArbiter {
    local: SyncedState,
    last_emitted: Option<SyncedState>,
    outbound: VecDeque<SyncedState>,
}

impl SyncedStateArbiter {
    /// Creates an arbiter seeded with the given document.
    #[must_use]
    pub fn new(initial: SyncedState) -> Self {
        Self {
            local: initial,
            last_emitted: None,
            outbound: VecDeque::new(),
        }
    }

    /// The current cached document.
    #[must_use]
    pub fn current(&self) -> SyncedState {
        self.local
    }

    /// Records a locally originated value and queues it for the wire if it
    /// differs from the last emitted value. Fire-and-forget: the caller
    /// drains and sends at its convenience; last writer wins on the far side.
    pub fn propagate(&mut self, state: SyncedState) {
        self.local = state;
        if self.last_emitted == Some(state) {
            return;
        }
        debug!(
            controlled_by_external = state.controlled_by_external,
            override_debug_mode = state.override_debug_mode,
            "synced state changed, queueing propagation"
        );
        self.last_emitted = Some(state);
        self.outbound.push_back(state);
    }

    /// Atomically replaces the cached copy with a remotely received value and
    /// returns the control-mode edge, if the external-control bit flipped.
    ///
    /// Receiving also refreshes the emission debounce so the value is not
    /// echoed straight back over the wire.
    pub fn receive(&mut self, state: SyncedState) -> Option<ControlModeEdge> {
        let was_external = self.local.controlled_by_external;
        self.local = state;
        self.last_emitted = Some(state);
        match (was_external, state.controlled_by_external) {
            (true, false) => Some(ControlModeEdge::ExternalControlLost),
            (false, true) => Some(ControlModeEdge::ExternalControlGained),
            _ => None,
        }
    }

    /// Drains the values queued for the wire, oldest first.
    pub fn drain_outbound(&mut self) -> impl Iterator<Item = SyncedState> + '_ {
        self.outbound.drain(..)
    }
}

impl Default for SyncedStateArbiter {
    fn default() -> Self {
        Self::new(SyncedState::default())
    }
}
