//! The game-side endpoint: wires the transport to the frame-advance machine
//! and the synced-state arbiter, and offers typed reporting calls for the
//! game's hooks (deaths, collectibles, room changes, bind changes).
//!
//! The host game loop drives the session from its tick:
//!
//! ```ignore
//! let flush = session.pump()?;           // decode inbound, apply edges
//! session.begin_draw(Instant::now());
//! for request in flush { fulfill(request); }
//! while let Some(request) = session.next_request(Instant::now()) {
//!     fulfill(request);
//! }
//! ```

use std::collections::BTreeMap;

use tracing::{trace, warn};
use web_time::Instant;

use crate::error::ChorusError;
use crate::frame_advance::{FrameAdvanceConfig, FrameAdvanceMachine, FrameRequest, MachineState};
use crate::network::messages::{
    BindsChanged, CassetteCollected, ChapterComplete, ControlMessage, ControlModeChange,
    DeathReport, GameMessage, HeartCollected, RoomChange, StrawberryCollected, VideoSnapshot,
};
use crate::network::stream_socket::{ReconnectingSocket, StreamConnector};
use crate::synced_state::{ControlModeEdge, SyncedState, SyncedStateArbiter};

/// The game-side session. See the module docs for the host-loop protocol.
#[derive(Debug)]
pub struct GameSession<C: StreamConnector> {
    socket: ReconnectingSocket<C>,
    machine: FrameAdvanceMachine,
    arbiter: SyncedStateArbiter,
    /// Last bind mapping reported over the wire; unchanged mappings are not
    /// re-sent.
    reported_binds: Option<BTreeMap<String, Vec<String>>>,
}

impl<C: StreamConnector> GameSession<C> {
    /// Creates a session over the given connector.
    #[must_use]
    pub fn new(connector: C, config: FrameAdvanceConfig, initial: SyncedState) -> Self {
        Self {
            socket: ReconnectingSocket::new(connector),
            machine: FrameAdvanceMachine::new(config),
            arbiter: SyncedStateArbiter::new(initial),
            reported_binds: None,
        }
    }

    /// The current shared control-mode document.
    #[must_use]
    pub fn synced_state(&self) -> SyncedState {
        self.arbiter.current()
    }

    /// The frame machine's observable state.
    #[must_use]
    pub fn machine_state(&self) -> MachineState {
        self.machine.state()
    }

    /// The key-hold state the rest of the game should observe this tick.
    #[must_use]
    pub fn held_keys(&self) -> &[String] {
        self.machine.held_keys()
    }

    /// Decodes and applies everything the controller has sent.
    ///
    /// Returned requests (a final snapshot flush after a mid-batch abort)
    /// must be fulfilled this tick, before any new commands run. Decode
    /// problems on a single message are logged and skipped; only transport
    /// failure surfaces as an error, after which the next pump reconnects.
    pub fn pump(&mut self) -> Result<Vec<FrameRequest>, ChorusError> {
        let mut flush = Vec::new();
        loop {
            let frame = match self.socket.poll_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e @ ChorusError::Connection { .. }) => {
                    // Partially decoded traffic up to here still applies.
                    if flush.is_empty() {
                        return Err(e);
                    }
                    warn!(error = %e, "transport failed mid-pump, applying decoded messages");
                    break;
                }
                Err(e) => return Err(e),
            };
            match ControlMessage::from_wire(&frame) {
                Ok(ControlMessage::AdvanceFrames(command)) => {
                    if command.frame_count == 0 && self.machine.state() == MachineState::Advancing
                    {
                        // A probe mid-batch would answer with a stale frame.
                        warn!("ignoring snapshot probe received while a batch is advancing");
                        continue;
                    }
                    self.machine.enqueue_command(command);
                }
                Ok(ControlMessage::SyncState(state)) => {
                    trace!(?state, "received synced state");
                    if let Some(edge) = self.arbiter.receive(state) {
                        flush.extend(self.machine.on_control_edge(edge));
                    }
                }
                Err(e) => {
                    // A bad message never takes the connection down.
                    warn!(kind = frame.kind, error = %e, "discarding undecodable message");
                }
            }
        }
        Ok(flush)
    }

    /// Opens a new per-draw-call simulation budget window.
    pub fn begin_draw(&mut self, now: Instant) {
        self.machine.begin_draw(now);
    }

    /// The next unit of work for the host to fulfill, or `None` when idle or
    /// out of budget for this draw call.
    pub fn next_request(&mut self, now: Instant) -> Option<FrameRequest> {
        self.machine.next_request(now)
    }

    /// Records a locally originated control-mode change (the player pressed
    /// the manual-control toggle), applies it to the frame machine, and
    /// propagates it over the wire.
    ///
    /// Returned requests must be fulfilled this tick, same as
    /// [`pump`](Self::pump)'s.
    pub fn set_synced_state(
        &mut self,
        state: SyncedState,
    ) -> Result<Vec<FrameRequest>, ChorusError> {
        let previous = self.arbiter.current();
        self.arbiter.propagate(state);
        let flush = match (previous.controlled_by_external, state.controlled_by_external) {
            (true, false) => self.machine.on_control_edge(ControlModeEdge::ExternalControlLost),
            (false, true) => self.machine.on_control_edge(ControlModeEdge::ExternalControlGained),
            _ => Vec::new(),
        };
        self.flush_synced_state()?;
        Ok(flush)
    }

    fn flush_synced_state(&mut self) -> Result<(), ChorusError> {
        let queued: Vec<SyncedState> = self.arbiter.drain_outbound().collect();
        for state in queued {
            self.send_control(&ControlMessage::SyncState(state))?;
        }
        Ok(())
    }

    fn send_control(&self, message: &ControlMessage) -> Result<(), ChorusError> {
        let (kind, payload) = message
            .to_wire()
            .map_err(|e| ChorusError::protocol(e.to_string()))?;
        self.socket.send(kind, &payload)
    }

    fn send(&self, message: &GameMessage) -> Result<(), ChorusError> {
        let (kind, payload) = message
            .to_wire()
            .map_err(|e| ChorusError::protocol(e.to_string()))?;
        self.socket.send(kind, &payload)
    }

    /// Sends a captured frame.
    pub fn send_snapshot(&self, snapshot: VideoSnapshot) -> Result<(), ChorusError> {
        self.send(&GameMessage::VideoSnapshot(snapshot))
    }

    /// Sends a free-form note for the controller to announce.
    pub fn send_note(&self, text: impl Into<String>) -> Result<(), ChorusError> {
        self.send(&GameMessage::TextNote(text.into()))
    }

    /// Reports a death with the running total.
    pub fn report_death(&self, count: u32) -> Result<(), ChorusError> {
        self.send(&GameMessage::Death(DeathReport { count }))
    }

    /// Reports a strawberry pickup.
    pub fn report_strawberry(&self, event: StrawberryCollected) -> Result<(), ChorusError> {
        self.send(&GameMessage::StrawberryCollected(event))
    }

    /// Reports a crystal-heart pickup.
    pub fn report_heart(&self, event: HeartCollected) -> Result<(), ChorusError> {
        self.send(&GameMessage::HeartCollected(event))
    }

    /// Reports a cassette pickup.
    pub fn report_cassette(&self, event: CassetteCollected) -> Result<(), ChorusError> {
        self.send(&GameMessage::CassetteCollected(event))
    }

    /// Reports a room transition.
    pub fn report_room_change(&self, event: RoomChange) -> Result<(), ChorusError> {
        self.send(&GameMessage::RoomChange(event))
    }

    /// Reports a chapter completion.
    pub fn report_chapter_complete(&self, chapter: impl Into<String>) -> Result<(), ChorusError> {
        self.send(&GameMessage::ChapterComplete(ChapterComplete {
            chapter: chapter.into(),
        }))
    }

    /// Reports that external control attached to or detached from a chapter.
    pub fn report_control_mode_change(
        &self,
        chapter: Option<String>,
        reason: Option<String>,
    ) -> Result<(), ChorusError> {
        self.send(&GameMessage::ControlModeChange(ControlModeChange {
            chapter,
            reason,
        }))
    }

    /// Reports the current bind mapping if it differs from the last one sent.
    pub fn report_binds(
        &mut self,
        binds: BTreeMap<String, Vec<String>>,
    ) -> Result<(), ChorusError> {
        if self.reported_binds.as_ref() == Some(&binds) {
            return Ok(());
        }
        self.send(&GameMessage::BindsChanged(BindsChanged {
            binds: binds.clone(),
        }))?;
        self.reported_binds = Some(binds);
        Ok(())
    }
}
