//! The game-side frame-advance state machine.
//!
//! The machine turns remote [`FrameAdvanceCommand`]s into exact numbers of
//! fixed-duration simulated frames. It is request-driven: instead of calling
//! back into the host, it returns [`FrameRequest`]s for the host loop to
//! fulfill, one per call, so the host keeps full ownership of its tick and
//! render cadence.
//!
//! Per draw call the host runs:
//!
//! ```ignore
//! machine.begin_draw(Instant::now());
//! while let Some(request) = machine.next_request(Instant::now()) {
//!     match request {
//!         FrameRequest::SimulateFrame { keys, delta } => game.step(&keys, delta),
//!         FrameRequest::CaptureSnapshot => session.send_snapshot(game.capture()),
//!         FrameRequest::EmitNote(text) => session.send_note(text),
//!     }
//! }
//! ```
//!
//! Simulated time is decoupled from real time: every frame is exactly one
//! 60 Hz step regardless of how long the host takes, and the number of frames
//! simulated per draw call is bounded by a real-time budget so large batches
//! resolve quickly without starving rendering.

use std::collections::VecDeque;

use tracing::{debug, trace, warn};
use web_time::{Duration, Instant};

use crate::network::messages::{FrameAdvanceCommand, KeySet};
use crate::synced_state::ControlModeEdge;

/// Fixed simulated duration of one frame: 1/60 s.
pub const SIMULATED_FRAME: Duration = Duration::from_nanos(16_666_667);

/// Default real-time simulation budget per draw call: 1/80 s.
pub const DEFAULT_FRAME_BUDGET: Duration = Duration::from_micros(12_500);

/// A progress note is emitted whenever the remaining frame count crosses a
/// multiple of this during a long batch, so the link is known alive.
pub const PROGRESS_NOTE_INTERVAL: u32 = 1_000;

/// Tuning for the frame-advance machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameAdvanceConfig {
    /// Real-time simulation budget per draw call.
    pub frame_budget: Duration,
    /// Remaining-frames interval between progress notes.
    pub progress_interval: u32,
}

impl FrameAdvanceConfig {
    /// Replaces the per-draw-call simulation budget.
    #[must_use]
    pub fn with_frame_budget(mut self, budget: Duration) -> Self {
        self.frame_budget = budget;
        self
    }

    /// Replaces the progress-note interval.
    #[must_use]
    pub fn with_progress_interval(mut self, interval: u32) -> Self {
        self.progress_interval = interval;
        self
    }
}

impl Default for FrameAdvanceConfig {
    fn default() -> Self {
        Self {
            frame_budget: DEFAULT_FRAME_BUDGET,
            progress_interval: PROGRESS_NOTE_INTERVAL,
        }
    }
}

/// The machine's externally observable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineState {
    /// No frames owed; waiting for the next command.
    AwaitingCommand,
    /// Frames owed > 0; simulating.
    Advancing,
    /// External control disabled; the machine is inert.
    ManualPassthrough,
}

/// One unit of work for the host loop to fulfill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameRequest {
    /// Simulate exactly one fixed-duration frame with these keys held.
    SimulateFrame {
        /// Keys held for this frame.
        keys: KeySet,
        /// Simulated time to advance: always [`SIMULATED_FRAME`].
        delta: Duration,
    },
    /// Capture the rendered frame and send it to the controller.
    CaptureSnapshot,
    /// Send a progress note to the controller.
    EmitNote(String),
}

/// The frame-advance state machine. See the module docs for the host-loop
/// protocol.
#[derive(Debug)]
pub struct FrameAdvanceMachine {
    config: FrameAdvanceConfig,
    state: MachineState,
    frames_owed: u32,
    held_keys: KeySet,
    /// Commands decoded off the wire but not yet consumed.
    pending: VecDeque<FrameAdvanceCommand>,
    /// Cheap requests generated alongside a simulated frame (snapshots,
    /// notes); always delivered, never budget-gated.
    ready: VecDeque<FrameRequest>,
    /// Start of the current draw call's budget window.
    draw_started: Option<Instant>,
    /// Total simulated time since construction.
    simulated_time: Duration,
}

impl FrameAdvanceMachine {
    /// Creates a machine in `AwaitingCommand` with the given tuning.
    #[must_use]
    pub fn new(config: FrameAdvanceConfig) -> Self {
        Self {
            config,
            state: MachineState::AwaitingCommand,
            frames_owed: 0,
            held_keys: KeySet::new(),
            pending: VecDeque::new(),
            ready: VecDeque::new(),
            draw_started: None,
            simulated_time: Duration::ZERO,
        }
    }

    /// The current machine state.
    #[must_use]
    pub fn state(&self) -> MachineState {
        self.state
    }

    /// Frames still owed to the current batch.
    #[must_use]
    pub fn frames_owed(&self) -> u32 {
        self.frames_owed
    }

    /// Total simulated time since construction.
    #[must_use]
    pub fn simulated_time(&self) -> Duration {
        self.simulated_time
    }

    /// The key-hold state visible to the rest of the game. Non-empty only
    /// while `Advancing`; cleared on entry to `AwaitingCommand` and
    /// `ManualPassthrough`.
    #[must_use]
    pub fn held_keys(&self) -> &[String] {
        match self.state {
            MachineState::Advancing => &self.held_keys,
            MachineState::AwaitingCommand | MachineState::ManualPassthrough => &[],
        }
    }

    /// Queues a decoded command. Commands are consumed strictly in arrival
    /// order by [`next_request`](Self::next_request).
    pub fn enqueue_command(&mut self, command: FrameAdvanceCommand) {
        if self.state == MachineState::ManualPassthrough {
            // Consumed so it cannot block later messages, but acted on never:
            // the controller should not be sending batches in manual mode.
            warn!(
                frame_count = command.frame_count,
                "dropping frame-advance command received during manual passthrough"
            );
            return;
        }
        trace!(
            frame_count = command.frame_count,
            keys = command.keys_held.len(),
            "queueing frame-advance command"
        );
        self.pending.push_back(command);
    }

    /// Applies a control-mode edge synchronously with receipt.
    ///
    /// Losing external control aborts any remaining owed frames (already
    /// simulated frames stay simulated), returns a final snapshot request to
    /// flush, and enters `ManualPassthrough`. Regaining control enters
    /// `AwaitingCommand` and self-queues a `frame_count = 0` probe so the
    /// controller gets a fresh snapshot immediately.
    pub fn on_control_edge(&mut self, edge: ControlModeEdge) -> Vec<FrameRequest> {
        match edge {
            ControlModeEdge::ExternalControlLost => {
                let aborted = self.frames_owed;
                let was_advancing = self.state == MachineState::Advancing;
                self.frames_owed = 0;
                self.held_keys.clear();
                self.pending.clear();
                self.ready.clear();
                self.state = MachineState::ManualPassthrough;
                if was_advancing {
                    debug!(aborted, "external control lost mid-batch, flushing final snapshot");
                    vec![FrameRequest::CaptureSnapshot]
                } else {
                    debug!("external control lost");
                    Vec::new()
                }
            }
            ControlModeEdge::ExternalControlGained => {
                debug!("external control regained, requesting fresh snapshot");
                self.state = MachineState::AwaitingCommand;
                self.pending.push_back(FrameAdvanceCommand::snapshot_probe());
                Vec::new()
            }
        }
    }

    /// Opens a new per-draw-call budget window.
    pub fn begin_draw(&mut self, now: Instant) {
        self.draw_started = Some(now);
    }

    /// Produces the next request for the host to fulfill, or `None` when
    /// there is nothing to do right now (no command queued, manual mode, or
    /// this draw call's simulation budget is spent).
    ///
    /// Snapshot and note requests generated alongside a simulated frame are
    /// always delivered, even past the budget; only frame simulation itself
    /// is budget-gated.
    pub fn next_request(&mut self, now: Instant) -> Option<FrameRequest> {
        if let Some(request) = self.ready.pop_front() {
            return Some(request);
        }

        loop {
            match self.state {
                MachineState::ManualPassthrough => return None,
                MachineState::AwaitingCommand => {
                    let command = self.pending.pop_front()?;
                    if command.frame_count == 0 {
                        // "No input, report current state."
                        trace!("snapshot probe");
                        return Some(FrameRequest::CaptureSnapshot);
                    }
                    debug!(
                        frames = command.frame_count,
                        keys = ?command.keys_held,
                        "starting frame batch"
                    );
                    self.frames_owed = command.frame_count;
                    self.held_keys = command.keys_held;
                    self.state = MachineState::Advancing;
                }
                MachineState::Advancing => {
                    if self.budget_spent(now) {
                        return None;
                    }
                    return Some(self.simulate_one());
                }
            }
        }
    }

    fn budget_spent(&self, now: Instant) -> bool {
        match self.draw_started {
            Some(started) => now.saturating_duration_since(started) >= self.config.frame_budget,
            // Host never opened a window; do not stall forever.
            None => false,
        }
    }

    /// Consumes one owed frame and returns its simulation request, queueing
    /// the batch-final snapshot or a progress note as side products.
    fn simulate_one(&mut self) -> FrameRequest {
        let request = FrameRequest::SimulateFrame {
            keys: self.held_keys.clone(),
            delta: SIMULATED_FRAME,
        };
        self.simulated_time += SIMULATED_FRAME;
        self.frames_owed -= 1;

        if self.frames_owed == 0 {
            // Snapshot exactly when the batch returns to AwaitingCommand.
            self.ready.push_back(FrameRequest::CaptureSnapshot);
            self.held_keys.clear();
            self.state = MachineState::AwaitingCommand;
        } else if self.frames_owed % self.config.progress_interval == 0 {
            self.ready.push_back(FrameRequest::EmitNote(format!(
                "still advancing: {} frames remaining",
                self.frames_owed
            )));
        }
        request
    }
}

impl Default for FrameAdvanceMachine {
    fn default() -> Self {
        Self::new(FrameAdvanceConfig::default())
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn command(keys: &[&str], frames: u32) -> FrameAdvanceCommand {
        FrameAdvanceCommand {
            keys_held: keys.iter().map(|k| (*k).to_owned()).collect(),
            frame_count: frames,
        }
    }

    /// Drains every request the machine will produce under an effectively
    /// unlimited budget.
    fn drain(machine: &mut FrameAdvanceMachine) -> Vec<FrameRequest> {
        let now = Instant::now();
        machine.begin_draw(now);
        let mut out = Vec::new();
        while let Some(request) = machine.next_request(now) {
            out.push(request);
        }
        out
    }

    fn unlimited() -> FrameAdvanceMachine {
        FrameAdvanceMachine::new(
            FrameAdvanceConfig::default().with_frame_budget(Duration::from_secs(3600)),
        )
    }

    #[test]
    fn test_frames_owed_equals_command_count() {
        let mut machine = unlimited();
        machine.enqueue_command(command(&["Right"], 42));
        let now = Instant::now();
        machine.begin_draw(now);
        let first = machine.next_request(now).unwrap();
        assert!(matches!(first, FrameRequest::SimulateFrame { .. }));
        assert_eq!(machine.frames_owed(), 41);
        assert_eq!(machine.state(), MachineState::Advancing);
    }

    #[test]
    fn test_exactly_one_snapshot_per_batch() {
        let mut machine = unlimited();
        machine.enqueue_command(command(&["Jump"], 10));
        let requests = drain(&mut machine);
        let frames = requests
            .iter()
            .filter(|r| matches!(r, FrameRequest::SimulateFrame { .. }))
            .count();
        let snapshots = requests
            .iter()
            .filter(|r| matches!(r, FrameRequest::CaptureSnapshot))
            .count();
        assert_eq!(frames, 10);
        assert_eq!(snapshots, 1);
        // The snapshot comes after the final simulated frame.
        assert_eq!(requests.last(), Some(&FrameRequest::CaptureSnapshot));
        assert_eq!(machine.state(), MachineState::AwaitingCommand);
        assert_eq!(machine.frames_owed(), 0);
    }

    #[test]
    fn test_zero_frame_probe_snapshots_without_simulating() {
        let mut machine = unlimited();
        machine.enqueue_command(command(&[], 0));
        let requests = drain(&mut machine);
        assert_eq!(requests, vec![FrameRequest::CaptureSnapshot]);
        assert_eq!(machine.state(), MachineState::AwaitingCommand);
        assert_eq!(machine.frames_owed(), 0);
        assert_eq!(machine.simulated_time(), Duration::ZERO);
    }

    #[test]
    fn test_held_keys_visible_only_while_advancing() {
        let mut machine = unlimited();
        assert!(machine.held_keys().is_empty());
        machine.enqueue_command(command(&["Left", "Dash"], 2));
        let now = Instant::now();
        machine.begin_draw(now);
        let _ = machine.next_request(now).unwrap();
        assert_eq!(machine.held_keys(), ["Left".to_owned(), "Dash".to_owned()]);
        // Finish the batch: keys cleared on entry to AwaitingCommand.
        let _ = machine.next_request(now).unwrap();
        let _ = machine.next_request(now).unwrap();
        assert!(machine.held_keys().is_empty());
    }

    #[test]
    fn test_progress_notes_every_interval() {
        let mut machine = FrameAdvanceMachine::new(
            FrameAdvanceConfig::default()
                .with_frame_budget(Duration::from_secs(3600))
                .with_progress_interval(100),
        );
        machine.enqueue_command(command(&[], 250));
        let requests = drain(&mut machine);
        let notes: Vec<_> = requests
            .iter()
            .filter_map(|r| match r {
                FrameRequest::EmitNote(text) => Some(text.clone()),
                _ => None,
            })
            .collect();
        // Notes at 200 and 100 remaining; not at 0 (that is the snapshot).
        assert_eq!(notes.len(), 2);
        assert!(notes[0].contains("200"));
        assert!(notes[1].contains("100"));
    }

    #[test]
    fn test_budget_bounds_frames_per_draw_call() {
        let mut machine = FrameAdvanceMachine::new(
            FrameAdvanceConfig::default().with_frame_budget(Duration::from_millis(5)),
        );
        machine.enqueue_command(command(&[], 100));
        let start = Instant::now();
        machine.begin_draw(start);
        let _ = machine.next_request(start).unwrap();
        // Pretend the simulation took longer than the whole budget.
        let late = start + Duration::from_millis(50);
        assert_eq!(machine.next_request(late), None);
        assert!(machine.frames_owed() > 0);
        // A new draw call resumes the batch.
        machine.begin_draw(late);
        assert!(machine.next_request(late).is_some());
    }

    #[test]
    fn test_abort_flushes_snapshot_and_enters_passthrough() {
        let mut machine = unlimited();
        machine.enqueue_command(command(&["Right"], 50));
        let now = Instant::now();
        machine.begin_draw(now);
        let _ = machine.next_request(now).unwrap();
        assert_eq!(machine.frames_owed(), 49);

        let flush = machine.on_control_edge(ControlModeEdge::ExternalControlLost);
        assert_eq!(flush, vec![FrameRequest::CaptureSnapshot]);
        assert_eq!(machine.state(), MachineState::ManualPassthrough);
        assert_eq!(machine.frames_owed(), 0);
        assert!(machine.held_keys().is_empty());
        // Inert until control returns.
        assert_eq!(machine.next_request(now), None);
    }

    #[test]
    fn test_abort_while_awaiting_has_nothing_to_flush() {
        let mut machine = unlimited();
        let flush = machine.on_control_edge(ControlModeEdge::ExternalControlLost);
        assert!(flush.is_empty());
        assert_eq!(machine.state(), MachineState::ManualPassthrough);
    }

    #[test]
    fn test_regaining_control_requests_fresh_snapshot() {
        let mut machine = unlimited();
        let _ = machine.on_control_edge(ControlModeEdge::ExternalControlLost);
        let _ = machine.on_control_edge(ControlModeEdge::ExternalControlGained);
        assert_eq!(machine.state(), MachineState::AwaitingCommand);
        let requests = drain(&mut machine);
        assert_eq!(requests, vec![FrameRequest::CaptureSnapshot]);
    }

    #[test]
    fn test_commands_dropped_during_passthrough() {
        let mut machine = unlimited();
        let _ = machine.on_control_edge(ControlModeEdge::ExternalControlLost);
        machine.enqueue_command(command(&["Jump"], 10));
        assert_eq!(drain(&mut machine), Vec::new());
    }

    #[test]
    fn test_simulated_time_is_fixed_step() {
        let mut machine = unlimited();
        machine.enqueue_command(command(&[], 3));
        let _ = drain(&mut machine);
        assert_eq!(machine.simulated_time(), SIMULATED_FRAME * 3);
    }

    #[test]
    fn test_queued_commands_run_in_arrival_order() {
        let mut machine = unlimited();
        machine.enqueue_command(command(&["Left"], 1));
        machine.enqueue_command(command(&["Right"], 1));
        let requests = drain(&mut machine);
        let keys: Vec<KeySet> = requests
            .iter()
            .filter_map(|r| match r {
                FrameRequest::SimulateFrame { keys, .. } => Some(keys.clone()),
                _ => None,
            })
            .collect();
        let left: KeySet = smallvec!["Left".to_owned()];
        let right: KeySet = smallvec!["Right".to_owned()];
        assert_eq!(keys, vec![left, right]);
        // Each batch flushed its own snapshot.
        let snapshots = requests
            .iter()
            .filter(|r| matches!(r, FrameRequest::CaptureSnapshot))
            .count();
        assert_eq!(snapshots, 2);
    }
}
