//! The controller-side endpoint: consumes game reports in arrival order,
//! drives the attribution ledger, and yields typed outcomes for the
//! front-end (chat announcements, overlays, snapshot display).

use tracing::warn;

use crate::error::ChorusError;
use crate::ledger::event::{CollectibleFlags, CollectibleKind, Contributor, LedgerRecord};
use crate::ledger::recorder::{ContributorLedger, Credit};
use crate::network::messages::{
    ControlMessage, FrameAdvanceCommand, GameMessage, HeartColor, VideoSnapshot,
};
use crate::network::stream_socket::{ReconnectingSocket, StreamConnector};
use crate::synced_state::{SyncedState, SyncedStateArbiter};

/// One outcome the front-end should surface, produced by
/// [`ControllerSession::pump`] in game-report arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    /// A fresh rendered frame to display.
    Snapshot(VideoSnapshot),
    /// Free-form text from the game to announce.
    Note(String),
    /// The player died; the listed contributors were steering.
    Death {
        /// Running death total.
        count: u32,
        /// Who was steering at the time.
        contributors: Vec<Contributor>,
    },
    /// A room was entered and credited.
    RoomCleared {
        /// The room entered.
        to: String,
        /// Its chapter.
        chapter: String,
        /// The attribution answer.
        credit: Credit,
    },
    /// A chapter was completed and credited.
    ChapterCompleted {
        /// The completed chapter.
        chapter: String,
        /// The attribution answer.
        credit: Credit,
    },
    /// A collectible was picked up and credited.
    CollectiblePicked {
        /// Collectible kind.
        kind: CollectibleKind,
        /// Room of the pickup.
        room: String,
        /// Chapter of the pickup.
        chapter: String,
        /// Kind-specific detail.
        flags: CollectibleFlags,
        /// The attribution answer.
        credit: Credit,
    },
    /// External control attached to or detached from a chapter.
    ControlModeChanged {
        /// The controlled chapter, or `None` when detached.
        chapter: Option<String>,
        /// Why, when known.
        reason: Option<String>,
    },
    /// The game's bind mapping changed.
    BindsChanged(std::collections::BTreeMap<String, Vec<String>>),
}

/// The controller-side session.
#[derive(Debug)]
pub struct ControllerSession<C: StreamConnector> {
    socket: ReconnectingSocket<C>,
    ledger: ContributorLedger,
    arbiter: SyncedStateArbiter,
}

impl<C: StreamConnector> ControllerSession<C> {
    /// Creates a session over the given connector and ledger.
    #[must_use]
    pub fn new(connector: C, ledger: ContributorLedger) -> Self {
        Self {
            socket: ReconnectingSocket::new(connector),
            ledger,
            arbiter: SyncedStateArbiter::default(),
        }
    }

    /// The attribution ledger, for history queries.
    #[must_use]
    pub fn ledger(&self) -> &ContributorLedger {
        &self.ledger
    }

    /// Replays the full attribution history, oldest record first.
    pub fn replay(&self) -> Result<impl Iterator<Item = LedgerRecord>, ChorusError> {
        self.ledger.replay()
    }

    /// Submits a voted frame batch: records it with its contributors, then
    /// sends it to the game.
    ///
    /// Recording happens first so a send failure can never leave an executed
    /// batch unattributed; the reverse (a recorded batch the game never ran)
    /// is harmless over-crediting and the caller sees the error.
    pub fn submit_batch(
        &mut self,
        command: &FrameAdvanceCommand,
        contributors: &[Contributor],
    ) -> Result<(), ChorusError> {
        self.ledger.record_input_batch(command, contributors)?;
        self.send_control(&ControlMessage::AdvanceFrames(command.clone()))
    }

    /// Requests a snapshot of the current game state without advancing any
    /// frames. Not recorded: a probe carries no input to attribute.
    pub fn request_snapshot(&self) -> Result<(), ChorusError> {
        self.send_control(&ControlMessage::AdvanceFrames(
            FrameAdvanceCommand::snapshot_probe(),
        ))
    }

    /// Replaces the shared control-mode document and propagates it to the
    /// game (last writer wins).
    pub fn set_synced_state(&mut self, state: SyncedState) -> Result<(), ChorusError> {
        self.arbiter.propagate(state);
        let queued: Vec<SyncedState> = self.arbiter.drain_outbound().collect();
        for state in queued {
            self.send_control(&ControlMessage::SyncState(state))?;
        }
        Ok(())
    }

    /// The controller's view of the shared document.
    #[must_use]
    pub fn synced_state(&self) -> SyncedState {
        self.arbiter.current()
    }

    fn send_control(&self, message: &ControlMessage) -> Result<(), ChorusError> {
        let (kind, payload) = message
            .to_wire()
            .map_err(|e| ChorusError::protocol(e.to_string()))?;
        self.socket.send(kind, &payload)
    }

    /// Decodes and applies everything the game has sent, in arrival order,
    /// returning the outcomes the front-end should surface.
    ///
    /// A message that fails to decode is logged and skipped. Transport
    /// failure surfaces after the already-decoded messages have been
    /// applied; the next pump reconnects.
    pub fn pump(&mut self) -> Result<Vec<ControllerEvent>, ChorusError> {
        let mut events = Vec::new();
        loop {
            let frame = match self.socket.poll_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e @ ChorusError::Connection { .. }) => {
                    if events.is_empty() {
                        return Err(e);
                    }
                    warn!(error = %e, "transport failed mid-pump, surfacing decoded events");
                    break;
                }
                Err(e) => return Err(e),
            };
            let message = match GameMessage::from_wire(&frame) {
                Ok(message) => message,
                Err(e) => {
                    warn!(kind = frame.kind, error = %e, "discarding undecodable message");
                    continue;
                }
            };
            if let Some(event) = self.apply(message)? {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Applies one game report to the ledger and maps it to a front-end
    /// outcome. Events are applied strictly in arrival order; the crediting
    /// caches depend on it.
    fn apply(&mut self, message: GameMessage) -> Result<Option<ControllerEvent>, ChorusError> {
        Ok(Some(match message {
            GameMessage::VideoSnapshot(snapshot) => ControllerEvent::Snapshot(snapshot),
            GameMessage::TextNote(text) => {
                self.ledger.record_note(&text)?;
                ControllerEvent::Note(text)
            }
            GameMessage::Death(report) => {
                let contributors = self.ledger.credit_death(report.count)?;
                ControllerEvent::Death {
                    count: report.count,
                    contributors,
                }
            }
            GameMessage::RoomChange(change) => {
                let credit = self.ledger.credit_room_change(
                    change.from.as_deref(),
                    &change.to,
                    &change.chapter,
                    &change.reason,
                )?;
                ControllerEvent::RoomCleared {
                    to: change.to,
                    chapter: change.chapter,
                    credit,
                }
            }
            GameMessage::ChapterComplete(complete) => {
                let credit = self.ledger.credit_chapter_complete(&complete.chapter)?;
                ControllerEvent::ChapterCompleted {
                    chapter: complete.chapter,
                    credit,
                }
            }
            GameMessage::StrawberryCollected(berry) => {
                let flags = CollectibleFlags {
                    is_ghost: berry.is_ghost,
                    is_golden: berry.is_golden,
                    is_winged: berry.is_winged,
                    heart_color: None,
                    id_key: Some(berry.id_key),
                    total_count: berry.total_count,
                };
                // A golden strawberry is a full-run pickup; credit the
                // whole chapter, not just the final room.
                let credit = self.ledger.credit_collectible(
                    CollectibleKind::Strawberry,
                    &berry.room,
                    &berry.chapter,
                    flags.clone(),
                    berry.is_golden,
                )?;
                ControllerEvent::CollectiblePicked {
                    kind: CollectibleKind::Strawberry,
                    room: berry.room,
                    chapter: berry.chapter,
                    flags,
                    credit,
                }
            }
            GameMessage::HeartCollected(heart) => {
                let flags = CollectibleFlags {
                    is_ghost: heart.is_ghost,
                    heart_color: Some(heart.color),
                    total_count: heart.total_count,
                    ..CollectibleFlags::default()
                };
                // A real heart caps a side's run; fake hearts are scenery.
                let is_major = heart.color != HeartColor::Fake;
                let credit = self.ledger.credit_collectible(
                    CollectibleKind::Heart,
                    &heart.room,
                    &heart.chapter,
                    flags.clone(),
                    is_major,
                )?;
                ControllerEvent::CollectiblePicked {
                    kind: CollectibleKind::Heart,
                    room: heart.room,
                    chapter: heart.chapter,
                    flags,
                    credit,
                }
            }
            GameMessage::CassetteCollected(cassette) => {
                let flags = CollectibleFlags {
                    is_ghost: cassette.is_ghost,
                    total_count: cassette.total_count,
                    ..CollectibleFlags::default()
                };
                let credit = self.ledger.credit_collectible(
                    CollectibleKind::Cassette,
                    &cassette.room,
                    &cassette.chapter,
                    flags.clone(),
                    false,
                )?;
                ControllerEvent::CollectiblePicked {
                    kind: CollectibleKind::Cassette,
                    room: cassette.room,
                    chapter: cassette.chapter,
                    flags,
                    credit,
                }
            }
            GameMessage::ControlModeChange(change) => {
                self.ledger
                    .record_control_mode_change(change.chapter.as_deref(), change.reason.as_deref())?;
                ControllerEvent::ControlModeChanged {
                    chapter: change.chapter,
                    reason: change.reason,
                }
            }
            GameMessage::BindsChanged(binds) => ControllerEvent::BindsChanged(binds.binds),
        }))
    }
}
