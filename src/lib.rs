//! # Chorus Control
//!
//! Chorus Control lets a crowd of remote participants play a single-player
//! platformer together: batched key-hold commands advance the game by exact
//! numbers of fixed-duration frames, and an append-only attribution ledger
//! answers "who cleared this room / chapter / collectible" at any later time.
//!
//! The crate has three layers:
//!
//! - **network**: a length-prefixed framing codec over a reconnecting duplex
//!   byte stream, plus the typed messages both directions speak.
//! - **frame_advance / synced_state**: the game-side state machine that turns
//!   commands into deterministic simulated frames, and the tiny shared
//!   control-mode document that flips between external and manual control.
//! - **ledger**: contributors, the durable JSONL event log, and the crediting
//!   algorithms (rolling room cache, batch accumulator, log replay).
//!
//! The session types tie the layers together, one per side of the link:
//! [`GameSession`] runs inside the game's draw loop and is request-driven —
//! it returns [`FrameRequest`]s for the host to fulfill instead of calling
//! back into it; [`ControllerSession`] consumes game reports in arrival
//! order and yields [`ControllerEvent`]s for the front-end.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub use error::ChorusError;
pub use frame_advance::{
    FrameAdvanceConfig, FrameAdvanceMachine, FrameRequest, MachineState, DEFAULT_FRAME_BUDGET,
    PROGRESS_NOTE_INTERVAL, SIMULATED_FRAME,
};
pub use ledger::event::{CollectibleFlags, CollectibleKind, Contributor, GameEvent, LedgerRecord};
pub use ledger::log::EventLog;
pub use ledger::recorder::{ContributorLedger, Credit, LedgerConfig, RoomContributorCache};
pub use network::codec::{WireDecoder, WireFrame, DEFAULT_MAX_PAYLOAD};
pub use network::messages::{ControlMessage, FrameAdvanceCommand, GameMessage, VideoSnapshot};
pub use network::stream_socket::{ReconnectingSocket, StreamConnector, TcpConnector};
pub use sessions::controller_session::{ControllerEvent, ControllerSession};
pub use sessions::game_session::GameSession;
pub use synced_state::{ControlModeEdge, SyncedState, SyncedStateArbiter};

pub mod error;
pub mod frame_advance;
pub mod synced_state;
pub mod ledger {
    //! Contributors, the durable event log, and the crediting algorithms.
    pub mod event;
    pub mod log;
    pub mod recorder;
}
pub mod network {
    //! Wire framing, typed messages, and the reconnecting transport.
    pub mod codec;
    pub mod messages;
    pub mod stream_socket;
}
pub mod sessions {
    //! The per-side drivers tying transport, state machine, and ledger
    //! together.
    pub mod controller_session;
    pub mod game_session;
}
