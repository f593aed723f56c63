//! Typed messages for both directions of the control link.
//!
//! Message kinds are stable small integers; payloads are UTF-8 JSON objects
//! except [`VideoSnapshot`] (binary with an 8-byte width/height prefix) and
//! [`GameMessage::TextNote`] (raw UTF-8). The kind numbering is contractual:
//! operational tooling on the controller side matches on the raw bytes.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::network::codec::WireFrame;
use crate::synced_state::SyncedState;

/// Held-key sets are small (0-4 keys for a typical batch); keep them inline.
pub type KeySet = SmallVec<[String; 8]>;

/// One batched remote-control command: hold these keys for this many
/// fixed-duration frames. `frame_count == 0` means "no input, report current
/// state" — the game replies with a snapshot and simulates nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FrameAdvanceCommand {
    /// Logical key names held for the whole batch.
    pub keys_held: KeySet,
    /// Number of 60 Hz frames to simulate.
    pub frame_count: u32,
}

impl FrameAdvanceCommand {
    /// A command that requests a snapshot of the current state without
    /// advancing any frames.
    #[must_use]
    pub fn snapshot_probe() -> Self {
        Self {
            keys_held: KeySet::new(),
            frame_count: 0,
        }
    }
}

/// A captured rendered frame, returned after a batch completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoSnapshot {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Raw RGBA pixel bytes, `width * height * 4` of them.
    pub pixels: Vec<u8>,
}

/// Death report with the running death total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeathReport {
    /// Total deaths so far.
    pub count: u32,
}

/// A strawberry was collected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StrawberryCollected {
    /// Room the collectible was in.
    pub room: String,
    /// Chapter the collectible was in.
    pub chapter: String,
    /// Stable per-level identifier of this specific strawberry.
    pub id_key: String,
    /// Whether it had already been collected on a previous run.
    pub is_ghost: bool,
    /// Whether this was a golden strawberry (a rare full-run pickup).
    pub is_golden: bool,
    /// Whether it was a winged strawberry.
    pub is_winged: bool,
    /// Total strawberries collected so far.
    pub total_count: u32,
}

/// Crystal heart colors, by chapter side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum HeartColor {
    /// A decorative heart that does not count.
    Fake,
    /// A-side heart.
    #[default]
    Blue,
    /// B-side heart.
    Red,
    /// C-side heart.
    Gold,
}

/// A crystal heart was collected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct HeartCollected {
    /// Which side's heart this was.
    pub color: HeartColor,
    /// Whether it had already been collected on a previous run.
    pub is_ghost: bool,
    /// Room the heart was in.
    pub room: String,
    /// Chapter the heart was in.
    pub chapter: String,
    /// Total hearts collected so far.
    pub total_count: u32,
}

/// A cassette was collected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CassetteCollected {
    /// Whether it had already been collected on a previous run.
    pub is_ghost: bool,
    /// Room the cassette was in.
    pub room: String,
    /// Chapter the cassette was in.
    pub chapter: String,
    /// Total cassettes collected so far.
    pub total_count: u32,
}

/// The player moved between rooms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RoomChange {
    /// Room left, or `None` when entering a chapter from the map.
    pub from: Option<String>,
    /// Room entered.
    pub to: String,
    /// Chapter both rooms belong to.
    pub chapter: String,
    /// Why the transition happened ("transition", "enter", ...).
    pub reason: String,
}

/// A chapter was completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChapterComplete {
    /// The completed chapter.
    pub chapter: String,
}

/// Which chapter (if any) external control currently applies to, and why the
/// mode changed ("paused", "unpaused", "enter", "exit").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ControlModeChange {
    /// The controlled chapter, or `None` when control detached.
    pub chapter: Option<String>,
    /// Why the change happened, when known.
    pub reason: Option<String>,
}

/// The logical-action to physical-key mapping changed.
///
/// Only sent when the mapping actually differs from the last one reported; a
/// `BTreeMap` keeps the wire form deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BindsChanged {
    /// Logical action name to the list of bound physical keys.
    pub binds: BTreeMap<String, Vec<String>>,
}

/// Messages sent from the game to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameMessage {
    /// A captured frame (binary payload).
    VideoSnapshot(VideoSnapshot),
    /// Free-form text for the controller to announce (raw UTF-8 payload).
    TextNote(String),
    /// The player died.
    Death(DeathReport),
    /// A strawberry was collected.
    StrawberryCollected(StrawberryCollected),
    /// The player moved between rooms.
    RoomChange(RoomChange),
    /// A chapter was completed.
    ChapterComplete(ChapterComplete),
    /// The control mode or controlled chapter changed.
    ControlModeChange(ControlModeChange),
    /// A crystal heart was collected.
    HeartCollected(HeartCollected),
    /// A cassette was collected.
    CassetteCollected(CassetteCollected),
    /// The key binds changed.
    BindsChanged(BindsChanged),
}

/// Messages sent from the controller to the game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Simulate a batch of frames with the given held keys.
    AdvanceFrames(FrameAdvanceCommand),
    /// Replace the shared synced-state document (last writer wins).
    SyncState(SyncedState),
}

/// Errors turning wire frames into typed messages and back.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum MessageError {
    /// The kind byte is not one this direction of the link understands.
    /// Report it and keep the connection open.
    UnknownKind {
        /// The raw kind byte received.
        kind: u8,
    },
    /// The payload did not parse for its declared kind.
    MalformedPayload {
        /// The kind whose payload failed.
        kind: u8,
        /// The underlying parse failure, as text (serde_json errors are
        /// opaque; the string preserves the diagnostic).
        message: String,
    },
}

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownKind { kind } => write!(f, "unknown message kind 0x{kind:02x}"),
            Self::MalformedPayload { kind, message } => {
                write!(f, "malformed payload for kind 0x{kind:02x}: {message}")
            }
        }
    }
}

impl std::error::Error for MessageError {}

fn json_payload<T: Serialize>(kind: u8, value: &T) -> Result<Vec<u8>, MessageError> {
    serde_json::to_vec(value).map_err(|e| MessageError::MalformedPayload {
        kind,
        message: e.to_string(),
    })
}

fn parse_json<'a, T: Deserialize<'a>>(kind: u8, payload: &'a [u8]) -> Result<T, MessageError> {
    serde_json::from_slice(payload).map_err(|e| MessageError::MalformedPayload {
        kind,
        message: e.to_string(),
    })
}

impl GameMessage {
    /// The stable kind byte for this message.
    #[must_use]
    pub const fn kind(&self) -> u8 {
        match self {
            Self::VideoSnapshot(_) => 0x01,
            Self::TextNote(_) => 0x02,
            Self::Death(_) => 0x03,
            Self::StrawberryCollected(_) => 0x04,
            Self::RoomChange(_) => 0x05,
            Self::ChapterComplete(_) => 0x06,
            Self::ControlModeChange(_) => 0x07,
            Self::HeartCollected(_) => 0x08,
            Self::CassetteCollected(_) => 0x09,
            Self::BindsChanged(_) => 0x10,
        }
    }

    /// Serializes this message to `(kind, payload)` form.
    pub fn to_wire(&self) -> Result<(u8, Vec<u8>), MessageError> {
        let kind = self.kind();
        let payload = match self {
            Self::VideoSnapshot(snapshot) => {
                let mut bytes = Vec::with_capacity(8 + snapshot.pixels.len());
                bytes.extend_from_slice(&snapshot.width.to_le_bytes());
                bytes.extend_from_slice(&snapshot.height.to_le_bytes());
                bytes.extend_from_slice(&snapshot.pixels);
                bytes
            }
            Self::TextNote(text) => text.clone().into_bytes(),
            Self::Death(v) => json_payload(kind, v)?,
            Self::StrawberryCollected(v) => json_payload(kind, v)?,
            Self::RoomChange(v) => json_payload(kind, v)?,
            Self::ChapterComplete(v) => json_payload(kind, v)?,
            Self::ControlModeChange(v) => json_payload(kind, v)?,
            Self::HeartCollected(v) => json_payload(kind, v)?,
            Self::CassetteCollected(v) => json_payload(kind, v)?,
            Self::BindsChanged(v) => json_payload(kind, v)?,
        };
        Ok((kind, payload))
    }

    /// Parses a decoded wire frame into a typed message.
    pub fn from_wire(frame: &WireFrame) -> Result<Self, MessageError> {
        let kind = frame.kind;
        let payload = frame.payload.as_slice();
        match kind {
            0x01 => {
                if payload.len() < 8 {
                    return Err(MessageError::MalformedPayload {
                        kind,
                        message: format!("snapshot payload too short ({} bytes)", payload.len()),
                    });
                }
                let width = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
                let height = u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);
                let pixels = payload[8..].to_vec();
                // The dimensions are peer-controlled; checked math so a
                // hostile prefix is a reported error, not an overflow.
                let expected = u64::from(width)
                    .checked_mul(u64::from(height))
                    .and_then(|p| p.checked_mul(4));
                match expected {
                    Some(expected) if expected == pixels.len() as u64 => {}
                    _ => {
                        return Err(MessageError::MalformedPayload {
                            kind,
                            message: format!(
                                "snapshot dimensions {}x{} do not match {} pixel bytes",
                                width,
                                height,
                                pixels.len()
                            ),
                        });
                    }
                }
                Ok(Self::VideoSnapshot(VideoSnapshot {
                    width,
                    height,
                    pixels,
                }))
            }
            0x02 => {
                let text = String::from_utf8(payload.to_vec()).map_err(|e| {
                    MessageError::MalformedPayload {
                        kind,
                        message: e.to_string(),
                    }
                })?;
                Ok(Self::TextNote(text))
            }
            0x03 => Ok(Self::Death(parse_json(kind, payload)?)),
            0x04 => Ok(Self::StrawberryCollected(parse_json(kind, payload)?)),
            0x05 => Ok(Self::RoomChange(parse_json(kind, payload)?)),
            0x06 => Ok(Self::ChapterComplete(parse_json(kind, payload)?)),
            0x07 => Ok(Self::ControlModeChange(parse_json(kind, payload)?)),
            0x08 => Ok(Self::HeartCollected(parse_json(kind, payload)?)),
            0x09 => Ok(Self::CassetteCollected(parse_json(kind, payload)?)),
            0x10 => Ok(Self::BindsChanged(parse_json(kind, payload)?)),
            other => Err(MessageError::UnknownKind { kind: other }),
        }
    }
}

impl ControlMessage {
    /// The stable kind byte for this message.
    #[must_use]
    pub const fn kind(&self) -> u8 {
        match self {
            Self::AdvanceFrames(_) => 0x01,
            Self::SyncState(_) => 0x02,
        }
    }

    /// Serializes this message to `(kind, payload)` form.
    pub fn to_wire(&self) -> Result<(u8, Vec<u8>), MessageError> {
        let kind = self.kind();
        let payload = match self {
            Self::AdvanceFrames(cmd) => json_payload(kind, cmd)?,
            Self::SyncState(state) => json_payload(kind, state)?,
        };
        Ok((kind, payload))
    }

    /// Parses a decoded wire frame into a typed message.
    pub fn from_wire(frame: &WireFrame) -> Result<Self, MessageError> {
        match frame.kind {
            0x01 => Ok(Self::AdvanceFrames(parse_json(frame.kind, &frame.payload)?)),
            0x02 => Ok(Self::SyncState(parse_json(frame.kind, &frame.payload)?)),
            other => Err(MessageError::UnknownKind { kind: other }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn roundtrip_game(msg: GameMessage) -> GameMessage {
        let (kind, payload) = msg.to_wire().unwrap();
        GameMessage::from_wire(&WireFrame { kind, payload }).unwrap()
    }

    #[test]
    fn test_room_change_roundtrip() {
        let msg = GameMessage::RoomChange(RoomChange {
            from: Some("a-02".to_owned()),
            to: "a-03".to_owned(),
            chapter: "Forsaken City".to_owned(),
            reason: "transition".to_owned(),
        });
        assert_eq!(roundtrip_game(msg.clone()), msg);
        assert_eq!(msg.kind(), 0x05);
    }

    #[test]
    fn test_snapshot_roundtrip_and_header() {
        let snapshot = VideoSnapshot {
            width: 2,
            height: 1,
            pixels: vec![0xAA; 8],
        };
        let msg = GameMessage::VideoSnapshot(snapshot.clone());
        let (kind, payload) = msg.to_wire().unwrap();
        assert_eq!(kind, 0x01);
        // 8-byte little-endian width/height prefix, then raw pixels.
        assert_eq!(&payload[..4], &2u32.to_le_bytes());
        assert_eq!(&payload[4..8], &1u32.to_le_bytes());
        assert_eq!(&payload[8..], &snapshot.pixels[..]);
        assert_eq!(roundtrip_game(msg.clone()), msg);
    }

    #[test]
    fn test_snapshot_pixel_count_validated() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&4u32.to_le_bytes());
        payload.extend_from_slice(&4u32.to_le_bytes());
        payload.extend_from_slice(&[0u8; 3]); // should be 64 bytes
        let err = GameMessage::from_wire(&WireFrame { kind: 0x01, payload }).unwrap_err();
        assert!(matches!(err, MessageError::MalformedPayload { kind: 0x01, .. }));
    }

    #[test]
    fn test_snapshot_dimensions_overflowing_pixel_count_rejected() {
        // width * height * 4 overflows u32 and usize arithmetic alike; the
        // prefix must be reported as malformed, never panic.
        let mut payload = Vec::new();
        payload.extend_from_slice(&u32::MAX.to_le_bytes());
        payload.extend_from_slice(&u32::MAX.to_le_bytes());
        let err = GameMessage::from_wire(&WireFrame { kind: 0x01, payload }).unwrap_err();
        assert!(matches!(err, MessageError::MalformedPayload { kind: 0x01, .. }));

        // A single overflowing axis is rejected the same way.
        let mut payload = Vec::new();
        payload.extend_from_slice(&u32::MAX.to_le_bytes());
        payload.extend_from_slice(&2u32.to_le_bytes());
        payload.extend_from_slice(&[0u8; 16]);
        let err = GameMessage::from_wire(&WireFrame { kind: 0x01, payload }).unwrap_err();
        assert!(matches!(err, MessageError::MalformedPayload { kind: 0x01, .. }));
    }

    #[test]
    fn test_advance_frames_wire_field_names() {
        let cmd = FrameAdvanceCommand {
            keys_held: smallvec!["Left".to_owned(), "Jump".to_owned()],
            frame_count: 30,
        };
        let (kind, payload) = ControlMessage::AdvanceFrames(cmd.clone()).to_wire().unwrap();
        assert_eq!(kind, 0x01);
        let json: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(json["frameCount"], 30);
        assert_eq!(json["keysHeld"][0], "Left");
        let back = ControlMessage::from_wire(&WireFrame { kind, payload }).unwrap();
        assert_eq!(back, ControlMessage::AdvanceFrames(cmd));
    }

    #[test]
    fn test_unknown_kind_is_reported_not_fatal() {
        let err = GameMessage::from_wire(&WireFrame {
            kind: 0x7F,
            payload: Vec::new(),
        })
        .unwrap_err();
        assert_eq!(err, MessageError::UnknownKind { kind: 0x7F });
        assert!(err.to_string().contains("0x7f"));
    }

    #[test]
    fn test_malformed_json_payload() {
        let err = GameMessage::from_wire(&WireFrame {
            kind: 0x03,
            payload: b"not json".to_vec(),
        })
        .unwrap_err();
        assert!(matches!(err, MessageError::MalformedPayload { kind: 0x03, .. }));
    }

    #[test]
    fn test_heart_color_serializes_as_string() {
        let msg = GameMessage::HeartCollected(HeartCollected {
            color: HeartColor::Red,
            is_ghost: false,
            room: "b-07".to_owned(),
            chapter: "Old Site B Side".to_owned(),
            total_count: 3,
        });
        let (_, payload) = msg.to_wire().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(json["color"], "Red");
        assert_eq!(roundtrip_game(msg.clone()), msg);
    }

    #[test]
    fn test_binds_changed_roundtrip() {
        let mut binds = BTreeMap::new();
        binds.insert("Jump".to_owned(), vec!["C".to_owned()]);
        binds.insert("Dash".to_owned(), vec!["X".to_owned(), "V".to_owned()]);
        let msg = GameMessage::BindsChanged(BindsChanged { binds });
        assert_eq!(msg.kind(), 0x10);
        assert_eq!(roundtrip_game(msg.clone()), msg);
    }

    #[test]
    fn test_snapshot_probe_is_zero_frames() {
        let probe = FrameAdvanceCommand::snapshot_probe();
        assert_eq!(probe.frame_count, 0);
        assert!(probe.keys_held.is_empty());
    }
}
