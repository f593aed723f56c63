//! The attribution data model: contributors and the ledger's event records.
//!
//! Every record is created once, carries its contributor set and timestamp
//! from the moment of append, and is never edited afterwards. The on-disk
//! form (one JSON object per line, `type`-tagged) is contractual: external
//! tooling reads the same file the ledger replays.

use serde::{Deserialize, Serialize};

use crate::network::messages::HeartColor;

/// An identified external participant credited for an input batch or outcome.
///
/// Equality and hashing are by `id` only; the display name is presentation
/// data and may drift between events from the same person.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Contributor {
    /// Stable platform-level identifier.
    pub id: String,
    /// Human-readable name at the time of the contribution.
    pub display_name: String,
}

impl Contributor {
    /// Convenience constructor.
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

impl PartialEq for Contributor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Contributor {}

impl std::hash::Hash for Contributor {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// What kind of collectible an event concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollectibleKind {
    /// A strawberry.
    Strawberry,
    /// A crystal heart.
    Heart,
    /// A cassette.
    Cassette,
}

/// Kind-specific detail for a collectible event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CollectibleFlags {
    /// Already collected on a previous run.
    #[serde(default)]
    pub is_ghost: bool,
    /// Golden strawberry (full-run, top-tier pickup).
    #[serde(default)]
    pub is_golden: bool,
    /// Winged strawberry.
    #[serde(default)]
    pub is_winged: bool,
    /// Heart color, for heart collectibles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heart_color: Option<HeartColor>,
    /// Stable per-level identifier, for strawberries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_key: Option<String>,
    /// Running total of this kind after the pickup.
    #[serde(default)]
    pub total_count: u32,
}

/// One immutable ledger event. The contributor set is fixed at append time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum GameEvent {
    /// One accepted frame-advance command and the people behind it.
    InputBatch {
        /// Keys held for the batch.
        keys: Vec<String>,
        /// Frames the batch simulated.
        frame_count: u32,
        /// Who voted this batch in.
        contributors: Vec<Contributor>,
    },
    /// The player moved between rooms.
    RoomChange {
        /// Room left, `None` when entering from the map.
        from: Option<String>,
        /// Room entered.
        to: String,
        /// Chapter of the transition.
        chapter: String,
        /// Why the transition happened.
        reason: String,
        /// Whether this (room, chapter) had never been entered before.
        first_clear: bool,
        /// Who is credited with the clear.
        contributors: Vec<Contributor>,
    },
    /// A chapter was completed.
    ChapterComplete {
        /// The completed chapter.
        chapter: String,
        /// Whether this chapter had never been completed before.
        first_completion: bool,
        /// Everyone credited across the chapter's rooms.
        contributors: Vec<Contributor>,
    },
    /// A collectible was picked up.
    Collectible {
        /// Collectible kind.
        kind: CollectibleKind,
        /// Room of the pickup.
        room: String,
        /// Chapter of the pickup.
        chapter: String,
        /// Kind-specific detail.
        flags: CollectibleFlags,
        /// Who is credited with the pickup.
        contributors: Vec<Contributor>,
    },
    /// The player died.
    Death {
        /// Running death total.
        count: u32,
        /// Who was steering at the time.
        contributors: Vec<Contributor>,
    },
    /// The control mode or controlled chapter changed.
    ControlModeChange {
        /// Controlled chapter, or `None` when control detached.
        chapter: Option<String>,
        /// Why, when known.
        reason: Option<String>,
        /// Always empty: mode flips are operator actions, not crowd outcomes.
        contributors: Vec<Contributor>,
    },
    /// Free-form annotation with no crediting meaning.
    Note {
        /// The annotation text.
        text: String,
        /// Always empty.
        contributors: Vec<Contributor>,
    },
}

impl GameEvent {
    /// The contributor set fixed into this event at append time.
    #[must_use]
    pub fn contributors(&self) -> &[Contributor] {
        match self {
            Self::InputBatch { contributors, .. }
            | Self::RoomChange { contributors, .. }
            | Self::ChapterComplete { contributors, .. }
            | Self::Collectible { contributors, .. }
            | Self::Death { contributors, .. }
            | Self::ControlModeChange { contributors, .. }
            | Self::Note { contributors, .. } => contributors,
        }
    }
}

/// One persisted line: an event plus the moment it was appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    /// The event itself, flattened into the same JSON object.
    #[serde(flatten)]
    pub event: GameEvent,
    /// Unix milliseconds at append time. Immutable.
    pub timestamp: u64,
}

/// Current wall-clock time in unix milliseconds.
#[must_use]
pub fn millis_since_epoch() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
#[allow(clippy::panic, clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_contributor_equality_is_by_id() {
        let a = Contributor::new("u1", "Alex");
        let b = Contributor::new("u1", "alex (afk)");
        let c = Contributor::new("u2", "Alex");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_record_json_shape() {
        let record = LedgerRecord {
            event: GameEvent::RoomChange {
                from: Some("a-01".to_owned()),
                to: "a-02".to_owned(),
                chapter: "Forsaken City".to_owned(),
                reason: "transition".to_owned(),
                first_clear: true,
                contributors: vec![Contributor::new("u1", "Alex")],
            },
            timestamp: 1_700_000_000_000,
        };
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&record).unwrap()).unwrap();
        assert_eq!(json["type"], "roomChange");
        assert_eq!(json["firstClear"], true);
        assert_eq!(json["timestamp"], 1_700_000_000_000u64);
        assert_eq!(json["contributors"][0]["id"], "u1");
        assert_eq!(json["contributors"][0]["displayName"], "Alex");
    }

    #[test]
    fn test_record_roundtrip_all_variants() {
        let events = vec![
            GameEvent::InputBatch {
                keys: vec!["Left".to_owned()],
                frame_count: 30,
                contributors: vec![Contributor::new("u1", "Alex")],
            },
            GameEvent::ChapterComplete {
                chapter: "Old Site".to_owned(),
                first_completion: false,
                contributors: Vec::new(),
            },
            GameEvent::Collectible {
                kind: CollectibleKind::Strawberry,
                room: "b-03".to_owned(),
                chapter: "Old Site".to_owned(),
                flags: CollectibleFlags {
                    is_golden: true,
                    id_key: Some("2:9".to_owned()),
                    total_count: 12,
                    ..CollectibleFlags::default()
                },
                contributors: Vec::new(),
            },
            GameEvent::Death {
                count: 44,
                contributors: Vec::new(),
            },
            GameEvent::ControlModeChange {
                chapter: None,
                reason: Some("exit".to_owned()),
                contributors: Vec::new(),
            },
            GameEvent::Note {
                text: "still advancing".to_owned(),
                contributors: Vec::new(),
            },
        ];
        for event in events {
            let record = LedgerRecord {
                event,
                timestamp: millis_since_epoch(),
            };
            let line = serde_json::to_string(&record).unwrap();
            let back: LedgerRecord = serde_json::from_str(&line).unwrap();
            assert_eq!(back, record);
        }
    }
}
