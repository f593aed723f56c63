//! The contributor ledger: rolling caches plus replay-based crediting.
//!
//! The ledger answers "who contributed to this outcome" by combining three
//! sources, in strict preference order:
//!
//! 1. the *current-batch accumulator* — everyone behind input batches since
//!    the last crediting event consumed it;
//! 2. the bounded [`RoomContributorCache`] — who was active when recently
//!    visited rooms were left (an explicit heuristic: exact attribution is
//!    undecidable when a room is cleared with no direct batch);
//! 3. full-log replay — chapter-wide unions and first-time checks.
//!
//! All first-time answers are computed against the log as it existed at
//! crediting time, so they never change after later unrelated appends, and
//! replaying the whole log from empty state reproduces them exactly.

use std::collections::VecDeque;

use tracing::{debug, info};

use crate::error::ChorusError;
use crate::ledger::event::{
    millis_since_epoch, CollectibleFlags, CollectibleKind, Contributor, GameEvent, LedgerRecord,
};
use crate::ledger::log::EventLog;
use crate::network::messages::FrameAdvanceCommand;

/// Default capacity of the room contributor cache.
pub const DEFAULT_ROOM_CACHE_CAPACITY: usize = 5;

/// Tuning for the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Maximum number of recently left rooms to remember (K).
    pub room_cache_capacity: usize,
}

impl LedgerConfig {
    /// Replaces the room-cache capacity.
    #[must_use]
    pub fn with_room_cache_capacity(mut self, capacity: usize) -> Self {
        self.room_cache_capacity = capacity;
        self
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            room_cache_capacity: DEFAULT_ROOM_CACHE_CAPACITY,
        }
    }
}

/// An attribution answer: who gets credit, and whether the outcome is a
/// first in the log's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credit {
    /// Credited contributors, deduplicated by id, first-seen order.
    pub contributors: Vec<Contributor>,
    /// Whether this outcome had never occurred before this append.
    pub first_time: bool,
}

/// Bounded map of room-id → contributors active when that room was left.
/// Holds at most K entries; the oldest is evicted first.
#[derive(Debug)]
pub struct RoomContributorCache {
    /// Oldest at the front, most recently left at the back.
    entries: VecDeque<(String, Vec<Contributor>)>,
    capacity: usize,
}

impl RoomContributorCache {
    /// Creates an empty cache holding at most `capacity` rooms.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Records the contributor set active when `room` was left. Re-leaving a
    /// cached room moves it to most-recent and replaces its set.
    pub fn insert(&mut self, room: &str, contributors: Vec<Contributor>) {
        self.entries.retain(|(cached, _)| cached != room);
        self.entries.push_back((room.to_owned(), contributors));
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// The cached set for `room`, if still remembered.
    #[must_use]
    pub fn get(&self, room: &str) -> Option<&[Contributor]> {
        self.entries
            .iter()
            .find(|(cached, _)| cached == room)
            .map(|(_, contributors)| contributors.as_slice())
    }

    /// Walks from the most recently left room backward and returns the first
    /// non-empty contributor set. This is the fallback heuristic for rooms
    /// cleared with no direct batch.
    #[must_use]
    pub fn most_recent_non_empty(&self) -> Option<&[Contributor]> {
        self.entries
            .iter()
            .rev()
            .find(|(_, contributors)| !contributors.is_empty())
            .map(|(_, contributors)| contributors.as_slice())
    }

    /// Number of rooms currently cached.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Appends contributors to `dst`, skipping ids already present and keeping
/// first-seen order.
fn merge_unique(dst: &mut Vec<Contributor>, src: impl IntoIterator<Item = Contributor>) {
    for contributor in src {
        if !dst.iter().any(|c| c.id == contributor.id) {
            dst.push(contributor);
        }
    }
}

/// The append-only attribution ledger. See the module docs for the crediting
/// model; the operation contracts below are the system's source of truth for
/// who gets credit.
#[derive(Debug)]
pub struct ContributorLedger {
    log: EventLog,
    /// Pending contributors: grows with each input batch, cleared exactly
    /// when a crediting event (room change, chapter completion) consumes it.
    accumulator: Vec<Contributor>,
    room_cache: RoomContributorCache,
}

impl ContributorLedger {
    /// Opens the ledger over the given log.
    #[must_use]
    pub fn new(log: EventLog, config: LedgerConfig) -> Self {
        Self {
            log,
            accumulator: Vec::new(),
            room_cache: RoomContributorCache::new(config.room_cache_capacity),
        }
    }

    /// The contributors currently pending in the batch accumulator.
    #[must_use]
    pub fn pending_contributors(&self) -> &[Contributor] {
        &self.accumulator
    }

    /// Read-only access to the room cache (mainly for tests and tooling).
    #[must_use]
    pub fn room_cache(&self) -> &RoomContributorCache {
        &self.room_cache
    }

    /// Replays the full log, oldest record first.
    pub fn replay(&self) -> Result<impl Iterator<Item = LedgerRecord>, ChorusError> {
        self.log.replay()
    }

    fn append(&self, event: GameEvent) -> Result<(), ChorusError> {
        self.log.append(&LedgerRecord {
            event,
            timestamp: millis_since_epoch(),
        })
    }

    /// Records an accepted input batch and folds its contributors into the
    /// accumulator.
    pub fn record_input_batch(
        &mut self,
        command: &FrameAdvanceCommand,
        contributors: &[Contributor],
    ) -> Result<(), ChorusError> {
        self.append(GameEvent::InputBatch {
            keys: command.keys_held.to_vec(),
            frame_count: command.frame_count,
            contributors: contributors.to_vec(),
        })?;
        merge_unique(&mut self.accumulator, contributors.iter().cloned());
        Ok(())
    }

    /// Credits a room transition.
    ///
    /// Contributors come from the accumulator; if it is empty and a room was
    /// actually left, the cache is walked newest→oldest for the first
    /// non-empty set. The cache entry written for the left room is the
    /// *pre-fallback* accumulator (possibly empty) — the set actually active
    /// when the room was left. Consumes the accumulator.
    pub fn credit_room_change(
        &mut self,
        from: Option<&str>,
        to: &str,
        chapter: &str,
        reason: &str,
    ) -> Result<Credit, ChorusError> {
        let pre_fallback = self.accumulator.clone();
        let contributors = if !pre_fallback.is_empty() {
            pre_fallback.clone()
        } else if from.is_some() {
            self.room_cache
                .most_recent_non_empty()
                .map(<[Contributor]>::to_vec)
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        let first_clear = !self.replay()?.any(|record| {
            matches!(
                &record.event,
                GameEvent::RoomChange { to: seen_to, chapter: seen_chapter, .. }
                    if seen_to == to && seen_chapter == chapter
            )
        });

        debug!(
            from = ?from,
            to,
            chapter,
            first_clear,
            credited = contributors.len(),
            "crediting room change"
        );

        self.append(GameEvent::RoomChange {
            from: from.map(str::to_owned),
            to: to.to_owned(),
            chapter: chapter.to_owned(),
            reason: reason.to_owned(),
            first_clear,
            contributors: contributors.clone(),
        })?;

        if let Some(from) = from {
            self.room_cache.insert(from, pre_fallback);
        }
        self.accumulator.clear();

        Ok(Credit {
            contributors,
            first_time: first_clear,
        })
    }

    /// Everyone credited for `chapter` since its most recent completion:
    /// the union of matching RoomChange contributor sets in the log plus the
    /// current accumulator, deduplicated by id in first-seen order.
    fn chapter_contributors(&self, chapter: &str) -> Result<Vec<Contributor>, ChorusError> {
        let mut credited = Vec::new();
        for record in self.replay()? {
            match &record.event {
                GameEvent::ChapterComplete { chapter: seen, .. } if seen == chapter => {
                    // A completion resets the accumulation window.
                    credited.clear();
                }
                GameEvent::RoomChange {
                    chapter: seen,
                    contributors,
                    ..
                } if seen == chapter => {
                    merge_unique(&mut credited, contributors.iter().cloned());
                }
                _ => {}
            }
        }
        merge_unique(&mut credited, self.accumulator.iter().cloned());
        Ok(credited)
    }

    /// Credits a chapter completion with everyone who contributed to its
    /// rooms since the previous completion. Consumes the accumulator and
    /// drops the room cache (its rooms belong to the finished run).
    pub fn credit_chapter_complete(&mut self, chapter: &str) -> Result<Credit, ChorusError> {
        let contributors = self.chapter_contributors(chapter)?;
        let first_completion = !self.replay()?.any(|record| {
            matches!(
                &record.event,
                GameEvent::ChapterComplete { chapter: seen, .. } if seen == chapter
            )
        });

        info!(
            chapter,
            first_completion,
            credited = contributors.len(),
            "crediting chapter completion"
        );

        self.append(GameEvent::ChapterComplete {
            chapter: chapter.to_owned(),
            first_completion,
            contributors: contributors.clone(),
        })?;

        self.accumulator.clear();
        self.room_cache.clear();

        Ok(Credit {
            contributors,
            first_time: first_completion,
        })
    }

    /// Credits a collectible pickup.
    ///
    /// A major pickup (a rare top-tier collectible such as a golden
    /// strawberry) credits the full chapter contributor set, computed as for
    /// a completion but clearing nothing. Anything else credits the cached
    /// set for its room plus the accumulator. A collectible never consumes
    /// the accumulator — it does not use up a pending room or chapter credit.
    pub fn credit_collectible(
        &mut self,
        kind: CollectibleKind,
        room: &str,
        chapter: &str,
        flags: CollectibleFlags,
        is_major: bool,
    ) -> Result<Credit, ChorusError> {
        let contributors = if is_major {
            self.chapter_contributors(chapter)?
        } else {
            let mut credited = self
                .room_cache
                .get(room)
                .map(<[Contributor]>::to_vec)
                .unwrap_or_default();
            merge_unique(&mut credited, self.accumulator.iter().cloned());
            credited
        };

        let first_time = !self.replay()?.any(|record| {
            matches!(
                &record.event,
                GameEvent::Collectible { kind: seen_kind, room: seen_room, chapter: seen_chapter, .. }
                    if *seen_kind == kind && seen_room == room && seen_chapter == chapter
            )
        });

        debug!(?kind, room, chapter, is_major, first_time, "crediting collectible");

        self.append(GameEvent::Collectible {
            kind,
            room: room.to_owned(),
            chapter: chapter.to_owned(),
            flags,
            contributors: contributors.clone(),
        })?;

        Ok(Credit {
            contributors,
            first_time,
        })
    }

    /// Records a death, credited to the pending batch contributors. Does not
    /// consume the accumulator.
    pub fn credit_death(&mut self, count: u32) -> Result<Vec<Contributor>, ChorusError> {
        let contributors = self.accumulator.clone();
        self.append(GameEvent::Death {
            count,
            contributors: contributors.clone(),
        })?;
        Ok(contributors)
    }

    /// Records a control-mode change. Mode flips carry no crowd credit.
    pub fn record_control_mode_change(
        &mut self,
        chapter: Option<&str>,
        reason: Option<&str>,
    ) -> Result<(), ChorusError> {
        self.append(GameEvent::ControlModeChange {
            chapter: chapter.map(str::to_owned),
            reason: reason.map(str::to_owned),
            contributors: Vec::new(),
        })
    }

    /// Records a free-form note.
    pub fn record_note(&mut self, text: &str) -> Result<(), ChorusError> {
        self.append(GameEvent::Note {
            text: text.to_owned(),
            contributors: Vec::new(),
        })
    }
}
