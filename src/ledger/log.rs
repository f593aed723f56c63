//! The durable, append-only event log.
//!
//! One [`LedgerRecord`] per line of JSON, appended forward and never
//! rewritten in place. Both operational tooling and the ledger's own replay
//! depend on that layout, so it is contractual. Appends are synchronous and
//! durable (flushed and fsynced) before they return; replays open their own
//! read handle and therefore run concurrently with appends, observing each
//! append atomically — a whole line or nothing.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Lines, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{error, warn};

use crate::error::ChorusError;
use crate::ledger::event::LedgerRecord;

/// Append-only JSONL event log.
#[derive(Debug)]
pub struct EventLog {
    path: PathBuf,
    /// Single-writer discipline: the mutex makes each append (serialize,
    /// write, flush, fsync) atomic with respect to other appends.
    writer: Mutex<File>,
}

impl EventLog {
    /// Opens (or creates) the log at `path`, creating parent directories as
    /// needed. Existing content is preserved; new records append.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ChorusError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let writer = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(writer),
        })
    }

    /// The log's on-disk location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record. Synchronous and durable: the line has been
    /// written, flushed, and fsynced when this returns `Ok`.
    pub fn append(&self, record: &LedgerRecord) -> Result<(), ChorusError> {
        let mut line = serde_json::to_string(record).map_err(|e| {
            ChorusError::invariant(format!("failed to serialize ledger record: {e}"))
        })?;
        line.push('\n');

        let mut writer = self.writer.lock();
        // One write call for the whole line keeps concurrent replays from
        // observing a torn record.
        writer.write_all(line.as_bytes())?;
        writer.flush()?;
        writer.sync_data()?;
        Ok(())
    }

    /// Replays the log from the start. Unreadable lines are skipped and
    /// logged loudly; availability beats strict consistency for this
    /// best-effort attribution feature.
    pub fn replay(&self) -> Result<Replay, ChorusError> {
        let file = File::open(&self.path)?;
        Ok(Replay {
            lines: BufReader::new(file).lines(),
            line_no: 0,
        })
    }
}

/// Iterator over the log's records, oldest first.
///
/// Corrupt or torn lines (including a final line whose append has not
/// finished) are skipped, not surfaced as errors.
#[derive(Debug)]
pub struct Replay {
    lines: Lines<BufReader<File>>,
    line_no: usize,
}

impl Iterator for Replay {
    type Item = LedgerRecord;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.line_no += 1;
            match self.lines.next()? {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<LedgerRecord>(&line) {
                        Ok(record) => return Some(record),
                        Err(e) => {
                            error!(
                                line = self.line_no,
                                error = %e,
                                "skipping unreadable ledger line"
                            );
                        }
                    }
                }
                Err(e) => {
                    warn!(line = self.line_no, error = %e, "ledger read error, stopping replay");
                    return None;
                }
            }
        }
    }
}
