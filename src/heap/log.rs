//! Operation log
//!
//! Every lifecycle call appends one entry so a run can be replayed or
//! inspected after the fact. The log has a fixed capacity; once it is full,
//! further entries are silently dropped while the operations themselves
//! keep going. That degradation is deliberate: recording must never make
//! an allocation fail.

use serde::Serialize;
use std::fmt;

use super::{RegionFlags, MAX_LOG_ENTRIES};

/// Kind of lifecycle event a log entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogAction {
    Init,
    Malloc,
    Free,
    Coalesce,
    FullCoalesce,
}

impl fmt::Display for LogAction {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            LogAction::Init => "INIT",
            LogAction::Malloc => "MALLOC",
            LogAction::Free => "FREE",
            LogAction::Coalesce => "COALESCE",
            LogAction::FullCoalesce => "FULL_COALESCE",
        };
        f.write_str(name)
    }
}

/// One recorded lifecycle call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub action: LogAction,
    pub allocation_id: u32,
    pub size: usize,
    pub offset: usize,
    pub success: bool,
    pub timestamp: u32,
    /// Owning region for multi-region strategies; 0 otherwise.
    pub region_id: u8,
    /// Capability mask of the request, where one was supplied.
    pub flags: RegionFlags,
}

/// Bounded append-only record of lifecycle calls.
#[derive(Debug, Clone, Default)]
pub struct OperationLog {
    entries: Vec<LogEntry>,
}

impl OperationLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Append an entry, silently dropping it once the log is full.
    pub fn push(
        &mut self,
        entry: LogEntry,
    ) {
        if self.entries.len() >= MAX_LOG_ENTRIES {
            return;
        }
        self.entries.push(entry);
    }

    /// Number of recorded entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the log has reached capacity and drops new entries.
    pub fn is_full(&self) -> bool {
        self.entries.len() >= MAX_LOG_ENTRIES
    }

    /// Copy of the entry at `index`, if any.
    pub fn entry(
        &self,
        index: usize,
    ) -> Option<LogEntry> {
        self.entries.get(index).copied()
    }

    /// All recorded entries, oldest first.
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Drop every recorded entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
