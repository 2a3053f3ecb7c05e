//! Serializable introspection snapshot
//!
//! A point-in-time copy of a strategy's observable state, assembled from
//! the common introspection surface so external viewers can render or
//! diff allocator behavior without holding the strategy itself.

use serde::Serialize;

use super::block::Block;
use super::log::LogEntry;
use super::stats::HeapStats;
use super::HeapStrategy;

/// Stats, block table and operation log of one strategy at one moment.
#[derive(Debug, Clone, Serialize)]
pub struct HeapSnapshot {
    pub stats: HeapStats,
    pub blocks: Vec<Block>,
    pub log: Vec<LogEntry>,
}

impl HeapSnapshot {
    /// Copy the observable state out of a strategy.
    pub fn capture<S: HeapStrategy + ?Sized>(strategy: &S) -> Self {
        let blocks = (0..strategy.block_count())
            .filter_map(|i| strategy.block(i))
            .collect();
        let log = (0..strategy.log_len())
            .filter_map(|i| strategy.log_entry(i))
            .collect();
        Self {
            stats: strategy.stats(),
            blocks,
            log,
        }
    }

    /// Render the snapshot as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
