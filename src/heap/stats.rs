//! Statistics aggregation
//!
//! Occupancy and fragmentation metrics derived from a block table. The
//! recompute pass is total: degenerate inputs (an empty table, zero free
//! bytes, a stale largest-free value) stabilize to zero/neutral outputs
//! instead of producing NaN or negative figures.

use serde::Serialize;

use super::block::{Block, BlockState};

/// Aggregate view of one managed region, or of a whole strategy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HeapStats {
    /// Managed size adopted at init (after clamping).
    pub total_size: usize,
    /// Bytes currently granted to live allocations, header-inclusive.
    pub allocated_bytes: usize,
    /// Bytes in free or released blocks.
    pub free_bytes: usize,
    /// Number of live allocations.
    pub allocation_count: u32,
    /// Number of free or released blocks.
    pub free_block_count: u32,
    /// Identifier the next successful allocation will receive.
    pub next_allocation_id: u32,
    /// Monotone event counter shared by blocks and log entries.
    pub timestamp_counter: u32,
    /// Size of the largest free span.
    pub largest_free_block: usize,
    /// Size of the smallest free span; 0 when none exist.
    pub smallest_free_block: usize,
    /// Low-water mark of `free_bytes` since the last init.
    pub min_free_bytes: usize,
    /// `(1 - largest_free / total_free) * 100`, 0 when nothing is free.
    pub external_fragmentation_pct: f32,
    /// `(granted - requested) / granted * 100` over allocated blocks that
    /// recorded a request size, 0 otherwise.
    pub internal_fragmentation_pct: f32,
}

impl HeapStats {
    /// Fresh statistics for a region of `total_size` bytes.
    pub fn with_total(total_size: usize) -> Self {
        Self {
            total_size,
            allocated_bytes: 0,
            free_bytes: 0,
            allocation_count: 0,
            free_block_count: 0,
            next_allocation_id: 1,
            timestamp_counter: 0,
            largest_free_block: 0,
            smallest_free_block: 0,
            min_free_bytes: total_size,
            external_fragmentation_pct: 0.0,
            internal_fragmentation_pct: 0.0,
        }
    }

    /// Draw the next value from the shared event counter.
    pub fn tick(&mut self) -> u32 {
        let t = self.timestamp_counter;
        self.timestamp_counter += 1;
        t
    }
}

impl Default for HeapStats {
    fn default() -> Self {
        Self::with_total(0)
    }
}

/// Recompute the derived fields of `stats` from a block iterator.
///
/// Counters (`next_allocation_id`, `timestamp_counter`) and `total_size`
/// are live state owned by the strategy and are left untouched. The
/// low-water mark only ever moves down between inits.
pub fn recompute_from<'a>(
    stats: &mut HeapStats,
    blocks: impl Iterator<Item = &'a Block>,
) {
    stats.allocated_bytes = 0;
    stats.free_bytes = 0;
    stats.allocation_count = 0;
    stats.free_block_count = 0;
    stats.largest_free_block = 0;
    stats.smallest_free_block = stats.total_size;

    let mut total_requested = 0usize;
    let mut total_allocated = 0usize;
    let mut has_free_blocks = false;

    for block in blocks {
        match block.state {
            BlockState::Allocated => {
                stats.allocated_bytes += block.size;
                stats.allocation_count += 1;

                if block.requested_size > 0 {
                    total_requested += block.requested_size;
                    total_allocated += block.size;
                }
            }
            BlockState::Free | BlockState::Released => {
                stats.free_bytes += block.size;
                stats.free_block_count += 1;
                has_free_blocks = true;

                if block.size > stats.largest_free_block {
                    stats.largest_free_block = block.size;
                }
                if block.size < stats.smallest_free_block {
                    stats.smallest_free_block = block.size;
                }
            }
        }
    }

    stats.external_fragmentation_pct =
        external_fragmentation(stats.largest_free_block, stats.free_bytes);
    stats.internal_fragmentation_pct = internal_fragmentation(total_allocated, total_requested);

    if stats.free_bytes < stats.min_free_bytes {
        stats.min_free_bytes = stats.free_bytes;
    }

    if !has_free_blocks {
        stats.smallest_free_block = 0;
    }
}

/// Recompute over a full block table.
pub fn recompute(
    stats: &mut HeapStats,
    blocks: &[Block],
) {
    recompute_from(stats, blocks.iter());
}

/// Share of free memory outside the largest free span, as a percentage.
pub fn external_fragmentation(
    largest_free: usize,
    free_bytes: usize,
) -> f32 {
    if free_bytes > 0 && largest_free > 0 {
        (1.0 - largest_free as f32 / free_bytes as f32) * 100.0
    } else {
        0.0
    }
}

/// Share of granted memory beyond what was requested, as a percentage.
pub fn internal_fragmentation(
    total_allocated: usize,
    total_requested: usize,
) -> f32 {
    if total_allocated > 0 && total_requested > 0 {
        (total_allocated - total_requested) as f32 / total_allocated as f32 * 100.0
    } else {
        0.0
    }
}
