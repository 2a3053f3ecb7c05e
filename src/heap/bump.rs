//! Bump (arena) strategy
//!
//! The simplest of the five strategies: a monotone cursor carves
//! allocations off the front of a single trailing free block and never
//! reuses anything. `release` is a logged no-op. With no reclamation there
//! is no fragmentation to speak of; both metrics stay at zero for the life
//! of the region.

use tracing::{debug, trace};

use super::block::{Block, BlockState};
use super::log::{LogAction, LogEntry, OperationLog};
use super::stats::HeapStats;
use super::{align_up, AllocHandle, HeapStrategy, RegionFlags, MAX_BLOCKS, MAX_HEAP_SIZE};

/// Arena allocator over one contiguous region.
///
/// A fresh instance manages zero bytes; call [`BumpHeap::init`] to adopt a
/// region size.
#[derive(Debug, Default)]
pub struct BumpHeap {
    blocks: Vec<Block>,
    log: OperationLog,
    stats: HeapStats,
    cursor: usize,
}

impl BumpHeap {
    /// Create an uninitialized strategy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset all state and adopt `total_size` (clamped) as the region size.
    pub fn init(
        &mut self,
        total_size: usize,
    ) {
        self.stats = HeapStats::with_total(total_size.min(MAX_HEAP_SIZE));
        self.cursor = 0;
        self.blocks.clear();
        self.log.clear();

        let ts = self.stats.tick();
        self.blocks
            .push(Block::free(0, self.stats.total_size, 0, ts));

        self.update_stats();
        self.log_event(LogAction::Init, 0, total_size, 0, true);
        debug!(total_size = self.stats.total_size, "bump heap initialized");
    }

    /// Advance the cursor by the aligned request, or fail when the tail is
    /// too small.
    pub fn allocate(
        &mut self,
        size: usize,
    ) -> Option<AllocHandle> {
        let requested_size = size;
        let aligned_size = align_up(size);

        if self.cursor + aligned_size > self.stats.total_size {
            trace!(size, "bump allocation failed, tail exhausted");
            let id = self.stats.next_allocation_id;
            self.log_event(LogAction::Malloc, id, size, 0, false);
            return None;
        }

        let offset = self.cursor;

        // Shrink the single trailing free block; the allocated span grows
        // the table from the front.
        if let Some(free_idx) = self
            .blocks
            .iter()
            .position(|b| b.state == BlockState::Free)
        {
            if self.blocks.len() < MAX_BLOCKS - 1 {
                let ts = self.stats.tick();
                self.blocks.push(Block {
                    offset,
                    size: aligned_size,
                    state: BlockState::Allocated,
                    allocation_id: self.stats.next_allocation_id,
                    timestamp: ts,
                    requested_size,
                    region_id: 0,
                });

                let total = self.stats.total_size;
                let free = &mut self.blocks[free_idx];
                free.offset = offset + aligned_size;
                free.size = total - (offset + aligned_size);
                if free.size == 0 {
                    self.blocks.remove(free_idx);
                }
            }
        }

        let id = self.stats.next_allocation_id;
        self.log_event(LogAction::Malloc, id, size, offset, true);
        self.stats.next_allocation_id += 1;
        self.cursor += aligned_size;

        self.update_stats();
        trace!(size, offset, "bump allocation");
        Some(AllocHandle(offset))
    }

    /// Log the call; the strategy offers no reclamation.
    pub fn release(
        &mut self,
        handle: AllocHandle,
    ) {
        trace!(offset = handle.0, "bump release ignored");
        self.log_event(LogAction::Free, 0, 0, handle.0, false);
    }

    /// Re-init with the previously configured size.
    pub fn reset(&mut self) {
        self.init(self.stats.total_size);
    }

    fn log_event(
        &mut self,
        action: LogAction,
        allocation_id: u32,
        size: usize,
        offset: usize,
        success: bool,
    ) {
        if self.log.is_full() {
            return;
        }
        let timestamp = self.stats.tick();
        self.log.push(LogEntry {
            action,
            allocation_id,
            size,
            offset,
            success,
            timestamp,
            region_id: 0,
            flags: RegionFlags::NONE,
        });
    }

    // The bump layout makes most aggregates trivial: everything before the
    // cursor is allocated, everything after it is one free span.
    fn update_stats(&mut self) {
        let allocation_count = self
            .blocks
            .iter()
            .filter(|b| b.state == BlockState::Allocated)
            .count() as u32;
        let has_free = self
            .blocks
            .iter()
            .any(|b| b.state == BlockState::Free);

        let stats = &mut self.stats;
        stats.allocated_bytes = self.cursor;
        stats.free_bytes = stats.total_size - self.cursor;
        stats.allocation_count = allocation_count;
        stats.free_block_count = u32::from(has_free);

        if stats.free_bytes > 0 {
            stats.largest_free_block = stats.free_bytes;
            stats.smallest_free_block = stats.free_bytes;
        } else {
            stats.largest_free_block = 0;
            stats.smallest_free_block = 0;
        }

        stats.external_fragmentation_pct = 0.0;
        stats.internal_fragmentation_pct = 0.0;

        if stats.free_bytes < stats.min_free_bytes {
            stats.min_free_bytes = stats.free_bytes;
        }
    }
}

impl HeapStrategy for BumpHeap {
    fn init(
        &mut self,
        total_size: usize,
    ) {
        BumpHeap::init(self, total_size);
    }

    fn allocate(
        &mut self,
        size: usize,
    ) -> Option<AllocHandle> {
        BumpHeap::allocate(self, size)
    }

    fn release(
        &mut self,
        handle: AllocHandle,
    ) {
        BumpHeap::release(self, handle);
    }

    fn reset(&mut self) {
        BumpHeap::reset(self);
    }

    fn stats(&self) -> HeapStats {
        self.stats
    }

    fn block_count(&self) -> usize {
        self.blocks.len()
    }

    fn block(
        &self,
        index: usize,
    ) -> Option<Block> {
        self.blocks.get(index).copied()
    }

    fn log_len(&self) -> usize {
        self.log.len()
    }

    fn log_entry(
        &self,
        index: usize,
    ) -> Option<LogEntry> {
        self.log.entry(index)
    }

    fn clear_log(&mut self) {
        self.log.clear();
    }
}
