//! Best-fit free-list strategy, no coalescing
//!
//! Requests are padded to the alignment boundary and charged a fixed
//! header. Placement scans the whole free list for the smallest feasible
//! node; a selected block is split when the leftover clears a usefulness
//! threshold, otherwise the entire block is granted. Released blocks go
//! straight back on the free list but are never merged with neighbors, so
//! external fragmentation only ever grows until the next init.

use tracing::{debug, trace};

use super::block::{Block, BlockState};
use super::free_list::{FreeList, FreeNode};
use super::log::{LogAction, LogEntry, OperationLog};
use super::stats::{self, HeapStats};
use super::{
    align_up, AllocHandle, HeapStrategy, RegionFlags, FREE_NODE_SIZE, HEADER_SIZE, MAX_BLOCKS,
    MAX_HEAP_SIZE, SPLIT_SLACK,
};

/// Best-fit allocator over one contiguous region.
#[derive(Debug, Default)]
pub struct BestFitHeap {
    blocks: Vec<Block>,
    free: FreeList,
    log: OperationLog,
    stats: HeapStats,
}

impl BestFitHeap {
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
        self.blocks.clear();
        self.free.clear();
        self.log.clear();

        let ts = self.stats.tick();
        let full = Block::free(0, self.stats.total_size, 0, ts);
        self.blocks.push(full);
        self.free.push_front(FreeNode::for_block(&full));

        self.update_stats();
        self.log_event(LogAction::Init, 0, total_size, 0, true);
        debug!(
            total_size = self.stats.total_size,
            "best-fit heap initialized"
        );
    }

    /// Best-fit search over the free list, splitting when worthwhile.
    pub fn allocate(
        &mut self,
        size: usize,
    ) -> Option<AllocHandle> {
        let requested_size = size;
        let aligned_size = align_up(size);
        let need = aligned_size + HEADER_SIZE;

        let Some(node_idx) = self.free.best_fit(need) else {
            trace!(size, "best-fit allocation failed, no feasible node");
            let id = self.stats.next_allocation_id;
            self.log_event(LogAction::Malloc, id, size, 0, false);
            return None;
        };
        let node = self.free.remove(node_idx);
        let offset = node.offset;

        self.claim_block(offset, need, requested_size);

        let id = self.stats.next_allocation_id;
        self.log_event(LogAction::Malloc, id, size, offset, true);
        self.stats.next_allocation_id += 1;

        self.sort_blocks();
        self.update_stats();
        trace!(size, offset, "best-fit allocation");
        Some(AllocHandle(offset + HEADER_SIZE))
    }

    /// Mark the owning block released and return it to the free list.
    ///
    /// The block stays `Released` (not `Free`): it is immediately eligible
    /// for new allocations but will never merge with its neighbors.
    pub fn release(
        &mut self,
        handle: AllocHandle,
    ) {
        let block_offset = handle.0.saturating_sub(HEADER_SIZE);

        let found = self
            .blocks
            .iter()
            .position(|b| b.offset == block_offset && b.state == BlockState::Allocated);

        let mut alloc_id = 0;
        if let Some(idx) = found {
            alloc_id = self.blocks[idx].allocation_id;
            let block = &mut self.blocks[idx];
            block.state = BlockState::Released;
            block.allocation_id = 0;
            block.requested_size = 0;
            let node = FreeNode::for_block(&self.blocks[idx]);
            self.free.push_front(node);
            trace!(offset = block_offset, alloc_id, "best-fit release");
        } else {
            trace!(offset = block_offset, "release of unknown handle");
        }

        self.log_event(LogAction::Free, alloc_id, 0, block_offset, true);
        self.sort_blocks();
        self.update_stats();
    }

    /// Re-init with the previously configured size.
    pub fn reset(&mut self) {
        self.init(self.stats.total_size);
    }

    /// Transition the reusable block at `offset` to allocated, splitting
    /// off the remainder when it clears the usefulness threshold.
    fn claim_block(
        &mut self,
        offset: usize,
        need: usize,
        requested_size: usize,
    ) {
        let Some(idx) = self
            .blocks
            .iter()
            .position(|b| b.offset == offset && b.state.is_reusable())
        else {
            return;
        };

        let original_size = self.blocks[idx].size;
        if original_size > need + FREE_NODE_SIZE + SPLIT_SLACK && self.blocks.len() < MAX_BLOCKS {
            // Front of the donor becomes the exact grant; the remainder
            // keeps the donor's FREE/RELEASED state and rejoins the list.
            let donor_state = self.blocks[idx].state;
            let ts = self.stats.tick();
            let remainder = Block {
                offset: offset + need,
                size: original_size - need,
                state: donor_state,
                allocation_id: 0,
                timestamp: ts,
                requested_size: 0,
                region_id: 0,
            };
            self.blocks.push(remainder);
            self.free.push_front(FreeNode::for_block(&remainder));
            self.blocks[idx].size = need;
        }

        let ts = self.stats.tick();
        let block = &mut self.blocks[idx];
        block.state = BlockState::Allocated;
        block.allocation_id = self.stats.next_allocation_id;
        block.timestamp = ts;
        block.requested_size = requested_size;
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

    fn sort_blocks(&mut self) {
        self.blocks.sort_by_key(|b| b.offset);
    }

    fn update_stats(&mut self) {
        stats::recompute(&mut self.stats, &self.blocks);
    }
}

impl HeapStrategy for BestFitHeap {
    fn init(
        &mut self,
        total_size: usize,
    ) {
        BestFitHeap::init(self, total_size);
    }

    fn allocate(
        &mut self,
        size: usize,
    ) -> Option<AllocHandle> {
        BestFitHeap::allocate(self, size)
    }

    fn release(
        &mut self,
        handle: AllocHandle,
    ) {
        BestFitHeap::release(self, handle);
    }

    fn reset(&mut self) {
        BestFitHeap::reset(self);
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
