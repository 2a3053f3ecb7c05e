//! Free-list strategy with fragmentation-triggered coalescing
//!
//! Placement and splitting work exactly as in the best-fit strategy; what
//! changes is reclamation. Every release immediately tries to merge the
//! freed block with its physical neighbors, and a lazy full sweep runs
//! before an allocation once external fragmentation crosses a threshold.
//! Merged blocks are normalized to `Free`; the free list is kept coherent
//! with the block table through both passes.

use tracing::{debug, trace};

use super::block::{Block, BlockState};
use super::free_list::{FreeList, FreeNode};
use super::log::{LogAction, LogEntry, OperationLog};
use super::stats::{self, HeapStats};
use super::{
    align_up, AllocHandle, HeapStrategy, RegionFlags, FRAGMENTATION_THRESHOLD, FREE_NODE_SIZE,
    HEADER_SIZE, MAX_BLOCKS, MAX_HEAP_SIZE, SPLIT_SLACK,
};

/// Best-fit allocator with two-phase coalescing over one region.
#[derive(Debug, Default)]
pub struct CoalescingHeap {
    blocks: Vec<Block>,
    free: FreeList,
    log: OperationLog,
    stats: HeapStats,
    coalesce_pending: bool,
}

impl CoalescingHeap {
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
        self.coalesce_pending = false;

        let ts = self.stats.tick();
        let full = Block::free(0, self.stats.total_size, 0, ts);
        self.blocks.push(full);
        self.free.push_front(FreeNode::for_block(&full));

        self.update_stats();
        self.log_event(LogAction::Init, 0, total_size, 0, true);
        debug!(
            total_size = self.stats.total_size,
            "coalescing heap initialized"
        );
    }

    /// Best-fit search, preceded by a full merge sweep when fragmentation
    /// warrants one and retried once after a sweep if the first search
    /// comes up empty.
    pub fn allocate(
        &mut self,
        size: usize,
    ) -> Option<AllocHandle> {
        let requested_size = size;
        let aligned_size = align_up(size);
        let need = aligned_size + HEADER_SIZE;

        self.update_stats();
        if self.coalesce_pending
            && self.stats.external_fragmentation_pct > FRAGMENTATION_THRESHOLD
        {
            debug!(
                fragmentation = self.stats.external_fragmentation_pct,
                "fragmentation threshold crossed, running full coalesce"
            );
            self.full_coalesce();
            self.update_stats();
        }

        let mut node_idx = self.free.best_fit(need);
        if node_idx.is_none() && self.coalesce_pending {
            // Last chance: merge everything mergeable and look again.
            self.full_coalesce();
            node_idx = self.free.best_fit(need);
        }

        let Some(node_idx) = node_idx else {
            trace!(size, "coalescing allocation failed, no feasible node");
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
        trace!(size, offset, "coalescing allocation");
        Some(AllocHandle(offset + HEADER_SIZE))
    }

    /// Release the owning block, merge it with adjacent reusable
    /// neighbors, and leave a full sweep pending.
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

            self.immediate_neighbor_coalesce(block_offset);
            self.coalesce_pending = true;
            trace!(offset = block_offset, alloc_id, "coalescing release");
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

    /// Merge the block at `freed_offset` with its immediate left and/or
    /// right neighbor when that neighbor is reusable and physically
    /// adjacent. At most a two-way merge; never a transitive sweep.
    fn immediate_neighbor_coalesce(
        &mut self,
        freed_offset: usize,
    ) {
        self.sort_blocks();

        let Some(mut idx) = self
            .blocks
            .iter()
            .position(|b| b.offset == freed_offset)
        else {
            return;
        };

        let mut coalesced = false;

        if idx > 0 {
            let left = self.blocks[idx - 1];
            let current = self.blocks[idx];
            if left.state.is_reusable() && left.end() == current.offset {
                self.free.remove_at(current.offset, 0);
                self.free.remove_at(left.offset, 0);

                self.blocks[idx - 1].size += current.size;
                self.blocks[idx - 1].state = BlockState::Free;
                self.blocks.remove(idx);
                idx -= 1;

                let node = FreeNode::for_block(&self.blocks[idx]);
                self.free.push_front(node);
                coalesced = true;
            }
        }

        if idx + 1 < self.blocks.len() {
            let right = self.blocks[idx + 1];
            if right.state.is_reusable() && self.blocks[idx].end() == right.offset {
                self.free.remove_at(right.offset, 0);
                self.free.remove_at(self.blocks[idx].offset, 0);

                self.blocks[idx].size += right.size;
                self.blocks[idx].state = BlockState::Free;
                self.blocks.remove(idx + 1);

                let node = FreeNode::for_block(&self.blocks[idx]);
                self.free.push_front(node);
                coalesced = true;
            }
        }

        if coalesced {
            trace!(offset = freed_offset, "neighbor coalesce");
            self.log_event(LogAction::Coalesce, 0, 0, freed_offset, true);
        }
    }

    /// Linear sweep merging every run of adjacent reusable blocks,
    /// normalizing `Released` to `Free` and rebuilding the free list.
    fn full_coalesce(&mut self) {
        self.sort_blocks();

        let mut merged: Vec<Block> = Vec::with_capacity(self.blocks.len());
        let mut coalesce_count = 0usize;

        for block in self.blocks.drain(..) {
            if let Some(last) = merged.last_mut() {
                if last.state == BlockState::Free
                    && block.state.is_reusable()
                    && last.offset + last.size == block.offset
                {
                    last.size += block.size;
                    last.allocation_id = 0;
                    coalesce_count += 1;
                    continue;
                }
            }
            let mut next = block;
            if next.state == BlockState::Released {
                next.state = BlockState::Free;
                next.allocation_id = 0;
            }
            merged.push(next);
        }
        self.blocks = merged;

        if coalesce_count > 0 {
            debug!(merges = coalesce_count, "full coalesce");
            self.log_event(LogAction::FullCoalesce, 0, coalesce_count, 0, true);
        }

        self.free.clear();
        for i in 0..self.blocks.len() {
            if self.blocks[i].state == BlockState::Free {
                let node = FreeNode::for_block(&self.blocks[i]);
                self.free.push_front(node);
            }
        }

        self.coalesce_pending = false;
    }

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

impl HeapStrategy for CoalescingHeap {
    fn init(
        &mut self,
        total_size: usize,
    ) {
        CoalescingHeap::init(self, total_size);
    }

    fn allocate(
        &mut self,
        size: usize,
    ) -> Option<AllocHandle> {
        CoalescingHeap::allocate(self, size)
    }

    fn release(
        &mut self,
        handle: AllocHandle,
    ) {
        CoalescingHeap::release(self, handle);
    }

    fn reset(&mut self) {
        CoalescingHeap::reset(self);
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
