//! Multi-region strategy with capability-constrained placement
//!
//! Several disjoint regions, each with its own capability flags and free
//! list, share one block table and one log. A request may demand
//! capabilities; eligible regions are those whose flags are a superset of
//! the mask, and the best-fit search runs across all of them at once,
//! taking the globally smallest feasible span. Reclamation is the
//! coalescing strategy's, scoped per region: merges never cross a region
//! boundary.
//!
//! Regions occupy consecutive ranges of one nominal address space, so a
//! handle alone identifies its owning region; block-table offsets remain
//! region-local.

use tracing::{debug, trace};

use super::block::{Block, BlockState};
use super::free_list::{FreeList, FreeNode};
use super::log::{LogAction, LogEntry, OperationLog};
use super::stats::{self, HeapStats};
use super::{
    align_up, AllocHandle, HeapStrategy, RegionFlags, FRAGMENTATION_THRESHOLD, FREE_NODE_SIZE,
    HEADER_SIZE, MAX_BLOCKS, SPLIT_SLACK,
};
use crate::util::config::{ConfigError, HeapConfig, RegionSpec};

/// Upper bound on the number of regions a layout may define.
pub const MAX_REGIONS: usize = 8;

/// One managed region and its private statistics.
#[derive(Debug, Clone)]
pub struct Region {
    /// Base of this region in the nominal address space.
    start: usize,
    size: usize,
    region_id: u8,
    flags: RegionFlags,
    name: String,
    stats: HeapStats,
}

impl Region {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flags(&self) -> RegionFlags {
        self.flags
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn region_id(&self) -> u8 {
        self.region_id
    }
}

/// Flag-constrained allocator over a configurable set of regions.
#[derive(Debug)]
pub struct MultiRegionHeap {
    regions: Vec<Region>,
    free_lists: Vec<FreeList>,
    blocks: Vec<Block>,
    log: OperationLog,
    stats: HeapStats,
    layout: Vec<RegionSpec>,
    coalesce_pending: bool,
    initialized: bool,
}

impl Default for MultiRegionHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiRegionHeap {
    /// Create an uninitialized strategy with the built-in region layout.
    pub fn new() -> Self {
        Self {
            regions: Vec::new(),
            free_lists: Vec::new(),
            blocks: Vec::new(),
            log: OperationLog::new(),
            stats: HeapStats::default(),
            layout: HeapConfig::default().regions,
            coalesce_pending: false,
            initialized: false,
        }
    }

    /// Create an uninitialized strategy with a custom region layout.
    pub fn with_config(config: HeapConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut heap = Self::new();
        heap.layout = config.regions;
        Ok(heap)
    }

    /// Reset all state and lay the regions back out.
    ///
    /// The size argument of the common contract is ignored here: total
    /// capacity is the sum of the configured region sizes.
    pub fn init(
        &mut self,
        _total_size: usize,
    ) {
        self.blocks.clear();
        self.log.clear();
        self.coalesce_pending = false;
        self.stats = HeapStats::default();

        self.define_regions();

        let total: usize = self.regions.iter().map(|r| r.size).sum();
        self.stats.total_size = total;
        self.stats.min_free_bytes = total;
        self.initialized = true;

        self.update_global_stats();
        self.log_event(LogAction::Init, 0, total, 0, true, 0, RegionFlags::NONE);
        debug!(
            total,
            regions = self.regions.len(),
            "multi-region heap initialized"
        );
    }

    /// Allocate without capability constraints.
    pub fn allocate(
        &mut self,
        size: usize,
    ) -> Option<AllocHandle> {
        self.allocate_with_flags(size, RegionFlags::NONE)
    }

    /// Best-fit allocation across every region eligible under `flags`.
    pub fn allocate_with_flags(
        &mut self,
        size: usize,
        flags: RegionFlags,
    ) -> Option<AllocHandle> {
        if !self.initialized {
            return None;
        }

        let requested_size = size;
        let aligned_size = align_up(size);
        let need = aligned_size + HEADER_SIZE;

        self.update_global_stats();
        if self.coalesce_pending
            && self.stats.external_fragmentation_pct > FRAGMENTATION_THRESHOLD
        {
            debug!(
                fragmentation = self.stats.external_fragmentation_pct,
                "fragmentation threshold crossed, running full coalesce"
            );
            self.full_coalesce();
            self.update_global_stats();
        }

        let mut found = self.global_best_fit(need, flags);
        if found.is_none() && self.coalesce_pending {
            self.full_coalesce();
            found = self.global_best_fit(need, flags);
        }

        let Some((region_idx, node_idx)) = found else {
            trace!(size, %flags, "no eligible region can satisfy the request");
            let id = self.stats.next_allocation_id;
            self.log_event(LogAction::Malloc, id, size, 0, false, u8::MAX, flags);
            return None;
        };

        let node = self.free_lists[region_idx].remove(node_idx);
        let local_offset = node.offset;
        let region_id = node.region_id;

        self.claim_block(region_id, local_offset, need, requested_size);

        let id = self.stats.next_allocation_id;
        self.log_event(
            LogAction::Malloc,
            id,
            size,
            local_offset,
            true,
            region_id,
            flags,
        );
        self.stats.next_allocation_id += 1;

        self.sort_blocks();
        self.update_global_stats();

        let base = self.regions[region_idx].start;
        trace!(size, region_id, local_offset, "multi-region allocation");
        Some(AllocHandle(base + local_offset + HEADER_SIZE))
    }

    /// Resolve the owning region from the handle's address range, release
    /// the block, and merge it with same-region neighbors.
    pub fn release(
        &mut self,
        handle: AllocHandle,
    ) {
        if !self.initialized {
            return;
        }

        let block_start = handle.0.saturating_sub(HEADER_SIZE);
        let Some(region_idx) = self.region_for(block_start) else {
            trace!(addr = handle.0, "release outside every region");
            self.log_event(LogAction::Free, 0, 0, block_start, true, 0, RegionFlags::NONE);
            return;
        };
        let region_id = region_idx as u8;
        let local_offset = block_start - self.regions[region_idx].start;

        let found = self.blocks.iter().position(|b| {
            b.region_id == region_id
                && b.offset == local_offset
                && b.state == BlockState::Allocated
        });

        let mut alloc_id = 0;
        if let Some(idx) = found {
            alloc_id = self.blocks[idx].allocation_id;
            let block = &mut self.blocks[idx];
            block.state = BlockState::Released;
            block.allocation_id = 0;
            block.requested_size = 0;

            let node = FreeNode::for_block(&self.blocks[idx]);
            self.free_lists[region_idx].push_front(node);

            self.immediate_neighbor_coalesce(local_offset, region_id);
            self.coalesce_pending = true;
            trace!(region_id, local_offset, alloc_id, "multi-region release");
        } else {
            trace!(region_id, local_offset, "release of unknown handle");
        }

        self.log_event(
            LogAction::Free,
            alloc_id,
            0,
            local_offset,
            true,
            region_id,
            RegionFlags::NONE,
        );
        self.sort_blocks();
        self.update_global_stats();
    }

    /// Re-init; the region layout is preserved.
    pub fn reset(&mut self) {
        self.initialized = false;
        self.init(self.stats.total_size);
    }

    /// Number of configured regions.
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Per-region statistics snapshot. Id and timestamp counters are
    /// global and are mirrored into the snapshot.
    pub fn region_stats(
        &self,
        region_id: u8,
    ) -> Option<HeapStats> {
        let region = self.regions.get(region_id as usize)?;
        let mut snapshot = region.stats;
        snapshot.next_allocation_id = self.stats.next_allocation_id;
        snapshot.timestamp_counter = self.stats.timestamp_counter;
        Some(snapshot)
    }

    /// Name of a region.
    pub fn region_name(
        &self,
        region_id: u8,
    ) -> Option<&str> {
        self.regions.get(region_id as usize).map(|r| r.name())
    }

    /// Capability flags of a region.
    pub fn region_flags(
        &self,
        region_id: u8,
    ) -> Option<RegionFlags> {
        self.regions.get(region_id as usize).map(|r| r.flags())
    }

    /// Size of a region in bytes.
    pub fn region_size(
        &self,
        region_id: u8,
    ) -> Option<usize> {
        self.regions.get(region_id as usize).map(|r| r.size())
    }

    /// Lay regions out back to back in the nominal address space and seed
    /// each with one full-region free block.
    fn define_regions(&mut self) {
        self.regions.clear();
        self.free_lists.clear();

        let mut base = 0usize;
        for (i, spec) in self.layout.iter().enumerate().take(MAX_REGIONS) {
            let region_id = i as u8;
            self.regions.push(Region {
                start: base,
                size: spec.size,
                region_id,
                flags: spec.flags,
                name: spec.name.clone(),
                stats: HeapStats::with_total(spec.size),
            });
            base += spec.size;

            let mut list = FreeList::new();
            list.push_front(FreeNode {
                offset: 0,
                size: spec.size,
                region_id,
            });
            self.free_lists.push(list);

            if self.blocks.len() < MAX_BLOCKS {
                let ts = self.stats.tick();
                self.blocks.push(Block::free(0, spec.size, region_id, ts));
            }
        }
    }

    /// Region whose nominal range contains `addr`.
    fn region_for(
        &self,
        addr: usize,
    ) -> Option<usize> {
        self.regions
            .iter()
            .position(|r| addr >= r.start && addr < r.start + r.size)
    }

    /// Globally smallest feasible node among regions eligible under
    /// `flags`. Regions are visited in id order and the comparison is
    /// strict, so earlier candidates win ties.
    fn global_best_fit(
        &self,
        need: usize,
        flags: RegionFlags,
    ) -> Option<(usize, usize)> {
        let mut best: Option<(usize, usize, usize)> = None;
        for (r, region) in self.regions.iter().enumerate() {
            if !flags.is_empty() && !region.flags.contains(flags) {
                continue;
            }
            if let Some(idx) = self.free_lists[r].best_fit(need) {
                let size = self.free_lists[r].node(idx).size;
                match best {
                    Some((_, _, bs)) if bs <= size => {}
                    _ => best = Some((r, idx, size)),
                }
            }
        }
        best.map(|(r, idx, _)| (r, idx))
    }

    fn claim_block(
        &mut self,
        region_id: u8,
        local_offset: usize,
        need: usize,
        requested_size: usize,
    ) {
        let Some(idx) = self.blocks.iter().position(|b| {
            b.region_id == region_id && b.offset == local_offset && b.state.is_reusable()
        }) else {
            return;
        };

        let original_size = self.blocks[idx].size;
        if original_size > need + FREE_NODE_SIZE + SPLIT_SLACK && self.blocks.len() < MAX_BLOCKS {
            let donor_state = self.blocks[idx].state;
            let ts = self.stats.tick();
            let remainder = Block {
                offset: local_offset + need,
                size: original_size - need,
                state: donor_state,
                allocation_id: 0,
                timestamp: ts,
                requested_size: 0,
                region_id,
            };
            self.blocks.push(remainder);
            self.free_lists[region_id as usize].push_front(FreeNode::for_block(&remainder));
            self.blocks[idx].size = need;
        }

        let ts = self.stats.tick();
        let block = &mut self.blocks[idx];
        block.state = BlockState::Allocated;
        block.allocation_id = self.stats.next_allocation_id;
        block.timestamp = ts;
        block.requested_size = requested_size;
    }

    /// Same-region variant of the immediate neighbor merge: the table is
    /// sorted by local offset with regions interleaved, so both adjacency
    /// and region identity gate each merge.
    fn immediate_neighbor_coalesce(
        &mut self,
        freed_offset: usize,
        region_id: u8,
    ) {
        self.sort_blocks();

        let Some(mut idx) = self
            .blocks
            .iter()
            .position(|b| b.offset == freed_offset && b.region_id == region_id)
        else {
            return;
        };

        let mut coalesced = false;

        if idx > 0 {
            let left = self.blocks[idx - 1];
            let current = self.blocks[idx];
            if left.region_id == region_id
                && left.state.is_reusable()
                && left.end() == current.offset
            {
                self.free_lists[region_id as usize].remove_at(current.offset, region_id);
                self.free_lists[region_id as usize].remove_at(left.offset, region_id);

                self.blocks[idx - 1].size += current.size;
                self.blocks[idx - 1].state = BlockState::Free;
                self.blocks.remove(idx);
                idx -= 1;

                let node = FreeNode::for_block(&self.blocks[idx]);
                self.free_lists[region_id as usize].push_front(node);
                coalesced = true;
            }
        }

        if idx + 1 < self.blocks.len() {
            let right = self.blocks[idx + 1];
            if right.region_id == region_id
                && right.state.is_reusable()
                && self.blocks[idx].end() == right.offset
            {
                self.free_lists[region_id as usize].remove_at(right.offset, region_id);
                self.free_lists[region_id as usize]
                    .remove_at(self.blocks[idx].offset, region_id);

                self.blocks[idx].size += right.size;
                self.blocks[idx].state = BlockState::Free;
                self.blocks.remove(idx + 1);

                let node = FreeNode::for_block(&self.blocks[idx]);
                self.free_lists[region_id as usize].push_front(node);
                coalesced = true;
            }
        }

        if coalesced {
            trace!(region_id, offset = freed_offset, "neighbor coalesce");
            self.log_event(
                LogAction::Coalesce,
                0,
                0,
                freed_offset,
                true,
                region_id,
                RegionFlags::NONE,
            );
        }
    }

    /// Merge every same-region run of adjacent reusable blocks and rebuild
    /// all free lists.
    fn full_coalesce(&mut self) {
        self.sort_blocks();

        let mut merged: Vec<Block> = Vec::with_capacity(self.blocks.len());
        let mut coalesce_count = 0usize;

        for block in self.blocks.drain(..) {
            if let Some(last) = merged.last_mut() {
                if last.state == BlockState::Free
                    && block.state.is_reusable()
                    && last.region_id == block.region_id
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
            self.log_event(
                LogAction::FullCoalesce,
                0,
                coalesce_count,
                0,
                true,
                0,
                RegionFlags::NONE,
            );
        }

        for list in &mut self.free_lists {
            list.clear();
        }
        for i in 0..self.blocks.len() {
            if self.blocks[i].state == BlockState::Free {
                let rid = self.blocks[i].region_id as usize;
                let node = FreeNode::for_block(&self.blocks[i]);
                self.free_lists[rid].push_front(node);
            }
        }

        self.coalesce_pending = false;
    }

    #[allow(clippy::too_many_arguments)]
    fn log_event(
        &mut self,
        action: LogAction,
        allocation_id: u32,
        size: usize,
        offset: usize,
        success: bool,
        region_id: u8,
        flags: RegionFlags,
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
            region_id,
            flags,
        });
    }

    fn sort_blocks(&mut self) {
        // Local offsets interleave across regions; a stable sort keeps
        // same-offset blocks in region order.
        self.blocks.sort_by_key(|b| b.offset);
    }

    fn update_region_stats(
        &mut self,
        region_idx: usize,
    ) {
        let region_id = region_idx as u8;
        let blocks = &self.blocks;
        let region = &mut self.regions[region_idx];
        stats::recompute_from(
            &mut region.stats,
            blocks.iter().filter(|b| b.region_id == region_id),
        );
    }

    /// Per-region stats first, then the global aggregate: counts and bytes
    /// sum; fragmentation percentages average (unweighted) across regions
    /// currently holding free bytes.
    fn update_global_stats(&mut self) {
        for r in 0..self.regions.len() {
            self.update_region_stats(r);
        }

        let s = &mut self.stats;
        s.allocated_bytes = 0;
        s.free_bytes = 0;
        s.allocation_count = 0;
        s.free_block_count = 0;
        s.largest_free_block = 0;
        s.smallest_free_block = s.total_size;

        let mut ext_sum = 0.0f32;
        let mut int_sum = 0.0f32;
        let mut contributing = 0u32;

        for region in &self.regions {
            s.allocated_bytes += region.stats.allocated_bytes;
            s.free_bytes += region.stats.free_bytes;
            s.allocation_count += region.stats.allocation_count;
            s.free_block_count += region.stats.free_block_count;

            if region.stats.largest_free_block > s.largest_free_block {
                s.largest_free_block = region.stats.largest_free_block;
            }
            if region.stats.free_block_count > 0
                && region.stats.smallest_free_block < s.smallest_free_block
            {
                s.smallest_free_block = region.stats.smallest_free_block;
            }

            if region.stats.free_bytes > 0 {
                ext_sum += region.stats.external_fragmentation_pct;
                int_sum += region.stats.internal_fragmentation_pct;
                contributing += 1;
            }
        }

        if contributing > 0 {
            s.external_fragmentation_pct = ext_sum / contributing as f32;
            s.internal_fragmentation_pct = int_sum / contributing as f32;
        } else {
            s.external_fragmentation_pct = 0.0;
            s.internal_fragmentation_pct = 0.0;
        }

        if s.free_bytes < s.min_free_bytes {
            s.min_free_bytes = s.free_bytes;
        }
        if s.free_block_count == 0 {
            s.smallest_free_block = 0;
        }
    }
}

impl HeapStrategy for MultiRegionHeap {
    fn init(
        &mut self,
        total_size: usize,
    ) {
        MultiRegionHeap::init(self, total_size);
    }

    fn allocate(
        &mut self,
        size: usize,
    ) -> Option<AllocHandle> {
        MultiRegionHeap::allocate(self, size)
    }

    fn allocate_with_flags(
        &mut self,
        size: usize,
        flags: RegionFlags,
    ) -> Option<AllocHandle> {
        MultiRegionHeap::allocate_with_flags(self, size, flags)
    }

    fn release(
        &mut self,
        handle: AllocHandle,
    ) {
        MultiRegionHeap::release(self, handle);
    }

    fn reset(&mut self) {
        MultiRegionHeap::reset(self);
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
