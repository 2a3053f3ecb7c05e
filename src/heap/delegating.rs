//! Delegating strategy with a shadow layout, safe under concurrent callers
//!
//! Real storage comes from the host allocator; this strategy only wraps it
//! with bookkeeping. An ownership list maps every issued address to its
//! size, id and timestamp, and a shadow block table simulates a layout
//! inside a nominal region so the introspection surface stays comparable
//! with the in-model strategies. The shadow's offsets are a simulation:
//! logged offsets are the real address masked to its low 16 bits and are
//! not globally meaningful.
//!
//! Every public operation holds one mutex for its full duration. This is
//! the only strategy that tolerates concurrent callers.

use parking_lot::Mutex;
use std::alloc::{self, Layout};
use tracing::{debug, trace};

use super::block::{Block, BlockState};
use super::log::{LogAction, LogEntry, OperationLog};
use super::stats::{self, HeapStats};
use super::{
    align_up, AllocHandle, HeapStrategy, RegionFlags, ALIGNMENT, MAX_BLOCKS, MAX_HEAP_SIZE,
};

/// Leftover a shadow block must exceed before the first-fit claim splits
/// off a remainder.
const SHADOW_SPLIT_SLACK: usize = 64;

/// Mask applied to real addresses before they appear as log offsets.
const OFFSET_MASK: usize = 0xFFFF;

/// One live allocation handed out by the host allocator.
#[derive(Debug, Clone, Copy)]
struct OwnedAlloc {
    addr: usize,
    size: usize,
    id: u32,
    #[allow(dead_code)]
    timestamp: u32,
}

#[derive(Debug, Default)]
struct DelegatingState {
    owned: Vec<OwnedAlloc>,
    blocks: Vec<Block>,
    log: OperationLog,
    stats: HeapStats,
}

/// Host-delegating allocator with a mutex around every operation.
#[derive(Debug, Default)]
pub struct DelegatingHeap {
    inner: Mutex<DelegatingState>,
}

impl DelegatingHeap {
    /// Create an uninitialized strategy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset all state, returning any outstanding host allocations, and
    /// adopt `total_size` (clamped) as the nominal region size.
    pub fn init(
        &self,
        total_size: usize,
    ) {
        let mut state = self.inner.lock();
        Self::init_locked(&mut state, total_size);
        debug!(
            total_size = state.stats.total_size,
            "delegating heap initialized"
        );
    }

    /// Allocate through the host allocator and place the request in the
    /// shadow layout by first fit.
    pub fn allocate(
        &self,
        size: usize,
    ) -> Option<AllocHandle> {
        let mut state = self.inner.lock();

        let requested_size = size;
        // Zero-size requests still get a real minimum span from the host.
        let aligned_size = align_up(size).max(ALIGNMENT);

        let Ok(layout) = Layout::from_size_align(aligned_size, ALIGNMENT) else {
            let id = state.stats.next_allocation_id;
            Self::log_event(&mut state, LogAction::Malloc, id, size, 0, false);
            return None;
        };

        // Safety: layout has nonzero size and a valid power-of-two
        // alignment.
        let ptr = unsafe { alloc::alloc(layout) };
        if ptr.is_null() {
            trace!(size, "host allocator refused the request");
            let id = state.stats.next_allocation_id;
            Self::log_event(&mut state, LogAction::Malloc, id, size, 0, false);
            return None;
        }
        let addr = ptr as usize;

        let id = state.stats.next_allocation_id;
        state.stats.next_allocation_id += 1;

        let ts = state.stats.tick();
        state.owned.push(OwnedAlloc {
            addr,
            size: aligned_size,
            id,
            timestamp: ts,
        });

        Self::shadow_place(&mut state, aligned_size, requested_size, id);

        Self::log_event(
            &mut state,
            LogAction::Malloc,
            id,
            size,
            addr & OFFSET_MASK,
            true,
        );
        state.blocks.sort_by_key(|b| b.offset);
        Self::update_stats(&mut state);
        trace!(size, addr, "delegated allocation");
        Some(AllocHandle(addr))
    }

    /// Return an allocation to the host and release its shadow block.
    pub fn release(
        &self,
        handle: AllocHandle,
    ) {
        let mut state = self.inner.lock();
        let addr = handle.0;

        if let Some(pos) = state.owned.iter().position(|o| o.addr == addr) {
            let owned = state.owned.remove(pos);

            if let Some(idx) = state
                .blocks
                .iter()
                .position(|b| b.allocation_id == owned.id && b.state == BlockState::Allocated)
            {
                let block = &mut state.blocks[idx];
                block.state = BlockState::Released;
                block.allocation_id = 0;
                block.requested_size = 0;
            }

            // Safety: `owned` came from `alloc` with this exact layout and
            // is removed from the list before the memory is returned.
            unsafe {
                if let Ok(layout) = Layout::from_size_align(owned.size, ALIGNMENT) {
                    alloc::dealloc(owned.addr as *mut u8, layout);
                }
            }

            Self::log_event(
                &mut state,
                LogAction::Free,
                owned.id,
                0,
                addr & OFFSET_MASK,
                true,
            );
            trace!(addr, id = owned.id, "delegated release");
        } else {
            // Unknown handle: nothing to give back, but the attempt is
            // still recorded.
            Self::log_event(&mut state, LogAction::Free, 0, 0, addr & OFFSET_MASK, true);
            trace!(addr, "release of unknown handle");
        }

        Self::update_stats(&mut state);
    }

    /// Re-init with the previously configured nominal size.
    pub fn reset(&self) {
        let mut state = self.inner.lock();
        let size = state.stats.total_size;
        Self::init_locked(&mut state, size);
    }

    /// Snapshot of the current statistics.
    pub fn stats(&self) -> HeapStats {
        self.inner.lock().stats
    }

    /// Number of entries in the shadow block table.
    pub fn block_count(&self) -> usize {
        self.inner.lock().blocks.len()
    }

    /// Copy of the shadow block at `index`, if any.
    pub fn block(
        &self,
        index: usize,
    ) -> Option<Block> {
        self.inner.lock().blocks.get(index).copied()
    }

    /// Number of recorded log entries.
    pub fn log_len(&self) -> usize {
        self.inner.lock().log.len()
    }

    /// Copy of the log entry at `index`, if any.
    pub fn log_entry(
        &self,
        index: usize,
    ) -> Option<LogEntry> {
        self.inner.lock().log.entry(index)
    }

    /// Drop all recorded log entries.
    pub fn clear_log(&self) {
        self.inner.lock().log.clear();
    }

    fn init_locked(
        state: &mut DelegatingState,
        total_size: usize,
    ) {
        // Give outstanding host allocations back before dropping the list.
        for owned in state.owned.drain(..) {
            // Safety: every entry was produced by `alloc` with this layout.
            unsafe {
                if let Ok(layout) = Layout::from_size_align(owned.size, ALIGNMENT) {
                    alloc::dealloc(owned.addr as *mut u8, layout);
                }
            }
        }

        state.stats = HeapStats::with_total(total_size.min(MAX_HEAP_SIZE));
        state.blocks.clear();
        state.log.clear();

        let total = state.stats.total_size;
        let ts = state.stats.tick();
        state.blocks.push(Block::free(0, total, 0, ts));

        Self::update_stats(state);
        Self::log_event(state, LogAction::Init, 0, total_size, 0, true);
    }

    /// First-fit claim in the shadow layout: the first free block large
    /// enough takes the allocation, splitting off a remainder when the
    /// leftover clears the slack threshold.
    fn shadow_place(
        state: &mut DelegatingState,
        aligned_size: usize,
        requested_size: usize,
        id: u32,
    ) {
        let found = state
            .blocks
            .iter()
            .position(|b| b.state == BlockState::Free && b.size >= aligned_size);

        let Some(idx) = found else {
            return;
        };
        if state.blocks.len() >= MAX_BLOCKS {
            return;
        }

        let original_size = state.blocks[idx].size;
        let original_offset = state.blocks[idx].offset;

        let ts = state.stats.tick();
        let block = &mut state.blocks[idx];
        block.size = aligned_size;
        block.state = BlockState::Allocated;
        block.allocation_id = id;
        block.timestamp = ts;
        block.requested_size = requested_size;

        if original_size > aligned_size + SHADOW_SPLIT_SLACK
            && state.blocks.len() < MAX_BLOCKS - 1
        {
            let ts = state.stats.tick();
            state.blocks.push(Block::free(
                original_offset + aligned_size,
                original_size - aligned_size,
                0,
                ts,
            ));
        }
    }

    fn log_event(
        state: &mut DelegatingState,
        action: LogAction,
        allocation_id: u32,
        size: usize,
        offset: usize,
        success: bool,
    ) {
        if state.log.is_full() {
            return;
        }
        let timestamp = state.stats.tick();
        state.log.push(LogEntry {
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

    fn update_stats(state: &mut DelegatingState) {
        let DelegatingState {
            blocks, stats: s, ..
        } = state;
        stats::recompute(s, blocks.as_slice());
    }
}

impl Drop for DelegatingHeap {
    fn drop(&mut self) {
        let mut state = self.inner.lock();
        for owned in state.owned.drain(..) {
            // Safety: every entry was produced by `alloc` with this layout.
            unsafe {
                if let Ok(layout) = Layout::from_size_align(owned.size, ALIGNMENT) {
                    alloc::dealloc(owned.addr as *mut u8, layout);
                }
            }
        }
    }
}

impl HeapStrategy for DelegatingHeap {
    fn init(
        &mut self,
        total_size: usize,
    ) {
        DelegatingHeap::init(self, total_size);
    }

    fn allocate(
        &mut self,
        size: usize,
    ) -> Option<AllocHandle> {
        DelegatingHeap::allocate(self, size)
    }

    fn release(
        &mut self,
        handle: AllocHandle,
    ) {
        DelegatingHeap::release(self, handle);
    }

    fn reset(&mut self) {
        DelegatingHeap::reset(self);
    }

    fn stats(&self) -> HeapStats {
        DelegatingHeap::stats(self)
    }

    fn block_count(&self) -> usize {
        DelegatingHeap::block_count(self)
    }

    fn block(
        &self,
        index: usize,
    ) -> Option<Block> {
        DelegatingHeap::block(self, index)
    }

    fn log_len(&self) -> usize {
        DelegatingHeap::log_len(self)
    }

    fn log_entry(
        &self,
        index: usize,
    ) -> Option<LogEntry> {
        DelegatingHeap::log_entry(self, index)
    }

    fn clear_log(&mut self) {
        DelegatingHeap::clear_log(self);
    }
}
