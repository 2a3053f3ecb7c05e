//! Strategy selection façade
//!
//! A thin dispatch layer over the five strategies: it owns one instance of
//! each, remembers which one was chosen at the last `init`, and forwards
//! every subsequent call there until the next `init`. It keeps no tables
//! of its own; introspection reads whatever the active strategy reports.

use serde::Serialize;
use std::fmt;

use crate::heap::multi_region::MultiRegionHeap;
use crate::heap::snapshot::HeapSnapshot;
use crate::heap::{
    AllocHandle, BestFitHeap, Block, BumpHeap, CoalescingHeap, DelegatingHeap, HeapStats,
    HeapStrategy, LogEntry, RegionFlags,
};

/// Selector for one of the five strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum HeapKind {
    /// Strategy 1: bump cursor, no reclamation.
    Bump,
    /// Strategy 2: best-fit free list, no coalescing.
    BestFit,
    /// Strategy 3: host-delegating, mutex-guarded.
    Delegating,
    /// Strategy 4: best-fit free list with two-phase coalescing.
    Coalescing,
    /// Strategy 5: flag-constrained multi-region placement.
    MultiRegion,
}

impl HeapKind {
    /// All selectors, in comparison order.
    pub fn all() -> [HeapKind; 5] {
        [
            HeapKind::Bump,
            HeapKind::BestFit,
            HeapKind::Delegating,
            HeapKind::Coalescing,
            HeapKind::MultiRegion,
        ]
    }
}

impl fmt::Display for HeapKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            HeapKind::Bump => "bump",
            HeapKind::BestFit => "best-fit",
            HeapKind::Delegating => "delegating",
            HeapKind::Coalescing => "coalescing",
            HeapKind::MultiRegion => "multi-region",
        };
        f.write_str(name)
    }
}

/// Owns every strategy and routes calls to the active one.
#[derive(Debug, Default)]
pub struct HeapFacade {
    bump: BumpHeap,
    best_fit: BestFitHeap,
    delegating: DelegatingHeap,
    coalescing: CoalescingHeap,
    multi_region: MultiRegionHeap,
    active: HeapKind,
}

impl Default for HeapKind {
    fn default() -> Self {
        HeapKind::Bump
    }
}

impl HeapFacade {
    /// Create a façade with every strategy uninitialized.
    pub fn new() -> Self {
        Self::default()
    }

    /// Select `kind` and initialize it with `total_size`. All later calls
    /// route to this strategy until the next `init`.
    pub fn init(
        &mut self,
        kind: HeapKind,
        total_size: usize,
    ) {
        self.active = kind;
        self.active_mut().init(total_size);
    }

    /// Currently selected strategy.
    pub fn active(&self) -> HeapKind {
        self.active
    }

    /// Allocate from the active strategy.
    pub fn allocate(
        &mut self,
        size: usize,
    ) -> Option<AllocHandle> {
        self.active_mut().allocate(size)
    }

    /// Flag-constrained allocation; strategies without capability-aware
    /// placement ignore the mask.
    pub fn allocate_with_flags(
        &mut self,
        size: usize,
        flags: RegionFlags,
    ) -> Option<AllocHandle> {
        self.active_mut().allocate_with_flags(size, flags)
    }

    /// Release an allocation. A `None` handle is a complete no-op.
    pub fn release(
        &mut self,
        handle: Option<AllocHandle>,
    ) {
        if let Some(handle) = handle {
            self.active_mut().release(handle);
        }
    }

    /// Re-init the active strategy with its previously configured size.
    pub fn reset(&mut self) {
        self.active_mut().reset();
    }

    /// Statistics snapshot of the active strategy.
    pub fn stats(&self) -> HeapStats {
        self.active_ref().stats()
    }

    /// Block-table size of the active strategy.
    pub fn block_count(&self) -> usize {
        self.active_ref().block_count()
    }

    /// Copy of the active strategy's block at `index`.
    pub fn block(
        &self,
        index: usize,
    ) -> Option<Block> {
        self.active_ref().block(index)
    }

    /// Log length of the active strategy.
    pub fn log_len(&self) -> usize {
        self.active_ref().log_len()
    }

    /// Copy of the active strategy's log entry at `index`.
    pub fn log_entry(
        &self,
        index: usize,
    ) -> Option<LogEntry> {
        self.active_ref().log_entry(index)
    }

    /// Clear the active strategy's log.
    pub fn clear_log(&mut self) {
        self.active_mut().clear_log();
    }

    /// Snapshot of the active strategy's observable state.
    pub fn snapshot(&self) -> HeapSnapshot {
        HeapSnapshot::capture(self.active_ref())
    }

    /// Number of regions; `None` unless the multi-region strategy is
    /// active.
    pub fn region_count(&self) -> Option<usize> {
        self.multi_region_ref().map(MultiRegionHeap::region_count)
    }

    /// Per-region statistics of the active multi-region strategy.
    pub fn region_stats(
        &self,
        region_id: u8,
    ) -> Option<HeapStats> {
        self.multi_region_ref()?.region_stats(region_id)
    }

    /// Name of a region of the active multi-region strategy.
    pub fn region_name(
        &self,
        region_id: u8,
    ) -> Option<&str> {
        self.multi_region_ref()?.region_name(region_id)
    }

    /// Flags of a region of the active multi-region strategy.
    pub fn region_flags(
        &self,
        region_id: u8,
    ) -> Option<RegionFlags> {
        self.multi_region_ref()?.region_flags(region_id)
    }

    /// Size of a region of the active multi-region strategy.
    pub fn region_size(
        &self,
        region_id: u8,
    ) -> Option<usize> {
        self.multi_region_ref()?.region_size(region_id)
    }

    fn multi_region_ref(&self) -> Option<&MultiRegionHeap> {
        match self.active {
            HeapKind::MultiRegion => Some(&self.multi_region),
            _ => None,
        }
    }

    fn active_ref(&self) -> &dyn HeapStrategy {
        match self.active {
            HeapKind::Bump => &self.bump,
            HeapKind::BestFit => &self.best_fit,
            HeapKind::Delegating => &self.delegating,
            HeapKind::Coalescing => &self.coalescing,
            HeapKind::MultiRegion => &self.multi_region,
        }
    }

    fn active_mut(&mut self) -> &mut dyn HeapStrategy {
        match self.active {
            HeapKind::Bump => &mut self.bump,
            HeapKind::BestFit => &mut self.best_fit,
            HeapKind::Delegating => &mut self.delegating,
            HeapKind::Coalescing => &mut self.coalescing,
            HeapKind::MultiRegion => &mut self.multi_region,
        }
    }
}
