//! Facade-level scenarios
//!
//! The observable comparisons the laboratory exists for, driven through
//! the selection façade the way an external viewer would.

use heaplab::facade::{HeapFacade, HeapKind};
use heaplab::heap::{BlockState, LogAction, MultiRegionHeap};
use heaplab::{HeapStrategy, RegionFlags};

#[test]
fn bump_free_bytes_monotone_and_tail_bounded() {
    let mut heap = HeapFacade::new();
    heap.init(HeapKind::Bump, 1024);

    let mut prev = heap.stats().free_bytes;
    while let Some(_handle) = heap.allocate(96) {
        let free = heap.stats().free_bytes;
        assert!(free <= prev);
        prev = free;
    }

    // The failing request asked for more than the remaining tail
    assert!(heap.stats().free_bytes < 96 + 8);
    let last = heap.log_entry(heap.log_len() - 1).unwrap();
    assert!(!last.success);
}

#[test]
fn best_fit_lifo_pairs_restore_allocated_bytes() {
    let mut heap = HeapFacade::new();
    heap.init(HeapKind::BestFit, 4096);

    heap.allocate(500);
    let baseline = heap.stats().allocated_bytes;

    for size in [16usize, 64, 200, 48] {
        let handle = heap.allocate(size);
        assert!(handle.is_some());
        heap.release(handle);
        assert_eq!(heap.stats().allocated_bytes, baseline, "size {}", size);
    }
}

#[test]
fn coalescing_merges_released_run() {
    let mut heap = HeapFacade::new();
    heap.init(HeapKind::Coalescing, 1000);

    let handles: Vec<_> = (0..5).map(|_| heap.allocate(100).unwrap()).collect();

    heap.release(Some(handles[1]));
    heap.release(Some(handles[3]));
    // Two isolated released spans plus the trailing free block
    assert_eq!(heap.stats().free_block_count, 3);

    heap.release(Some(handles[2]));
    // The middle release bridges both spans into one free block
    let spans: Vec<_> = (0..heap.block_count())
        .filter_map(|i| heap.block(i))
        .filter(|b| b.state.is_reusable())
        .collect();
    assert!(spans.iter().any(|b| b.offset == 112 && b.size == 336));
    assert_eq!(spans.iter().filter(|b| b.offset < 448).count(), 1);
}

#[test]
fn multi_region_flag_placement() {
    let mut heap = HeapFacade::new();
    heap.init(HeapKind::MultiRegion, 0);

    // FAST-flagged requests land in the FAST region even though DMA has
    // more free space
    let handle = heap.allocate_with_flags(64, RegionFlags::FAST).unwrap();
    let entry = heap.log_entry(heap.log_len() - 1).unwrap();
    assert_eq!(entry.region_id, 0);
    assert!(handle.raw() < heap.region_size(0).unwrap());

    // Zero flags prefer the globally smallest feasible span (UNCACHED)
    heap.allocate_with_flags(64, RegionFlags::NONE).unwrap();
    let entry = heap.log_entry(heap.log_len() - 1).unwrap();
    assert_eq!(entry.region_id, 2);
}

#[test]
fn multi_region_demanding_absent_capability_fails() {
    let mut heap = MultiRegionHeap::new();
    heap.init(0);

    assert!(heap
        .allocate_with_flags(64, RegionFlags::FAST | RegionFlags::PINNED)
        .is_none());
    assert_eq!(heap.stats().allocation_count, 0);
}

#[test]
fn delegating_is_sound_through_facade() {
    let mut heap = HeapFacade::new();
    heap.init(HeapKind::Delegating, 8192);

    let a = heap.allocate(128);
    let b = heap.allocate(256);
    assert!(a.is_some() && b.is_some());
    assert_eq!(heap.stats().allocation_count, 2);

    heap.release(a);
    heap.release(b);
    assert_eq!(heap.stats().allocation_count, 0);

    // Shadow blocks stay visible as released
    let released = (0..heap.block_count())
        .filter_map(|i| heap.block(i))
        .filter(|blk| blk.state == BlockState::Released)
        .count();
    assert_eq!(released, 2);
}

#[test]
fn reset_round_trip_through_facade() {
    for kind in HeapKind::all() {
        let mut heap = HeapFacade::new();
        heap.init(kind, 4096);
        let fresh = heap.snapshot();

        let a = heap.allocate(100);
        heap.allocate(300);
        heap.release(a);
        heap.reset();

        let after = heap.snapshot();
        assert_eq!(fresh.stats, after.stats, "kind {}", kind);
        assert_eq!(fresh.blocks, after.blocks, "kind {}", kind);
        assert_eq!(fresh.log, after.log, "kind {}", kind);
    }
}

#[test]
fn log_clear_only_drops_history() {
    let mut heap = HeapFacade::new();
    heap.init(HeapKind::BestFit, 2048);
    heap.allocate(64);
    assert_eq!(heap.log_len(), 2);

    heap.clear_log();
    assert_eq!(heap.log_len(), 0);
    // State is untouched and new operations keep logging
    assert_eq!(heap.stats().allocation_count, 1);
    heap.allocate(64);
    assert_eq!(heap.log_len(), 1);
}

#[test]
fn init_entry_is_first_in_every_log() {
    for kind in HeapKind::all() {
        let mut heap = HeapFacade::new();
        heap.init(kind, 2048);
        let first = heap.log_entry(0).unwrap();
        assert_eq!(first.action, LogAction::Init, "kind {}", kind);
        assert!(first.success, "kind {}", kind);
    }
}

#[test]
fn snapshot_serializes_for_external_viewers() {
    let mut heap = HeapFacade::new();
    heap.init(HeapKind::Coalescing, 1024);
    let handle = heap.allocate(100);
    heap.release(handle);

    let json = heap.snapshot().to_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["stats"]["total_size"], 1024);
    assert!(value["blocks"].as_array().is_some());
    assert_eq!(value["log"][0]["action"], "INIT");
}
