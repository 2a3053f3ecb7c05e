//! Property tests over arbitrary operation sequences
//!
//! Whatever a caller does, every strategy must keep its block table a
//! partition of the managed space and its statistics finite and
//! consistent. These properties run the same random workloads against all
//! five strategies through the common trait.

use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use std::collections::HashMap;

use heaplab::heap::{
    BestFitHeap, Block, BumpHeap, CoalescingHeap, DelegatingHeap, MultiRegionHeap,
};
use heaplab::{AllocHandle, HeapStrategy};

#[derive(Debug, Clone)]
enum Op {
    Allocate(usize),
    Release(usize),
    Reset,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        5 => (0usize..600).prop_map(Op::Allocate),
        3 => (0usize..32).prop_map(Op::Release),
        1 => Just(Op::Reset),
    ]
}

fn strategies() -> Vec<(&'static str, Box<dyn HeapStrategy>)> {
    vec![
        ("bump", Box::new(BumpHeap::new())),
        ("best-fit", Box::new(BestFitHeap::new())),
        ("delegating", Box::new(DelegatingHeap::new())),
        ("coalescing", Box::new(CoalescingHeap::new())),
        ("multi-region", Box::new(MultiRegionHeap::new())),
    ]
}

fn blocks_of(strategy: &dyn HeapStrategy) -> Vec<Block> {
    (0..strategy.block_count())
        .filter_map(|i| strategy.block(i))
        .collect()
}

/// Sorted by offset, the nonempty blocks of each region must cover it
/// without gaps or overlaps, and all block sizes must sum to the managed
/// total. The delegating shadow may drop a sub-slack leftover when a claim
/// does not split, so it is only held to non-overlap.
fn check_partition(
    strategy: &dyn HeapStrategy,
    label: &str,
) -> Result<(), TestCaseError> {
    let shadow = label == "delegating";

    let mut by_region: HashMap<u8, Vec<Block>> = HashMap::new();
    let mut total = 0usize;
    for block in blocks_of(strategy) {
        total += block.size;
        by_region.entry(block.region_id).or_default().push(block);
    }
    if shadow {
        prop_assert!(
            total <= strategy.stats().total_size,
            "{}: coverage exceeded",
            label
        );
    } else {
        prop_assert_eq!(total, strategy.stats().total_size, "{}: coverage", label);
    }

    for (region, mut blocks) in by_region {
        blocks.sort_by_key(|b| b.offset);
        let mut expected = 0usize;
        for block in blocks {
            if block.size == 0 {
                continue;
            }
            if shadow {
                prop_assert!(
                    block.offset >= expected,
                    "{}: overlap in region {}",
                    label,
                    region
                );
            } else {
                prop_assert_eq!(
                    block.offset,
                    expected,
                    "{}: gap or overlap in region {}",
                    label,
                    region
                );
            }
            expected = block.offset + block.size;
        }
    }
    Ok(())
}

/// Statistics must stay finite, non-negative and internally consistent.
fn check_stats(
    strategy: &dyn HeapStrategy,
    label: &str,
) -> Result<(), TestCaseError> {
    let stats = strategy.stats();

    prop_assert!(
        stats.external_fragmentation_pct.is_finite(),
        "{}: external fragmentation must be finite",
        label
    );
    prop_assert!(
        stats.internal_fragmentation_pct.is_finite(),
        "{}: internal fragmentation must be finite",
        label
    );
    prop_assert!(
        (0.0..=100.0).contains(&stats.external_fragmentation_pct),
        "{}: external fragmentation out of range",
        label
    );
    prop_assert!(
        (0.0..=100.0).contains(&stats.internal_fragmentation_pct),
        "{}: internal fragmentation out of range",
        label
    );
    if label == "delegating" {
        // The shadow layout may leak sub-slack leftovers out of the table
        prop_assert!(
            stats.allocated_bytes + stats.free_bytes <= stats.total_size,
            "{}: byte accounting",
            label
        );
    } else {
        prop_assert_eq!(
            stats.allocated_bytes + stats.free_bytes,
            stats.total_size,
            "{}: byte accounting",
            label
        );
    }
    prop_assert!(
        stats.largest_free_block <= stats.free_bytes,
        "{}: largest free span exceeds free bytes",
        label
    );
    prop_assert!(
        stats.min_free_bytes <= stats.total_size,
        "{}: watermark above capacity",
        label
    );
    Ok(())
}

fn run_ops(
    strategy: &mut dyn HeapStrategy,
    label: &str,
    ops: &[Op],
) -> Result<(), TestCaseError> {
    strategy.init(8192);
    let mut handles: Vec<AllocHandle> = Vec::new();

    for op in ops {
        match op {
            Op::Allocate(size) => {
                if let Some(handle) = strategy.allocate(*size) {
                    handles.push(handle);
                }
            }
            Op::Release(n) => {
                if !handles.is_empty() {
                    let idx = n % handles.len();
                    let handle = handles.swap_remove(idx);
                    strategy.release(handle);
                }
            }
            Op::Reset => {
                strategy.reset();
                handles.clear();
            }
        }
        check_partition(strategy, label)?;
        check_stats(strategy, label)?;
    }
    Ok(())
}

proptest! {
    #[test]
    fn invariants_hold_under_arbitrary_workloads(
        ops in proptest::collection::vec(op_strategy(), 1..50)
    ) {
        for (label, mut strategy) in strategies() {
            run_ops(strategy.as_mut(), label, &ops)?;
        }
    }

    #[test]
    fn watermark_is_monotone_between_inits(
        sizes in proptest::collection::vec(1usize..400, 1..30)
    ) {
        for (label, mut strategy) in strategies() {
            strategy.init(8192);
            let mut watermark = strategy.stats().min_free_bytes;
            for size in &sizes {
                strategy.allocate(*size);
                let now = strategy.stats().min_free_bytes;
                prop_assert!(now <= watermark, "{}: watermark rose", label);
                watermark = now;
            }
        }
    }

    #[test]
    fn bump_never_reuses_space(
        sizes in proptest::collection::vec(1usize..300, 1..20)
    ) {
        let mut heap = BumpHeap::new();
        HeapStrategy::init(&mut heap, 8192);

        let mut cursor = 0usize;
        for size in sizes {
            if let Some(handle) = HeapStrategy::allocate(&mut heap, size) {
                prop_assert_eq!(handle.raw(), cursor);
                cursor += (size + 7) & !7;
                // Releasing never gives the cursor anything back
                HeapStrategy::release(&mut heap, handle);
                prop_assert_eq!(HeapStrategy::stats(&heap).allocated_bytes, cursor);
            }
        }
    }
}
