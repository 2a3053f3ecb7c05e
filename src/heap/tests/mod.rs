//! Cross-strategy unit tests
//!
//! Contract-level behavior every strategy must share, checked through the
//! common trait so a new strategy cannot drift from the lifecycle and
//! introspection guarantees.

use std::collections::HashMap;

use crate::heap::{
    BestFitHeap, Block, BumpHeap, CoalescingHeap, DelegatingHeap, HeapStrategy, MultiRegionHeap,
};

fn strategies() -> Vec<(&'static str, Box<dyn HeapStrategy>)> {
    vec![
        ("bump", Box::new(BumpHeap::new())),
        ("best-fit", Box::new(BestFitHeap::new())),
        ("delegating", Box::new(DelegatingHeap::new())),
        ("coalescing", Box::new(CoalescingHeap::new())),
        ("multi-region", Box::new(MultiRegionHeap::new())),
    ]
}

/// Sorted by offset, the blocks of every region must cover it exactly
/// once: first block at 0, each next block starting where the previous one
/// ends, sizes summing to the managed total.
///
/// The delegating strategy is checked loosely: its shadow layout may drop
/// a sub-slack leftover when a claim does not split, so blocks there must
/// only be gap-tolerant and non-overlapping.
fn assert_partition(
    strategy: &dyn HeapStrategy,
    label: &str,
) {
    let shadow = label == "delegating";

    let mut by_region: HashMap<u8, Vec<Block>> = HashMap::new();
    let mut total = 0usize;
    for i in 0..strategy.block_count() {
        let block = strategy.block(i).unwrap();
        total += block.size;
        by_region.entry(block.region_id).or_default().push(block);
    }

    if shadow {
        assert!(
            total <= strategy.stats().total_size,
            "{}: blocks exceed the managed size",
            label
        );
    } else {
        assert_eq!(
            total,
            strategy.stats().total_size,
            "{}: blocks must cover the managed size",
            label
        );
    }

    for (region, mut blocks) in by_region {
        blocks.sort_by_key(|b| b.offset);
        let mut expected = 0usize;
        for block in blocks {
            // Zero-size grants cover nothing and sit at their neighbor's
            // offset; they cannot break the partition.
            if block.size == 0 {
                continue;
            }
            if shadow {
                assert!(
                    block.offset >= expected,
                    "{}: overlap in region {}",
                    label,
                    region
                );
            } else {
                assert_eq!(
                    block.offset, expected,
                    "{}: gap or overlap in region {}",
                    label, region
                );
            }
            expected = block.end();
        }
    }
}

#[cfg(test)]
mod init_contract {
    use super::*;

    #[test]
    fn test_post_init_invariants() {
        for (label, mut strategy) in strategies() {
            strategy.init(8192);
            let stats = strategy.stats();

            assert_eq!(stats.allocated_bytes, 0, "{}", label);
            assert_eq!(stats.allocation_count, 0, "{}", label);
            assert_eq!(stats.free_bytes, stats.total_size, "{}", label);
            assert_eq!(stats.next_allocation_id, 1, "{}", label);
            assert_eq!(stats.min_free_bytes, stats.total_size, "{}", label);
            assert_eq!(strategy.log_len(), 1, "{}", label);
            assert_partition(strategy.as_ref(), label);
        }
    }

    #[test]
    fn test_allocation_ids_start_at_one_and_increase() {
        for (label, mut strategy) in strategies() {
            strategy.init(8192);
            strategy.allocate(64).unwrap();
            strategy.allocate(64).unwrap();

            let mut seen: Vec<u32> = (0..strategy.block_count())
                .filter_map(|i| strategy.block(i))
                .filter(|b| b.allocation_id != 0)
                .map(|b| b.allocation_id)
                .collect();
            seen.sort_unstable();
            assert_eq!(seen, vec![1, 2], "{}", label);
        }
    }
}

#[cfg(test)]
mod reset_round_trip {
    use super::*;
    use crate::heap::snapshot::HeapSnapshot;

    #[test]
    fn test_reset_restores_post_init_observables() {
        for (label, mut strategy) in strategies() {
            strategy.init(8192);
            let fresh = HeapSnapshot::capture(strategy.as_ref());

            let a = strategy.allocate(100);
            strategy.allocate(256);
            if let Some(handle) = a {
                strategy.release(handle);
            }
            strategy.reset();
            let after = HeapSnapshot::capture(strategy.as_ref());

            assert_eq!(fresh.stats, after.stats, "{}", label);
            assert_eq!(fresh.blocks, after.blocks, "{}", label);
            assert_eq!(fresh.log, after.log, "{}", label);
        }
    }
}

#[cfg(test)]
mod stats_idempotence {
    use super::*;

    #[test]
    fn test_stats_identical_without_mutation() {
        for (label, mut strategy) in strategies() {
            strategy.init(4096);
            strategy.allocate(100);

            let first = strategy.stats();
            let second = strategy.stats();
            assert_eq!(first, second, "{}", label);
        }
    }
}

#[cfg(test)]
mod zero_size {
    use super::*;

    #[test]
    fn test_zero_size_allocation_succeeds_everywhere() {
        for (label, mut strategy) in strategies() {
            strategy.init(4096);
            let handle = strategy.allocate(0);
            assert!(handle.is_some(), "{}", label);
            assert_partition(strategy.as_ref(), label);
        }
    }
}

#[cfg(test)]
mod table_consistency {
    use super::*;

    #[test]
    fn test_partition_holds_through_mixed_workload() {
        for (label, mut strategy) in strategies() {
            strategy.init(8192);

            let mut handles = Vec::new();
            for i in 0..12 {
                if let Some(h) = strategy.allocate(32 + i * 24) {
                    handles.push(h);
                }
            }
            for h in handles.iter().step_by(2) {
                strategy.release(*h);
            }
            strategy.allocate(64);

            assert_partition(strategy.as_ref(), label);
        }
    }

    #[test]
    fn test_release_of_unknown_handle_preserves_table() {
        for (label, mut strategy) in strategies() {
            strategy.init(4096);
            strategy.allocate(128);
            let blocks_before: Vec<_> = (0..strategy.block_count())
                .filter_map(|i| strategy.block(i))
                .collect();

            strategy.release(crate::heap::AllocHandle(usize::MAX - 7));

            let blocks_after: Vec<_> = (0..strategy.block_count())
                .filter_map(|i| strategy.block(i))
                .collect();
            assert_eq!(blocks_before, blocks_after, "{}", label);
        }
    }
}
