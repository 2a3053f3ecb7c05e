//! Block table records
//!
//! Every strategy describes its managed region as a table of blocks. Sorted
//! by offset, the blocks of one region partition it without gaps or
//! overlaps; strategies that do not coalesce may leave adjacent free spans
//! unmerged, which is an observable state rather than a violation.

use serde::Serialize;

/// Lifecycle state of one block.
///
/// `Released` marks memory the caller has given back but that has not been
/// merged into the general free pool; once coalescing normalizes it the
/// block becomes `Free` and is indistinguishable from other free space.
/// Both states count as free space for statistics and, in the free-list
/// strategies, for allocation eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockState {
    Free,
    Allocated,
    Released,
}

impl BlockState {
    /// Whether this state contributes to the free pool.
    pub fn is_reusable(&self) -> bool {
        matches!(self, BlockState::Free | BlockState::Released)
    }
}

/// One contiguous span inside a managed region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Block {
    /// Byte offset from the start of the owning region.
    pub offset: usize,
    /// Granted span, header-inclusive where the strategy charges one.
    pub size: usize,
    /// Current lifecycle state.
    pub state: BlockState,
    /// 0 unless the block is allocated; unique among live allocations.
    pub allocation_id: u32,
    /// Value of the strategy's monotone counter at the last mutation.
    pub timestamp: u32,
    /// Size the caller originally asked for; 0 when not meaningful.
    pub requested_size: usize,
    /// Owning region; 0 for single-region strategies.
    pub region_id: u8,
}

impl Block {
    /// A free block covering `size` bytes at `offset`.
    pub fn free(
        offset: usize,
        size: usize,
        region_id: u8,
        timestamp: u32,
    ) -> Self {
        Self {
            offset,
            size,
            state: BlockState::Free,
            allocation_id: 0,
            timestamp,
            requested_size: 0,
            region_id,
        }
    }

    /// Offset one past the end of this block.
    pub fn end(&self) -> usize {
        self.offset + self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_constructor() {
        let b = Block::free(64, 256, 2, 7);
        assert_eq!(b.offset, 64);
        assert_eq!(b.size, 256);
        assert_eq!(b.state, BlockState::Free);
        assert_eq!(b.allocation_id, 0);
        assert_eq!(b.timestamp, 7);
        assert_eq!(b.requested_size, 0);
        assert_eq!(b.region_id, 2);
        assert_eq!(b.end(), 320);
    }

    #[test]
    fn test_reusable_states() {
        assert!(BlockState::Free.is_reusable());
        assert!(BlockState::Released.is_reusable());
        assert!(!BlockState::Allocated.is_reusable());
    }
}
