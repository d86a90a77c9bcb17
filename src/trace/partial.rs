//! Block alignment of a single write.

use serde::Serialize;

/// How a write sits relative to the block grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PartialWriteDescriptor {
    pub offset: u64,
    pub length: u64,
    /// Bytes from the block boundary before `offset`.
    pub start_partial: u64,
    /// Bytes from the block boundary before `offset + length`.
    pub end_partial: u64,
}

impl PartialWriteDescriptor {
    /// `block_size` must be positive; config validation enforces that.
    pub fn new(offset: u64, length: u64, block_size: u64) -> Self {
        let start_partial = offset % block_size;
        let mut end_partial = offset.saturating_add(length) % block_size;

        // A write inside a single block needs one read-modify-write, not two.
        if blocks_spanned(offset, length, block_size) == 1 && start_partial > 0 && end_partial > 0 {
            end_partial = 0;
        }

        Self {
            offset,
            length,
            start_partial,
            end_partial,
        }
    }

    pub fn is_partial(&self) -> bool {
        self.start_partial > 0 || self.end_partial > 0
    }
}

/// Number of blocks touched by `[offset, offset + length)`. Zero for an empty
/// write.
pub fn blocks_spanned(offset: u64, length: u64, block_size: u64) -> u64 {
    if length == 0 {
        return 0;
    }
    let first = offset / block_size;
    let last = offset.saturating_add(length - 1) / block_size;
    last - first + 1
}
