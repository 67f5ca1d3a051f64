//! Offset ↔ block arithmetic.

/// Maps byte offsets onto fixed-size blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockTranslator {
    block_size: u64,
}

impl BlockTranslator {
    pub fn new(block_size: usize) -> Self {
        debug_assert!(block_size > 0);
        Self {
            block_size: block_size as u64,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size as usize
    }

    /// Split an offset into (block index, offset inside that block).
    pub fn to_block(&self, offset: u64) -> (u64, usize) {
        (
            offset / self.block_size,
            (offset % self.block_size) as usize,
        )
    }

    /// First byte offset covered by `block`.
    pub fn block_start(&self, block: u64) -> u64 {
        block.saturating_mul(self.block_size)
    }

    /// Number of blocks needed to cover `size` bytes.
    pub fn block_count(&self, size: u64) -> u64 {
        size.div_ceil(self.block_size)
    }
}
