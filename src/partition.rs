//! Splitting a resource into byte-range blocks.

use crate::types::PartitionPolicy;

/// A contiguous byte range downloaded by one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Position of this block within its transfer.
    pub index: usize,
    /// First byte offset.
    pub begin: u64,
    /// Last byte offset (inclusive).
    pub end: u64,
    /// Bytes written so far.
    pub downloaded: u64,
}

impl Block {
    pub(crate) fn new(index: usize, begin: u64, end: u64) -> Self {
        Self {
            index,
            begin,
            end,
            downloaded: 0,
        }
    }

    /// Number of bytes this block covers.
    pub fn len(&self) -> u64 {
        self.end + 1 - self.begin
    }

    /// Always `false`: blocks cover at least one byte.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Bytes still to be written.
    pub fn remaining(&self) -> u64 {
        self.len() - self.downloaded
    }

    /// The `Range` header value requesting exactly this block.
    pub fn range_header(&self) -> String {
        format!("bytes={}-{}", self.begin, self.end)
    }
}

/// Splits `content_length` bytes into at most `workers` blocks.
///
/// Resources at or below `policy.threshold` (or with fewer than two
/// workers) become a single block. Otherwise each block is
/// `content_length / workers - policy.margin` bytes and the last block
/// stretches to the final byte. An empty resource yields no blocks.
///
/// The returned blocks are sorted, non-empty, pairwise disjoint and cover
/// `[0, content_length - 1]` exactly.
pub fn partition(content_length: u64, workers: usize, policy: &PartitionPolicy) -> Vec<Block> {
    if content_length == 0 {
        return Vec::new();
    }
    if workers < 2 || content_length <= policy.threshold {
        return vec![Block::new(0, 0, content_length - 1)];
    }

    let block_size = (content_length / workers as u64)
        .saturating_sub(policy.margin)
        .max(1);

    let mut blocks = Vec::with_capacity(workers);
    let mut begin = 0u64;
    while begin + block_size < content_length && blocks.len() + 1 < workers {
        blocks.push(Block::new(blocks.len(), begin, begin + block_size - 1));
        begin += block_size;
    }
    blocks.push(Block::new(blocks.len(), begin, content_length - 1));
    blocks
}
