//! Block types flowing through the pipeline.

use alloy_primitives::B256;
use bytes::Bytes;
use derive_more::{Constructor, Display};

/// A block as delivered by a block source.
///
/// The pipeline never mutates a [`Block`]; it only forwards it or derives new values from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Constructor)]
pub struct Block {
    /// The block hash.
    pub hash: B256,
    /// The block number.
    pub number: u64,
    /// The hash of the parent block.
    pub parent_hash: B256,
    /// The block timestamp, in seconds since the Unix epoch.
    pub timestamp: u64,
    /// The opaque block payload.
    pub payload: Bytes,
}

impl Block {
    /// Returns the [`BlockRef`] of this block.
    pub const fn block_ref(&self) -> BlockRef {
        BlockRef { hash: self.hash, number: self.number }
    }

    /// Returns the [`BlockRef`] of the parent block.
    pub const fn parent_ref(&self) -> BlockRef {
        BlockRef { hash: self.parent_hash, number: self.number.saturating_sub(1) }
    }

    /// Builds the genesis sentinel anchoring the parent hash chain of `self`.
    ///
    /// The sentinel sits at `genesis_number`, takes `self.parent_hash` as its hash and
    /// copies the timestamp of `self`. Its payload is empty.
    pub fn genesis_sentinel(&self, genesis_number: u64) -> Self {
        Self {
            hash: self.parent_hash,
            number: genesis_number,
            parent_hash: B256::ZERO,
            timestamp: self.timestamp,
            payload: Bytes::new(),
        }
    }
}

impl core::fmt::Display for Block {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "#{} ({})", self.number, self.hash)
    }
}

/// The `(hash, number)` pair identifying a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Constructor, Display)]
#[display("#{number} ({hash})")]
pub struct BlockRef {
    /// The block hash.
    pub hash: B256,
    /// The block number.
    pub number: u64,
}

/// Anything that sits at a position of the chain.
///
/// Gates use this to decide when to open, regardless of whether they wrap raw blocks or
/// classified ones.
pub trait BlockPosition {
    /// The block number.
    fn number(&self) -> u64;

    /// The block hash.
    fn hash(&self) -> B256;
}

impl BlockPosition for Block {
    fn number(&self) -> u64 {
        self.number
    }

    fn hash(&self) -> B256 {
        self.hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genesis_sentinel_anchors_parent() {
        let block = Block::new(
            B256::repeat_byte(0x02),
            1,
            B256::repeat_byte(0x01),
            1_600_000_000,
            Bytes::from_static(b"payload"),
        );

        let sentinel = block.genesis_sentinel(0);

        assert_eq!(sentinel.number, 0);
        assert_eq!(sentinel.hash, block.parent_hash);
        assert_eq!(sentinel.timestamp, block.timestamp);
        assert!(sentinel.payload.is_empty());
    }

    #[test]
    fn test_block_ref_display() {
        let block_ref = BlockRef::new(B256::ZERO, 42);
        assert!(block_ref.to_string().starts_with("#42 (0x0000"));
    }
}
