//! Fork-resolver step classification.

use crate::{Block, BlockPosition, LoaderError};
use alloy_primitives::B256;
use derive_more::Display;
use std::sync::Arc;

/// The step kinds a fork resolver may emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum StepKind {
    /// First sight of a block on the longest chain.
    #[display("new")]
    New,
    /// A block removed from the longest chain by a reorg.
    #[display("undo")]
    Undo,
    /// A block re-applied after a reorg.
    #[display("redo")]
    Redo,
    /// A block that became final.
    #[display("irreversible")]
    Irreversible,
    /// A block that can never become final.
    #[display("stalled")]
    Stalled,
}

impl StepKind {
    /// Returns the filter bit matching this step.
    pub const fn filter(self) -> StepFilter {
        match self {
            Self::New => StepFilter::NEW,
            Self::Undo => StepFilter::UNDO,
            Self::Redo => StepFilter::REDO,
            Self::Irreversible => StepFilter::IRREVERSIBLE,
            Self::Stalled => StepFilter::STALLED,
        }
    }
}

/// A set of [`StepKind`]s a fork resolver is asked to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StepFilter(u8);

impl StepFilter {
    /// Matches [`StepKind::New`].
    pub const NEW: Self = Self(1);
    /// Matches [`StepKind::Undo`].
    pub const UNDO: Self = Self(1 << 1);
    /// Matches [`StepKind::Redo`].
    pub const REDO: Self = Self(1 << 2);
    /// Matches [`StepKind::Irreversible`].
    pub const IRREVERSIBLE: Self = Self(1 << 3);
    /// Matches [`StepKind::Stalled`].
    pub const STALLED: Self = Self(1 << 4);

    /// Returns the union of both filters.
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Returns true if the filter lets `kind` through.
    pub const fn matches(self, kind: StepKind) -> bool {
        self.0 & kind.filter().0 != 0
    }
}

impl core::ops::BitOr for StepFilter {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}

/// A block as re-emitted by the fork resolver.
///
/// `step_blocks` holds the ordered group of blocks finalized together for an irreversible
/// step. Every block of the group is delivered once, each with its own `step_index`, and all
/// deliveries share the same group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkableBlock {
    /// The delivered block.
    pub block: Block,
    /// The step classification.
    pub step: StepKind,
    /// Position of this delivery within its group.
    pub step_index: usize,
    /// Size of the group.
    pub step_count: usize,
    /// The group of blocks sharing this step.
    pub step_blocks: Arc<[Block]>,
}

impl ForkableBlock {
    /// Creates a [`StepKind::New`] delivery.
    pub fn new_step(block: Block) -> Self {
        let step_blocks: Arc<[Block]> = Arc::from(vec![block.clone()]);
        Self { block, step: StepKind::New, step_index: 0, step_count: 1, step_blocks }
    }

    /// Creates one [`StepKind::Irreversible`] delivery per block of `group`, in order.
    pub fn irreversible_group(group: Vec<Block>) -> Vec<Self> {
        let step_count = group.len();
        let step_blocks: Arc<[Block]> = Arc::from(group);
        step_blocks
            .iter()
            .enumerate()
            .map(|(step_index, block)| Self {
                block: block.clone(),
                step: StepKind::Irreversible,
                step_index,
                step_count,
                step_blocks: Arc::clone(&step_blocks),
            })
            .collect()
    }
}

impl BlockPosition for ForkableBlock {
    fn number(&self) -> u64 {
        self.block.number
    }

    fn hash(&self) -> B256 {
        self.block.hash
    }
}

/// The closed set of steps the ingestion state machine acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// The block is freshly seen and not yet final.
    New(Block),
    /// The block, and possibly a contiguous run of blocks, is now final.
    Irreversible {
        /// The delivered block.
        block: Block,
        /// Position of this delivery within the group.
        index: usize,
        /// Size of the group.
        count: usize,
        /// The ordered group of finalized blocks.
        blocks: Arc<[Block]>,
    },
}

impl Step {
    /// Returns the block carried by this step.
    pub const fn block(&self) -> &Block {
        match self {
            Self::New(block) | Self::Irreversible { block, .. } => block,
        }
    }

    /// Returns the [`StepKind`] of this step.
    pub const fn kind(&self) -> StepKind {
        match self {
            Self::New(_) => StepKind::New,
            Self::Irreversible { .. } => StepKind::Irreversible,
        }
    }
}

impl TryFrom<ForkableBlock> for Step {
    type Error = LoaderError;

    fn try_from(value: ForkableBlock) -> Result<Self, Self::Error> {
        match value.step {
            StepKind::New => Ok(Self::New(value.block)),
            StepKind::Irreversible => Ok(Self::Irreversible {
                block: value.block,
                index: value.step_index,
                count: value.step_count,
                blocks: value.step_blocks,
            }),
            other => Err(LoaderError::UnsupportedStep(other)),
        }
    }
}
