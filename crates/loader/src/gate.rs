//! Gates withholding deliveries until a chain position is reached.

use crate::{BlockHandler, BlockPosition, LoaderResult};
use alloy_primitives::B256;
use async_trait::async_trait;

/// Whether the item opening a gate is itself delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateKind {
    /// The item opening the gate is delivered.
    Inclusive,
    /// The item opening the gate is dropped; delivery starts right after it.
    Exclusive,
}

/// A gate opening on a specific block hash.
#[derive(Debug)]
pub struct BlockIdGate<H> {
    hash: B256,
    kind: GateKind,
    passed: bool,
    handler: H,
}

impl<H> BlockIdGate<H> {
    /// Creates a gate opening on `hash`.
    pub const fn new(hash: B256, kind: GateKind, handler: H) -> Self {
        Self { hash, kind, passed: false, handler }
    }

    /// Returns true once the gate has opened.
    pub const fn passed(&self) -> bool {
        self.passed
    }
}

#[async_trait]
impl<T, H> BlockHandler<T> for BlockIdGate<H>
where
    T: BlockPosition + Send + 'static,
    H: BlockHandler<T>,
{
    async fn handle(&mut self, item: T) -> LoaderResult<()> {
        if self.passed {
            return self.handler.handle(item).await;
        }

        if item.hash() != self.hash {
            trace!(target: "gate", block_number = item.number(), "Holding block before id gate");
            return Ok(());
        }

        self.passed = true;
        info!(
            target: "gate",
            block_number = item.number(),
            block_hash = %self.hash,
            kind = ?self.kind,
            "Block id gate passed"
        );
        match self.kind {
            GateKind::Inclusive => self.handler.handle(item).await,
            GateKind::Exclusive => Ok(()),
        }
    }
}

/// A gate opening on a block number.
///
/// With a hold-off configured, the gate opens on its own after withholding that many items,
/// so a source starting past the gate number does not stall forever.
#[derive(Debug)]
pub struct BlockNumGate<H> {
    number: u64,
    kind: GateKind,
    max_hold_off: Option<usize>,
    held: usize,
    passed: bool,
    handler: H,
}

impl<H> BlockNumGate<H> {
    /// Creates a gate opening at block `number`.
    pub const fn new(number: u64, kind: GateKind, handler: H) -> Self {
        Self { number, kind, max_hold_off: None, held: 0, passed: false, handler }
    }

    /// Opens the gate after `max_hold_off` withheld items.
    pub const fn with_max_hold_off(mut self, max_hold_off: usize) -> Self {
        self.max_hold_off = Some(max_hold_off);
        self
    }

    /// Returns true once the gate has opened.
    pub const fn passed(&self) -> bool {
        self.passed
    }
}

#[async_trait]
impl<T, H> BlockHandler<T> for BlockNumGate<H>
where
    T: BlockPosition + Send + 'static,
    H: BlockHandler<T>,
{
    async fn handle(&mut self, item: T) -> LoaderResult<()> {
        if self.passed {
            return self.handler.handle(item).await;
        }

        if let Some(max_hold_off) = self.max_hold_off {
            self.held += 1;
            if self.held > max_hold_off {
                warn!(
                    target: "gate",
                    gate_number = self.number,
                    block_number = item.number(),
                    max_hold_off,
                    "Too many blocks held before gate, passing through"
                );
                self.passed = true;
                return self.handler.handle(item).await;
            }
        }

        let number = item.number();
        if number < self.number {
            return Ok(());
        }

        self.passed = true;
        info!(
            target: "gate",
            gate_number = self.number,
            block_number = number,
            kind = ?self.kind,
            "Block number gate passed"
        );
        if number == self.number && self.kind == GateKind::Exclusive {
            return Ok(());
        }
        self.handler.handle(item).await
    }
}
