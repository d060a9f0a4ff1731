/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable chain storage and block synchronization.
//!
//! The consensus engine does not store blocks itself. Once the validators agree on a block, the engine
//! hands the sealed block to a [`Chain`], and reads headers back from it to keep its
//! [snapshot store](crate::snapshot::store::SnapshotStore) in step with the chain. When the engine
//! notices that it has fallen behind the other validators, it asks a [`BlockSync`] to download and
//! insert the missing blocks.

use crate::types::{block::Block, block::Header, data_types::BlockHeight};

pub trait Chain: Send + 'static {
    /// Append `block`, which carries the committed seals of a quorum of validators, to the chain.
    ///
    /// `block.height()` is always `current_height() + 1`.
    fn insert(&mut self, block: Block) -> Result<(), InsertBlockError>;

    /// Get the height of the chain head. A chain that only has its genesis block is at height 0.
    fn current_height(&self) -> BlockHeight;

    /// Get the header of the block at `height`, if the chain has one.
    fn header_at(&self, height: BlockHeight) -> Option<Header>;
}

pub trait BlockSync: Send + 'static {
    /// Bring `chain` up to date with the rest of the network by inserting the blocks it is missing.
    ///
    /// May block. Returning `Ok(())` without inserting a block is allowed, and makes the engine retry
    /// later.
    fn sync<C: Chain>(&mut self, chain: &mut C) -> Result<(), BlockSyncError>;
}

#[derive(Debug)]
pub enum InsertBlockError {
    /// The block does not extend the chain head.
    NotNext {
        head: BlockHeight,
        got: BlockHeight,
    },
    /// The chain's storage failed.
    Storage(String),
}

#[derive(Debug)]
pub enum BlockSyncError {
    /// No peer could serve the missing blocks.
    NoPeers,
    /// A peer served a block that the chain refused.
    InsertBlockError(InsertBlockError),
}

impl From<InsertBlockError> for BlockSyncError {
    fn from(value: InsertBlockError) -> Self {
        BlockSyncError::InsertBlockError(value)
    }
}
