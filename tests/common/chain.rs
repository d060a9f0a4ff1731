//! In-memory implementations of the [`Chain`], [`BlockSync`] and [`App`] traits.

use std::{
    sync::{Arc, Mutex},
    thread,
    time::{Duration, SystemTime},
};

use ibft_rs::{
    app::{App, BuildProposalError, BuildProposalRequest, BuildProposalResponse},
    chain::{BlockSync, BlockSyncError, Chain, InsertBlockError},
    types::{
        block::{Block, Header, Proposal},
        data_types::BlockHeight,
    },
};

/// A chain of blocks kept in memory, starting from the genesis block. Clones share the same blocks.
#[derive(Clone)]
pub(crate) struct MemChain(Arc<Mutex<Vec<Block>>>);

impl MemChain {
    pub(crate) fn new() -> MemChain {
        let genesis = Block {
            header: Header::genesis(0),
            transactions: Vec::new(),
        };
        MemChain(Arc::new(Mutex::new(vec![genesis])))
    }

    pub(crate) fn block_at(&self, height: BlockHeight) -> Option<Block> {
        self.0.lock().unwrap().get(height.int() as usize).cloned()
    }

    /// Sum of the increments carried by every block in the chain.
    pub(crate) fn number(&self) -> u32 {
        self.0
            .lock()
            .unwrap()
            .iter()
            .flat_map(|block| block.transactions.iter())
            .filter_map(|tx| decode_increment(tx))
            .sum()
    }
}

impl Chain for MemChain {
    fn insert(&mut self, block: Block) -> Result<(), InsertBlockError> {
        let mut blocks = self.0.lock().unwrap();
        let head = BlockHeight::new(blocks.len() as u64 - 1);
        if block.height() != head + 1 {
            return Err(InsertBlockError::NotNext {
                head,
                got: block.height(),
            });
        }
        blocks.push(block);
        Ok(())
    }

    fn current_height(&self) -> BlockHeight {
        BlockHeight::new(self.0.lock().unwrap().len() as u64 - 1)
    }

    fn header_at(&self, height: BlockHeight) -> Option<Header> {
        self.block_at(height).map(|block| block.header)
    }
}

/// Block sync that copies blocks from the longest chain among a shared list of peers' chains.
pub(crate) struct PeerSync {
    peers: Arc<Mutex<Vec<MemChain>>>,
}

impl PeerSync {
    pub(crate) fn new(peers: Arc<Mutex<Vec<MemChain>>>) -> PeerSync {
        PeerSync { peers }
    }
}

impl BlockSync for PeerSync {
    fn sync<C: Chain>(&mut self, chain: &mut C) -> Result<(), BlockSyncError> {
        let peers = self.peers.lock().unwrap().clone();
        let longest = peers
            .iter()
            .max_by_key(|peer| peer.current_height())
            .ok_or(BlockSyncError::NoPeers)?;

        let mut height = chain.current_height();
        while height < longest.current_height() {
            height += 1;
            match longest.block_at(height) {
                Some(block) => chain.insert(block)?,
                None => break,
            }
        }
        Ok(())
    }
}

/// An app whose transactions are increments to a single counter, encoded as little-endian `u32`s.
pub(crate) struct CounterApp {
    tx_queue: Arc<Mutex<Vec<u32>>>,
}

impl CounterApp {
    pub(crate) fn new(tx_queue: Arc<Mutex<Vec<u32>>>) -> CounterApp {
        CounterApp { tx_queue }
    }
}

impl App for CounterApp {
    fn build_proposal(
        &mut self,
        request: BuildProposalRequest,
    ) -> Result<BuildProposalResponse, BuildProposalError> {
        // Pace block production.
        thread::sleep(Duration::from_millis(100));

        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|duration| duration.as_secs())
            .unwrap_or(0);
        let transactions = self
            .tx_queue
            .lock()
            .unwrap()
            .drain(..)
            .map(|increment| increment.to_le_bytes().to_vec())
            .collect();

        Ok(BuildProposalResponse {
            timestamp: now.max(request.parent().timestamp),
            transactions,
        })
    }

    fn is_valid(&mut self, proposal: &Proposal) -> bool {
        proposal
            .block
            .transactions
            .iter()
            .all(|tx| decode_increment(tx).is_some())
    }
}

fn decode_increment(tx: &[u8]) -> Option<u32> {
    <[u8; 4]>::try_from(tx).ok().map(u32::from_le_bytes)
}
