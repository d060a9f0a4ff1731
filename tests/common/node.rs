use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use ed25519_dalek::{SigningKey, VerifyingKey};
use ibft_rs::{
    chain::Chain,
    consensus::state_machine::ConsensusStatus,
    events::{EndSyncEvent, InsertBlockEvent, RoundTimeoutEvent, UpdateValidatorSetEvent},
    replica::{Configuration, Replica, ReplicaSpec},
    snapshot::{candidates::CandidateError, types::ValidatorSetChange},
    types::{
        block::Header,
        data_types::{BlockHeight, BufferSize, EpochLength},
        validator_set::ValidatorSet,
    },
};

use super::{
    chain::{CounterApp, MemChain, PeerSync},
    logging::{first_seven_base64_chars, log_with_context},
    mem_db::MemDB,
    network::NetworkStub,
};

/// Things the Nodes will have in common:
/// - Genesis block and genesis validator set.
/// - Configuration, apart from the keypair.
/// - The list of chains that block sync copies from.
///
/// Things that they will differ in:
/// - App instance.
/// - Network instance.
/// - Chain.
/// - KVStore.
/// - Keypair.
pub(crate) struct Node {
    verifying_key: VerifyingKey,
    tx_queue: Arc<Mutex<Vec<u32>>>,
    chain: MemChain,
    replica: Replica<MemDB>,
}

impl Node {
    pub(crate) fn new(
        keypair: SigningKey,
        network: NetworkStub,
        genesis_validators: ValidatorSet,
        peers: Arc<Mutex<Vec<MemChain>>>,
    ) -> Node {
        let mut kv_store = MemDB::new();
        Replica::initialize(&mut kv_store, &Header::genesis(0), genesis_validators).unwrap();

        let verifying_key = keypair.verifying_key();
        let tx_queue = Arc::new(Mutex::new(Vec::new()));
        let chain = MemChain::new();
        peers.lock().unwrap().push(chain.clone());

        let configuration = Configuration::builder()
            .me(keypair)
            .epoch_length(EpochLength::new(50))
            .base_round_timeout(Duration::from_millis(500))
            .max_round_timeout(Duration::from_secs(4))
            .msg_buffer_capacity(BufferSize::new(1024))
            .log_events(false)
            .build();

        let replica = ReplicaSpec::builder()
            .app(CounterApp::new(tx_queue.clone()))
            .chain(chain.clone())
            .block_sync(PeerSync::new(peers))
            .network(network)
            .kv_store(kv_store)
            .configuration(configuration)
            .on_insert_block(insert_block_handler(verifying_key))
            .on_update_validator_set(update_validator_set_handler(verifying_key))
            .on_round_timeout(round_timeout_handler(verifying_key))
            .on_end_sync(end_sync_handler(verifying_key))
            .build()
            .start()
            .unwrap();

        Node {
            verifying_key,
            tx_queue,
            chain,
            replica,
        }
    }

    pub(crate) fn submit_transaction(&self, increment: u32) {
        self.tx_queue.lock().unwrap().push(increment);
    }

    pub(crate) fn number(&self) -> u32 {
        self.chain.number()
    }

    pub(crate) fn height(&self) -> BlockHeight {
        self.chain.current_height()
    }

    pub(crate) fn validator_set(&self) -> ValidatorSet {
        self.replica.latest_snapshot().validator_set
    }

    pub(crate) fn status(&self) -> ConsensusStatus {
        self.replica.status()
    }

    pub(crate) fn propose_candidate(
        &self,
        candidate: VerifyingKey,
        authorize: bool,
    ) -> Result<(), CandidateError> {
        self.replica.propose_candidate(candidate, authorize)
    }

    pub(crate) fn replica(&self) -> &Replica<MemDB> {
        &self.replica
    }

    pub(crate) fn verifying_key(&self) -> VerifyingKey {
        self.verifying_key
    }
}

fn insert_block_handler(
    verifying_key: VerifyingKey,
) -> impl Fn(&InsertBlockEvent) + Send + 'static {
    move |insert_block_event| {
        log_with_context(
            &verifying_key,
            &format!(
                "Inserted block with height: {}, hash: {}, committed seals: {}",
                insert_block_event.block.height(),
                first_seven_base64_chars(&insert_block_event.block.hash().bytes()),
                insert_block_event.block.header.committed_seals.len()
            ),
        )
    }
}

fn update_validator_set_handler(
    verifying_key: VerifyingKey,
) -> impl Fn(&UpdateValidatorSetEvent) + Send + 'static {
    move |update_validator_set_event| {
        let (direction, validator) = match update_validator_set_event.change {
            ValidatorSetChange::Added(validator) => ("Added", validator),
            ValidatorSetChange::Removed(validator) => ("Removed", validator),
        };
        log_with_context(
            &verifying_key,
            &format!(
                "{} validator {} in block: {}",
                direction,
                first_seven_base64_chars(&validator.to_bytes()),
                first_seven_base64_chars(&update_validator_set_event.cause_block.bytes())
            ),
        )
    }
}

fn round_timeout_handler(
    verifying_key: VerifyingKey,
) -> impl Fn(&RoundTimeoutEvent) + Send + 'static {
    move |round_timeout_event| {
        log_with_context(
            &verifying_key,
            &format!(
                "Round timed out at view: {}, after: {} ms",
                round_timeout_event.view,
                round_timeout_event.timeout.as_millis()
            ),
        )
    }
}

fn end_sync_handler(verifying_key: VerifyingKey) -> impl Fn(&EndSyncEvent) + Send + 'static {
    move |end_sync_event| {
        if end_sync_event.blocks_synced > 0 {
            log_with_context(
                &verifying_key,
                &format!("Synced {} blocks", end_sync_event.blocks_synced),
            )
        }
    }
}
