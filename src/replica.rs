/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build, run, and initialize the storage of a replica.
//!
//! The engine replicates a chain of blocks across multiple processes. In our terminology, these processes
//! are called 'replicas'. Each replica is uniquely identified by an
//! [Ed25519 verifying key](ed25519_dalek::VerifyingKey).
//!
//! They key components of this module are:
//! - The builder-pattern interface to construct a [specification of the replica](ReplicaSpec) with:
//!   1. `ReplicaSpec::builder` to construct a `ReplicaSpecBuilder`,
//!   2. The setters of the `ReplicaSpecBuilder`, and
//!   3. The `ReplicaSpecBuilder::build` method to construct a [ReplicaSpec],
//! - The function to [start](ReplicaSpec::start) a [Replica] given its specification,
//! - The function to [initialize](Replica::initialize) the replica's
//!   [snapshot store](crate::snapshot::store::SnapshotStore),
//! - [The type](Replica) which keeps the replica alive.
//!
//! ## Validators and Listeners
//!
//! Only the replicas in the current validator set take part in agreement. Other replicas, which we call
//! 'listeners', follow the chain by [syncing](crate::chain::BlockSync) it. A listener that is voted into
//! the validator set starts taking part in agreement at the first height at which it is a member, and a
//! validator that is voted out becomes a listener.
//!
//! For listeners to notice that they are behind, they need to receive consensus messages too. Concretely,
//! this requires that the library user's [networking provider's](crate::networking) broadcast method send
//! messages to all peers it is connected to, and not only the validators.
//!
//! ## Starting a replica
//!
//! Here is an example that demonstrates how to build and start running a replica using the builder
//! pattern:
//!
//! ```ignore
//! let replica =
//!     ReplicaSpec::builder()
//!     .app(app)
//!     .chain(chain)
//!     .block_sync(block_sync)
//!     .network(network)
//!     .kv_store(kv_store)
//!     .configuration(configuration)
//!     .on_insert_block(insert_block_handler)
//!     .build()
//!     .start()?;
//! ```
//!
//! ### Required setters
//!
//! The required setters are for providing the trait implementations required to run a replica:
//! - `.app(...)`
//! - `.chain(...)`
//! - `.block_sync(...)`
//! - `.network(...)`
//! - `.kv_store(...)`
//! - `.configuration(...)`
//!
//! ### Optional setters
//!
//! The optional setters are for registering user-defined event handlers for events from
//! [crate::events]:
//! - `.on_insert_block(...)`
//! - `.on_update_validator_set(...)`
//! - `.on_lock(...)`
//! - `.on_propose(...)`
//! - `.on_prepare(...)`
//! - `.on_commit(...)`
//! - `.on_round_change(...)`
//! - `.on_receive_message(...)`
//! - `.on_start_height(...)`
//! - `.on_start_round(...)`
//! - `.on_round_timeout(...)`
//! - `.on_start_sync(...)`
//! - `.on_end_sync(...)`
//!
//! The replica's [configuration](Configuration) can also be defined using the builder pattern, for
//! example:
//!
//! ```ignore
//! let configuration =
//!     Configuration::builder()
//!     .me(signing_key)
//!     .epoch_length(EpochLength::new(30000))
//!     .base_round_timeout(Duration::from_secs(1))
//!     .max_round_timeout(Duration::from_secs(60))
//!     .msg_buffer_capacity(BufferSize::new(1024))
//!     .log_events(true)
//!     .build()
//! ```

use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use ed25519_dalek::SigningKey;
use typed_builder::TypedBuilder;

use crate::algorithm::{Algorithm, AlgorithmError};
use crate::app::App;
use crate::chain::{BlockSync, Chain};
use crate::consensus::messages::ConsensusMessage;
use crate::consensus::state_machine::{ConsensusStatus, Phase};
use crate::consensus::timeouts::RoundTimeouts;
use crate::event_bus::*;
use crate::events::*;
use crate::networking::{network::Network, receiving::start_polling};
use crate::snapshot::candidates::{CandidateError, Candidates};
use crate::snapshot::pluggables::KVStore;
use crate::snapshot::store::{SnapshotStore, SnapshotStoreError};
use crate::snapshot::types::Snapshot;
use crate::types::block::{CandidateVote, Header};
use crate::types::crypto_primitives::{Keypair, VerifyingKey};
use crate::types::data_types::{BlockHeight, BufferSize, EpochLength, Round};
use crate::types::validator_set::ValidatorSet;

/// Stores the user-defined parameters required to start the replica, that is:
/// 1. The replica's [keypair](ed25519_dalek::SigningKey).
/// 2. The length of an "epoch": the number of blocks between two checkpoints of the validator set
///    history. Pending membership votes are discarded at every checkpoint.
/// 3. The base and maximum round timeouts. The timeout of round `r` is `base * 2^r`, capped at the
///    maximum.
/// 4. The message buffer capacity, which bounds the number of messages for the next height that are
///    kept while the replica finishes the current height.
/// 5. Optionally, the number of epochs of validator set history to keep. Older history is pruned.
/// 6. The "Log Events" flag, if set to "true" then logs should be printed.
///
/// ## Log Events
///
/// The engine logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
/// printed onto a terminal or to a file, set up a [logging
/// implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.me(...)`
    - `.epoch_length(...)`
    - `.base_round_timeout(...)`
    - `.max_round_timeout(...)`
    - `.msg_buffer_capacity(...)`
    - `.log_events(...)`

    Optional:
    - `.retained_epochs(...)`
"))]
pub struct Configuration {
    #[builder(setter(doc = "Set the replica's keypair, used to sign messages and blocks. Required."))]
    pub me: SigningKey,
    #[builder(setter(
        doc = "Set the number of blocks between two checkpoints of the validator set history. Required."
    ))]
    pub epoch_length: EpochLength,
    #[builder(setter(doc = "Set the timeout of round 0. Required."))]
    pub base_round_timeout: Duration,
    #[builder(setter(doc = "Set the cap on the timeout of any round. Required."))]
    pub max_round_timeout: Duration,
    #[builder(setter(
        doc = "Set the maximum number of next-height messages kept in the replica's message buffer. Required."
    ))]
    pub msg_buffer_capacity: BufferSize,
    #[builder(
        default,
        setter(
            strip_option,
            doc = "Set the number of epochs of validator set history to keep. Optional, defaults to keeping everything."
        )
    )]
    pub retained_epochs: Option<u64>,
    #[builder(setter(doc = "Enable logging? Required."))]
    pub log_events: bool,
}

/// Stores all necessary parameters and trait implementations required to run the [Replica].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [ReplicaSpec]. On the builder call the following methods to construct a valid [ReplicaSpec].

    Required:
    - `.app(...)`
    - `.chain(...)`
    - `.block_sync(...)`
    - `.network(...)`
    - `.kv_store(...)`
    - `.configuration(...)`

    Optional:
    - `.on_insert_block(...)`
    - `.on_update_validator_set(...)`
    - `.on_lock(...)`
    - `.on_propose(...)`
    - `.on_prepare(...)`
    - `.on_commit(...)`
    - `.on_round_change(...)`
    - `.on_receive_message(...)`
    - `.on_start_height(...)`
    - `.on_start_round(...)`
    - `.on_round_timeout(...)`
    - `.on_start_sync(...)`
    - `.on_end_sync(...)`
"))]
pub struct ReplicaSpec<K: KVStore, A: App, C: Chain, S: BlockSync, N: Network> {
    // Required parameters
    #[builder(setter(
        doc = "Set the application that builds and validates block bodies. The argument must implement the [App](crate::app::App) trait. Required."
    ))]
    app: A,
    #[builder(setter(
        doc = "Set the chain that stores agreed blocks. The argument must implement the [Chain](crate::chain::Chain) trait. Required."
    ))]
    chain: C,
    #[builder(setter(
        doc = "Set the implementation of block sync. The argument must implement the [BlockSync](crate::chain::BlockSync) trait. Required."
    ))]
    block_sync: S,
    #[builder(setter(
        doc = "Set the implementation of peer-to-peer networking. The argument must implement the [Network](crate::networking::network::Network) trait. Required."
    ))]
    network: N,
    #[builder(setter(
        doc = "Set the implementation of the replica's Key-Value store. The argument must implement the [KVStore](crate::snapshot::pluggables::KVStore) trait. Required."
    ))]
    kv_store: K,
    #[builder(setter(
        doc = "Set the [configuration](Configuration), which contains the necessary parameters to run a replica. Required."
    ))]
    configuration: Configuration,
    // Optional parameters
    #[builder(default, setter(transform = |handler: impl Fn(&InsertBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<InsertBlockEvent>),
    doc = "Register a handler closure to be invoked after an agreed block is inserted into the chain. Optional."))]
    on_insert_block: Option<HandlerPtr<InsertBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&UpdateValidatorSetEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<UpdateValidatorSetEvent>),
    doc = "Register a handler closure to be invoked after votes in a block change the validator set. Optional."))]
    on_update_validator_set: Option<HandlerPtr<UpdateValidatorSetEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&LockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<LockEvent>),
    doc = "Register a handler closure to be invoked after the replica locks a proposal. Optional."))]
    on_lock: Option<HandlerPtr<LockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ProposeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ProposeEvent>),
    doc = "Register a handler closure to be invoked after the replica broadcasts a proposal. Optional."))]
    on_propose: Option<HandlerPtr<ProposeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PrepareEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<PrepareEvent>),
    doc = "Register a handler closure to be invoked after the replica broadcasts a prepare message. Optional."))]
    on_prepare: Option<HandlerPtr<PrepareEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CommitEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CommitEvent>),
    doc = "Register a handler closure to be invoked after the replica broadcasts a commit message. Optional."))]
    on_commit: Option<HandlerPtr<CommitEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RoundChangeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RoundChangeEvent>),
    doc = "Register a handler closure to be invoked after the replica broadcasts a round change message. Optional."))]
    on_round_change: Option<HandlerPtr<RoundChangeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveMessageEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveMessageEvent>),
    doc = "Register a handler closure to be invoked after the replica receives a consensus message. Optional."))]
    on_receive_message: Option<HandlerPtr<ReceiveMessageEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartHeightEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartHeightEvent>),
    doc = "Register a handler closure to be invoked after the replica starts agreeing on a new height. Optional."))]
    on_start_height: Option<HandlerPtr<StartHeightEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartRoundEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartRoundEvent>),
    doc = "Register a handler closure to be invoked after the replica enters a new round. Optional."))]
    on_start_round: Option<HandlerPtr<StartRoundEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RoundTimeoutEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RoundTimeoutEvent>),
    doc = "Register a handler closure to be invoked after the replica's round timer expires. Optional."))]
    on_round_timeout: Option<HandlerPtr<RoundTimeoutEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartSyncEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartSyncEvent>),
    doc = "Register a handler closure to be invoked after the replica starts syncing. Optional."))]
    on_start_sync: Option<HandlerPtr<StartSyncEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&EndSyncEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<EndSyncEvent>),
    doc = "Register a handler closure to be invoked after the replica finishes syncing. Optional."))]
    on_end_sync: Option<HandlerPtr<EndSyncEvent>>,
}

impl<K: KVStore, A: App, C: Chain, S: BlockSync, N: Network> ReplicaSpec<K, A, C, S, N> {
    /// Starts all threads and channels associated with running a replica, and returns the handles to
    /// them in a [Replica] struct.
    ///
    /// # Errors
    ///
    /// Fails if the key-value store was never [initialized](Replica::initialize), or if the snapshot
    /// history it holds cannot be read.
    pub fn start(mut self) -> Result<Replica<K>, SnapshotStoreError> {
        let configuration = self.configuration;
        let snapshot_store = SnapshotStore::new(
            self.kv_store,
            configuration.epoch_length,
            configuration.retained_epochs,
        )?;
        self.network
            .init_validator_set(snapshot_store.latest().validator_set);

        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let (to_algorithm, msgs) = mpsc::channel();
        let poller = start_polling(
            self.network.clone(),
            to_algorithm.clone(),
            poller_shutdown_receiver,
        );

        let event_handlers = EventHandlers::new(
            configuration.log_events,
            self.on_insert_block,
            self.on_update_validator_set,
            self.on_lock,
            self.on_propose,
            self.on_prepare,
            self.on_commit,
            self.on_round_change,
            self.on_receive_message,
            self.on_start_height,
            self.on_start_round,
            self.on_round_timeout,
            self.on_start_sync,
            self.on_end_sync,
        );

        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let candidates = Candidates::new();
        let status = Arc::new(Mutex::new(ConsensusStatus {
            height: snapshot_store.latest_height(),
            round: Round::init(),
            phase: Phase::Done,
        }));

        let (algorithm_shutdown, algorithm_shutdown_receiver) = mpsc::channel();
        let algorithm = Algorithm::new(
            Keypair::new(configuration.me),
            RoundTimeouts::new(
                configuration.base_round_timeout,
                configuration.max_round_timeout,
            ),
            configuration.msg_buffer_capacity,
            snapshot_store.clone(),
            candidates.clone(),
            self.app,
            self.chain,
            self.block_sync,
            self.network,
            msgs,
            algorithm_shutdown_receiver,
            event_publisher,
            status.clone(),
        )
        .start();

        let (event_bus, event_bus_shutdown) = match event_subscriber {
            Some(event_subscriber) => {
                let (event_bus_shutdown, event_bus_shutdown_receiver) = mpsc::channel();
                let event_bus = start_event_bus(
                    event_handlers,
                    event_subscriber,
                    event_bus_shutdown_receiver,
                );
                (Some(event_bus), Some(event_bus_shutdown))
            }
            None => (None, None),
        };

        Ok(Replica {
            snapshot_store,
            candidates,
            status,
            to_algorithm,
            poller: Some(poller),
            poller_shutdown,
            algorithm: Some(algorithm),
            algorithm_shutdown,
            event_bus,
            event_bus_shutdown,
        })
    }
}

/// A handle to the background threads of a replica. When this value is dropped, all background threads
/// are gracefully shut down.
pub struct Replica<K: KVStore> {
    snapshot_store: SnapshotStore<K>,
    candidates: Candidates,
    status: Arc<Mutex<ConsensusStatus>>,
    to_algorithm: Sender<ConsensusMessage>,
    poller: Option<JoinHandle<()>>,
    poller_shutdown: Sender<()>,
    algorithm: Option<JoinHandle<Result<(), AlgorithmError>>>,
    algorithm_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl<K: KVStore> Replica<K> {
    /// Initializes the replica's [snapshot store](SnapshotStore) with the genesis header and the genesis
    /// validator set. Does nothing if `kv_store` was already initialized.
    pub fn initialize(
        kv_store: &mut K,
        genesis_header: &Header,
        genesis_validators: ValidatorSet,
    ) -> Result<(), SnapshotStoreError> {
        SnapshotStore::initialize(kv_store, genesis_header, genesis_validators)
    }

    /// Get the height, round, and phase that the replica is currently in.
    pub fn status(&self) -> ConsensusStatus {
        *self.status.lock().unwrap()
    }

    /// Hand `msg` to the replica as if it had been received from the network.
    pub fn inject_message(&self, msg: ConsensusMessage) {
        // Only fails if the algorithm thread has stopped.
        let _ = self.to_algorithm.send(msg);
    }

    /// Get the validator set snapshot effective at `height`.
    pub fn snapshot(&self, height: BlockHeight) -> Result<Snapshot, SnapshotStoreError> {
        self.snapshot_store.get_snapshot(height)
    }

    /// Get the validator set snapshot after the latest block the replica knows of.
    pub fn latest_snapshot(&self) -> Snapshot {
        self.snapshot_store.latest()
    }

    /// Queue a vote to add (`authorize == true`) or remove `candidate`. The vote is stamped into the
    /// blocks this replica proposes until it is resolved or [discarded](Self::discard_candidate).
    pub fn propose_candidate(
        &self,
        candidate: VerifyingKey,
        authorize: bool,
    ) -> Result<(), CandidateError> {
        self.candidates
            .propose(candidate, authorize, &self.snapshot_store.latest())
    }

    pub fn discard_candidate(&self, candidate: &VerifyingKey) -> bool {
        self.candidates.discard(candidate)
    }

    pub fn candidates(&self) -> Vec<CandidateVote> {
        self.candidates.list()
    }

    /// Shut down the replica's threads, and get the reason the algorithm thread stopped, if it stopped
    /// on its own because of an error.
    pub fn stop(mut self) -> Result<(), AlgorithmError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), AlgorithmError> {
        // The order of thread shutdown is important: the algorithm thread receives messages from the
        // poller, and publishes events to the event bus.

        if let Some(event_bus) = self.event_bus.take() {
            self.event_bus_shutdown
                .iter()
                .for_each(|shutdown| shutdown.send(()).unwrap());
            event_bus.join().unwrap();
        }

        let mut result = Ok(());
        if let Some(algorithm) = self.algorithm.take() {
            // The algorithm thread may have stopped on its own already.
            let _ = self.algorithm_shutdown.send(());
            result = algorithm.join().unwrap();
        }

        if let Some(poller) = self.poller.take() {
            let _ = self.poller_shutdown.send(());
            poller.join().unwrap();
        }

        result
    }
}

impl<K: KVStore> Drop for Replica<K> {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
