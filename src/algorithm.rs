/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The algorithm thread, which drives the [consensus state machine](crate::consensus::state_machine)
//! and carries out the effects it asks for.
//!
//! The algorithm thread is a loop that feeds the state machine with one [`Input`] at a time:
//! 1. If the armed round timer has expired, a [`Input::RoundTimeout`].
//! 2. Otherwise, the next [`ConsensusMessage`] received from the network (or injected by the host),
//!    waiting at most until the round timer expires.
//!
//! Every [`Effect`] the state machine returns is then executed against the replica's collaborators.
//! Effects that ask a collaborator a question (build a block, check a proposal, insert a block, sync)
//! produce a follow-up input, which is queued and fed back into the state machine before the next
//! message is received.
//!
//! On start-up, and after every inserted or synced block, the thread applies the headers of the chain
//! that the [snapshot store](crate::snapshot::store::SnapshotStore) has not seen yet, then starts the
//! next height with the validator set of the chain head's snapshot.

use std::{
    cmp::min,
    collections::VecDeque,
    sync::{
        mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant, SystemTime},
};

use crate::{
    app::{App, BuildProposalRequest},
    chain::{BlockSync, Chain},
    consensus::{
        message_pool::MessagePool,
        messages::{ConsensusMessage, Payload},
        state_machine::{ConsensusStatus, Effect, Input, Phase, StateMachine},
        timeouts::RoundTimeouts,
    },
    events::*,
    networking::{network::Network, sending::SenderHandle},
    snapshot::{
        candidates::Candidates,
        pluggables::KVStore,
        store::{SnapshotStore, SnapshotStoreError},
    },
    types::{
        block::{Block, Header, Proposal},
        crypto_primitives::Keypair,
        data_types::{BlockHeight, BufferSize, View},
    },
};

// Upper bound on how long the thread blocks waiting for a message before checking for shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub(crate) struct Algorithm<K: KVStore, A: App, C: Chain, S: BlockSync, N: Network> {
    state_machine: StateMachine,
    snapshot_store: SnapshotStore<K>,
    candidates: Candidates,
    keypair: Keypair,
    app: A,
    chain: C,
    block_sync: S,
    sender: SenderHandle<N>,
    msgs: Receiver<ConsensusMessage>,
    shutdown_signal: Receiver<()>,
    event_publisher: Option<Sender<Event>>,
    status: Arc<Mutex<ConsensusStatus>>,
    pending: VecDeque<Input>,
    deadline: Option<(View, Instant, Duration)>,
    last_started: Option<View>,
}

impl<K: KVStore, A: App, C: Chain, S: BlockSync, N: Network> Algorithm<K, A, C, S, N> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        keypair: Keypair,
        timeouts: RoundTimeouts,
        msg_buffer_capacity: BufferSize,
        snapshot_store: SnapshotStore<K>,
        candidates: Candidates,
        app: A,
        chain: C,
        block_sync: S,
        network: N,
        msgs: Receiver<ConsensusMessage>,
        shutdown_signal: Receiver<()>,
        event_publisher: Option<Sender<Event>>,
        status: Arc<Mutex<ConsensusStatus>>,
    ) -> Self {
        let latest = snapshot_store.latest();
        let pool = Arc::new(MessagePool::new(
            latest.height,
            latest.validator_set,
            msg_buffer_capacity,
        ));
        let state_machine = StateMachine::new(keypair.clone(), pool, timeouts);

        Self {
            state_machine,
            snapshot_store,
            candidates,
            keypair,
            app,
            chain,
            block_sync,
            sender: SenderHandle::new(network),
            msgs,
            shutdown_signal,
            event_publisher,
            status,
            pending: VecDeque::new(),
            deadline: None,
            last_started: None,
        }
    }

    pub(crate) fn start(mut self) -> JoinHandle<Result<(), AlgorithmError>> {
        thread::spawn(move || {
            let result = self.execute();
            if let Err(err) = &result {
                log::error!("Algorithm thread stopped: {:?}", err);
            }
            result
        })
    }

    fn execute(&mut self) -> Result<(), AlgorithmError> {
        self.catch_up()?;
        let new_height = self.new_height_input()?;
        self.pending.push_back(new_height);

        loop {
            match self.shutdown_signal.try_recv() {
                Ok(()) => return Ok(()),
                Err(TryRecvError::Empty) => (),
                Err(TryRecvError::Disconnected) => {
                    panic!("Algorithm thread disconnected from main thread")
                }
            }

            if let Some(input) = self.pending.pop_front() {
                self.process(input)?;
                continue;
            }

            if let Some((view, at, timeout)) = self.deadline {
                if Instant::now() >= at {
                    self.deadline = None;
                    Event::publish(
                        &self.event_publisher,
                        Event::RoundTimeout(RoundTimeoutEvent {
                            timestamp: SystemTime::now(),
                            view,
                            timeout,
                        }),
                    );
                    self.process(Input::RoundTimeout { view })?;
                    continue;
                }
            }

            let wait = match self.deadline {
                Some((_, at, _)) => min(at.saturating_duration_since(Instant::now()), POLL_INTERVAL),
                None => POLL_INTERVAL,
            };
            match self.msgs.recv_timeout(wait) {
                Ok(msg) => {
                    if let Ok(origin) = msg.sender() {
                        Event::publish(
                            &self.event_publisher,
                            Event::ReceiveMessage(ReceiveMessageEvent {
                                timestamp: SystemTime::now(),
                                origin,
                                view: msg.view,
                                msg_type: msg.msg_type(),
                            }),
                        );
                    }
                    self.process(Input::Message(msg))?;
                }
                Err(RecvTimeoutError::Timeout) => (),
                Err(RecvTimeoutError::Disconnected) => return Ok(()),
            }
        }
    }

    // Feed `input` into the state machine and execute its effects. Inputs that follow from the effects
    // are queued, and processed before the next message is received.
    fn process(&mut self, input: Input) -> Result<(), AlgorithmError> {
        let effects = self.state_machine.step(input);
        self.on_status_change();
        for effect in effects {
            if let Some(next) = self.execute_effect(effect)? {
                self.pending.push_back(next);
            }
        }
        Ok(())
    }

    fn on_status_change(&mut self) {
        let status = self.state_machine.status();
        *self.status.lock().unwrap() = status;

        if status.phase != Phase::Accept {
            return;
        }
        let view = View::new(status.height, status.round);
        if self.last_started == Some(view) {
            return;
        }
        let state = self.state_machine.state();
        if self.last_started.map_or(true, |last| last.height != view.height) {
            Event::publish(
                &self.event_publisher,
                Event::StartHeight(StartHeightEvent {
                    timestamp: SystemTime::now(),
                    height: view.height,
                    validators: state.validators.clone(),
                }),
            );
        }
        Event::publish(
            &self.event_publisher,
            Event::StartRound(StartRoundEvent {
                timestamp: SystemTime::now(),
                view,
                proposer: *state.validators.proposer(view.height, view.round),
            }),
        );
        self.last_started = Some(view);
    }

    fn execute_effect(&mut self, effect: Effect) -> Result<Option<Input>, AlgorithmError> {
        match effect {
            Effect::Broadcast(msg) => {
                self.publish_broadcast(&msg);
                self.sender.broadcast(msg);
                Ok(None)
            }
            Effect::ScheduleTimeout { view, after } => {
                self.deadline = Some((view, Instant::now() + after, after));
                Ok(None)
            }
            Effect::CancelTimeout => {
                self.deadline = None;
                Ok(None)
            }
            Effect::BuildProposal {
                view,
                parent_snapshot_height,
            } => self.build_proposal(view, parent_snapshot_height).map(Some),
            Effect::CheckProposal { view, proposal } => {
                Ok(Some(self.check_proposal(view, proposal)))
            }
            Effect::InsertBlock { view, block } => self.insert_block(view, block).map(Some),
            Effect::StartSync => self.sync().map(Some),
            Effect::Locked { view, hash } => {
                Event::publish(
                    &self.event_publisher,
                    Event::Lock(LockEvent {
                        timestamp: SystemTime::now(),
                        view,
                        block: hash,
                    }),
                );
                Ok(None)
            }
        }
    }

    fn build_proposal(
        &mut self,
        view: View,
        parent_height: BlockHeight,
    ) -> Result<Input, AlgorithmError> {
        let parent = self.header_at(parent_height)?;
        let parent_snapshot = self.snapshot_store.get_snapshot(parent_height)?;
        let vote = self
            .candidates
            .next_vote(&self.keypair.public(), &parent_snapshot);

        match self
            .app
            .build_proposal(BuildProposalRequest::new(view, parent.clone()))
        {
            Ok(response) => {
                let block = Block::new(
                    view.height,
                    parent.hash(),
                    &self.keypair,
                    vote,
                    response.timestamp,
                    response.transactions,
                );
                Ok(Input::ProposalBuilt {
                    view,
                    proposal: Proposal::new(block),
                })
            }
            Err(err) => {
                log::warn!("App failed to build a proposal for view {}: {:?}", view, err);
                Ok(Input::BuildFailed { view })
            }
        }
    }

    fn check_proposal(&mut self, view: View, proposal: Proposal) -> Input {
        let extends_head = view
            .height
            .prev()
            .and_then(|parent_height| self.chain.header_at(parent_height))
            .is_some_and(|parent| parent.hash() == proposal.block.header.parent_hash);
        let valid = extends_head && self.app.is_valid(&proposal);

        Input::ProposalChecked {
            view,
            hash: proposal.hash,
            valid,
        }
    }

    fn insert_block(&mut self, view: View, block: Block) -> Result<Input, AlgorithmError> {
        let header = block.header.clone();
        if let Err(err) = self.chain.insert(block.clone()) {
            log::warn!("Chain refused the block agreed in view {}: {:?}", view, err);
            return Ok(Input::InsertFailed { view });
        }
        Event::publish(
            &self.event_publisher,
            Event::InsertBlock(InsertBlockEvent {
                timestamp: SystemTime::now(),
                block,
            }),
        );

        self.apply_header(&header)?;
        self.new_height_input()
    }

    fn sync(&mut self) -> Result<Input, AlgorithmError> {
        let start_height = self.chain.current_height();
        Event::publish(
            &self.event_publisher,
            Event::StartSync(StartSyncEvent {
                timestamp: SystemTime::now(),
                height: start_height,
            }),
        );

        if let Err(err) = self.block_sync.sync(&mut self.chain) {
            log::warn!("Block sync failed: {:?}", err);
        }
        self.catch_up()?;

        let end_height = self.chain.current_height();
        let blocks_synced = end_height.int().saturating_sub(start_height.int());
        Event::publish(
            &self.event_publisher,
            Event::EndSync(EndSyncEvent {
                timestamp: SystemTime::now(),
                blocks_synced,
            }),
        );

        if blocks_synced > 0 {
            self.new_height_input()
        } else {
            Ok(Input::SyncFailed)
        }
    }

    // Apply the headers of the chain that the snapshot store has not seen yet.
    fn catch_up(&mut self) -> Result<(), AlgorithmError> {
        let head = self.chain.current_height();
        let mut height = self.snapshot_store.latest_height();
        while height < head {
            height += 1;
            let header = self.header_at(height)?;

            let validators = self.snapshot_store.latest().validator_set;
            if header.num_valid_committed_seals(&validators) < validators.quorum_size() {
                return Err(AlgorithmError::UncommittedBlock { height });
            }
            self.apply_header(&header)?;
        }
        Ok(())
    }

    fn apply_header(&mut self, header: &Header) -> Result<(), AlgorithmError> {
        if let Some(change) = self.snapshot_store.apply_header(header)? {
            Event::publish(
                &self.event_publisher,
                Event::UpdateValidatorSet(UpdateValidatorSetEvent {
                    timestamp: SystemTime::now(),
                    cause_block: header.hash(),
                    change,
                }),
            );
            self.sender.update_validator_set(change);
        }
        Ok(())
    }

    fn new_height_input(&self) -> Result<Input, AlgorithmError> {
        let head = self.chain.current_height();
        let snapshot = self.snapshot_store.get_snapshot(head)?;
        Ok(Input::NewHeight {
            height: head + 1,
            validators: snapshot.validator_set,
        })
    }

    fn header_at(&self, height: BlockHeight) -> Result<Header, AlgorithmError> {
        self.chain
            .header_at(height)
            .ok_or(AlgorithmError::MissingHeader { height })
    }

    fn publish_broadcast(&self, msg: &ConsensusMessage) {
        let timestamp = SystemTime::now();
        let view = msg.view;
        let event = match &msg.payload {
            Payload::Preprepare(proposal) => Event::Propose(ProposeEvent {
                timestamp,
                view,
                proposal: proposal.clone(),
            }),
            Payload::Prepare(digest) => Event::Prepare(PrepareEvent {
                timestamp,
                view,
                digest: *digest,
            }),
            Payload::Commit(digest, _) => Event::Commit(CommitEvent {
                timestamp,
                view,
                digest: *digest,
            }),
            Payload::RoundChange => Event::RoundChange(RoundChangeEvent { timestamp, view }),
        };
        Event::publish(&self.event_publisher, event);
    }
}

/// Reasons the algorithm thread stops. Each of them means that the chain, the snapshot history, and
/// the consensus engine no longer agree with each other.
#[derive(Debug)]
pub enum AlgorithmError {
    SnapshotStoreError(SnapshotStoreError),
    /// The chain does not have a header it claims to have.
    MissingHeader { height: BlockHeight },
    /// A block inserted by block sync does not carry the committed seals of a quorum of validators.
    UncommittedBlock { height: BlockHeight },
}

impl From<SnapshotStoreError> for AlgorithmError {
    fn from(value: SnapshotStoreError) -> Self {
        AlgorithmError::SnapshotStoreError(value)
    }
}
