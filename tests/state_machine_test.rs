//! Deterministic scenarios that drive [`StateMachine`]s directly, without threads, clocks or a network.
//!
//! A [`Cluster`] routes every broadcast to the other live machines, answers every request for a block or
//! a proposal check immediately, and only fires round timers when a test asks it to.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use ibft_rs::{
    consensus::{
        message_pool::MessagePool,
        messages::{ConsensusMessage, MessageType},
        state_machine::{Effect, Input, Phase, StateMachine, ValidateStep},
        timeouts::RoundTimeouts,
    },
    types::{
        block::{Block, Header, Proposal},
        crypto_primitives::{Keypair, SigningKey},
        data_types::{BlockHeight, BufferSize, Round, View},
        validator_set::ValidatorSet,
    },
};
use log::LevelFilter;
use rand_core::OsRng;

mod common;

use crate::common::logging::setup_logger;

const BASE_TIMEOUT: Duration = Duration::from_millis(100);
const MAX_TIMEOUT: Duration = Duration::from_secs(10);

#[test]
fn all_validators_agree_on_a_block_test() {
    setup_logger(LevelFilter::Debug);

    let mut cluster = Cluster::new(4);
    cluster.start();
    cluster.run();

    let validators = cluster.validators.clone();
    let first = cluster.inserted[0].clone().expect("validator 0 did not insert a block");
    for (i, inserted) in cluster.inserted.iter().enumerate() {
        let block = inserted.as_ref().expect("validator did not insert a block");
        assert_eq!(block.hash(), first.hash(), "validator {} inserted a different block", i);
        assert!(block.header.num_valid_committed_seals(&validators) >= validators.quorum_size());
        assert_eq!(cluster.machines[i].status().round, Round::new(0));
        assert_eq!(cluster.machines[i].status().phase, Phase::Done);
    }

    // Round 0 of height 1 is proposed by validator 1.
    assert_eq!(
        first.header.proposer,
        cluster.keypairs[1].public().to_bytes()
    );
}

#[test]
fn crashed_validator_does_not_stop_agreement_test() {
    setup_logger(LevelFilter::Debug);

    // Validator 3 never responds. The other three still form a quorum of 3.
    let mut cluster = Cluster::new(4);
    cluster.alive[3] = false;
    cluster.start();
    cluster.run();

    for i in 0..3 {
        let block = cluster.inserted[i]
            .as_ref()
            .expect("live validator did not insert a block");
        assert_eq!(block.header.committed_seals.len(), 3);
        assert_eq!(cluster.machines[i].status().round, Round::new(0));
    }
    assert!(cluster.inserted[3].is_none());
}

#[test]
fn silent_proposer_is_replaced_after_round_change_test() {
    setup_logger(LevelFilter::Debug);

    // Validator 1, the proposer of round 0, never sends a preprepare.
    let mut cluster = Cluster::new(4);
    cluster.alive[1] = false;
    cluster.start();
    cluster.run();
    assert!(cluster.inserted.iter().all(|inserted| inserted.is_none()));

    // Every live validator times out, and the three round changes for round 1 form a quorum.
    cluster.expire_timers();
    cluster.run();

    let proposer_of_round_1 = cluster.keypairs[2].public().to_bytes();
    for i in [0, 2, 3] {
        let block = cluster.inserted[i]
            .as_ref()
            .expect("live validator did not insert a block");
        assert_eq!(block.header.proposer, proposer_of_round_1);
        assert_eq!(cluster.machines[i].status().round, Round::new(1));
    }
}

#[test]
fn locked_validator_rejects_a_different_proposal_test() {
    setup_logger(LevelFilter::Debug);

    let (mut machine, keypairs, validators) = locked_in_round_1();

    // The proposer of round 1 proposes a block other than the locked one.
    let other = proposal(&keypairs[2], 1, 7);
    let effects = machine.step(Input::Message(ConsensusMessage::preprepare(
        &keypairs[2],
        view(1, 1),
        other,
    )));

    assert_eq!(machine.status().phase, Phase::RoundChange);
    assert_eq!(machine.status().round, Round::new(2));
    assert!(broadcasts(&effects, MessageType::RoundChange).contains(&view(1, 2)));
    assert!(broadcasts(&effects, MessageType::Prepare).is_empty());
    assert!(!effects
        .iter()
        .any(|effect| matches!(effect, Effect::CheckProposal { .. })));
    assert_eq!(machine.state().validators, validators);
}

#[test]
fn locked_validator_accepts_the_locked_proposal_again_test() {
    setup_logger(LevelFilter::Debug);

    let (mut machine, keypairs, _) = locked_in_round_1();
    let locked = machine.state().locked.clone().expect("validator is not locked");

    // The proposer of round 1 re-proposes the locked block, which is still sealed by the proposer of
    // round 0.
    let effects = machine.step(Input::Message(ConsensusMessage::preprepare(
        &keypairs[2],
        view(1, 1),
        locked.clone(),
    )));

    assert_eq!(machine.status().phase, Phase::Validate(ValidateStep::Commit));
    assert_eq!(broadcasts(&effects, MessageType::Prepare), vec![view(1, 1)]);
    assert_eq!(broadcasts(&effects, MessageType::Commit), vec![view(1, 1)]);
    assert_eq!(
        machine.state().current_proposal.as_ref().map(|p| p.hash),
        Some(locked.hash)
    );
}

#[test]
fn stale_round_timer_is_ignored_test() {
    setup_logger(LevelFilter::Debug);

    let (keypairs, validators) = validators(4);
    let mut machine = machine(&keypairs[3], &validators);
    machine.step(Input::NewHeight {
        height: BlockHeight::new(1),
        validators: validators.clone(),
    });
    let before = machine.status();

    // A timer armed for a round this validator never entered.
    let effects = machine.step(Input::RoundTimeout { view: view(1, 5) });
    assert!(effects.is_empty());
    assert_eq!(machine.status(), before);

    // The timer of round 0 is live.
    let effects = machine.step(Input::RoundTimeout { view: view(1, 0) });
    assert_eq!(machine.status().phase, Phase::RoundChange);
    assert_eq!(broadcasts(&effects, MessageType::RoundChange), vec![view(1, 1)]);

    // Once superseded, it is stale too.
    let effects = machine.step(Input::RoundTimeout { view: view(1, 0) });
    assert!(effects.is_empty());
    assert_eq!(machine.status().round, Round::new(1));
}

#[test]
fn messages_for_an_old_height_are_ignored_test() {
    setup_logger(LevelFilter::Debug);

    let (keypairs, validators) = validators(4);
    let mut machine = machine(&keypairs[3], &validators);
    machine.step(Input::NewHeight {
        height: BlockHeight::new(2),
        validators: validators.clone(),
    });
    let before = machine.status();

    let effects = machine.step(Input::Message(ConsensusMessage::round_change(
        &keypairs[0],
        view(1, 4),
    )));
    assert!(effects.is_empty());
    let effects = machine.step(Input::Message(ConsensusMessage::preprepare(
        &keypairs[1],
        view(1, 0),
        proposal(&keypairs[1], 1, 0),
    )));
    assert!(effects.is_empty());
    assert_eq!(machine.status(), before);
}

#[test]
fn non_validator_syncs_until_it_catches_up_test() {
    setup_logger(LevelFilter::Debug);

    let (keypairs, validators) = validators(4);
    let listener = Keypair::new(SigningKey::generate(&mut OsRng {}));
    let mut machine = machine(&listener, &validators);

    let effects = machine.step(Input::NewHeight {
        height: BlockHeight::new(1),
        validators: validators.clone(),
    });
    assert_eq!(machine.status().phase, Phase::Sync);
    assert!(effects.iter().any(|effect| matches!(effect, Effect::StartSync)));

    // Consensus messages are not acted on while syncing.
    let effects = machine.step(Input::Message(ConsensusMessage::preprepare(
        &keypairs[1],
        view(1, 0),
        proposal(&keypairs[1], 1, 0),
    )));
    assert!(effects.is_empty());

    // A failed sync is retried after the base timeout.
    let effects = machine.step(Input::SyncFailed);
    assert!(effects.iter().any(|effect| matches!(
        effect,
        Effect::ScheduleTimeout { after, .. } if *after == BASE_TIMEOUT
    )));
    let effects = machine.step(Input::RoundTimeout { view: view(1, 0) });
    assert!(effects.iter().any(|effect| matches!(effect, Effect::StartSync)));
    assert_eq!(machine.status().phase, Phase::Sync);
}

#[test]
fn validator_behind_its_peers_enters_sync_test() {
    setup_logger(LevelFilter::Debug);

    let (keypairs, validators) = validators(4);
    let mut machine = machine(&keypairs[3], &validators);
    machine.step(Input::NewHeight {
        height: BlockHeight::new(1),
        validators: validators.clone(),
    });
    machine.step(Input::RoundTimeout { view: view(1, 0) });
    assert_eq!(machine.status().phase, Phase::RoundChange);

    // One validator at a higher height could be faulty.
    machine.step(Input::Message(ConsensusMessage::round_change(
        &keypairs[0],
        view(3, 0),
    )));
    assert_eq!(machine.status().phase, Phase::RoundChange);

    // Two cannot both be.
    let effects = machine.step(Input::Message(ConsensusMessage::round_change(
        &keypairs[1],
        view(3, 0),
    )));
    assert_eq!(machine.status().phase, Phase::Sync);
    assert!(effects.iter().any(|effect| matches!(effect, Effect::StartSync)));
}

#[test]
fn flooding_validator_cannot_hide_that_peers_moved_on_test() {
    setup_logger(LevelFilter::Debug);

    let (keypairs, validators) = validators(4);
    let mut machine = machine(&keypairs[3], &validators);
    machine.step(Input::NewHeight {
        height: BlockHeight::new(1),
        validators: validators.clone(),
    });
    machine.step(Input::RoundTimeout { view: view(1, 0) });

    // Validator 0 sends more messages about later heights than the pool can buffer.
    for round in 0..64 {
        machine.step(Input::Message(ConsensusMessage::round_change(
            &keypairs[0],
            view(1000, round),
        )));
        machine.step(Input::Message(ConsensusMessage::round_change(
            &keypairs[0],
            view(2, round),
        )));
    }
    assert_eq!(machine.status().phase, Phase::RoundChange);

    // A single honest validator at the next height is still heard.
    let effects = machine.step(Input::Message(ConsensusMessage::round_change(
        &keypairs[1],
        view(2, 0),
    )));
    assert_eq!(machine.status().phase, Phase::Sync);
    assert!(effects.iter().any(|effect| matches!(effect, Effect::StartSync)));
}

#[test]
fn quorum_of_round_changes_is_adopted_test() {
    setup_logger(LevelFilter::Debug);

    let (keypairs, validators) = validators(4);
    let mut machine = machine(&keypairs[3], &validators);
    machine.step(Input::NewHeight {
        height: BlockHeight::new(1),
        validators: validators.clone(),
    });

    for keypair in &keypairs[0..2] {
        machine.step(Input::Message(ConsensusMessage::round_change(keypair, view(1, 2))));
        assert_eq!(machine.status().phase, Phase::Accept);
        assert_eq!(machine.status().round, Round::new(0));
    }
    let effects = machine.step(Input::Message(ConsensusMessage::round_change(
        &keypairs[2],
        view(1, 2),
    )));

    assert_eq!(machine.status().phase, Phase::Accept);
    assert_eq!(machine.status().round, Round::new(2));
    assert!(effects.iter().any(|effect| matches!(
        effect,
        Effect::ScheduleTimeout { view: v, after } if *v == view(1, 2) && *after == BASE_TIMEOUT * 4
    )));
}

#[test]
fn weak_certificate_raises_the_desired_round_test() {
    setup_logger(LevelFilter::Debug);

    // With 7 validators, f = 2 and the quorum size is 5.
    let (keypairs, validators) = validators(7);
    let mut machine = machine(&keypairs[6], &validators);
    machine.step(Input::NewHeight {
        height: BlockHeight::new(1),
        validators: validators.clone(),
    });
    machine.step(Input::RoundTimeout { view: view(1, 0) });
    assert_eq!(machine.status().round, Round::new(1));

    for keypair in &keypairs[0..2] {
        let effects =
            machine.step(Input::Message(ConsensusMessage::round_change(keypair, view(1, 3))));
        assert!(broadcasts(&effects, MessageType::RoundChange).is_empty());
    }

    // f + 1 validators asking for round 3 include at least one honest validator.
    let effects = machine.step(Input::Message(ConsensusMessage::round_change(
        &keypairs[2],
        view(1, 3),
    )));
    assert_eq!(broadcasts(&effects, MessageType::RoundChange), vec![view(1, 3)]);
    assert_eq!(machine.status().phase, Phase::RoundChange);
    assert_eq!(machine.status().round, Round::new(3));
}

#[test]
fn failed_insert_triggers_round_change_test() {
    setup_logger(LevelFilter::Debug);

    let mut cluster = Cluster::new(4);
    cluster.start();
    cluster.run();

    let effects = cluster.machines[0].step(Input::InsertFailed { view: view(1, 0) });
    assert_eq!(cluster.machines[0].status().phase, Phase::RoundChange);
    assert_eq!(broadcasts(&effects, MessageType::RoundChange), vec![view(1, 1)]);
}

/// A set of state machines wired to each other, all at height 1.
struct Cluster {
    keypairs: Vec<Keypair>,
    validators: ValidatorSet,
    machines: Vec<StateMachine>,
    alive: Vec<bool>,
    timers: Vec<Option<View>>,
    inserted: Vec<Option<Block>>,
    inputs: VecDeque<(usize, Input)>,
}

impl Cluster {
    fn new(n: usize) -> Cluster {
        let (keypairs, validators) = validators(n);
        let machines = keypairs
            .iter()
            .map(|keypair| machine(keypair, &validators))
            .collect();
        Cluster {
            keypairs,
            validators,
            machines,
            alive: vec![true; n],
            timers: vec![None; n],
            inserted: vec![None; n],
            inputs: VecDeque::new(),
        }
    }

    fn start(&mut self) {
        for i in 0..self.machines.len() {
            self.inputs.push_back((
                i,
                Input::NewHeight {
                    height: BlockHeight::new(1),
                    validators: self.validators.clone(),
                },
            ));
        }
    }

    // Deliver inputs until the cluster is quiet.
    fn run(&mut self) {
        while let Some((i, input)) = self.inputs.pop_front() {
            if !self.alive[i] {
                continue;
            }
            let effects = self.machines[i].step(input);
            for effect in effects {
                self.execute(i, effect);
            }
        }
    }

    fn expire_timers(&mut self) {
        for i in 0..self.machines.len() {
            if let Some(view) = self.timers[i].take() {
                self.inputs.push_back((i, Input::RoundTimeout { view }));
            }
        }
    }

    fn execute(&mut self, i: usize, effect: Effect) {
        match effect {
            Effect::Broadcast(msg) => {
                for j in (0..self.machines.len()).filter(|j| *j != i) {
                    self.inputs.push_back((j, Input::Message(msg.clone())));
                }
            }
            Effect::ScheduleTimeout { view, .. } => self.timers[i] = Some(view),
            Effect::CancelTimeout => self.timers[i] = None,
            Effect::BuildProposal { view, .. } => {
                let proposal = proposal(&self.keypairs[i], view.height.int(), view.round.int());
                self.inputs
                    .push_back((i, Input::ProposalBuilt { view, proposal }));
            }
            Effect::CheckProposal { view, proposal } => self.inputs.push_back((
                i,
                Input::ProposalChecked {
                    view,
                    hash: proposal.hash,
                    valid: true,
                },
            )),
            Effect::InsertBlock { block, .. } => self.inserted[i] = Some(block),
            Effect::StartSync | Effect::Locked { .. } => (),
        }
    }
}

// Bring a validator to round 1 of height 1, locked on the block proposed in round 0.
fn locked_in_round_1() -> (StateMachine, Vec<Keypair>, ValidatorSet) {
    let (keypairs, validators) = validators(4);
    let mut machine = machine(&keypairs[3], &validators);
    machine.step(Input::NewHeight {
        height: BlockHeight::new(1),
        validators: validators.clone(),
    });

    let proposed = proposal(&keypairs[1], 1, 0);
    let effects = machine.step(Input::Message(ConsensusMessage::preprepare(
        &keypairs[1],
        view(1, 0),
        proposed.clone(),
    )));
    assert!(effects
        .iter()
        .any(|effect| matches!(effect, Effect::CheckProposal { .. })));
    machine.step(Input::ProposalChecked {
        view: view(1, 0),
        hash: proposed.hash,
        valid: true,
    });
    assert_eq!(machine.status().phase, Phase::Validate(ValidateStep::Prepare));

    let effects = machine.step(Input::Message(ConsensusMessage::prepare(
        &keypairs[0],
        view(1, 0),
        proposed.hash,
    )));
    assert!(effects
        .iter()
        .any(|effect| matches!(effect, Effect::Locked { hash, .. } if *hash == proposed.hash)));
    assert_eq!(machine.status().phase, Phase::Validate(ValidateStep::Commit));

    // Commits never reach a quorum in round 0.
    machine.step(Input::RoundTimeout { view: view(1, 0) });
    for keypair in [&keypairs[0], &keypairs[2]] {
        machine.step(Input::Message(ConsensusMessage::round_change(keypair, view(1, 1))));
    }
    assert_eq!(machine.status().phase, Phase::Accept);
    assert_eq!(machine.status().round, Round::new(1));
    assert_eq!(
        machine.state().locked.as_ref().map(|locked| locked.hash),
        Some(proposed.hash)
    );

    (machine, keypairs, validators)
}

// Generate `n` keypairs, sorted so that `keypairs[i]` is validator `i` of the returned set.
fn validators(n: usize) -> (Vec<Keypair>, ValidatorSet) {
    let mut csprg = OsRng {};
    let mut keypairs: Vec<Keypair> = (0..n)
        .map(|_| Keypair::new(SigningKey::generate(&mut csprg)))
        .collect();
    keypairs.sort_by(|a, b| a.public().to_bytes().cmp(&b.public().to_bytes()));
    let validators = ValidatorSet::new(keypairs.iter().map(|keypair| keypair.public())).unwrap();
    (keypairs, validators)
}

fn machine(me: &Keypair, validators: &ValidatorSet) -> StateMachine {
    let pool = Arc::new(MessagePool::new(
        BlockHeight::new(0),
        validators.clone(),
        BufferSize::new(64),
    ));
    StateMachine::new(
        me.clone(),
        pool,
        RoundTimeouts::new(BASE_TIMEOUT, MAX_TIMEOUT),
    )
}

// A block on top of the genesis block, distinguished by `salt`.
fn proposal(proposer: &Keypair, height: u64, salt: u64) -> Proposal {
    Proposal::new(Block::new(
        BlockHeight::new(height),
        Header::genesis(0).hash(),
        proposer,
        None,
        salt,
        vec![salt.to_le_bytes().to_vec()],
    ))
}

fn view(height: u64, round: u64) -> View {
    View::new(BlockHeight::new(height), Round::new(round))
}

// The views of the messages of `msg_type` broadcast in `effects`.
fn broadcasts(effects: &[Effect], msg_type: MessageType) -> Vec<View> {
    effects
        .iter()
        .filter_map(|effect| match effect {
            Effect::Broadcast(msg) if msg.msg_type() == msg_type => Some(msg.view),
            _ => None,
        })
        .collect()
}
