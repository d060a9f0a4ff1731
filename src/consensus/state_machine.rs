/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The round-based state machine that drives agreement on a single height.
//!
//! The state machine is a pure transition function: [`StateMachine::step`] takes an [`Input`]
//! (a message, a timer expiry, or the result of a request made to a collaborator) and returns the
//! [`Effect`]s that the caller must carry out. It never performs I/O, never sleeps, and never reads a
//! clock, so it can be driven deterministically in tests. The [algorithm thread](crate::algorithm)
//! drives it in production.
//!
//! ## Phases
//!
//! A height goes through the following [`Phase`]s:
//! 1. **Accept**: the proposer of the round builds (or, if locked, re-proposes) a block and broadcasts
//!    a `Preprepare`. Other validators wait for the proposer's `Preprepare`, have it checked by the app,
//!    and then broadcast a `Prepare`.
//! 2. **Validate / Prepare**: once `quorum_size() - 1` validators other than the proposer have sent a
//!    `Prepare` for the proposal, the replica locks it and broadcasts a `Commit`.
//! 3. **Validate / Commit**: once `quorum_size()` validators have sent a `Commit` for the proposal, the
//!    replica seals the block with their committed seals and asks for it to be inserted.
//! 4. **Done**: waiting for the caller to start the next height with [`Input::NewHeight`].
//!
//! A round timeout, an invalid proposal, or a proposal that conflicts with the locked one moves the
//! replica into **RoundChange**, where it broadcasts a `RoundChange` for a higher round until a quorum
//! of validators agrees on one. A replica that is not a validator, or that sees more than
//! `max_faulty_nodes()` validators already at a higher height while changing rounds, moves into
//! **Sync** and asks the caller to catch it up.
//!
//! ## Locking
//!
//! Once a replica has sent a `Commit` for a proposal it is locked on that proposal for the rest of the
//! height: as a proposer it re-proposes the locked block, and as a validator it only accepts a
//! `Preprepare` carrying exactly the locked block.
//!
//! ## Timers
//!
//! At most one timer is armed at a time. Every [`Effect::ScheduleTimeout`] replaces the previous timer,
//! and an [`Input::RoundTimeout`] whose view is not the view of the armed timer is ignored.

use std::{sync::Arc, time::Duration};

use crate::types::{
    block::{Block, Proposal},
    crypto_primitives::Keypair,
    data_types::{BlockHeight, CryptoHash, Round, View},
    validator_set::ValidatorSet,
};

use super::{
    message_pool::{AddMessageOutcome, MessagePool},
    messages::{ConsensusMessage, MessageType},
    timeouts::RoundTimeouts,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidateStep {
    Prepare,
    Commit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Accept,
    Validate(ValidateStep),
    RoundChange,
    Sync,
    Done,
}

/// A point-in-time summary of the state machine, for status reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConsensusStatus {
    pub height: BlockHeight,
    pub round: Round,
    pub phase: Phase,
}

/// The full state of agreement on the current height.
#[derive(Clone, Debug)]
pub struct ConsensusState {
    pub height: BlockHeight,
    /// In [`Phase::RoundChange`], the round this replica is asking to move to.
    pub round: Round,
    pub phase: Phase,
    pub locked: Option<Proposal>,
    pub current_proposal: Option<Proposal>,
    pub validators: ValidatorSet,
}

/// Everything that can make the state machine move.
#[derive(Clone, Debug)]
pub enum Input {
    /// Start agreeing on `height` with `validators`.
    NewHeight {
        height: BlockHeight,
        validators: ValidatorSet,
    },
    /// A message from the network (or injected by the host).
    Message(ConsensusMessage),
    /// The timer armed for `view` expired.
    RoundTimeout { view: View },
    /// The app built the block requested by [`Effect::BuildProposal`].
    ProposalBuilt { view: View, proposal: Proposal },
    /// The app could not build the block requested by [`Effect::BuildProposal`].
    BuildFailed { view: View },
    /// The app's verdict on the proposal sent in [`Effect::CheckProposal`].
    ProposalChecked {
        view: View,
        hash: CryptoHash,
        valid: bool,
    },
    /// The chain refused the block sent in [`Effect::InsertBlock`].
    InsertFailed { view: View },
    /// A sync requested by [`Effect::StartSync`] did not bring the replica to a new height.
    SyncFailed,
}

/// Everything the state machine asks its caller to do.
#[derive(Clone, Debug)]
pub enum Effect {
    /// Send `msg` to all peers.
    Broadcast(ConsensusMessage),
    /// Arm the round timer, replacing any timer already armed.
    ScheduleTimeout { view: View, after: Duration },
    /// Disarm the round timer.
    CancelTimeout,
    /// Build a block for `view` on top of the chain head. Answer with [`Input::ProposalBuilt`] or
    /// [`Input::BuildFailed`].
    BuildProposal {
        view: View,
        parent_snapshot_height: BlockHeight,
    },
    /// Check `proposal` against the app's rules. Answer with [`Input::ProposalChecked`].
    CheckProposal { view: View, proposal: Proposal },
    /// Insert the sealed `block` into the chain. Answer with [`Input::NewHeight`] on success and
    /// [`Input::InsertFailed`] on failure.
    InsertBlock { view: View, block: Block },
    /// Catch up with the rest of the validators. Answer with [`Input::NewHeight`] on progress and
    /// [`Input::SyncFailed`] otherwise.
    StartSync,
    /// The replica locked the proposal with `hash` in `view`.
    Locked { view: View, hash: CryptoHash },
}

pub struct StateMachine {
    me: Keypair,
    pool: Arc<MessagePool>,
    timeouts: RoundTimeouts,
    state: ConsensusState,
    timer: Option<View>,
}

impl StateMachine {
    /// Create a state machine that signs with `me` and collects messages in `pool`. The state
    /// machine is idle ([`Phase::Done`]) until it receives its first [`Input::NewHeight`].
    pub fn new(me: Keypair, pool: Arc<MessagePool>, timeouts: RoundTimeouts) -> StateMachine {
        let state = ConsensusState {
            height: pool.height(),
            round: Round::init(),
            phase: Phase::Done,
            locked: None,
            current_proposal: None,
            validators: pool.validators(),
        };
        StateMachine {
            me,
            pool,
            timeouts,
            state,
            timer: None,
        }
    }

    pub fn state(&self) -> &ConsensusState {
        &self.state
    }

    pub fn status(&self) -> ConsensusStatus {
        ConsensusStatus {
            height: self.state.height,
            round: self.state.round,
            phase: self.state.phase,
        }
    }

    pub fn view(&self) -> View {
        View::new(self.state.height, self.state.round)
    }

    /// Feed `input` into the state machine and get the effects that it causes.
    pub fn step(&mut self, input: Input) -> Vec<Effect> {
        let mut effects = Vec::new();
        match input {
            Input::NewHeight { height, validators } => {
                self.on_new_height(height, validators, &mut effects)
            }
            Input::Message(msg) => self.on_message(msg, &mut effects),
            Input::RoundTimeout { view } => self.on_round_timeout(view, &mut effects),
            Input::ProposalBuilt { view, proposal } => {
                self.on_proposal_built(view, proposal, &mut effects)
            }
            Input::BuildFailed { view } => {
                if view == self.view() && self.state.phase == Phase::Accept {
                    log::warn!("Failed to build a proposal for view {}. Abstaining.", view);
                }
            }
            Input::ProposalChecked { view, hash, valid } => {
                self.on_proposal_checked(view, hash, valid, &mut effects)
            }
            Input::InsertFailed { view } => {
                if view == self.view() && self.state.phase == Phase::Done {
                    log::warn!("Failed to insert the block agreed in view {}.", view);
                    self.start_round_change(self.state.round + 1, &mut effects);
                }
            }
            Input::SyncFailed => {
                if self.state.phase == Phase::Sync {
                    self.schedule_timeout(self.view(), self.timeouts.base, &mut effects);
                }
            }
        }
        effects
    }

    fn on_new_height(
        &mut self,
        height: BlockHeight,
        validators: ValidatorSet,
        effects: &mut Vec<Effect>,
    ) {
        self.pool.reset(height, validators.clone());
        self.state = ConsensusState {
            height,
            round: Round::init(),
            phase: Phase::Done,
            locked: None,
            current_proposal: None,
            validators,
        };

        if !self.state.validators.contains(&self.me.public()) {
            self.enter_sync(effects);
            return;
        }

        self.enter_accept(Round::init(), effects);
    }

    fn on_message(&mut self, msg: ConsensusMessage, effects: &mut Vec<Effect>) {
        let view = msg.view;
        let msg_type = msg.msg_type();
        match self.pool.add_message(msg) {
            AddMessageOutcome::Added => (),
            AddMessageOutcome::Buffered | AddMessageOutcome::Ahead => {
                if self.state.phase == Phase::RoundChange {
                    self.check_behind(effects);
                }
                return;
            }
            outcome => {
                log::debug!("Dropped {:?} message for view {}: {:?}", msg_type, view, outcome);
                return;
            }
        }

        match (msg_type, self.state.phase) {
            (_, Phase::Sync) | (_, Phase::Done) => (),
            (MessageType::RoundChange, _) => self.on_round_change_message(effects),
            (MessageType::Preprepare, Phase::Accept) if view.round == self.state.round => {
                self.on_preprepare(effects)
            }
            (MessageType::Prepare, Phase::Validate(_)) | (MessageType::Commit, Phase::Validate(_))
                if view.round == self.state.round =>
            {
                self.check_quorums(effects)
            }
            _ => (),
        }
    }

    fn on_round_timeout(&mut self, view: View, effects: &mut Vec<Effect>) {
        if self.timer != Some(view) {
            // Stale timer.
            return;
        }
        self.timer = None;

        match self.state.phase {
            Phase::Accept | Phase::Validate(_) => {
                self.start_round_change(self.state.round + 1, effects)
            }
            Phase::RoundChange => {
                let weak_certificate = self
                    .pool
                    .max_round_with(self.state.validators.max_faulty_nodes() + 1);
                let target = match weak_certificate {
                    Some(round) if round > self.state.round => round,
                    _ => self.state.round + 1,
                };
                self.start_round_change(target, effects)
            }
            Phase::Sync => effects.push(Effect::StartSync),
            Phase::Done => (),
        }
    }

    fn on_proposal_built(&mut self, view: View, proposal: Proposal, effects: &mut Vec<Effect>) {
        if view != self.view() || self.state.phase != Phase::Accept || !self.i_am_proposer() {
            return;
        }
        self.propose(proposal, effects);
    }

    fn on_proposal_checked(
        &mut self,
        view: View,
        hash: CryptoHash,
        valid: bool,
        effects: &mut Vec<Effect>,
    ) {
        let pending = self
            .state
            .current_proposal
            .as_ref()
            .is_some_and(|proposal| proposal.hash == hash);
        if view != self.view() || self.state.phase != Phase::Accept || !pending {
            return;
        }

        if valid {
            self.broadcast(ConsensusMessage::prepare(&self.me, view, hash), effects);
            self.state.phase = Phase::Validate(ValidateStep::Prepare);
            self.check_quorums(effects);
        } else {
            log::debug!("Proposal for view {} failed validation.", view);
            self.start_round_change(self.state.round + 1, effects);
        }
    }

    // Enter the accept phase of `round`, proposing if this replica is the round's proposer.
    fn enter_accept(&mut self, round: Round, effects: &mut Vec<Effect>) {
        self.state.round = round;
        self.state.phase = Phase::Accept;
        self.state.current_proposal = None;
        let view = self.view();
        self.schedule_timeout(view, self.timeouts.timeout(round), effects);

        if self.i_am_proposer() {
            match self.state.locked.clone() {
                Some(locked) => self.propose(locked, effects),
                None => effects.push(Effect::BuildProposal {
                    view,
                    parent_snapshot_height: self.state.height.prev().unwrap_or_default(),
                }),
            }
        } else {
            self.on_preprepare(effects);
        }
    }

    // Broadcast `proposal` as the proposer of the current round.
    fn propose(&mut self, proposal: Proposal, effects: &mut Vec<Effect>) {
        let view = self.view();
        let hash = proposal.hash;
        self.state.current_proposal = Some(proposal.clone());
        self.broadcast(ConsensusMessage::preprepare(&self.me, view, proposal), effects);

        if self.state.locked.as_ref().is_some_and(|locked| locked.hash == hash) {
            self.broadcast(ConsensusMessage::commit(&self.me, view, hash), effects);
            self.state.phase = Phase::Validate(ValidateStep::Commit);
        } else {
            self.state.phase = Phase::Validate(ValidateStep::Prepare);
        }
        self.check_quorums(effects);
    }

    // Handle the current round's proposer's preprepare, if it has arrived.
    fn on_preprepare(&mut self, effects: &mut Vec<Effect>) {
        if self.state.current_proposal.is_some() {
            return;
        }
        let Some(proposal) = self.pool.preprepare(self.state.round) else {
            return;
        };
        let view = self.view();

        // A re-proposed locked block keeps the header of the round it was built in, so its sealer only
        // has to be a validator, not the proposer of this round.
        let sealed_by_validator = proposal
            .block
            .header
            .proposer()
            .is_ok_and(|sealer| self.state.validators.contains(&sealer));
        if proposal.block.height() != self.state.height
            || !sealed_by_validator
            || !proposal.is_correct()
        {
            log::debug!("Proposer of view {} sent a malformed proposal.", view);
            self.start_round_change(self.state.round + 1, effects);
            return;
        }

        match self.state.locked.clone() {
            Some(locked) if locked.hash == proposal.hash => {
                self.state.current_proposal = Some(locked);
                self.broadcast(ConsensusMessage::prepare(&self.me, view, proposal.hash), effects);
                self.broadcast(ConsensusMessage::commit(&self.me, view, proposal.hash), effects);
                self.state.phase = Phase::Validate(ValidateStep::Commit);
                self.check_quorums(effects);
            }
            Some(_) => {
                log::debug!(
                    "Proposer of view {} proposed a block other than the locked one.",
                    view
                );
                self.start_round_change(self.state.round + 1, effects);
            }
            None => {
                self.state.current_proposal = Some(proposal.clone());
                effects.push(Effect::CheckProposal { view, proposal });
            }
        }
    }

    // Lock and commit on a prepare quorum, finalize on a commit quorum.
    fn check_quorums(&mut self, effects: &mut Vec<Effect>) {
        let Phase::Validate(step) = self.state.phase else {
            return;
        };
        let Some(proposal) = self.state.current_proposal.clone() else {
            return;
        };
        let view = self.view();
        let quorum = self.state.validators.quorum_size();

        if step == ValidateStep::Prepare {
            let prepared =
                self.pool
                    .count_matching(self.state.round, MessageType::Prepare, &proposal.hash);
            if prepared + 1 >= quorum {
                self.state.locked = Some(proposal.clone());
                effects.push(Effect::Locked {
                    view,
                    hash: proposal.hash,
                });
                self.broadcast(ConsensusMessage::commit(&self.me, view, proposal.hash), effects);
                self.state.phase = Phase::Validate(ValidateStep::Commit);
            }
        }

        let committed =
            self.pool
                .count_matching(self.state.round, MessageType::Commit, &proposal.hash);
        if committed >= quorum {
            let mut block = proposal.block;
            block.header.committed_seals =
                self.pool.committed_seals(self.state.round, &proposal.hash);
            self.state.phase = Phase::Done;
            self.cancel_timeout(effects);
            effects.push(Effect::InsertBlock { view, block });
        }
    }

    fn on_round_change_message(&mut self, effects: &mut Vec<Effect>) {
        let quorum = self.state.validators.quorum_size();
        if let Some(round) = self.pool.max_round_with(quorum) {
            let adopt = match self.state.phase {
                Phase::RoundChange => round >= self.state.round,
                Phase::Accept | Phase::Validate(_) => round > self.state.round,
                Phase::Sync | Phase::Done => false,
            };
            if adopt {
                self.adopt_round(round, effects);
                return;
            }
        }

        if self.state.phase == Phase::RoundChange {
            let weak_certificate = self
                .pool
                .max_round_with(self.state.validators.max_faulty_nodes() + 1);
            if let Some(round) = weak_certificate {
                if round > self.state.round {
                    self.start_round_change(round, effects);
                }
            }
        }
    }

    // Move to `round` after a quorum of validators asked for it.
    fn adopt_round(&mut self, round: Round, effects: &mut Vec<Effect>) {
        self.pool.prune_rounds_below(round);
        self.enter_accept(round, effects);
    }

    // Ask the other validators to move to `round`.
    fn start_round_change(&mut self, round: Round, effects: &mut Vec<Effect>) {
        self.state.round = round;
        self.state.phase = Phase::RoundChange;
        self.state.current_proposal = None;
        let view = self.view();
        self.broadcast(ConsensusMessage::round_change(&self.me, view), effects);
        self.schedule_timeout(view, self.timeouts.timeout(round), effects);

        if let Some(agreed) = self
            .pool
            .max_round_with(self.state.validators.quorum_size())
        {
            if agreed >= round {
                self.adopt_round(agreed, effects);
                return;
            }
        }
        self.check_behind(effects);
    }

    // Enter sync if more than the tolerated number of faulty validators are already at a higher
    // height.
    fn check_behind(&mut self, effects: &mut Vec<Effect>) {
        if self.pool.num_future_senders() > self.state.validators.max_faulty_nodes() {
            self.enter_sync(effects);
        }
    }

    fn enter_sync(&mut self, effects: &mut Vec<Effect>) {
        self.state.phase = Phase::Sync;
        self.state.current_proposal = None;
        self.cancel_timeout(effects);
        effects.push(Effect::StartSync);
    }

    fn i_am_proposer(&self) -> bool {
        *self
            .state
            .validators
            .proposer(self.state.height, self.state.round)
            == self.me.public()
    }

    // Add our own message to the pool, then broadcast it.
    fn broadcast(&self, msg: ConsensusMessage, effects: &mut Vec<Effect>) {
        self.pool.add_message(msg.clone());
        effects.push(Effect::Broadcast(msg));
    }

    fn schedule_timeout(&mut self, view: View, after: Duration, effects: &mut Vec<Effect>) {
        self.timer = Some(view);
        effects.push(Effect::ScheduleTimeout { view, after });
    }

    fn cancel_timeout(&mut self, effects: &mut Vec<Effect>) {
        self.timer = None;
        effects.push(Effect::CancelTimeout);
    }
}
