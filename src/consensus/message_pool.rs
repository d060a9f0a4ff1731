/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Per-round, per-type store of validated consensus messages with quorum-counting queries.
//!
//! ## Buckets
//!
//! Messages for the active height are stored in buckets keyed by `(round, type)`. Within a bucket at
//! most one message per sender is retained: the first one seen. A later message from the same sender
//! into the same bucket (whether identical or conflicting) is reported as a
//! [`Duplicate`](AddMessageOutcome::Duplicate) and dropped. Every count returned by the pool is a
//! count of **distinct senders**, so the outcome of a quorum check never depends on arrival order.
//!
//! ## Validation
//!
//! [`add_message`](MessagePool::add_message) admits a message only if:
//! 1. Its height is not below the active height,
//! 2. Its sender is a member of the active validator set (messages for the next height are exempt, see
//!    below),
//! 3. Its signature verifies against its sender,
//! 4. If it is a `Commit`, its committed seal verifies against its sender, and
//! 5. If it is a `Prepare`, it was not sent by the round's proposer (the proposer's `Preprepare` is its
//!    implicit prepare).
//!
//! Rejected messages are never errors: the returned [`AddMessageOutcome`] says why they were dropped.
//!
//! ## Next-height buffer
//!
//! Only messages for the height right after the active one are buffered. The buffer is split into
//! equal shares of `buffer_capacity / (N + 1)` messages: one share per member of the active validator
//! set, and one share for all other senders together, since the block being decided may admit new
//! validators. No sender can therefore crowd out the messages of another validator. When the pool is
//! [`reset`](MessagePool::reset) to a new height, buffered messages for that height are re-validated
//! against the new validator set and admitted. Everything else in the buffer is discarded.
//!
//! Independently of the buffer, the pool remembers the highest height that each validator has sent a
//! correctly signed message for. Messages for heights beyond the next one are not stored
//! ([`Ahead`](AddMessageOutcome::Ahead)), but still count their sender as ahead of this replica in
//! [`num_future_senders`](MessagePool::num_future_senders).
//!
//! ## Concurrency
//!
//! All state sits behind a single mutex, and every method takes `&self`. Counts are computed while
//! holding the lock, so they always reflect a consistent set of senders, and a reset is atomic with
//! respect to concurrent adds.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Mutex, MutexGuard},
};

use crate::types::{
    block::Proposal,
    crypto_primitives::VerifyingKey,
    data_types::{BlockHeight, BufferSize, CryptoHash, Round, SignatureBytes, VerifyingKeyBytes},
    signed_messages::SignedMessage,
    validator_set::ValidatorSet,
};

use super::messages::{ConsensusMessage, MessageType, Payload};

/// What [`MessagePool::add_message`] did with a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddMessageOutcome {
    /// Stored in the bucket for its round and type.
    Added,
    /// The sender already has a message in the same bucket.
    Duplicate,
    /// Stored in the next-height buffer.
    Buffered,
    /// For a height beyond the next one. Not stored, but its sender is counted as ahead.
    Ahead,
    /// The message is for a height below the active height.
    WrongHeight,
    /// The sender is not a member of the validator set.
    NotValidator,
    /// The sender is malformed or the signature does not verify.
    BadSignature,
    /// A `Commit` whose committed seal does not verify.
    BadSeal,
    /// A `Prepare` sent by the round's proposer.
    ProposerPrepare,
    /// The sender's share of the next-height buffer is full.
    BufferFull,
}

pub struct MessagePool {
    inner: Mutex<PoolState>,
}

struct PoolState {
    height: BlockHeight,
    validators: ValidatorSet,
    buckets: BTreeMap<(Round, MessageType), BTreeMap<VerifyingKeyBytes, ConsensusMessage>>,
    buffer: Vec<ConsensusMessage>,
    buffer_capacity: BufferSize,
    // Highest height above the active one that each validator sent a message for.
    ahead: BTreeMap<VerifyingKeyBytes, BlockHeight>,
}

impl MessagePool {
    /// Create an empty pool for messages about `height`, accepting messages from `validators`.
    pub fn new(
        height: BlockHeight,
        validators: ValidatorSet,
        buffer_capacity: BufferSize,
    ) -> MessagePool {
        MessagePool {
            inner: Mutex::new(PoolState {
                height,
                validators,
                buckets: BTreeMap::new(),
                buffer: Vec::new(),
                buffer_capacity,
                ahead: BTreeMap::new(),
            }),
        }
    }

    /// Validate `msg` and, if it passes, store it in its bucket or in the next-height buffer.
    pub fn add_message(&self, msg: ConsensusMessage) -> AddMessageOutcome {
        let mut state = self.lock();

        if msg.view.height < state.height {
            return AddMessageOutcome::WrongHeight;
        }

        let sender = match msg.sender() {
            Ok(sender) => sender,
            Err(_) => return AddMessageOutcome::BadSignature,
        };
        let is_member = state.validators.contains(&sender);
        if !is_member && msg.view.height != state.height + 1 {
            return AddMessageOutcome::NotValidator;
        }
        if !msg.is_correct(&sender) {
            return AddMessageOutcome::BadSignature;
        }
        if !msg.is_seal_correct(&sender) {
            return AddMessageOutcome::BadSeal;
        }

        if msg.view.height == state.height {
            return state.insert(msg, &sender);
        }

        if is_member {
            let seen = state.ahead.entry(msg.from).or_insert(msg.view.height);
            if msg.view.height > *seen {
                *seen = msg.view.height;
            }
        }
        if msg.view.height > state.height + 1 {
            return AddMessageOutcome::Ahead;
        }
        state.buffer_message(msg, is_member)
    }

    /// Clear every bucket and the buffer, switch to `height` and `validators`, and admit the buffered
    /// messages for `height` whose senders are in `validators`.
    pub fn reset(&self, height: BlockHeight, validators: ValidatorSet) {
        let mut state = self.lock();
        state.height = height;
        state.validators = validators;
        state.buckets.clear();

        let buffered = std::mem::take(&mut state.buffer);
        for msg in buffered.into_iter().filter(|msg| msg.view.height == height) {
            if let Ok(sender) = msg.sender() {
                if state.validators.contains(&sender) {
                    state.insert(msg, &sender);
                }
            }
        }

        let PoolState {
            ahead, validators, ..
        } = &mut *state;
        ahead.retain(|from, seen| {
            *seen > height
                && validators
                    .validators()
                    .any(|validator| validator.to_bytes() == *from)
        });
    }

    /// Drop the buckets of every round below `round`.
    pub fn prune_rounds_below(&self, round: Round) {
        self.lock().buckets.retain(|(r, _), _| *r >= round);
    }

    /// Get the active height.
    pub fn height(&self) -> BlockHeight {
        self.lock().height
    }

    /// Get the active validator set.
    pub fn validators(&self) -> ValidatorSet {
        self.lock().validators.clone()
    }

    /// Number of distinct senders of `Prepare` messages for `round`.
    pub fn num_prepared(&self, round: Round) -> usize {
        self.lock().bucket_len(round, MessageType::Prepare)
    }

    /// Number of distinct senders of `Commit` messages for `round`.
    pub fn num_committed(&self, round: Round) -> usize {
        self.lock().bucket_len(round, MessageType::Commit)
    }

    /// Number of distinct senders of `RoundChange` messages for exactly `round`.
    pub fn num_round_change(&self, round: Round) -> usize {
        self.lock().bucket_len(round, MessageType::RoundChange)
    }

    /// Number of distinct senders of `RoundChange` messages for any round greater than or equal to
    /// `round`.
    pub fn num_round_change_at_least(&self, round: Round) -> usize {
        let state = self.lock();
        let senders: BTreeSet<&VerifyingKeyBytes> = state
            .buckets
            .iter()
            .filter(|((r, t), _)| *t == MessageType::RoundChange && *r >= round)
            .flat_map(|(_, bucket)| bucket.keys())
            .collect();
        senders.len()
    }

    /// Get the highest round `r` such that at least `min_count` distinct validators sent a
    /// `RoundChange` for some round greater than or equal to `r`.
    pub fn max_round_with(&self, min_count: usize) -> Option<Round> {
        if min_count == 0 {
            return None;
        }
        let state = self.lock();

        // The highest round each sender asked for.
        let mut highest: BTreeMap<&VerifyingKeyBytes, Round> = BTreeMap::new();
        for ((round, msg_type), bucket) in &state.buckets {
            if *msg_type != MessageType::RoundChange {
                continue;
            }
            for sender in bucket.keys() {
                let entry = highest.entry(sender).or_insert(*round);
                if *round > *entry {
                    *entry = *round;
                }
            }
        }

        let mut rounds: Vec<Round> = highest.into_values().collect();
        rounds.sort_unstable_by(|a, b| b.cmp(a));
        rounds.get(min_count - 1).copied()
    }

    /// Number of distinct senders of messages of `msg_type` in `round` that are about `digest`.
    pub fn count_matching(&self, round: Round, msg_type: MessageType, digest: &CryptoHash) -> usize {
        self.lock()
            .buckets
            .get(&(round, msg_type))
            .map(|bucket| {
                bucket
                    .values()
                    .filter(|msg| msg.digest().as_ref() == Some(digest))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Get the stored messages of `msg_type` for `round`, in ascending order of sender.
    pub fn messages(&self, round: Round, msg_type: MessageType) -> Vec<ConsensusMessage> {
        self.lock()
            .buckets
            .get(&(round, msg_type))
            .map(|bucket| bucket.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Get the committed seals of the `Commit` messages for `round` that are about `digest`, in
    /// ascending order of sender.
    pub fn committed_seals(
        &self,
        round: Round,
        digest: &CryptoHash,
    ) -> Vec<(VerifyingKeyBytes, SignatureBytes)> {
        self.lock()
            .buckets
            .get(&(round, MessageType::Commit))
            .map(|bucket| {
                bucket
                    .values()
                    .filter_map(|msg| match &msg.payload {
                        Payload::Commit(d, seal) if d == digest => Some((msg.from, *seal)),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Get the proposal that the proposer of `round` sent, if any.
    pub fn preprepare(&self, round: Round) -> Option<Proposal> {
        let state = self.lock();
        let proposer = state.validators.proposer(state.height, round).to_bytes();
        state
            .buckets
            .get(&(round, MessageType::Preprepare))
            .and_then(|bucket| bucket.get(&proposer))
            .and_then(|msg| match &msg.payload {
                Payload::Preprepare(proposal) => Some(proposal.clone()),
                _ => None,
            })
    }

    /// Number of distinct validators that have sent messages for heights above the active height.
    pub fn num_future_senders(&self) -> usize {
        self.lock().ahead.len()
    }

    fn lock(&self) -> MutexGuard<PoolState> {
        // A poisoned lock means another thread panicked while holding it.
        self.inner.lock().unwrap()
    }
}

impl PoolState {
    fn insert(&mut self, msg: ConsensusMessage, sender: &VerifyingKey) -> AddMessageOutcome {
        let msg_type = msg.msg_type();
        if msg_type == MessageType::Prepare
            && self.validators.proposer(self.height, msg.view.round) == sender
        {
            return AddMessageOutcome::ProposerPrepare;
        }

        let bucket = self.buckets.entry((msg.view.round, msg_type)).or_default();
        if bucket.contains_key(&msg.from) {
            return AddMessageOutcome::Duplicate;
        }
        bucket.insert(msg.from, msg);
        AddMessageOutcome::Added
    }

    fn buffer_message(&mut self, msg: ConsensusMessage, is_member: bool) -> AddMessageOutcome {
        let duplicate = self.buffer.iter().any(|buffered| {
            buffered.from == msg.from
                && buffered.view == msg.view
                && buffered.msg_type() == msg.msg_type()
        });
        if duplicate {
            return AddMessageOutcome::Duplicate;
        }

        // Members are charged to their own share, everyone else to the shared one.
        let used = if is_member {
            self.buffer
                .iter()
                .filter(|buffered| buffered.from == msg.from)
                .count()
        } else {
            let members: BTreeSet<VerifyingKeyBytes> = self
                .validators
                .validators()
                .map(|validator| validator.to_bytes())
                .collect();
            self.buffer
                .iter()
                .filter(|buffered| !members.contains(&buffered.from))
                .count()
        };
        if used >= self.buffer_share() || self.buffer.len() as u64 >= self.buffer_capacity.int() {
            return AddMessageOutcome::BufferFull;
        }
        self.buffer.push(msg);
        AddMessageOutcome::Buffered
    }

    fn buffer_share(&self) -> usize {
        let shares = self.validators.len() as u64 + 1;
        (self.buffer_capacity.int() / shares).max(1) as usize
    }

    fn bucket_len(&self, round: Round, msg_type: MessageType) -> usize {
        self.buckets
            .get(&(round, msg_type))
            .map(|bucket| bucket.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
fn test_keypairs(n: usize) -> Vec<crate::types::crypto_primitives::Keypair> {
    use crate::types::crypto_primitives::{Keypair, SigningKey};
    use rand_core::OsRng;

    let mut csprg = OsRng {};
    let mut keypairs: Vec<Keypair> = (0..n)
        .map(|_| Keypair::new(SigningKey::generate(&mut csprg)))
        .collect();
    // Same order as in the validator set, so that `keypairs[i]` is validator `i`.
    keypairs.sort_by(|a, b| a.public().to_bytes().cmp(&b.public().to_bytes()));
    keypairs
}

#[cfg(test)]
fn test_pool(
    keypairs: &[crate::types::crypto_primitives::Keypair],
    height: u64,
) -> MessagePool {
    let validators = ValidatorSet::new(keypairs.iter().map(|kp| kp.public())).unwrap();
    MessagePool::new(BlockHeight::new(height), validators, BufferSize::new(16))
}

#[test]
fn deduplicates_by_sender_test() {
    use crate::types::data_types::View;

    let keypairs = test_keypairs(4);
    let pool = test_pool(&keypairs, 1);
    let view = View::new(BlockHeight::new(1), Round::new(0));

    let first = ConsensusMessage::commit(&keypairs[1], view, CryptoHash::new([1u8; 32]));
    let conflicting = ConsensusMessage::commit(&keypairs[1], view, CryptoHash::new([2u8; 32]));

    assert_eq!(pool.add_message(first), AddMessageOutcome::Added);
    assert_eq!(pool.add_message(conflicting), AddMessageOutcome::Duplicate);
    assert_eq!(pool.num_committed(Round::new(0)), 1);

    // First seen wins.
    assert_eq!(
        pool.count_matching(Round::new(0), MessageType::Commit, &CryptoHash::new([1u8; 32])),
        1
    );
    assert_eq!(
        pool.count_matching(Round::new(0), MessageType::Commit, &CryptoHash::new([2u8; 32])),
        0
    );
}

#[test]
fn isolates_rounds_test() {
    use crate::types::data_types::View;

    let keypairs = test_keypairs(4);
    let pool = test_pool(&keypairs, 1);
    let height = BlockHeight::new(1);
    let digest = CryptoHash::new([3u8; 32]);

    // Proposer of (1, 0) is validator 1, so validator 2 may prepare.
    let prepare = ConsensusMessage::prepare(&keypairs[2], View::new(height, Round::new(0)), digest);
    assert_eq!(pool.add_message(prepare), AddMessageOutcome::Added);

    assert_eq!(pool.num_prepared(Round::new(0)), 1);
    assert_eq!(pool.num_prepared(Round::new(1)), 0);
}

#[test]
fn rejects_invalid_messages_test() {
    use crate::types::data_types::View;

    let keypairs = test_keypairs(5);
    let (validators, outsider) = keypairs.split_at(4);
    let pool = test_pool(validators, 1);
    let view = View::new(BlockHeight::new(1), Round::new(0));
    let digest = CryptoHash::new([4u8; 32]);

    assert_eq!(
        pool.add_message(ConsensusMessage::prepare(&outsider[0], view, digest)),
        AddMessageOutcome::NotValidator
    );

    let mut forged = ConsensusMessage::prepare(&validators[2], view, digest);
    forged.signature = SignatureBytes::new([0u8; 64]);
    assert_eq!(pool.add_message(forged), AddMessageOutcome::BadSignature);

    let bad_seal = ConsensusMessage::new(
        &validators[2],
        view,
        Payload::Commit(digest, SignatureBytes::new([0u8; 64])),
    );
    assert_eq!(pool.add_message(bad_seal), AddMessageOutcome::BadSeal);

    // (1 + 0) mod 4 = 1.
    let proposer_prepare = ConsensusMessage::prepare(&validators[1], view, digest);
    assert_eq!(
        pool.add_message(proposer_prepare),
        AddMessageOutcome::ProposerPrepare
    );

    let old = ConsensusMessage::round_change(
        &validators[0],
        View::new(BlockHeight::new(0), Round::new(3)),
    );
    assert_eq!(pool.add_message(old), AddMessageOutcome::WrongHeight);

    assert_eq!(pool.num_prepared(Round::new(0)), 0);
    assert_eq!(pool.num_committed(Round::new(0)), 0);
}

#[test]
fn arrival_order_does_not_matter_test() {
    use crate::types::data_types::View;
    use rand::{seq::SliceRandom, thread_rng};

    let keypairs = test_keypairs(7);
    let height = BlockHeight::new(5);
    let digest = CryptoHash::new([5u8; 32]);

    let mut msgs = Vec::new();
    for round in 0..3 {
        let view = View::new(height, Round::new(round));
        for keypair in &keypairs {
            msgs.push(ConsensusMessage::prepare(keypair, view, digest));
            msgs.push(ConsensusMessage::commit(keypair, view, digest));
            msgs.push(ConsensusMessage::round_change(keypair, view));
            // Conflicting duplicates.
            msgs.push(ConsensusMessage::commit(keypair, view, CryptoHash::default()));
        }
    }

    let counts = |pool: &MessagePool| -> Vec<usize> {
        (0..3)
            .flat_map(|r| {
                let round = Round::new(r);
                vec![
                    pool.num_prepared(round),
                    pool.num_committed(round),
                    pool.num_round_change(round),
                    pool.num_round_change_at_least(round),
                ]
            })
            .collect()
    };

    let in_order = test_pool(&keypairs, 5);
    msgs.iter().cloned().for_each(|msg| {
        in_order.add_message(msg);
    });
    let expected = counts(&in_order);
    assert_eq!(&expected[0..4], &[6, 7, 7, 7]);

    for _ in 0..5 {
        let mut shuffled = msgs.clone();
        shuffled.shuffle(&mut thread_rng());
        let pool = test_pool(&keypairs, 5);
        shuffled.into_iter().for_each(|msg| {
            pool.add_message(msg);
        });
        assert_eq!(counts(&pool), expected);
    }
}

#[test]
fn round_change_aggregation_test() {
    use crate::types::data_types::View;

    let keypairs = test_keypairs(4);
    let pool = test_pool(&keypairs, 1);
    let height = BlockHeight::new(1);

    pool.add_message(ConsensusMessage::round_change(&keypairs[0], View::new(height, Round::new(2))));
    pool.add_message(ConsensusMessage::round_change(&keypairs[1], View::new(height, Round::new(5))));
    pool.add_message(ConsensusMessage::round_change(&keypairs[2], View::new(height, Round::new(3))));
    pool.add_message(ConsensusMessage::round_change(&keypairs[2], View::new(height, Round::new(1))));

    assert_eq!(pool.num_round_change(Round::new(3)), 1);
    assert_eq!(pool.num_round_change_at_least(Round::new(2)), 3);
    assert_eq!(pool.num_round_change_at_least(Round::new(4)), 1);
    assert_eq!(pool.max_round_with(1), Some(Round::new(5)));
    assert_eq!(pool.max_round_with(2), Some(Round::new(3)));
    assert_eq!(pool.max_round_with(3), Some(Round::new(2)));
    assert_eq!(pool.max_round_with(4), None);

    pool.prune_rounds_below(Round::new(3));
    assert_eq!(pool.num_round_change_at_least(Round::new(0)), 2);
}

#[test]
fn buffers_next_height_and_drops_old_height_after_reset_test() {
    use crate::types::data_types::View;

    let keypairs = test_keypairs(4);
    let pool = test_pool(&keypairs, 1);
    let validators = pool.validators();
    let digest = CryptoHash::new([6u8; 32]);

    let current = View::new(BlockHeight::new(1), Round::new(0));
    let next = View::new(BlockHeight::new(2), Round::new(0));

    assert_eq!(
        pool.add_message(ConsensusMessage::commit(&keypairs[0], current, digest)),
        AddMessageOutcome::Added
    );
    assert_eq!(
        pool.add_message(ConsensusMessage::commit(&keypairs[0], next, digest)),
        AddMessageOutcome::Buffered
    );
    assert_eq!(
        pool.add_message(ConsensusMessage::commit(&keypairs[0], next, digest)),
        AddMessageOutcome::Duplicate
    );
    assert_eq!(
        pool.add_message(ConsensusMessage::commit(&keypairs[3], next, digest)),
        AddMessageOutcome::Buffered
    );
    assert_eq!(pool.num_future_senders(), 2);

    pool.reset(BlockHeight::new(2), validators);
    assert_eq!(pool.num_committed(Round::new(0)), 2);
    assert_eq!(pool.num_future_senders(), 0);

    let committed_seals = pool.committed_seals(Round::new(0), &digest);
    assert_eq!(committed_seals.len(), 2);
    assert!(committed_seals[0].0 < committed_seals[1].0);

    // Messages for the height that was just finished are dropped.
    assert_eq!(
        pool.add_message(ConsensusMessage::commit(&keypairs[1], current, digest)),
        AddMessageOutcome::WrongHeight
    );
}

#[test]
fn buffer_capacity_test() {
    use crate::types::data_types::View;

    let keypairs = test_keypairs(4);
    let validators = ValidatorSet::new(keypairs.iter().map(|kp| kp.public())).unwrap();
    let pool = MessagePool::new(BlockHeight::new(1), validators, BufferSize::new(2));

    for (i, keypair) in keypairs.iter().enumerate() {
        let outcome = pool.add_message(ConsensusMessage::round_change(
            keypair,
            View::new(BlockHeight::new(2), Round::new(0)),
        ));
        if i < 2 {
            assert_eq!(outcome, AddMessageOutcome::Buffered);
        } else {
            assert_eq!(outcome, AddMessageOutcome::BufferFull);
        }
    }
}

#[test]
fn flooding_validator_cannot_crowd_out_others_test() {
    use crate::types::data_types::View;

    // Capacity 16 split into 5 shares of 3.
    let keypairs = test_keypairs(4);
    let pool = test_pool(&keypairs, 1);
    let validators = pool.validators();

    // Far-future messages are not stored.
    for round in 0..16 {
        assert_eq!(
            pool.add_message(ConsensusMessage::round_change(
                &keypairs[0],
                View::new(BlockHeight::new(1000), Round::new(round)),
            )),
            AddMessageOutcome::Ahead
        );
    }
    assert_eq!(pool.num_future_senders(), 1);

    for round in 0..6 {
        let outcome = pool.add_message(ConsensusMessage::round_change(
            &keypairs[0],
            View::new(BlockHeight::new(2), Round::new(round)),
        ));
        if round < 3 {
            assert_eq!(outcome, AddMessageOutcome::Buffered);
        } else {
            assert_eq!(outcome, AddMessageOutcome::BufferFull);
        }
    }

    for keypair in &keypairs[1..3] {
        assert_eq!(
            pool.add_message(ConsensusMessage::round_change(
                keypair,
                View::new(BlockHeight::new(2), Round::new(0)),
            )),
            AddMessageOutcome::Buffered
        );
    }
    assert_eq!(pool.num_future_senders(), 3);

    pool.reset(BlockHeight::new(2), validators);
    assert_eq!(pool.num_round_change(Round::new(0)), 3);
    assert_eq!(pool.num_round_change_at_least(Round::new(0)), 3);

    // Only the validator that claimed height 1000 is still ahead, and the buffer starts empty.
    assert_eq!(pool.num_future_senders(), 1);
    assert_eq!(
        pool.add_message(ConsensusMessage::round_change(
            &keypairs[1],
            View::new(BlockHeight::new(3), Round::new(0)),
        )),
        AddMessageOutcome::Buffered
    );
    assert_eq!(pool.num_future_senders(), 2);
}

#[test]
fn buffers_next_height_messages_from_incoming_validators_test() {
    use crate::types::data_types::View;

    let keypairs = test_keypairs(4);
    let newcomers = test_keypairs(5);
    let pool = test_pool(&keypairs, 1);
    let current = View::new(BlockHeight::new(1), Round::new(0));
    let next = View::new(BlockHeight::new(2), Round::new(0));

    // Non-members are only accepted for the next height.
    assert_eq!(
        pool.add_message(ConsensusMessage::round_change(&newcomers[0], current)),
        AddMessageOutcome::NotValidator
    );
    assert_eq!(
        pool.add_message(ConsensusMessage::round_change(
            &newcomers[0],
            View::new(BlockHeight::new(3), Round::new(0)),
        )),
        AddMessageOutcome::NotValidator
    );

    // All non-members share a single share of 3 messages.
    for (i, newcomer) in newcomers.iter().enumerate() {
        let outcome = pool.add_message(ConsensusMessage::round_change(newcomer, next));
        if i < 3 {
            assert_eq!(outcome, AddMessageOutcome::Buffered);
        } else {
            assert_eq!(outcome, AddMessageOutcome::BufferFull);
        }
    }
    assert_eq!(pool.num_future_senders(), 0);
    assert_eq!(
        pool.add_message(ConsensusMessage::round_change(&keypairs[0], next)),
        AddMessageOutcome::Buffered
    );

    // The finished block admitted `newcomers[0]` only.
    let next_validators = ValidatorSet::new(
        keypairs
            .iter()
            .chain(&newcomers[0..1])
            .map(|keypair| keypair.public()),
    )
    .unwrap();
    pool.reset(BlockHeight::new(2), next_validators);
    let senders: Vec<VerifyingKeyBytes> = pool
        .messages(Round::new(0), MessageType::RoundChange)
        .iter()
        .map(|msg| msg.from)
        .collect();
    assert_eq!(senders.len(), 2);
    assert!(senders.contains(&newcomers[0].public().to_bytes()));
    assert!(senders.contains(&keypairs[0].public().to_bytes()));
}

#[test]
fn messages_are_listed_in_sender_order_test() {
    use crate::types::data_types::View;

    let keypairs = test_keypairs(4);
    let pool = test_pool(&keypairs, 1);
    let view = View::new(BlockHeight::new(1), Round::new(1));

    for i in [3, 0, 2] {
        pool.add_message(ConsensusMessage::round_change(&keypairs[i], view));
    }

    let expected: Vec<VerifyingKeyBytes> = [0, 2, 3]
        .iter()
        .map(|i| keypairs[*i].public().to_bytes())
        .collect();
    let listed: Vec<VerifyingKeyBytes> = pool
        .messages(Round::new(1), MessageType::RoundChange)
        .iter()
        .map(|msg| msg.from)
        .collect();
    assert_eq!(listed, expected);
    assert!(pool
        .messages(Round::new(1), MessageType::RoundChange)
        .iter()
        .all(|msg| msg.view == view));
    assert!(pool.messages(Round::new(0), MessageType::RoundChange).is_empty());
    assert!(pool.messages(Round::new(1), MessageType::Prepare).is_empty());
}

#[test]
fn preprepare_only_from_round_proposer_test() {
    use crate::types::{block::Block, data_types::View};

    let keypairs = test_keypairs(4);
    let pool = test_pool(&keypairs, 1);
    let view = View::new(BlockHeight::new(1), Round::new(0));

    let proposal_from = |i: usize| {
        Proposal::new(Block::new(
            BlockHeight::new(1),
            CryptoHash::default(),
            &keypairs[i],
            None,
            i as u64,
            Vec::new(),
        ))
    };

    pool.add_message(ConsensusMessage::preprepare(&keypairs[2], view, proposal_from(2)));
    assert_eq!(pool.preprepare(Round::new(0)), None);

    let proposal = proposal_from(1);
    pool.add_message(ConsensusMessage::preprepare(&keypairs[1], view, proposal.clone()));
    assert_eq!(pool.preprepare(Round::new(0)), Some(proposal));
}
