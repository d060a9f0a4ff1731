/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Membership changes queued by the operator of this replica.
//!
//! Whenever this replica proposes a block, it stamps a vote for one queued candidate into the block's
//! header. The queue only holds proposals that still make sense: a candidate that has been admitted (or
//! removed) in the meantime is dropped the next time a vote is picked.

use std::sync::{Arc, Mutex};

use crate::types::{block::CandidateVote, crypto_primitives::VerifyingKey};

use super::types::Snapshot;

#[derive(Clone, Default)]
pub struct Candidates(Arc<Mutex<Vec<CandidateVote>>>);

impl Candidates {
    pub fn new() -> Candidates {
        Candidates::default()
    }

    /// Queue a vote to add (`authorize == true`) or remove `candidate`, checked against the latest
    /// snapshot.
    pub fn propose(
        &self,
        candidate: VerifyingKey,
        authorize: bool,
        latest: &Snapshot,
    ) -> Result<(), CandidateError> {
        let is_validator = latest.validator_set.contains(&candidate);
        if authorize && is_validator {
            return Err(CandidateError::AlreadyValidator);
        }
        if !authorize && !is_validator {
            return Err(CandidateError::NotValidator);
        }

        let mut queue = self.0.lock().unwrap();
        let candidate = candidate.to_bytes();
        if queue.iter().any(|vote| vote.candidate == candidate) {
            return Err(CandidateError::AlreadyCandidate);
        }
        queue.push(CandidateVote {
            candidate,
            authorize,
        });
        Ok(())
    }

    /// Drop the queued vote about `candidate`. Returns whether there was one.
    pub fn discard(&self, candidate: &VerifyingKey) -> bool {
        let mut queue = self.0.lock().unwrap();
        let len_before = queue.len();
        queue.retain(|vote| vote.candidate != candidate.to_bytes());
        queue.len() != len_before
    }

    pub fn list(&self) -> Vec<CandidateVote> {
        self.0.lock().unwrap().clone()
    }

    /// Pick the vote that `me` should stamp into a block built on top of `parent`: the first queued
    /// vote that would still change membership and that `me` has not already cast.
    pub(crate) fn next_vote(&self, me: &VerifyingKey, parent: &Snapshot) -> Option<CandidateVote> {
        let mut queue = self.0.lock().unwrap();
        queue.retain(|vote| is_applicable(vote, parent));
        queue
            .iter()
            .find(|vote| !parent.has_voted(&me.to_bytes(), &vote.candidate))
            .copied()
    }
}

fn is_applicable(vote: &CandidateVote, snapshot: &Snapshot) -> bool {
    let is_validator = snapshot
        .validator_set
        .validators()
        .any(|validator| validator.to_bytes() == vote.candidate);
    is_validator != vote.authorize
}

#[derive(Debug, PartialEq, Eq)]
pub enum CandidateError {
    /// Asked to add a validator that is already in the validator set.
    AlreadyValidator,
    /// Asked to remove a replica that is not in the validator set.
    NotValidator,
    /// A vote about the same candidate is already queued.
    AlreadyCandidate,
}

#[test]
fn next_vote_skips_resolved_and_cast_candidates_test() {
    use crate::types::{
        block::Header,
        crypto_primitives::{Keypair, SigningKey},
        validator_set::ValidatorSet,
    };
    use rand_core::OsRng;

    let mut csprg = OsRng {};
    let me = Keypair::new(SigningKey::generate(&mut csprg)).public();
    let other = Keypair::new(SigningKey::generate(&mut csprg)).public();
    let first = Keypair::new(SigningKey::generate(&mut csprg)).public();
    let second = Keypair::new(SigningKey::generate(&mut csprg)).public();

    let validator_set = ValidatorSet::new([me, other]).unwrap();
    let mut snapshot = Snapshot::genesis(&Header::genesis(0), validator_set);

    let candidates = Candidates::new();
    candidates.propose(first, true, &snapshot).unwrap();
    candidates.propose(second, true, &snapshot).unwrap();
    assert_eq!(
        candidates.propose(first, true, &snapshot),
        Err(CandidateError::AlreadyCandidate)
    );
    assert_eq!(
        candidates.propose(other, true, &snapshot),
        Err(CandidateError::AlreadyValidator)
    );

    assert_eq!(
        candidates.next_vote(&me, &snapshot).map(|vote| vote.candidate),
        Some(first.to_bytes())
    );

    // Once `me` has voted for `first`, the next vote is for `second`.
    snapshot.votes.push(super::types::Vote {
        validator: me.to_bytes(),
        candidate: first.to_bytes(),
        authorize: true,
        block: snapshot.hash,
    });
    assert_eq!(
        candidates.next_vote(&me, &snapshot).map(|vote| vote.candidate),
        Some(second.to_bytes())
    );

    // Once `second` is admitted its vote is dropped from the queue.
    snapshot.validator_set.put(&second);
    candidates.next_vote(&me, &snapshot);
    assert_eq!(candidates.list().len(), 1);

    assert!(candidates.discard(&first));
    assert!(!candidates.discard(&first));
    assert_eq!(candidates.next_vote(&me, &snapshot), None);
}
