/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Snapshots of the validator set and the membership votes that change it.
//!
//! ## Vote rules
//!
//! Each header may carry one [`CandidateVote`] cast by the header's proposer. Applying a header to the
//! snapshot of its parent works as follows:
//! 1. The proposer must be a member of the parent's validator set, and the header's seal must verify.
//! 2. At an epoch boundary, all pending votes are discarded and the header's vote is ignored.
//! 3. A vote to add an existing member, or to remove a non-member, is ignored.
//! 4. A validator has at most one pending vote per candidate. Repeating the same vote changes nothing;
//!    voting the other way replaces the earlier vote.
//! 5. Once `quorum_size()` validators of the parent's set have voted the same way on a candidate, the
//!    candidate is added or removed, and every pending vote about the candidate is discarded. A removed
//!    validator's own pending votes are discarded too.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    block::{CandidateVote, Header},
    crypto_primitives::{self, VerifyingKey},
    data_types::{BlockHeight, CryptoHash, EpochLength, VerifyingKeyBytes},
    validator_set::{ValidatorSet, ValidatorSetBytes, ValidatorSetError},
};

use super::store::SnapshotStoreError;

/// A pending membership vote.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Vote {
    /// The validator that cast the vote (the proposer of `block`).
    pub validator: VerifyingKeyBytes,
    pub candidate: VerifyingKeyBytes,
    pub authorize: bool,
    /// Hash of the block that carried the vote.
    pub block: CryptoHash,
}

/// The validator set effective after the block at `height`, plus the votes still pending at that
/// point.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub height: BlockHeight,
    pub hash: CryptoHash,
    pub validator_set: ValidatorSet,
    pub votes: Vec<Vote>,
}

/// A change to the validator set caused by votes reaching quorum.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidatorSetChange {
    Added(VerifyingKey),
    Removed(VerifyingKey),
}

impl Snapshot {
    /// Create the snapshot of the genesis block.
    pub fn genesis(genesis_header: &Header, validator_set: ValidatorSet) -> Snapshot {
        Snapshot {
            height: genesis_header.number,
            hash: genesis_header.hash(),
            validator_set,
            votes: Vec::new(),
        }
    }

    /// Apply `header`, which must be the child of the block this snapshot is about, and get the
    /// snapshot after it together with the change it caused to the validator set, if any.
    ///
    /// This is a pure function of `self`, `header` and `epoch_length`, so every replica that applies
    /// the same headers gets identical snapshots.
    pub fn apply(
        &self,
        header: &Header,
        epoch_length: EpochLength,
    ) -> Result<(Snapshot, Option<ValidatorSetChange>), SnapshotStoreError> {
        let height = header.number;
        let proposer = header
            .proposer()
            .map_err(|_| SnapshotStoreError::UnauthorizedProposer { height })?;
        if !self.validator_set.contains(&proposer) {
            return Err(SnapshotStoreError::UnauthorizedProposer { height });
        }
        if !header.verify_seal() {
            return Err(SnapshotStoreError::InvalidSeal { height });
        }

        let mut next = Snapshot {
            height,
            hash: header.hash(),
            validator_set: self.validator_set.clone(),
            votes: self.votes.clone(),
        };

        if epoch_length.is_boundary(height) {
            next.votes.clear();
            return Ok((next, None));
        }

        let change = match &header.vote {
            Some(vote) => next.cast(header.proposer, vote, next.hash)?,
            None => None,
        };
        Ok((next, change))
    }

    /// Check whether `validator` has a pending vote about `candidate` in this snapshot.
    pub fn has_voted(&self, validator: &VerifyingKeyBytes, candidate: &VerifyingKeyBytes) -> bool {
        self.votes
            .iter()
            .any(|vote| vote.validator == *validator && vote.candidate == *candidate)
    }

    /// Count the pending votes about `candidate` in direction `authorize`.
    pub fn tally(&self, candidate: &VerifyingKeyBytes, authorize: bool) -> usize {
        self.votes
            .iter()
            .filter(|vote| vote.candidate == *candidate && vote.authorize == authorize)
            .count()
    }

    fn cast(
        &mut self,
        caster: VerifyingKeyBytes,
        vote: &CandidateVote,
        block: CryptoHash,
    ) -> Result<Option<ValidatorSetChange>, SnapshotStoreError> {
        let Ok(candidate) = crypto_primitives::verifying_key(&vote.candidate) else {
            log::debug!("Ignoring vote at height {} for a malformed candidate.", self.height);
            return Ok(None);
        };
        if self.validator_set.contains(&candidate) == vote.authorize {
            return Ok(None);
        }

        if let Some(existing) = self
            .votes
            .iter_mut()
            .find(|v| v.validator == caster && v.candidate == vote.candidate)
        {
            if existing.authorize == vote.authorize {
                return Ok(None);
            }
            existing.authorize = vote.authorize;
            existing.block = block;
        } else {
            self.votes.push(Vote {
                validator: caster,
                candidate: vote.candidate,
                authorize: vote.authorize,
                block,
            });
        }

        if self.tally(&vote.candidate, vote.authorize) < self.validator_set.quorum_size() {
            return Ok(None);
        }

        let height = self.height;
        let change = if vote.authorize {
            self.validator_set.put(&candidate);
            ValidatorSetChange::Added(candidate)
        } else {
            self.validator_set
                .remove(&candidate)
                .map_err(|err| match err {
                    ValidatorSetError::Empty => SnapshotStoreError::EmptyValidatorSet { height },
                    other => SnapshotStoreError::ValidatorSetError(other),
                })?;
            self.votes.retain(|v| v.validator != vote.candidate);
            ValidatorSetChange::Removed(candidate)
        };
        self.votes.retain(|v| v.candidate != vote.candidate);

        Ok(Some(change))
    }
}

/// Intermediate representation of [`Snapshot`] for persistence, see [`ValidatorSetBytes`].
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub(crate) struct SnapshotBytes {
    height: BlockHeight,
    hash: CryptoHash,
    validator_set: ValidatorSetBytes,
    votes: Vec<Vote>,
}

impl From<&Snapshot> for SnapshotBytes {
    fn from(snapshot: &Snapshot) -> Self {
        SnapshotBytes {
            height: snapshot.height,
            hash: snapshot.hash,
            validator_set: ValidatorSetBytes::from(&snapshot.validator_set),
            votes: snapshot.votes.clone(),
        }
    }
}

impl TryFrom<SnapshotBytes> for Snapshot {
    type Error = ValidatorSetError;

    fn try_from(bytes: SnapshotBytes) -> Result<Self, Self::Error> {
        Ok(Snapshot {
            height: bytes.height,
            hash: bytes.hash,
            validator_set: ValidatorSet::try_from(bytes.validator_set)?,
            votes: bytes.votes,
        })
    }
}

#[cfg(test)]
fn sealed_header(
    parent: &Snapshot,
    proposer: &crate::types::crypto_primitives::Keypair,
    vote: Option<(VerifyingKey, bool)>,
) -> Header {
    use crate::types::block::Block;

    Block::new(
        parent.height + 1,
        parent.hash,
        proposer,
        vote.map(|(candidate, authorize)| CandidateVote {
            candidate: candidate.to_bytes(),
            authorize,
        }),
        parent.height.int() + 1,
        Vec::new(),
    )
    .header
}

#[cfg(test)]
fn genesis_with(
    n: usize,
) -> (Snapshot, Vec<crate::types::crypto_primitives::Keypair>) {
    use crate::types::crypto_primitives::{Keypair, SigningKey};
    use rand_core::OsRng;

    let mut csprg = OsRng {};
    let keypairs: Vec<Keypair> = (0..n)
        .map(|_| Keypair::new(SigningKey::generate(&mut csprg)))
        .collect();
    let validator_set = ValidatorSet::new(keypairs.iter().map(|kp| kp.public())).unwrap();
    (Snapshot::genesis(&Header::genesis(0), validator_set), keypairs)
}

#[test]
fn add_vote_quorum_test() {
    use crate::types::crypto_primitives::{Keypair, SigningKey};
    use rand_core::OsRng;

    let epoch = EpochLength::new(100);
    let (genesis, keypairs) = genesis_with(4);
    let candidate = Keypair::new(SigningKey::generate(&mut OsRng {})).public();

    let mut snapshot = genesis;
    for (i, keypair) in keypairs.iter().take(2).enumerate() {
        let header = sealed_header(&snapshot, keypair, Some((candidate, true)));
        let (next, change) = snapshot.apply(&header, epoch).unwrap();
        assert_eq!(change, None);
        assert_eq!(next.tally(&candidate.to_bytes(), true), i + 1);
        snapshot = next;
    }
    // Two votes out of a quorum of three do not admit the candidate.
    assert!(!snapshot.validator_set.contains(&candidate));

    let header = sealed_header(&snapshot, &keypairs[2], Some((candidate, true)));
    let (snapshot, change) = snapshot.apply(&header, epoch).unwrap();
    assert_eq!(change, Some(ValidatorSetChange::Added(candidate)));
    assert!(snapshot.validator_set.contains(&candidate));
    assert_eq!(snapshot.validator_set.len(), 5);
    assert!(snapshot.votes.is_empty());
}

#[test]
fn repeated_vote_is_idempotent_test() {
    use crate::types::crypto_primitives::{Keypair, SigningKey};
    use rand_core::OsRng;

    let epoch = EpochLength::new(100);
    let (genesis, keypairs) = genesis_with(4);
    let candidate = Keypair::new(SigningKey::generate(&mut OsRng {})).public();

    let mut snapshot = genesis;
    for _ in 0..3 {
        let header = sealed_header(&snapshot, &keypairs[0], Some((candidate, true)));
        let (next, change) = snapshot.apply(&header, epoch).unwrap();
        assert_eq!(change, None);
        snapshot = next;
    }
    assert_eq!(snapshot.tally(&candidate.to_bytes(), true), 1);
    assert_eq!(snapshot.votes.len(), 1);

    // Voting the other way replaces the vote.
    let member = keypairs[3].public();
    let header = sealed_header(&snapshot, &keypairs[0], Some((member, false)));
    let (snapshot, _) = snapshot.apply(&header, epoch).unwrap();
    assert_eq!(snapshot.votes.len(), 2);

    // Votes that would not change membership are ignored.
    let header = sealed_header(&snapshot, &keypairs[1], Some((member, true)));
    let (snapshot, _) = snapshot.apply(&header, epoch).unwrap();
    assert_eq!(snapshot.votes.len(), 2);
}

#[test]
fn removal_purges_votes_test() {
    use crate::types::crypto_primitives::{Keypair, SigningKey};
    use rand_core::OsRng;

    let epoch = EpochLength::new(100);
    let (genesis, keypairs) = genesis_with(4);
    let outsider = Keypair::new(SigningKey::generate(&mut OsRng {})).public();
    let removed = keypairs[3].public();

    // The validator to be removed has an outstanding vote of its own.
    let header = sealed_header(&genesis, &keypairs[3], Some((outsider, true)));
    let (mut snapshot, _) = genesis.apply(&header, epoch).unwrap();
    assert_eq!(snapshot.tally(&outsider.to_bytes(), true), 1);

    for keypair in &keypairs[0..2] {
        let header = sealed_header(&snapshot, keypair, Some((removed, false)));
        snapshot = snapshot.apply(&header, epoch).unwrap().0;
    }
    assert!(snapshot.validator_set.contains(&removed));

    let header = sealed_header(&snapshot, &keypairs[2], Some((removed, false)));
    let (snapshot, change) = snapshot.apply(&header, epoch).unwrap();
    assert_eq!(change, Some(ValidatorSetChange::Removed(removed)));
    assert_eq!(snapshot.validator_set.len(), 3);
    assert!(snapshot.votes.is_empty());

    // The removed validator can no longer propose.
    let header = sealed_header(&snapshot, &keypairs[3], None);
    assert!(matches!(
        snapshot.apply(&header, epoch),
        Err(SnapshotStoreError::UnauthorizedProposer { .. })
    ));
}

#[test]
fn epoch_boundary_clears_votes_test() {
    use crate::types::crypto_primitives::{Keypair, SigningKey};
    use rand_core::OsRng;

    let epoch = EpochLength::new(3);
    let (genesis, keypairs) = genesis_with(4);
    let candidate = Keypair::new(SigningKey::generate(&mut OsRng {})).public();

    let mut snapshot = genesis;
    for keypair in &keypairs[0..2] {
        let header = sealed_header(&snapshot, keypair, Some((candidate, true)));
        snapshot = snapshot.apply(&header, epoch).unwrap().0;
    }
    assert_eq!(snapshot.height, BlockHeight::new(2));
    assert_eq!(snapshot.votes.len(), 2);

    // Height 3 is a boundary: its vote would have been the third, but it is ignored.
    let header = sealed_header(&snapshot, &keypairs[2], Some((candidate, true)));
    let (snapshot, change) = snapshot.apply(&header, epoch).unwrap();
    assert_eq!(change, None);
    assert!(snapshot.votes.is_empty());
    assert!(!snapshot.validator_set.contains(&candidate));
}

#[test]
fn rejects_bad_seal_test() {
    use crate::types::data_types::SignatureBytes;

    let epoch = EpochLength::new(100);
    let (genesis, keypairs) = genesis_with(4);
    let mut header = sealed_header(&genesis, &keypairs[0], None);
    header.seal = SignatureBytes::new([1u8; 64]);
    assert!(matches!(
        genesis.apply(&header, epoch),
        Err(SnapshotStoreError::InvalidSeal { .. })
    ));
}
