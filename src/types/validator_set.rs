/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The set of validators that agree on a height, and the quorum arithmetic that goes with it.

use borsh::{BorshDeserialize, BorshSerialize};
use std::slice;

use super::{
    crypto_primitives::VerifyingKey,
    data_types::{BlockHeight, Round, VerifyingKeyBytes},
};

/// Stores the identities of the validators that participate in agreeing on a height.
///
/// ## Ordering of validators
///
/// `ValidatorSet` internally maintains the list of validators in ascending order of the bytes of their
/// `VerifyingKey`s. This order is canonical: two replicas that know the same members always hold
/// identical `ValidatorSet`s, irrespective of the order in which the members were learned. Proposer
/// selection ([`proposer`](Self::proposer)) depends on this.
///
/// ## Non-emptiness
///
/// A `ValidatorSet` always contains at least one validator. Constructors return
/// [`ValidatorSetError::Empty`] instead of creating an empty set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatorSet {
    // The verifying keys of validators are included here in ascending order.
    validators: Vec<VerifyingKey>,
}

impl ValidatorSet {
    /// Create a validator set containing `validators`. Duplicates are collapsed.
    pub fn new(
        validators: impl IntoIterator<Item = VerifyingKey>,
    ) -> Result<ValidatorSet, ValidatorSetError> {
        let mut validators: Vec<VerifyingKey> = validators.into_iter().collect();
        validators.sort_by(|a, b| a.to_bytes().cmp(&b.to_bytes()));
        validators.dedup();

        if validators.is_empty() {
            return Err(ValidatorSetError::Empty);
        }

        Ok(Self { validators })
    }

    /// Put `validator` into the validator set, placing it in a position that preserves the
    /// [ordering of validators](Self#ordering-of-validators). Returns whether the validator was newly
    /// inserted.
    pub(crate) fn put(&mut self, validator: &VerifyingKey) -> bool {
        let validator_bytes = validator.to_bytes();
        match self
            .validators
            .binary_search_by(|v| v.to_bytes().cmp(&validator_bytes))
        {
            Ok(_) => false,
            Err(insert_pos) => {
                self.validators.insert(insert_pos, *validator);
                true
            }
        }
    }

    /// Remove `validator` from the validator set.
    ///
    /// # Errors
    ///
    /// Returns [`ValidatorSetError::Empty`] (and leaves the set untouched) if removing `validator`
    /// would leave the set empty.
    pub(crate) fn remove(&mut self, validator: &VerifyingKey) -> Result<bool, ValidatorSetError> {
        if let Some(pos) = self.position(validator) {
            if self.validators.len() == 1 {
                return Err(ValidatorSetError::Empty);
            }
            self.validators.remove(pos);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Get the number of validators in the validator set.
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// The number of distinct validators whose votes certify a decision: `floor(2N/3) + 1`.
    ///
    /// Any two quorums of the same validator set intersect in at least `max_faulty_nodes() + 1`
    /// validators, so they always share at least one honest validator.
    pub fn quorum_size(&self) -> usize {
        (2 * self.len()) / 3 + 1
    }

    /// The largest number of faulty validators the set tolerates: `floor((N - 1) / 3)`.
    pub fn max_faulty_nodes(&self) -> usize {
        (self.len() - 1) / 3
    }

    /// Deterministically select the proposer of (`height`, `round`):
    /// `validators[(height + round) mod N]`.
    pub fn proposer(&self, height: BlockHeight, round: Round) -> &VerifyingKey {
        let n = self.len() as u128;
        let index = (height.int() as u128 + round.int() as u128) % n;
        &self.validators[index as usize]
    }

    /// Check whether the validator set contains `validator`.
    pub fn contains(&self, validator: &VerifyingKey) -> bool {
        self.position(validator).is_some()
    }

    /// Get the index of the given `validator` in the [sorted order](Self#ordering-of-validators) of
    /// `VerifyingKey`s in the validator set, if it is actually in the validator set.
    pub fn position(&self, validator: &VerifyingKey) -> Option<usize> {
        let validator_bytes = validator.to_bytes();
        self.validators
            .binary_search_by(|v| v.to_bytes().cmp(&validator_bytes))
            .ok()
    }

    /// Get the validator at `index` in the sorted order.
    pub fn get(&self, index: usize) -> Option<&VerifyingKey> {
        self.validators.get(index)
    }

    /// Get an iterator through validators' verifying keys which walks through them in ascending order.
    pub fn validators(&self) -> slice::Iter<VerifyingKey> {
        self.validators.iter()
    }
}

/// Intermediate representation of [`ValidatorSet`] for safe serialization and deserialization.
///
/// To serialize an instance of `ValidatorSet`, convert it a `ValidatorSetBytes` using the former type's
/// implementation of `From<&ValidatorSet>`, then, serialize the `ValidatorSetBytes` using Borsh.
/// Reverse the steps to deserialize a `ValidatorSet`.
///
/// ## Rationale
///
/// `ed25519_dalek::VerifyingKey` does not implement the Borsh traits. This type is internally exactly
/// like `ValidatorSet`, but replaces `VerifyingKey` with `VerifyingKeyBytes`, and so is straightforward
/// to serialize and deserialize. Because instances of this type are not guaranteed to contain valid
/// Ed25519 verifying keys (or to be non-empty), conversion into `ValidatorSet` is fallible.
#[derive(Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ValidatorSetBytes {
    // The verifying keys of validators are included here in ascending order.
    validators: Vec<VerifyingKeyBytes>,
}

impl TryFrom<ValidatorSetBytes> for ValidatorSet {
    type Error = ValidatorSetError;

    fn try_from(value: ValidatorSetBytes) -> Result<Self, Self::Error> {
        let validators = value
            .validators
            .iter()
            .map(VerifyingKey::from_bytes)
            .collect::<Result<Vec<VerifyingKey>, _>>()
            .map_err(ValidatorSetError::Ed25519DalekError)?;
        ValidatorSet::new(validators)
    }
}

impl From<&ValidatorSet> for ValidatorSetBytes {
    fn from(value: &ValidatorSet) -> Self {
        ValidatorSetBytes {
            validators: value.validators.iter().map(|pk| pk.to_bytes()).collect(),
        }
    }
}

/// Ways in which a [`ValidatorSet`] cannot be constructed or modified.
#[derive(Debug)]
pub enum ValidatorSetError {
    /// The set would contain no validators. This is always a configuration or replication bug.
    Empty,

    /// A serialized validator identity is not a valid Ed25519 verifying key.
    Ed25519DalekError(ed25519_dalek::SignatureError),
}

#[test]
fn quorum_arithmetic_test() {
    use ed25519_dalek::SigningKey;
    use rand_core::OsRng;

    let mut csprg = OsRng {};
    let expectations = [
        (1, 1, 0),
        (2, 2, 0),
        (3, 3, 0),
        (4, 3, 1),
        (5, 4, 1),
        (6, 5, 1),
        (7, 5, 2),
        (8, 6, 2),
        (9, 7, 2),
        (10, 7, 3),
    ];
    for (n, quorum, faulty) in expectations {
        let validator_set = ValidatorSet::new(
            (0..n).map(|_| SigningKey::generate(&mut csprg).verifying_key()),
        )
        .unwrap();
        assert_eq!(validator_set.len(), n);
        assert_eq!(validator_set.quorum_size(), quorum, "quorum of N = {}", n);
        assert_eq!(validator_set.max_faulty_nodes(), faulty, "faulty of N = {}", n);
        // Two quorums always overlap in more than `faulty` validators.
        assert!(2 * quorum - n > faulty);
    }
}

#[test]
fn canonical_order_and_dedup_test() {
    use ed25519_dalek::SigningKey;
    use rand_core::OsRng;

    let mut csprg = OsRng {};
    let keys: Vec<VerifyingKey> = (0..5)
        .map(|_| SigningKey::generate(&mut csprg).verifying_key())
        .collect();

    let forwards = ValidatorSet::new(keys.clone()).unwrap();
    let mut reversed_with_duplicates = keys.clone();
    reversed_with_duplicates.reverse();
    reversed_with_duplicates.push(keys[2]);
    let backwards = ValidatorSet::new(reversed_with_duplicates).unwrap();

    assert_eq!(forwards, backwards);
    assert_eq!(backwards.len(), 5);
    assert!(forwards
        .validators()
        .zip(forwards.validators().skip(1))
        .all(|(a, b)| a.to_bytes() < b.to_bytes()));
    assert!(matches!(
        ValidatorSet::new(Vec::new()),
        Err(ValidatorSetError::Empty)
    ));
}

#[test]
fn proposer_round_robin_test() {
    use ed25519_dalek::SigningKey;
    use rand_core::OsRng;

    let mut csprg = OsRng {};
    let n = 7;
    let validator_set = ValidatorSet::new(
        (0..n).map(|_| SigningKey::generate(&mut csprg).verifying_key()),
    )
    .unwrap();
    let height = BlockHeight::new(12);

    let first_cycle: Vec<VerifyingKey> = (0..n as u64)
        .map(|r| *validator_set.proposer(height, Round::new(r)))
        .collect();

    // Every validator proposes exactly once per cycle of N rounds.
    for validator in validator_set.validators() {
        assert_eq!(first_cycle.iter().filter(|p| *p == validator).count(), 1);
    }

    // After N rounds the original proposer returns.
    assert_eq!(
        validator_set.proposer(height, Round::new(n as u64)),
        validator_set.proposer(height, Round::new(0))
    );

    // The proposer is `validators[(height + round) mod N]`.
    assert_eq!(
        validator_set.proposer(height, Round::new(1)),
        validator_set.get((12 + 1) % n).unwrap()
    );
}
