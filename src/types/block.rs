/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the 'block' type, its header, and the seals that certify it.
//!
//! ## Hashing and sealing
//!
//! The hash of a block is the hash of its [`Header`] *excluding* the two seal fields:
//! 1. `seal`: the proposer's signature over the header hash. This authenticates the membership vote
//!    carried in the header.
//! 2. `committed_seals`: the commit signatures of a quorum of validators, attached after agreement.
//!
//! Because neither seal is part of the hash, every validator signs the same digest, and a block can
//! be finalized by attaching seals without changing its identity.

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    crypto_primitives::{self, CryptoHasher, Digest, Keypair, SignatureError, VerifyingKey},
    data_types::{BlockHeight, CryptoHash, SignatureBytes, VerifyingKeyBytes},
    validator_set::ValidatorSet,
};

/// Domain separator prepended to a block hash before it is signed as a committed seal. Keeps a
/// committed seal from ever being mistaken for a header seal.
const COMMITTED_SEAL_PREFIX: [u8; 1] = [2];

/// A membership vote embedded in a header by its proposer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct CandidateVote {
    /// The validator identity being voted on.
    pub candidate: VerifyingKeyBytes,
    /// `true` to add `candidate` to the validator set, `false` to remove it.
    pub authorize: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Header {
    pub number: BlockHeight,
    pub parent_hash: CryptoHash,
    pub proposer: VerifyingKeyBytes,
    pub vote: Option<CandidateVote>,
    pub timestamp: u64,
    pub body_hash: CryptoHash,
    pub seal: SignatureBytes,
    pub committed_seals: Vec<(VerifyingKeyBytes, SignatureBytes)>,
}

impl Header {
    /// Create the header of the genesis block. The genesis header has no proposer and no seals.
    pub fn genesis(timestamp: u64) -> Header {
        Header {
            number: BlockHeight::new(0),
            parent_hash: CryptoHash::default(),
            proposer: [0u8; 32],
            vote: None,
            timestamp,
            body_hash: body_hash(&[]),
            seal: SignatureBytes::new([0u8; 64]),
            committed_seals: Vec::new(),
        }
    }

    /// Compute the hash of the header, leaving out `seal` and `committed_seals`.
    pub fn hash(&self) -> CryptoHash {
        let mut hasher = CryptoHasher::new();
        hasher.update(self.number.to_be_bytes());
        hasher.update(self.parent_hash.bytes());
        hasher.update(self.proposer);
        match &self.vote {
            Some(vote) => {
                hasher.update([1u8]);
                hasher.update(vote.candidate);
                hasher.update([vote.authorize as u8]);
            }
            None => hasher.update([0u8]),
        }
        hasher.update(self.timestamp.to_be_bytes());
        hasher.update(self.body_hash.bytes());
        CryptoHash::new(hasher.finalize().into())
    }

    /// Get the proposer of the header as a verifying key.
    pub fn proposer(&self) -> Result<VerifyingKey, SignatureError> {
        crypto_primitives::verifying_key(&self.proposer)
    }

    /// Check that `seal` is the proposer's signature over the header hash.
    pub fn verify_seal(&self) -> bool {
        match self.proposer() {
            Ok(proposer) => crypto_primitives::verify(&self.hash().bytes(), &self.seal, &proposer),
            Err(_) => false,
        }
    }

    /// Count the committed seals that are valid signatures over this header's hash by distinct members
    /// of `validators`.
    pub fn num_valid_committed_seals(&self, validators: &ValidatorSet) -> usize {
        let hash = self.hash();
        let mut counted: Vec<VerifyingKeyBytes> = Vec::with_capacity(self.committed_seals.len());
        for (signer, seal) in &self.committed_seals {
            if counted.contains(signer) {
                continue;
            }
            let Ok(signer_key) = crypto_primitives::verifying_key(signer) else {
                continue;
            };
            if validators.contains(&signer_key) && verify_committed_seal(&hash, seal, &signer_key) {
                counted.push(*signer);
            }
        }
        counted.len()
    }
}

/// A block: a [`Header`] plus an opaque list of transactions.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Vec<u8>>,
}

impl Block {
    /// Assemble and seal a new block proposed by `proposer`.
    pub fn new(
        number: BlockHeight,
        parent_hash: CryptoHash,
        proposer: &Keypair,
        vote: Option<CandidateVote>,
        timestamp: u64,
        transactions: Vec<Vec<u8>>,
    ) -> Block {
        let mut header = Header {
            number,
            parent_hash,
            proposer: proposer.public().to_bytes(),
            vote,
            timestamp,
            body_hash: body_hash(&transactions),
            seal: SignatureBytes::new([0u8; 64]),
            committed_seals: Vec::new(),
        };
        header.seal = proposer.sign(&header.hash().bytes());

        Block {
            header,
            transactions,
        }
    }

    pub fn hash(&self) -> CryptoHash {
        self.header.hash()
    }

    pub fn height(&self) -> BlockHeight {
        self.header.number
    }

    /// Checks that the body matches `body_hash` and that the header seal is correct.
    pub fn is_correct(&self) -> bool {
        self.header.body_hash == body_hash(&self.transactions) && self.header.verify_seal()
    }
}

/// A candidate block together with its hash, as circulated during agreement on a height.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Proposal {
    pub block: Block,
    pub hash: CryptoHash,
}

impl Proposal {
    pub fn new(block: Block) -> Proposal {
        let hash = block.hash();
        Proposal { block, hash }
    }

    /// Checks that `hash` is really the hash of `block` and that the block is internally correct.
    pub fn is_correct(&self) -> bool {
        self.hash == self.block.hash() && self.block.is_correct()
    }
}

/// Compute the hash of a list of transactions.
pub fn body_hash(transactions: &[Vec<u8>]) -> CryptoHash {
    let mut hasher = CryptoHasher::new();
    hasher.update((transactions.len() as u64).to_be_bytes());
    for transaction in transactions {
        hasher.update((transaction.len() as u64).to_be_bytes());
        hasher.update(transaction);
    }
    CryptoHash::new(hasher.finalize().into())
}

/// The bytes a validator signs to produce a committed seal for the block with `hash`.
pub fn committed_seal_bytes(hash: &CryptoHash) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(COMMITTED_SEAL_PREFIX.len() + 32);
    bytes.extend_from_slice(&COMMITTED_SEAL_PREFIX);
    bytes.extend_from_slice(&hash.bytes());
    bytes
}

/// Produce a committed seal over the block with `hash`.
pub fn sign_committed_seal(keypair: &Keypair, hash: &CryptoHash) -> SignatureBytes {
    keypair.sign(&committed_seal_bytes(hash))
}

/// Check that `seal` is `signer`'s committed seal over the block with `hash`.
pub fn verify_committed_seal(hash: &CryptoHash, seal: &SignatureBytes, signer: &VerifyingKey) -> bool {
    crypto_primitives::verify(&committed_seal_bytes(hash), seal, signer)
}

#[test]
fn seals_are_not_part_of_the_hash_test() {
    use super::crypto_primitives::SigningKey;
    use rand_core::OsRng;

    let mut csprg = OsRng {};
    let proposer = Keypair::new(SigningKey::generate(&mut csprg));
    let validator = Keypair::new(SigningKey::generate(&mut csprg));

    let mut block = Block::new(
        BlockHeight::new(1),
        Header::genesis(0).hash(),
        &proposer,
        Some(CandidateVote {
            candidate: validator.public().to_bytes(),
            authorize: true,
        }),
        1,
        vec![vec![1, 2, 3]],
    );
    assert!(block.is_correct());

    let hash = block.hash();
    let seal = sign_committed_seal(&validator, &hash);
    block
        .header
        .committed_seals
        .push((validator.public().to_bytes(), seal));
    assert_eq!(block.hash(), hash);
    assert!(block.is_correct());

    // A committed seal does not verify as a header seal, and vice versa.
    assert!(!crypto_primitives::verify(&hash.bytes(), &seal, &validator.public()));
    assert!(!verify_committed_seal(&hash, &block.header.seal, &proposer.public()));

    // Tampering with the vote invalidates the header seal.
    block.header.vote = None;
    assert!(!block.is_correct());
}

#[test]
fn committed_seals_count_distinct_members_test() {
    use super::crypto_primitives::SigningKey;
    use rand_core::OsRng;

    let mut csprg = OsRng {};
    let keypairs: Vec<Keypair> = (0..4)
        .map(|_| Keypair::new(SigningKey::generate(&mut csprg)))
        .collect();
    let outsider = Keypair::new(SigningKey::generate(&mut csprg));
    let validators = ValidatorSet::new(keypairs.iter().map(|kp| kp.public())).unwrap();

    let mut block = Block::new(
        BlockHeight::new(1),
        CryptoHash::default(),
        &keypairs[0],
        None,
        1,
        Vec::new(),
    );
    let hash = block.hash();
    for signer in [&keypairs[0], &keypairs[1], &keypairs[1], &outsider] {
        block
            .header
            .committed_seals
            .push((signer.public().to_bytes(), sign_committed_seal(signer, &hash)));
    }
    // A forged seal from a member.
    block
        .header
        .committed_seals
        .push((keypairs[2].public().to_bytes(), SignatureBytes::new([7u8; 64])));

    assert_eq!(block.header.num_valid_committed_seals(&validators), 2);
}
