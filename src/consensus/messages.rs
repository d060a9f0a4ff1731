/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Messages exchanged by validators while agreeing on a height.
//!
//! Every message is about a single [`View`], is sent by a single validator, and is signed by that
//! validator over the Borsh serialization of `(from, view, payload)`. There are four kinds of message:
//!
//! |Type|Payload|Sent when|
//! |---|---|---|
//! |`Preprepare`|The proposed block|The round's proposer has a candidate block.|
//! |`Prepare`|Digest of the proposal|A validator accepted the round's proposal.|
//! |`Commit`|Digest of the proposal + committed seal|A validator saw a prepare quorum and locked the proposal.|
//! |`RoundChange`|None|A validator wants to move to the message's round.|

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    block::{self, Proposal},
    crypto_primitives::{self, Keypair, SignatureError, VerifyingKey},
    data_types::{CryptoHash, SignatureBytes, VerifyingKeyBytes, View},
    signed_messages::SignedMessage,
};

/// The kind of a [`ConsensusMessage`]. Messages are stored by the
/// [message pool](super::message_pool::MessagePool) in buckets keyed by round and `MessageType`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MessageType {
    Preprepare,
    Prepare,
    Commit,
    RoundChange,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum Payload {
    Preprepare(Proposal),
    Prepare(CryptoHash),
    Commit(CryptoHash, SignatureBytes),
    RoundChange,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ConsensusMessage {
    pub from: VerifyingKeyBytes,
    pub view: View,
    pub payload: Payload,
    pub signature: SignatureBytes,
}

impl ConsensusMessage {
    /// Create a message about `view` carrying `payload`, signed by `keypair`.
    pub fn new(keypair: &Keypair, view: View, payload: Payload) -> ConsensusMessage {
        let from = keypair.public().to_bytes();
        let signature = keypair.sign(&Self::signed_bytes(&from, &view, &payload));
        ConsensusMessage {
            from,
            view,
            payload,
            signature,
        }
    }

    /// Create a `Preprepare` message for `proposal`.
    pub fn preprepare(keypair: &Keypair, view: View, proposal: Proposal) -> ConsensusMessage {
        Self::new(keypair, view, Payload::Preprepare(proposal))
    }

    /// Create a `Prepare` message for the proposal with hash `digest`.
    pub fn prepare(keypair: &Keypair, view: View, digest: CryptoHash) -> ConsensusMessage {
        Self::new(keypair, view, Payload::Prepare(digest))
    }

    /// Create a `Commit` message for the proposal with hash `digest`, including a committed seal
    /// over the digest.
    pub fn commit(keypair: &Keypair, view: View, digest: CryptoHash) -> ConsensusMessage {
        let seal = block::sign_committed_seal(keypair, &digest);
        Self::new(keypair, view, Payload::Commit(digest, seal))
    }

    /// Create a `RoundChange` message expressing the wish to move to `view.round`.
    pub fn round_change(keypair: &Keypair, view: View) -> ConsensusMessage {
        Self::new(keypair, view, Payload::RoundChange)
    }

    pub fn msg_type(&self) -> MessageType {
        match self.payload {
            Payload::Preprepare(_) => MessageType::Preprepare,
            Payload::Prepare(_) => MessageType::Prepare,
            Payload::Commit(_, _) => MessageType::Commit,
            Payload::RoundChange => MessageType::RoundChange,
        }
    }

    /// Get the proposal digest this message is about. `RoundChange` messages are not about a
    /// proposal.
    pub fn digest(&self) -> Option<CryptoHash> {
        match &self.payload {
            Payload::Preprepare(proposal) => Some(proposal.hash),
            Payload::Prepare(digest) | Payload::Commit(digest, _) => Some(*digest),
            Payload::RoundChange => None,
        }
    }

    /// Get the sender as a verifying key.
    pub fn sender(&self) -> Result<VerifyingKey, SignatureError> {
        crypto_primitives::verifying_key(&self.from)
    }

    /// Check that a `Commit` message's committed seal was produced by its sender over its digest.
    /// Always true for the other message types.
    pub fn is_seal_correct(&self, sender: &VerifyingKey) -> bool {
        match &self.payload {
            Payload::Commit(digest, seal) => block::verify_committed_seal(digest, seal, sender),
            _ => true,
        }
    }

    fn signed_bytes(from: &VerifyingKeyBytes, view: &View, payload: &Payload) -> Vec<u8> {
        let mut bytes = from.to_vec();
        // Writing into a `Vec` cannot fail.
        let _ = view.serialize(&mut bytes);
        let _ = payload.serialize(&mut bytes);
        bytes
    }
}

impl SignedMessage for ConsensusMessage {
    fn message_bytes(&self) -> Vec<u8> {
        Self::signed_bytes(&self.from, &self.view, &self.payload)
    }

    fn signature_bytes(&self) -> SignatureBytes {
        self.signature
    }
}

#[test]
fn signature_covers_view_and_payload_test() {
    use crate::types::{
        crypto_primitives::SigningKey,
        data_types::{BlockHeight, Round},
    };
    use rand_core::OsRng;

    let mut csprg = OsRng {};
    let keypair = Keypair::new(SigningKey::generate(&mut csprg));
    let view = View::new(BlockHeight::new(3), Round::new(1));

    let commit = ConsensusMessage::commit(&keypair, view, CryptoHash::new([9u8; 32]));
    assert_eq!(commit.msg_type(), MessageType::Commit);
    assert!(commit.is_correct(&keypair.public()));
    assert!(commit.is_seal_correct(&keypair.public()));

    let mut moved = commit.clone();
    moved.view.round = Round::new(2);
    assert!(!moved.is_correct(&keypair.public()));

    let mut retargeted = ConsensusMessage::prepare(&keypair, view, CryptoHash::new([9u8; 32]));
    retargeted.payload = Payload::Prepare(CryptoHash::new([8u8; 32]));
    assert!(!retargeted.is_correct(&keypair.public()));

    let round_change = ConsensusMessage::round_change(&keypair, view);
    assert_eq!(round_change.digest(), None);
    assert!(round_change.is_correct(&keypair.public()));
}
