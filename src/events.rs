/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of the events the engine publishes, for event handling and logging.
//!
//! An event for a given action is published after the action has been completed. Every event carries
//! the time at which it was published.

use std::sync::mpsc::Sender;
use std::time::{Duration, SystemTime};

use crate::{
    consensus::messages::MessageType,
    snapshot::types::ValidatorSetChange,
    types::{
        block::{Block, Proposal},
        crypto_primitives::VerifyingKey,
        data_types::{BlockHeight, CryptoHash, View},
        validator_set::ValidatorSet,
    },
};

pub enum Event {
    // Events that change the chain or the validator set.
    InsertBlock(InsertBlockEvent),
    UpdateValidatorSet(UpdateValidatorSetEvent),
    Lock(LockEvent),
    // Events that involve broadcasting a consensus message.
    Propose(ProposeEvent),
    Prepare(PrepareEvent),
    Commit(CommitEvent),
    RoundChange(RoundChangeEvent),
    // Events that involve receiving a consensus message.
    ReceiveMessage(ReceiveMessageEvent),
    // Progress events.
    StartHeight(StartHeightEvent),
    StartRound(StartRoundEvent),
    RoundTimeout(RoundTimeoutEvent),
    // Sync events.
    StartSync(StartSyncEvent),
    EndSync(EndSyncEvent),
}

impl Event {
    pub(crate) fn publish(event_publisher: &Option<Sender<Event>>, event: Event) {
        if let Some(event_publisher) = event_publisher {
            // The event bus only goes away during shutdown.
            let _ = event_publisher.send(event);
        }
    }
}

pub struct InsertBlockEvent {
    pub timestamp: SystemTime,
    pub block: Block,
}

pub struct UpdateValidatorSetEvent {
    pub timestamp: SystemTime,
    pub cause_block: CryptoHash,
    pub change: ValidatorSetChange,
}

pub struct LockEvent {
    pub timestamp: SystemTime,
    pub view: View,
    pub block: CryptoHash,
}

pub struct ProposeEvent {
    pub timestamp: SystemTime,
    pub view: View,
    pub proposal: Proposal,
}

pub struct PrepareEvent {
    pub timestamp: SystemTime,
    pub view: View,
    pub digest: CryptoHash,
}

pub struct CommitEvent {
    pub timestamp: SystemTime,
    pub view: View,
    pub digest: CryptoHash,
}

pub struct RoundChangeEvent {
    pub timestamp: SystemTime,
    pub view: View,
}

pub struct ReceiveMessageEvent {
    pub timestamp: SystemTime,
    pub origin: VerifyingKey,
    pub view: View,
    pub msg_type: MessageType,
}

pub struct StartHeightEvent {
    pub timestamp: SystemTime,
    pub height: BlockHeight,
    pub validators: ValidatorSet,
}

pub struct StartRoundEvent {
    pub timestamp: SystemTime,
    pub view: View,
    pub proposer: VerifyingKey,
}

pub struct RoundTimeoutEvent {
    pub timestamp: SystemTime,
    pub view: View,
    pub timeout: Duration,
}

pub struct StartSyncEvent {
    pub timestamp: SystemTime,
    pub height: BlockHeight,
}

pub struct EndSyncEvent {
    pub timestamp: SystemTime,
    pub blocks_synced: u64,
}
