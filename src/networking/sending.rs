/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions and types for sending messages to the P2P network.

use crate::{consensus::messages::ConsensusMessage, snapshot::types::ValidatorSetChange};

use super::network::Network;

/// Handle for broadcasting consensus messages to the [`Network`], and for informing it of validator set
/// changes.
#[derive(Clone)]
pub(crate) struct SenderHandle<N: Network> {
    network: N,
}

impl<N: Network> SenderHandle<N> {
    pub(crate) fn new(network: N) -> Self {
        Self { network }
    }

    pub(crate) fn broadcast(&mut self, msg: ConsensusMessage) {
        self.network.broadcast(msg)
    }

    pub(crate) fn update_validator_set(&mut self, change: ValidatorSetChange) {
        self.network.update_validator_set(change)
    }
}
