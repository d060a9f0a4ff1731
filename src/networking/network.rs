/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use crate::{
    consensus::messages::ConsensusMessage, snapshot::types::ValidatorSetChange,
    types::validator_set::ValidatorSet,
};

pub trait Network: Clone + Send + 'static {
    /// Inform the network provider of the validator set on wake-up.
    fn init_validator_set(&mut self, validator_set: ValidatorSet);

    /// Inform the network provider that votes in a committed block changed the validator set.
    ///
    /// The network provider may, for example, want to connect to a newly admitted validator.
    fn update_validator_set(&mut self, change: ValidatorSetChange);

    /// Send a message to all peers (including listeners) without blocking.
    ///
    /// The engine adds its own messages to its message pool before broadcasting them, so the provider
    /// does not need to deliver a broadcast back to its sender.
    fn broadcast(&mut self, message: ConsensusMessage);

    /// Receive a message from any peer. Returns immediately with a `None` if no message is available
    /// now.
    fn recv(&mut self) -> Option<ConsensusMessage>;
}
