/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Istanbul BFT agreement on a single height.
//!
//! Validators agree on the block at each height in a sequence of rounds. In every round the
//! [proposer](crate::types::validator_set::ValidatorSet::proposer) broadcasts a candidate block, and
//! the validators certify it with two rounds of voting (`Prepare`, then `Commit`). If a round fails,
//! the validators agree to move to a later round with a new proposer. With `N = 3f + 1` validators
//! agreement tolerates `f` faulty validators, because any two quorums of `floor(2N/3) + 1` validators
//! share at least one honest validator.
//!
//! This module is split into:
//! - [`messages`]: the signed messages validators exchange.
//! - [`message_pool`]: the per-round store that counts distinct senders.
//! - [`state_machine`]: the pure transition function that drives a height.
//! - [`timeouts`]: the exponential round timer.

pub mod message_pool;

pub mod messages;

pub mod state_machine;

pub mod timeouts;
