/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The validator set history of the chain, driven by votes embedded in block headers.
//!
//! Every header may carry one membership vote cast by its proposer. Replaying the votes of the chain
//! in order, starting from the genesis validator set, yields the validator set effective at every
//! height. [`types`] defines the snapshot and the vote rules, [`store`] persists the history with
//! periodic checkpoints, and [`candidates`] queues the votes this replica's operator wants to cast.

pub mod candidates;

pub mod pluggables;

pub mod store;

pub mod types;

pub(crate) mod variables;
