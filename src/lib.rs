/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A Rust implementation of the Istanbul BFT (IBFT) consensus engine, with a validator set that evolves
//! through membership votes embedded in block headers.
//!
//! A replica agrees with the other validators on one block per height. Agreement on a height proceeds
//! in rounds, each led by a proposer chosen round-robin from the validator set, and tolerates `f`
//! faulty validators out of `3f + 1`. Once a block is agreed, it carries the committed seals of a
//! quorum of validators, and any membership vote it carries is tallied into the validator set history.
//!
//! The library user plugs in:
//! - An [`App`](app::App) that builds and validates block bodies,
//! - A [`Chain`](chain::Chain) that stores agreed blocks, and a [`BlockSync`](chain::BlockSync) that
//!   catches it up with the network,
//! - A [`Network`](networking::network::Network) that carries consensus messages between replicas,
//!   and
//! - A [`KVStore`](snapshot::pluggables::KVStore) that persists the validator set history.
//!
//! and starts a replica through the builder in [`replica`].

pub mod algorithm;

pub mod app;

pub mod chain;

pub mod consensus;

pub mod events;

pub mod logging;

pub mod networking;

pub mod replica;

pub mod snapshot;

pub mod types;

pub(crate) mod event_bus;
