/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types and traits that are used across multiple components of the consensus engine.
//!
//! Types specific to a single component can be found in that component's own module, e.g.,
//! [`crate::snapshot::types`].

pub mod block;

pub mod crypto_primitives;

pub mod data_types;

pub mod signed_messages;

pub mod validator_set;
