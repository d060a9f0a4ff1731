/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Trait definition for pluggable block builders and validators, as well as the request and response
//! types used by the trait's methods.
//!
//! The consensus engine is agnostic about what transactions mean. It calls into an [`App`] whenever
//! this replica is the proposer of a round and needs the body of a new block, and whenever another
//! proposer's block needs to be checked against the application's rules before this replica votes
//! for it.
//!
//! Implementations of `App` must be deterministic: given the same proposal, every honest replica's
//! [`is_valid`](App::is_valid) must return the same verdict.

use crate::types::{block::Header, block::Proposal, data_types::View};

pub trait App: Send + 'static {
    /// Called when this replica is the proposer of `request.view()` and is not locked on an earlier
    /// proposal. The returned body is wrapped in a block on top of `request.parent()` and sealed by
    /// this replica.
    ///
    /// Returning an error makes this replica abstain from proposing in this round.
    fn build_proposal(
        &mut self,
        request: BuildProposalRequest,
    ) -> Result<BuildProposalResponse, BuildProposalError>;

    /// Called when another validator proposes a block in the current round. Returning `false` makes
    /// this replica ask for a round change instead of voting.
    fn is_valid(&mut self, proposal: &Proposal) -> bool;
}

pub struct BuildProposalRequest {
    view: View,
    parent: Header,
}

impl BuildProposalRequest {
    pub(crate) fn new(view: View, parent: Header) -> BuildProposalRequest {
        BuildProposalRequest { view, parent }
    }

    /// The view the block is proposed in. `view().height` is the height of the new block.
    pub fn view(&self) -> View {
        self.view
    }

    /// The header of the current chain head.
    pub fn parent(&self) -> &Header {
        &self.parent
    }
}

pub struct BuildProposalResponse {
    pub timestamp: u64,
    pub transactions: Vec<Vec<u8>>,
}

#[derive(Debug)]
pub enum BuildProposalError {
    /// The application has nothing it is willing to propose right now.
    NotReady,
    /// The application failed while assembling the block body.
    Failed(String),
}
