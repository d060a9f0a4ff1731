/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Byte-prefixes that specify where each snapshot store variable is stored in the user-provided
//! key-value store.
//!
//! |Variable|Key|Value|
//! |---|---|---|
//! |Checkpoints|`CHECKPOINTS ++ height.to_be_bytes()`|Borsh-serialized full [`Snapshot`](super::types::Snapshot) at `height`. Written at genesis and at every epoch boundary.|
//! |Header records|`HEADER_RECORDS ++ height.to_be_bytes()`|Borsh-serialized [`Header`](crate::types::block::Header) applied at `height`. Replayed on top of a checkpoint to reconstruct a snapshot.|
//! |Latest height|`LATEST_HEIGHT`|The height of the last applied header.|
//! |Oldest height|`OLDEST_HEIGHT`|The height of the oldest checkpoint that has not been pruned.|

use crate::types::data_types::BlockHeight;

pub const CHECKPOINTS: [u8; 1] = [0];
pub const HEADER_RECORDS: [u8; 1] = [1];
pub const LATEST_HEIGHT: [u8; 1] = [2];
pub const OLDEST_HEIGHT: [u8; 1] = [3];

/// Concatenate two byteslices into one vector.
pub fn concat(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut res = Vec::with_capacity(a.len() + b.len());
    res.extend_from_slice(a);
    res.extend_from_slice(b);
    res
}

pub fn checkpoint_key(height: BlockHeight) -> Vec<u8> {
    concat(&CHECKPOINTS, &height.to_be_bytes())
}

pub fn header_record_key(height: BlockHeight) -> Vec<u8> {
    concat(&HEADER_RECORDS, &height.to_be_bytes())
}
