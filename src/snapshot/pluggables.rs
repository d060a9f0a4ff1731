/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Traits for pluggable snapshot persistence.
//!
//! The library user provides a key-value store by implementing [`KVStore`]. The snapshot store only
//! ever writes through atomic [`WriteBatch`]es, and reads typed values through the provided methods of
//! [`KVGet`], which are defined in terms of the single required method [`KVGet::get`].

use std::fmt::Display;

use borsh::BorshDeserialize;

use crate::types::{
    block::Header,
    data_types::BlockHeight,
};

use super::{
    types::{Snapshot, SnapshotBytes},
    variables::{self, checkpoint_key, header_record_key},
};

pub trait KVStore: KVGet + Clone + Send + Sync + 'static {
    type WriteBatch: WriteBatch;

    /// Atomically apply every insertion and deletion in `wb`.
    fn write(&mut self, wb: Self::WriteBatch);
}

pub trait KVGet {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /* ↓↓↓ Checkpoints ↓↓↓ */

    fn checkpoint(&self, height: BlockHeight) -> Result<Option<Snapshot>, KVGetError> {
        let Some(bytes) = self.get(&checkpoint_key(height)) else {
            return Ok(None);
        };
        let snapshot_bytes = SnapshotBytes::deserialize(&mut &*bytes).map_err(|err| {
            KVGetError::DeserializeValueError {
                key: Key::Checkpoint { height },
                source: err,
            }
        })?;
        let snapshot = Snapshot::try_from(snapshot_bytes).map_err(|err| {
            KVGetError::ValidatorSetError {
                key: Key::Checkpoint { height },
                source: err,
            }
        })?;
        Ok(Some(snapshot))
    }

    /* ↓↓↓ Header records ↓↓↓ */

    fn header_record(&self, height: BlockHeight) -> Result<Option<Header>, KVGetError> {
        if let Some(bytes) = self.get(&header_record_key(height)) {
            Ok(Some(Header::deserialize(&mut &*bytes).map_err(|err| {
                KVGetError::DeserializeValueError {
                    key: Key::HeaderRecord { height },
                    source: err,
                }
            })?))
        } else {
            Ok(None)
        }
    }

    /* ↓↓↓ Latest and oldest height ↓↓↓ */

    fn latest_height(&self) -> Result<Option<BlockHeight>, KVGetError> {
        if let Some(bytes) = self.get(&variables::LATEST_HEIGHT) {
            Ok(Some(BlockHeight::deserialize(&mut &*bytes).map_err(
                |err| KVGetError::DeserializeValueError {
                    key: Key::LatestHeight,
                    source: err,
                },
            )?))
        } else {
            Ok(None)
        }
    }

    fn oldest_height(&self) -> Result<BlockHeight, KVGetError> {
        BlockHeight::deserialize(
            &mut &*self
                .get(&variables::OLDEST_HEIGHT)
                .ok_or(KVGetError::ValueExpectedButNotFound {
                    key: Key::OldestHeight,
                })?,
        )
        .map_err(|err| KVGetError::DeserializeValueError {
            key: Key::OldestHeight,
            source: err,
        })
    }
}

/// Error when trying to read a value corresponding to a given key from the [key value store][KVStore].
/// The error may arise in the following circumstances:
/// 1. The value corresponding to a given key cannot be deserialized into its expected type,
/// 2. The value corresponding to a given key cannot be found,
/// 3. A stored validator set is not a valid validator set.
#[derive(Debug)]
pub enum KVGetError {
    DeserializeValueError {
        key: Key,
        source: std::io::Error,
    },
    ValueExpectedButNotFound {
        key: Key,
    },
    ValidatorSetError {
        key: Key,
        source: crate::types::validator_set::ValidatorSetError,
    },
}

#[derive(Debug)]
pub enum Key {
    Checkpoint { height: BlockHeight },
    HeaderRecord { height: BlockHeight },
    LatestHeight,
    OldestHeight,
}

impl Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self {
            &Key::Checkpoint { height } => write!(f, "Checkpoint at height {}", height),
            &Key::HeaderRecord { height } => write!(f, "Header record at height {}", height),
            &Key::LatestHeight => write!(f, "Latest Height"),
            &Key::OldestHeight => write!(f, "Oldest Height"),
        }
    }
}

pub trait WriteBatch {
    fn new() -> Self;
    fn set(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
}
