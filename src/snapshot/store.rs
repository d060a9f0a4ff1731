/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Versioned history of validator set snapshots, persisted in a pluggable key-value store.
//!
//! ## Checkpoints and replay
//!
//! The store keeps the snapshot after the latest applied header in memory. In the key-value store it
//! persists:
//! 1. A full **checkpoint** snapshot at genesis and at every epoch boundary, and
//! 2. A **header record** for every applied header.
//!
//! [`get_snapshot`](SnapshotStore::get_snapshot) reconstructs the snapshot at an arbitrary height by
//! loading the nearest checkpoint at or below that height and replaying the header records above it.
//! Replaying is deterministic, so the reconstructed snapshot is identical to the one observed when the
//! header was first applied.
//!
//! ## Pruning
//!
//! History older than the newest checkpoint at or below a given height can be deleted with
//! [`prune`](SnapshotStore::prune). Snapshots below the oldest retained checkpoint are then
//! [`NotFound`](SnapshotStoreError::NotFound). If the store is configured with a number of retained
//! epochs, it prunes automatically whenever it writes a checkpoint.
//!
//! ## Concurrency
//!
//! `SnapshotStore` is a cheaply clonable handle. All clones share the same in-memory snapshot and
//! key-value store behind a read-write lock, so a reader never observes a half-applied header.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use borsh::BorshSerialize;

use crate::types::{
    block::Header,
    data_types::{BlockHeight, EpochLength},
    validator_set::{ValidatorSet, ValidatorSetError},
};

use super::{
    pluggables::{KVGet, KVGetError, KVStore, WriteBatch},
    types::{Snapshot, SnapshotBytes, ValidatorSetChange},
    variables::{self, checkpoint_key, header_record_key},
};

#[derive(Clone)]
pub struct SnapshotStore<K: KVStore> {
    inner: Arc<RwLock<StoreState<K>>>,
    epoch_length: EpochLength,
    retained_epochs: Option<u64>,
}

struct StoreState<K: KVStore> {
    kv_store: K,
    latest: Snapshot,
}

impl<K: KVStore> SnapshotStore<K> {
    /// Write the genesis checkpoint into `kv_store`. Does nothing if `kv_store` was already
    /// initialized.
    pub fn initialize(
        kv_store: &mut K,
        genesis_header: &Header,
        genesis_validators: ValidatorSet,
    ) -> Result<(), SnapshotStoreError> {
        if kv_store.latest_height()?.is_some() {
            return Ok(());
        }

        let genesis = Snapshot::genesis(genesis_header, genesis_validators);
        let mut wb = K::WriteBatch::new();
        set_checkpoint(&mut wb, &genesis);
        set_header_record(&mut wb, genesis_header);
        wb.set(&variables::LATEST_HEIGHT, &serialize(&genesis.height));
        wb.set(&variables::OLDEST_HEIGHT, &serialize(&genesis.height));
        kv_store.write(wb);

        log::debug!(
            "Initialized the snapshot store with {} genesis validators.",
            genesis.validator_set.len()
        );
        Ok(())
    }

    /// Open the snapshot store persisted in `kv_store`, which must have been
    /// [initialized](Self::initialize).
    pub fn new(
        kv_store: K,
        epoch_length: EpochLength,
        retained_epochs: Option<u64>,
    ) -> Result<SnapshotStore<K>, SnapshotStoreError> {
        let latest_height = kv_store
            .latest_height()?
            .ok_or(SnapshotStoreError::NotInitialized)?;
        let latest = reconstruct(&kv_store, epoch_length, latest_height)?;

        Ok(SnapshotStore {
            inner: Arc::new(RwLock::new(StoreState { kv_store, latest })),
            epoch_length,
            retained_epochs,
        })
    }

    /// Get the snapshot after the most recently applied header.
    pub fn latest(&self) -> Snapshot {
        self.read().latest.clone()
    }

    pub fn latest_height(&self) -> BlockHeight {
        self.read().latest.height
    }

    /// Get the snapshot effective at `height`: the snapshot after the header at `height`, or the latest
    /// snapshot if `height` is above the latest applied header.
    ///
    /// # Errors
    ///
    /// [`NotFound`](SnapshotStoreError::NotFound) if the checkpoint needed to reconstruct the snapshot
    /// has been pruned.
    pub fn get_snapshot(&self, height: BlockHeight) -> Result<Snapshot, SnapshotStoreError> {
        let state = self.read();
        if height >= state.latest.height {
            return Ok(state.latest.clone());
        }
        reconstruct(&state.kv_store, self.epoch_length, height)
    }

    /// Apply `header`, the next header of the chain, and persist the resulting snapshot.
    ///
    /// Re-applying the header at an already applied height is a no-op if the header hash matches the
    /// recorded one.
    ///
    /// # Errors
    ///
    /// Every error other than [`KVGetError`](SnapshotStoreError::KVGetError) means the chain and the
    /// snapshot history disagree, which is not recoverable.
    pub fn apply_header(
        &self,
        header: &Header,
    ) -> Result<Option<ValidatorSetChange>, SnapshotStoreError> {
        let mut state = self.write();
        let height = header.number;
        let latest_height = state.latest.height;

        if height <= latest_height {
            let recorded = if height == latest_height {
                Some(state.latest.hash)
            } else {
                state.kv_store.header_record(height)?.map(|h| h.hash())
            };
            return match recorded {
                Some(hash) if hash == header.hash() => Ok(None),
                Some(_) => Err(SnapshotStoreError::Divergence { height }),
                None => Err(SnapshotStoreError::NotFound { height }),
            };
        }
        if height != latest_height + 1 {
            return Err(SnapshotStoreError::NotSequential {
                expected: latest_height + 1,
                got: height,
            });
        }

        let (next, change) = state.latest.apply(header, self.epoch_length)?;

        let mut wb = K::WriteBatch::new();
        set_header_record(&mut wb, header);
        wb.set(&variables::LATEST_HEIGHT, &serialize(&height));
        let is_boundary = self.epoch_length.is_boundary(height);
        if is_boundary {
            set_checkpoint(&mut wb, &next);
        }
        state.kv_store.write(wb);
        state.latest = next;

        if let Some(change) = &change {
            log::debug!("Validator set changed at height {}: {:?}", height, change);
        }

        if is_boundary {
            if let Some(retained_epochs) = self.retained_epochs {
                let retained = retained_epochs.saturating_mul(self.epoch_length.int());
                if let Some(below) = height.int().checked_sub(retained) {
                    prune(&mut state, self.epoch_length, BlockHeight::new(below))?;
                }
            }
        }

        Ok(change)
    }

    /// Delete the checkpoints and header records older than the newest checkpoint at or below
    /// `below`. Snapshots at or above that checkpoint can still be reconstructed.
    pub fn prune(&self, below: BlockHeight) -> Result<(), SnapshotStoreError> {
        let mut state = self.write();
        prune(&mut state, self.epoch_length, below)
    }

    fn read(&self) -> RwLockReadGuard<StoreState<K>> {
        self.inner.read().unwrap()
    }

    fn write(&self) -> RwLockWriteGuard<StoreState<K>> {
        self.inner.write().unwrap()
    }
}

// Rebuild the snapshot at `height` from the nearest checkpoint at or below it.
fn reconstruct<K: KVGet>(
    kv_store: &K,
    epoch_length: EpochLength,
    height: BlockHeight,
) -> Result<Snapshot, SnapshotStoreError> {
    let from = epoch_length.boundary_at_or_below(height);
    let mut snapshot = kv_store
        .checkpoint(from)?
        .ok_or(SnapshotStoreError::NotFound { height })?;

    let mut cursor = from;
    while cursor < height {
        cursor += 1;
        let header = kv_store
            .header_record(cursor)?
            .ok_or(SnapshotStoreError::MissingHeader { height: cursor })?;
        let (next, _) = snapshot.apply(&header, epoch_length)?;
        snapshot = next;
    }
    Ok(snapshot)
}

fn prune<K: KVStore>(
    state: &mut StoreState<K>,
    epoch_length: EpochLength,
    below: BlockHeight,
) -> Result<(), SnapshotStoreError> {
    let below = below.min(state.latest.height);
    let keep_from = epoch_length.boundary_at_or_below(below);
    let oldest = state.kv_store.oldest_height()?;
    if keep_from <= oldest {
        return Ok(());
    }

    let mut wb = K::WriteBatch::new();
    let mut height = oldest;
    while height < keep_from {
        wb.delete(&header_record_key(height));
        if epoch_length.is_boundary(height) {
            wb.delete(&checkpoint_key(height));
        }
        height += 1;
    }
    wb.set(&variables::OLDEST_HEIGHT, &serialize(&keep_from));
    state.kv_store.write(wb);

    log::debug!("Pruned snapshot history below height {}.", keep_from);
    Ok(())
}

fn set_checkpoint<W: WriteBatch>(wb: &mut W, snapshot: &Snapshot) {
    wb.set(
        &checkpoint_key(snapshot.height),
        &serialize(&SnapshotBytes::from(snapshot)),
    );
}

fn set_header_record<W: WriteBatch>(wb: &mut W, header: &Header) {
    wb.set(&header_record_key(header.number), &serialize(header));
}

fn serialize<T: BorshSerialize>(value: &T) -> Vec<u8> {
    // Serializing into a `Vec` cannot fail.
    value.try_to_vec().unwrap_or_default()
}

/// Ways in which reading or updating the snapshot history can fail.
#[derive(Debug)]
pub enum SnapshotStoreError {
    KVGetError(KVGetError),
    /// The key-value store has never been initialized with a genesis snapshot.
    NotInitialized,
    /// The snapshot at `height` cannot be reconstructed because its checkpoint was pruned.
    NotFound { height: BlockHeight },
    /// A header was applied out of order.
    NotSequential {
        expected: BlockHeight,
        got: BlockHeight,
    },
    /// A different header was already applied at `height`.
    Divergence { height: BlockHeight },
    /// The proposer of the header at `height` is not a validator.
    UnauthorizedProposer { height: BlockHeight },
    /// The seal of the header at `height` does not verify.
    InvalidSeal { height: BlockHeight },
    /// The votes in the header at `height` would remove the last validator.
    EmptyValidatorSet { height: BlockHeight },
    /// A header record needed for replay is missing.
    MissingHeader { height: BlockHeight },
    ValidatorSetError(ValidatorSetError),
}

impl From<KVGetError> for SnapshotStoreError {
    fn from(value: KVGetError) -> Self {
        SnapshotStoreError::KVGetError(value)
    }
}

impl From<ValidatorSetError> for SnapshotStoreError {
    fn from(value: ValidatorSetError) -> Self {
        SnapshotStoreError::ValidatorSetError(value)
    }
}
