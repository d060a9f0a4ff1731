//! A volatile, in-memory [`KVStore`] that keeps its keys in order, so that tests can inspect which
//! heights the snapshot store still holds records for.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use ibft_rs::snapshot::pluggables::{KVGet, KVStore, WriteBatch};

/// Key prefix of snapshot checkpoints.
pub(crate) const CHECKPOINTS: u8 = 0;

/// Key prefix of header records.
pub(crate) const HEADER_RECORDS: u8 = 1;

#[derive(Clone)]
pub(crate) struct MemDB(Arc<Mutex<BTreeMap<Vec<u8>, Vec<u8>>>>);

impl MemDB {
    pub(crate) fn new() -> MemDB {
        MemDB(Arc::new(Mutex::new(BTreeMap::new())))
    }

    /// Number of keys currently stored.
    pub(crate) fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    /// Heights, in ascending order, of the values stored under `prefix ++ height.to_be_bytes()`.
    pub(crate) fn heights(&self, prefix: u8) -> Vec<u64> {
        self.0
            .lock()
            .unwrap()
            .range(vec![prefix]..vec![prefix + 1])
            .filter_map(|(key, _)| key[1..].try_into().ok().map(u64::from_be_bytes))
            .collect()
    }
}

impl KVStore for MemDB {
    type WriteBatch = MemWriteBatch;

    fn write(&mut self, wb: Self::WriteBatch) {
        let mut map = self.0.lock().unwrap();
        for op in wb.0 {
            match op {
                Op::Set(key, value) => map.insert(key, value),
                Op::Delete(key) => map.remove(&key),
            };
        }
    }
}

impl KVGet for MemDB {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.0.lock().unwrap().get(key).cloned()
    }
}

enum Op {
    Set(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// Records operations in order and replays them on write, so a later operation on a key wins.
pub(crate) struct MemWriteBatch(Vec<Op>);

impl WriteBatch for MemWriteBatch {
    fn new() -> Self {
        MemWriteBatch(Vec::new())
    }

    fn set(&mut self, key: &[u8], value: &[u8]) {
        self.0.push(Op::Set(key.to_vec(), value.to_vec()));
    }

    fn delete(&mut self, key: &[u8]) {
        self.0.push(Op::Delete(key.to_vec()));
    }
}
