//! Tests for the persistence, reconstruction and pruning of validator set history by [`SnapshotStore`].

use ibft_rs::{
    snapshot::{
        store::{SnapshotStore, SnapshotStoreError},
        types::ValidatorSetChange,
    },
    types::{
        block::{Block, CandidateVote, Header},
        crypto_primitives::{Keypair, SigningKey, VerifyingKey},
        data_types::{BlockHeight, EpochLength},
        validator_set::ValidatorSet,
    },
};
use log::LevelFilter;
use rand_core::OsRng;

mod common;

use crate::common::{
    logging::setup_logger,
    mem_db::{MemDB, CHECKPOINTS, HEADER_RECORDS},
};

const EPOCH_LENGTH: u64 = 5;

#[test]
fn reconstructed_snapshots_match_applied_snapshots_test() {
    setup_logger(LevelFilter::Debug);

    let (keypairs, candidate, genesis_validators) = setup();
    let mut kv_store = MemDB::new();
    let genesis = Header::genesis(0);
    SnapshotStore::initialize(&mut kv_store, &genesis, genesis_validators.clone()).unwrap();
    let store = SnapshotStore::new(kv_store.clone(), EpochLength::new(EPOCH_LENGTH), None).unwrap();

    // Three of the four validators vote to add `candidate` in heights 1 to 3, and the rest of the blocks
    // carry no votes.
    let headers = chain(&genesis, &keypairs, &candidate, 12);
    let mut observed = vec![store.latest()];
    let mut changes = Vec::new();
    for header in &headers {
        if let Some(change) = store.apply_header(header).unwrap() {
            changes.push((header.number, change));
        }
        observed.push(store.latest());
    }

    assert_eq!(
        changes,
        vec![(BlockHeight::new(3), ValidatorSetChange::Added(candidate))]
    );
    assert_eq!(observed[2].validator_set, genesis_validators);
    assert_eq!(observed[2].votes.len(), 2);
    assert!(observed[3].validator_set.contains(&candidate));
    assert!(observed[3].votes.is_empty());

    for (height, snapshot) in observed.iter().enumerate() {
        assert_eq!(
            &store.get_snapshot(BlockHeight::new(height as u64)).unwrap(),
            snapshot,
            "snapshot at height {} differs",
            height
        );
    }

    // A store re-opened on the same key-value store resumes from the latest applied header.
    let reopened =
        SnapshotStore::new(kv_store.clone(), EpochLength::new(EPOCH_LENGTH), None).unwrap();
    assert_eq!(reopened.latest(), store.latest());
    assert_eq!(
        reopened.get_snapshot(BlockHeight::new(4)).unwrap(),
        observed[4]
    );
}

#[test]
fn headers_are_applied_in_order_test() {
    setup_logger(LevelFilter::Debug);

    let (keypairs, candidate, genesis_validators) = setup();
    let mut kv_store = MemDB::new();
    let genesis = Header::genesis(0);
    SnapshotStore::initialize(&mut kv_store, &genesis, genesis_validators).unwrap();
    let store = SnapshotStore::new(kv_store, EpochLength::new(EPOCH_LENGTH), None).unwrap();

    let headers = chain(&genesis, &keypairs, &candidate, 8);
    for header in &headers[0..7] {
        store.apply_header(header).unwrap();
    }

    // Applying the same header again changes nothing.
    let latest = store.latest();
    assert_eq!(store.apply_header(&headers[6]).unwrap(), None);
    assert_eq!(store.apply_header(&headers[2]).unwrap(), None);
    assert_eq!(store.latest(), latest);

    // A different header at an applied height.
    let fork = next_header(&headers[5], &keypairs[1], None, 1_000);
    assert!(matches!(
        store.apply_header(&fork),
        Err(SnapshotStoreError::Divergence { height }) if height == BlockHeight::new(7)
    ));

    // A gap.
    let skipped = next_header(&headers[7], &keypairs[0], None, 9);
    assert!(matches!(
        store.apply_header(&skipped),
        Err(SnapshotStoreError::NotSequential { expected, got })
            if expected == BlockHeight::new(8) && got == BlockHeight::new(9)
    ));

    // A header sealed by a non-validator.
    let outsider = Keypair::new(SigningKey::generate(&mut OsRng {}));
    let unauthorized = next_header(&headers[6], &outsider, None, 8);
    assert!(matches!(
        store.apply_header(&unauthorized),
        Err(SnapshotStoreError::UnauthorizedProposer { .. })
    ));

    assert_eq!(store.latest(), latest);
    store.apply_header(&headers[7]).unwrap();
    assert_eq!(store.latest_height(), BlockHeight::new(8));
}

#[test]
fn pruned_history_is_not_found_test() {
    setup_logger(LevelFilter::Debug);

    let (keypairs, candidate, genesis_validators) = setup();
    let mut kv_store = MemDB::new();
    let genesis = Header::genesis(0);
    SnapshotStore::initialize(&mut kv_store, &genesis, genesis_validators).unwrap();
    let store = SnapshotStore::new(kv_store.clone(), EpochLength::new(EPOCH_LENGTH), None).unwrap();

    let headers = chain(&genesis, &keypairs, &candidate, 12);
    let mut observed = vec![store.latest()];
    for header in &headers {
        store.apply_header(header).unwrap();
        observed.push(store.latest());
    }
    assert_eq!(kv_store.heights(CHECKPOINTS), vec![0, 5, 10]);
    let keys_before = kv_store.len();

    // Keeps the checkpoint at 10, the nearest epoch boundary at or below 11.
    store.prune(BlockHeight::new(11)).unwrap();
    assert!(kv_store.len() < keys_before);
    assert_eq!(kv_store.heights(CHECKPOINTS), vec![10]);
    assert_eq!(kv_store.heights(HEADER_RECORDS), vec![10, 11, 12]);

    for height in [0, 4, 9] {
        assert!(matches!(
            store.get_snapshot(BlockHeight::new(height)),
            Err(SnapshotStoreError::NotFound { .. })
        ));
    }
    for height in [10, 11, 12] {
        assert_eq!(
            store.get_snapshot(BlockHeight::new(height)).unwrap(),
            observed[height as usize]
        );
    }
}

#[test]
fn retained_epochs_prune_automatically_test() {
    setup_logger(LevelFilter::Debug);

    let (keypairs, candidate, genesis_validators) = setup();
    let mut kv_store = MemDB::new();
    let genesis = Header::genesis(0);
    SnapshotStore::initialize(&mut kv_store, &genesis, genesis_validators).unwrap();
    let store = SnapshotStore::new(kv_store, EpochLength::new(EPOCH_LENGTH), Some(1)).unwrap();

    for header in &chain(&genesis, &keypairs, &candidate, 11) {
        store.apply_header(header).unwrap();
    }

    // The checkpoint at 10 pruned everything older than the checkpoint one epoch below it.
    assert!(matches!(
        store.get_snapshot(BlockHeight::new(3)),
        Err(SnapshotStoreError::NotFound { .. })
    ));
    assert_eq!(
        store.get_snapshot(BlockHeight::new(5)).unwrap().height,
        BlockHeight::new(5)
    );
}

#[test]
fn uninitialized_store_cannot_be_opened_test() {
    let result = SnapshotStore::new(MemDB::new(), EpochLength::new(EPOCH_LENGTH), None);
    assert!(matches!(result, Err(SnapshotStoreError::NotInitialized)));
}

// Four validators, sorted so that `keypairs[i]` is validator `i`, and a candidate outside the set.
fn setup() -> (Vec<Keypair>, VerifyingKey, ValidatorSet) {
    let mut csprg = OsRng {};
    let mut keypairs: Vec<Keypair> = (0..4)
        .map(|_| Keypair::new(SigningKey::generate(&mut csprg)))
        .collect();
    keypairs.sort_by(|a, b| a.public().to_bytes().cmp(&b.public().to_bytes()));
    let candidate = SigningKey::generate(&mut csprg).verifying_key();
    let validators = ValidatorSet::new(keypairs.iter().map(|keypair| keypair.public())).unwrap();
    (keypairs, candidate, validators)
}

// Build `len` headers on top of `genesis`, proposed round-robin. The proposers of heights 1 to 3 vote
// to add `candidate`.
fn chain(genesis: &Header, keypairs: &[Keypair], candidate: &VerifyingKey, len: u64) -> Vec<Header> {
    let mut headers: Vec<Header> = Vec::new();
    for height in 1..=len {
        let parent = headers.last().unwrap_or(genesis);
        let vote = (height <= 3).then_some(CandidateVote {
            candidate: candidate.to_bytes(),
            authorize: true,
        });
        let proposer = &keypairs[(height as usize) % keypairs.len()];
        let header = next_header(parent, proposer, vote, height);
        headers.push(header);
    }
    headers
}

fn next_header(
    parent: &Header,
    proposer: &Keypair,
    vote: Option<CandidateVote>,
    timestamp: u64,
) -> Header {
    Block::new(
        parent.number + 1,
        parent.hash(),
        proposer,
        vote,
        timestamp,
        Vec::new(),
    )
    .header
}
