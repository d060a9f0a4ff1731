use std::{
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use ibft_rs::{
    consensus::state_machine::Phase,
    types::{
        crypto_primitives::SigningKey, data_types::BlockHeight, validator_set::ValidatorSet,
    },
};
use log::LevelFilter;
use rand_core::OsRng;

mod common;

use crate::common::{logging::setup_logger, network::mock_network, node::Node};

#[test]
fn basic_consensus_and_validator_set_update_test() {
    setup_logger(LevelFilter::Debug);

    // 1. Initialize test components.

    // 1.1. Create signing keys for 3 replicas.
    let mut csprg = OsRng {};
    let keypairs: Vec<SigningKey> = (0..3).map(|_| SigningKey::generate(&mut csprg)).collect();

    // 1.2. Create a mock network connecting the 3 replicas.
    let network_stubs = mock_network(keypairs.iter().map(|kp| kp.verifying_key()));

    // 1.3. Initialize the validator set of the cluster to initially contain only the replica with index 0.
    let genesis_validators = ValidatorSet::new([keypairs[0].verifying_key()]).unwrap();

    // 1.4. Simultaneously start all replicas. Replicas 1 and 2 follow the chain as listeners.
    let peers = Arc::new(Mutex::new(Vec::new()));
    let nodes: Vec<Node> = keypairs
        .into_iter()
        .zip(network_stubs)
        .map(|(keypair, network)| {
            Node::new(keypair, network, genesis_validators.clone(), peers.clone())
        })
        .collect();

    // 2. Test agreement with a singleton validator.

    // 2.1. Submit an increment to the initial validator.
    log::debug!("Submitting an increment to the initial validator.");
    nodes[0].submit_transaction(1);

    // 2.2. Poll the counter of every replica until the value is 1.
    log::debug!("Polling the counter of every replica until the value is 1.");
    while nodes.iter().any(|node| node.number() != 1) {
        thread::sleep(Duration::from_millis(500));
    }
    assert_eq!(nodes[1].status().phase, Phase::Sync);

    // 3. Test dynamically expanding the validator set.

    // 3.1. The only validator is a quorum on its own, so its vote adds replica 1.
    log::debug!("Voting to add replica 1 to the validator set.");
    let node_1 = nodes[1].verifying_key();
    nodes[0].propose_candidate(node_1, true).unwrap();

    // 3.2. Poll the validator set of every replica until we have 2 validators.
    log::debug!("Polling the validator set of every replica until we have 2 validators.");
    while nodes.iter().any(|node| node.validator_set().len() != 2) {
        thread::sleep(Duration::from_millis(500));
    }

    // 3.3. Adding replica 2 to a set of 2 needs the votes of both validators.
    log::debug!("Voting to add replica 2 to the validator set.");
    let node_2 = nodes[2].verifying_key();
    nodes[0].propose_candidate(node_2, true).unwrap();
    nodes[1].propose_candidate(node_2, true).unwrap();

    // 3.4. Poll the validator set of every replica until we have 3 validators.
    log::debug!("Polling the validator set of every replica until we have 3 validators.");
    while nodes.iter().any(|node| node.validator_set().len() != 3) {
        thread::sleep(Duration::from_millis(500));
    }

    // 4. Test agreement now that we have 3 validators.

    // 4.1. Submit an increment to each of the 3 validators we have now.
    log::debug!("Submitting an increment to each of the 3 validators we have now.");
    for node in &nodes {
        node.submit_transaction(1);
    }

    // 4.2. Poll the counter of every replica until the value is 4.
    log::debug!("Polling the counter of every replica until the value is 4.");
    while nodes.iter().any(|node| node.number() != 4) {
        thread::sleep(Duration::from_millis(500));
    }

    // 5. Every replica holds the same history.
    let genesis_snapshot = nodes[2].replica().snapshot(BlockHeight::new(0)).unwrap();
    assert_eq!(genesis_snapshot.validator_set, genesis_validators);
    for node in &nodes {
        assert_eq!(
            node.replica().snapshot(BlockHeight::new(1)).unwrap(),
            nodes[0].replica().snapshot(BlockHeight::new(1)).unwrap()
        );
    }
}

#[test]
fn crashed_validator_is_voted_out_test() {
    setup_logger(LevelFilter::Debug);

    // 1. Initialize test components.

    // 1.1. Create signing keys for 4 replicas.
    let mut csprg = OsRng {};
    let keypairs: Vec<SigningKey> = (0..4).map(|_| SigningKey::generate(&mut csprg)).collect();
    let crashed = keypairs[3].verifying_key();

    // 1.2. Create a mock network connecting the 4 replicas.
    let network_stubs = mock_network(keypairs.iter().map(|kp| kp.verifying_key()));

    // 1.3. All 4 replicas are genesis validators.
    let genesis_validators =
        ValidatorSet::new(keypairs.iter().map(|kp| kp.verifying_key())).unwrap();

    // 1.4. Start every replica except the last one, which never responds.
    let peers = Arc::new(Mutex::new(Vec::new()));
    let nodes: Vec<Node> = keypairs
        .into_iter()
        .zip(network_stubs)
        .take(3)
        .map(|(keypair, network)| {
            Node::new(keypair, network, genesis_validators.clone(), peers.clone())
        })
        .collect();

    // 2. Test agreement with one crashed validator.

    // 2.1. Submit an increment to every live validator.
    log::debug!("Submitting an increment to every live validator.");
    for node in &nodes {
        node.submit_transaction(1);
    }

    // 2.2. Poll the counter of every live replica until the value is 3.
    log::debug!("Polling the counter of every live replica until the value is 3.");
    while nodes.iter().any(|node| node.number() != 3) {
        thread::sleep(Duration::from_millis(500));
    }

    // 3. Test removing the crashed validator.

    // 3.1. Every live validator votes to remove the crashed one.
    log::debug!("Voting to remove the crashed validator.");
    for node in &nodes {
        node.propose_candidate(crashed, false).unwrap();
    }

    // 3.2. Poll the validator set of every live replica until we have 3 validators.
    log::debug!("Polling the validator set of every live replica until we have 3 validators.");
    while nodes.iter().any(|node| node.validator_set().contains(&crashed)) {
        thread::sleep(Duration::from_millis(500));
    }
    for node in &nodes {
        assert_eq!(node.validator_set().len(), 3);
    }

    // 4. Test agreement among the remaining validators.
    log::debug!("Submitting an increment to the remaining validators.");
    nodes[0].submit_transaction(2);
    while nodes.iter().any(|node| node.number() != 5) {
        thread::sleep(Duration::from_millis(500));
    }
    assert!(nodes.iter().all(|node| node.height() > BlockHeight::new(3)));
}
