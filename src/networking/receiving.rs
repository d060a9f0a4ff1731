/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions for receiving messages from the P2P network.

use std::{
    sync::mpsc::{Receiver, Sender, TryRecvError},
    thread::{self, JoinHandle},
};

use crate::consensus::messages::ConsensusMessage;

use super::network::Network;

/// Spawn the poller thread, which polls the [`Network`] for consensus messages and forwards them to the
/// [`Algorithm`][crate::algorithm::Algorithm] thread through `to_algorithm`.
///
/// The poller does no filtering of its own: every message is validated when it is added to the
/// message pool.
pub(crate) fn start_polling<N: Network>(
    mut network: N,
    to_algorithm: Sender<ConsensusMessage>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("Poller thread disconnected from main thread")
            }
        }

        if let Some(msg) = network.recv() {
            if to_algorithm.send(msg).is_err() {
                // The algorithm thread has exited.
                return;
            }
        } else {
            thread::yield_now()
        }
    })
}
