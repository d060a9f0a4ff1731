/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The event bus thread, which passes every [`Event`] published by the algorithm thread to the
//! handlers registered for it.

use std::sync::mpsc::{Receiver, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::events::*;
use crate::logging::Logger;

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

pub(crate) struct EventHandlers {
    pub(crate) insert_block_handlers: Vec<HandlerPtr<InsertBlockEvent>>,
    pub(crate) update_validator_set_handlers: Vec<HandlerPtr<UpdateValidatorSetEvent>>,
    pub(crate) lock_handlers: Vec<HandlerPtr<LockEvent>>,
    pub(crate) propose_handlers: Vec<HandlerPtr<ProposeEvent>>,
    pub(crate) prepare_handlers: Vec<HandlerPtr<PrepareEvent>>,
    pub(crate) commit_handlers: Vec<HandlerPtr<CommitEvent>>,
    pub(crate) round_change_handlers: Vec<HandlerPtr<RoundChangeEvent>>,
    pub(crate) receive_message_handlers: Vec<HandlerPtr<ReceiveMessageEvent>>,
    pub(crate) start_height_handlers: Vec<HandlerPtr<StartHeightEvent>>,
    pub(crate) start_round_handlers: Vec<HandlerPtr<StartRoundEvent>>,
    pub(crate) round_timeout_handlers: Vec<HandlerPtr<RoundTimeoutEvent>>,
    pub(crate) start_sync_handlers: Vec<HandlerPtr<StartSyncEvent>>,
    pub(crate) end_sync_handlers: Vec<HandlerPtr<EndSyncEvent>>,
}

// Collect the user's handler for an event type, preceded by the default logger if `log_events` is set.
fn handlers<T: Logger>(log_events: bool, user_handler: Option<HandlerPtr<T>>) -> Vec<HandlerPtr<T>> {
    let mut handlers = Vec::new();
    if log_events {
        handlers.push(T::get_logger());
    }
    if let Some(handler) = user_handler {
        handlers.push(handler);
    }
    handlers
}

impl EventHandlers {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        log_events: bool,
        insert_block_handler: Option<HandlerPtr<InsertBlockEvent>>,
        update_validator_set_handler: Option<HandlerPtr<UpdateValidatorSetEvent>>,
        lock_handler: Option<HandlerPtr<LockEvent>>,
        propose_handler: Option<HandlerPtr<ProposeEvent>>,
        prepare_handler: Option<HandlerPtr<PrepareEvent>>,
        commit_handler: Option<HandlerPtr<CommitEvent>>,
        round_change_handler: Option<HandlerPtr<RoundChangeEvent>>,
        receive_message_handler: Option<HandlerPtr<ReceiveMessageEvent>>,
        start_height_handler: Option<HandlerPtr<StartHeightEvent>>,
        start_round_handler: Option<HandlerPtr<StartRoundEvent>>,
        round_timeout_handler: Option<HandlerPtr<RoundTimeoutEvent>>,
        start_sync_handler: Option<HandlerPtr<StartSyncEvent>>,
        end_sync_handler: Option<HandlerPtr<EndSyncEvent>>,
    ) -> EventHandlers {
        EventHandlers {
            insert_block_handlers: handlers(log_events, insert_block_handler),
            update_validator_set_handlers: handlers(log_events, update_validator_set_handler),
            lock_handlers: handlers(log_events, lock_handler),
            propose_handlers: handlers(log_events, propose_handler),
            prepare_handlers: handlers(log_events, prepare_handler),
            commit_handlers: handlers(log_events, commit_handler),
            round_change_handlers: handlers(log_events, round_change_handler),
            receive_message_handlers: handlers(log_events, receive_message_handler),
            start_height_handlers: handlers(log_events, start_height_handler),
            start_round_handlers: handlers(log_events, start_round_handler),
            round_timeout_handlers: handlers(log_events, round_timeout_handler),
            start_sync_handlers: handlers(log_events, start_sync_handler),
            end_sync_handlers: handlers(log_events, end_sync_handler),
        }
    }

    /// Check whether no handler at all is registered, in which case the event bus does not need to run.
    pub(crate) fn is_empty(&self) -> bool {
        self.insert_block_handlers.is_empty()
            && self.update_validator_set_handlers.is_empty()
            && self.lock_handlers.is_empty()
            && self.propose_handlers.is_empty()
            && self.prepare_handlers.is_empty()
            && self.commit_handlers.is_empty()
            && self.round_change_handlers.is_empty()
            && self.receive_message_handlers.is_empty()
            && self.start_height_handlers.is_empty()
            && self.start_round_handlers.is_empty()
            && self.round_timeout_handlers.is_empty()
            && self.start_sync_handlers.is_empty()
            && self.end_sync_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::InsertBlock(insert_block_event) => self
                .insert_block_handlers
                .iter()
                .for_each(|handler| handler(&insert_block_event)),

            Event::UpdateValidatorSet(update_validator_set_event) => self
                .update_validator_set_handlers
                .iter()
                .for_each(|handler| handler(&update_validator_set_event)),

            Event::Lock(lock_event) => self
                .lock_handlers
                .iter()
                .for_each(|handler| handler(&lock_event)),

            Event::Propose(propose_event) => self
                .propose_handlers
                .iter()
                .for_each(|handler| handler(&propose_event)),

            Event::Prepare(prepare_event) => self
                .prepare_handlers
                .iter()
                .for_each(|handler| handler(&prepare_event)),

            Event::Commit(commit_event) => self
                .commit_handlers
                .iter()
                .for_each(|handler| handler(&commit_event)),

            Event::RoundChange(round_change_event) => self
                .round_change_handlers
                .iter()
                .for_each(|handler| handler(&round_change_event)),

            Event::ReceiveMessage(receive_message_event) => self
                .receive_message_handlers
                .iter()
                .for_each(|handler| handler(&receive_message_event)),

            Event::StartHeight(start_height_event) => self
                .start_height_handlers
                .iter()
                .for_each(|handler| handler(&start_height_event)),

            Event::StartRound(start_round_event) => self
                .start_round_handlers
                .iter()
                .for_each(|handler| handler(&start_round_event)),

            Event::RoundTimeout(round_timeout_event) => self
                .round_timeout_handlers
                .iter()
                .for_each(|handler| handler(&round_timeout_event)),

            Event::StartSync(start_sync_event) => self
                .start_sync_handlers
                .iter()
                .for_each(|handler| handler(&start_sync_event)),

            Event::EndSync(end_sync_event) => self
                .end_sync_handlers
                .iter()
                .for_each(|handler| handler(&end_sync_event)),
        }
    }
}

pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("event_bus thread disconnected from main thread")
            }
        }

        match event_subscriber.try_recv() {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(TryRecvError::Empty) => thread::yield_now(),
            // The algorithm thread has exited. Wait for the shutdown signal.
            Err(TryRecvError::Disconnected) => thread::sleep(Duration::from_millis(10)),
        }
    })
}
