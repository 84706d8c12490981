//! The typed event queue driving the shell's single logical event loop.
//!
//! Producers (the line editor thread, the bus connection thread, the
//! dmenu timer) push; the event-loop thread blocks on [`EventQueue::pop`].
//! FIFO order within the queue is the only cross-thread ordering
//! guarantee the shell relies on: an [`Event::IdlConfig`] is fully applied
//! before any later [`Event::Input`] starts decoding.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};
use unicorn_core::Idl;

#[derive(Debug)]
pub enum Event {
    /// A line the user submitted.
    Input(String),
    /// A parsed IDL announcement from the discovery topic.
    IdlConfig(Idl),
    /// A rendered response line destined for stdout.
    IdlStdout(String),
    /// A rendered response line destined for stderr.
    IdlStderr(String),
    Terminate,
}

#[derive(Default)]
pub struct EventQueue {
    events: Mutex<VecDeque<Event>>,
    ready: Condvar,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: Event) {
        self.events.lock().push_back(event);
        self.ready.notify_all();
    }

    /// Block until an event is available.
    pub fn pop(&self) -> Event {
        let mut events = self.events.lock();
        loop {
            if let Some(event) = events.pop_front() {
                return event;
            }
            self.ready.wait(&mut events);
        }
    }
}
