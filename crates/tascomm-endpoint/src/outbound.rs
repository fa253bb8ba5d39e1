//! Outbound buffering: one primitive per delivery class.
//!
//! Snapshots are latest-wins, so a slow peer only ever sees the newest one.
//! Commands are a FIFO that is drained one per write turn and only cleared by
//! a reset.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tascomm_frame::Message;

/// A single-value slot where each `put` replaces the previous value.
#[derive(Debug)]
pub struct LatestSlot<T> {
    value: Mutex<Option<T>>,
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self {
            value: Mutex::new(None),
        }
    }
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value`, returning whatever it replaced.
    pub fn put(&self, value: T) -> Option<T> {
        self.lock().replace(value)
    }

    /// Remove and return the current value.
    pub fn take(&self) -> Option<T> {
        self.lock().take()
    }

    pub fn clear(&self) {
        self.lock().take();
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_none()
    }

    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> LatestSlot<T> {
    /// Copy of the current value, leaving it in place.
    pub fn peek(&self) -> Option<T> {
        self.lock().clone()
    }
}

/// FIFO of encoded command frames.
#[derive(Debug, Default)]
pub struct CommandQueue {
    queue: Mutex<VecDeque<Message>>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, message: Message) {
        self.lock().push_back(message);
    }

    /// The oldest queued command.
    pub fn pop(&self) -> Option<Message> {
        self.lock().pop_front()
    }

    /// Drop every queued command, returning how many were discarded.
    pub fn clear(&self) -> usize {
        let mut queue = self.lock();
        let dropped = queue.len();
        queue.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Message>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
