//! Query correlation: match game responses to the studio request that asked.
//!
//! Every request carries a fresh token; the game echoes it back with the
//! result. Waiters block on a condvar and are woken by the matching response,
//! by a connection reset, or by their own cancellation token.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tascomm_frame::{Message, MessageKind};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::outbound::CommandQueue;
use crate::payload::{GameDataType, QueryRequest};

/// Upper bound on how long a waiter sleeps before re-checking its cancellation token.
const CANCEL_POLL: Duration = Duration::from_millis(10);

/// Why a query produced no result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("query cancelled")]
    Cancelled,
    #[error("query timed out")]
    TimedOut,
    #[error("connection reset before the game answered")]
    ConnectionReset,
    #[error("not connected to a game")]
    NotReady,
}

#[derive(Debug)]
enum Slot {
    Pending,
    Resolved(String),
    Reset,
}

/// Outstanding queries keyed by token.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    slots: Mutex<HashMap<u64, Slot>>,
    changed: Condvar,
    last_token: AtomicU64,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new query and enqueue its request frame.
    pub fn issue(
        self: &Arc<Self>,
        queue: &CommandQueue,
        kind: GameDataType,
        argument: serde_json::Value,
    ) -> Ticket {
        let token = self.next_token();
        let request = QueryRequest {
            kind,
            token,
            argument,
        };
        let message = Message::new(MessageKind::GetData, request.encode());

        self.lock().insert(token, Slot::Pending);
        queue.push(message);
        debug!(token, %kind, "query issued");

        Ticket {
            table: Arc::clone(self),
            token,
        }
    }

    /// Deliver a result. Returns `false` when nobody is waiting for `token`.
    pub fn resolve(&self, token: u64, result: String) -> bool {
        let mut slots = self.lock();
        match slots.get_mut(&token) {
            Some(slot) if matches!(slot, Slot::Pending) => {
                *slot = Slot::Resolved(result);
                drop(slots);
                self.changed.notify_all();
                true
            }
            _ => {
                debug!(token, "dropping response with no waiting query");
                false
            }
        }
    }

    /// Fail every pending query with [`QueryError::ConnectionReset`].
    pub fn cancel_all(&self) {
        let mut slots = self.lock();
        let mut cancelled = 0usize;
        for slot in slots.values_mut() {
            if matches!(slot, Slot::Pending) {
                *slot = Slot::Reset;
                cancelled += 1;
            }
        }
        drop(slots);
        if cancelled > 0 {
            debug!(cancelled, "pending queries failed by reset");
        }
        self.changed.notify_all();
    }

    /// Number of registered slots, answered or not.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Nanosecond wall clock, bumped so tokens strictly increase.
    fn next_token(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos() as u64)
            .unwrap_or_default();
        let mut last = self.last_token.load(Ordering::Relaxed);
        loop {
            let next = now.max(last.wrapping_add(1));
            match self.last_token.compare_exchange_weak(
                last,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to one outstanding query. Dropping it forgets the query.
#[derive(Debug)]
pub struct Ticket {
    table: Arc<CorrelationTable>,
    token: u64,
}

impl Ticket {
    pub fn token(&self) -> u64 {
        self.token
    }

    /// Block until the game answers, `cancel` fires, the connection resets or
    /// `timeout` elapses. The slot is gone on every return path.
    pub fn wait(
        self,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> std::result::Result<String, QueryError> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut slots = self.table.lock();
        loop {
            match slots.remove(&self.token) {
                Some(Slot::Resolved(result)) => return Ok(result),
                Some(Slot::Reset) | None => return Err(QueryError::ConnectionReset),
                Some(Slot::Pending) => {}
            }
            if cancel.is_cancelled() {
                return Err(QueryError::Cancelled);
            }
            let mut slice = CANCEL_POLL;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return Err(QueryError::TimedOut);
                }
                slice = slice.min(deadline - now);
            }
            slots.insert(self.token, Slot::Pending);
            slots = self
                .table
                .changed
                .wait_timeout(slots, slice)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        self.table.lock().remove(&self.token);
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use serde_json::json;

    use super::*;
    use crate::protocol::Payload;

    fn issue(table: &Arc<CorrelationTable>, queue: &CommandQueue) -> Ticket {
        table.issue(queue, GameDataType::ConsoleCommand, json!("help"))
    }

    #[test]
    fn tokens_strictly_increase() {
        let table = CorrelationTable::new();
        let mut last = 0;
        for _ in 0..1000 {
            let token = table.next_token();
            assert!(token > last);
            last = token;
        }
    }

    #[test]
    fn issue_enqueues_request() {
        let table = Arc::new(CorrelationTable::new());
        let queue = CommandQueue::new();
        let ticket = issue(&table, &queue);

        let message = queue.pop().unwrap();
        let Payload::Query(request) = Payload::from_message(&message).unwrap() else {
            panic!("expected a query frame");
        };
        assert_eq!(request.token, ticket.token());
        assert_eq!(request.kind, GameDataType::ConsoleCommand);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn resolve_wakes_waiter() {
        let table = Arc::new(CorrelationTable::new());
        let queue = CommandQueue::new();
        let ticket = issue(&table, &queue);
        let token = ticket.token();

        let waiter =
            thread::spawn(move || ticket.wait(&CancellationToken::new(), Some(Duration::from_secs(5))));
        thread::sleep(Duration::from_millis(20));
        assert!(table.resolve(token, "done".to_string()));

        assert_eq!(waiter.join().unwrap(), Ok("done".to_string()));
        assert!(table.is_empty());
    }

    #[test]
    fn out_of_order_results_reach_their_waiters() {
        let table = Arc::new(CorrelationTable::new());
        let queue = CommandQueue::new();
        let first = issue(&table, &queue);
        let second = issue(&table, &queue);
        assert_ne!(first.token(), second.token());

        assert!(table.resolve(second.token(), "two".to_string()));
        assert!(table.resolve(first.token(), "one".to_string()));

        let cancel = CancellationToken::new();
        assert_eq!(second.wait(&cancel, None), Ok("two".to_string()));
        assert_eq!(first.wait(&cancel, None), Ok("one".to_string()));
    }

    #[test]
    fn unknown_or_late_response_is_ignored() {
        let table = Arc::new(CorrelationTable::new());
        assert!(!table.resolve(42, "stray".to_string()));

        let queue = CommandQueue::new();
        let ticket = issue(&table, &queue);
        let token = ticket.token();
        drop(ticket);
        assert!(!table.resolve(token, "late".to_string()));
        assert!(table.is_empty());
    }

    #[test]
    fn cancellation_frees_the_slot() {
        let table = Arc::new(CorrelationTable::new());
        let queue = CommandQueue::new();
        let ticket = issue(&table, &queue);
        let token = ticket.token();
        let cancel = CancellationToken::new();

        let waiter = {
            let cancel = cancel.clone();
            thread::spawn(move || ticket.wait(&cancel, None))
        };
        thread::sleep(Duration::from_millis(20));
        cancel.cancel();

        assert_eq!(waiter.join().unwrap(), Err(QueryError::Cancelled));
        assert!(table.is_empty());
        assert!(!table.resolve(token, "late".to_string()));
    }

    #[test]
    fn timeout_frees_the_slot() {
        let table = Arc::new(CorrelationTable::new());
        let queue = CommandQueue::new();
        let ticket = issue(&table, &queue);

        let started = Instant::now();
        let result = ticket.wait(&CancellationToken::new(), Some(Duration::from_millis(30)));
        assert_eq!(result, Err(QueryError::TimedOut));
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert!(table.is_empty());
    }

    #[test]
    fn reset_fails_every_waiter() {
        let table = Arc::new(CorrelationTable::new());
        let queue = CommandQueue::new();
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let ticket = issue(&table, &queue);
                thread::spawn(move || ticket.wait(&CancellationToken::new(), None))
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        table.cancel_all();

        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), Err(QueryError::ConnectionReset));
        }
        assert!(table.is_empty());
    }
}
