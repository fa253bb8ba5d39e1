//! Connection lifecycle shared by both endpoint roles.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::info;

use crate::error::{EndpointError, Result};

/// Where an endpoint is in its session lifecycle.
///
/// ```text
///  Uninitialized ──► Handshaking ──► Ready
///        ▲                │            │
///        │                ▼            ▼
///        └─────────── Resetting ◄──────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No session. Initial state, and the state after every reset.
    #[default]
    Uninitialized,
    /// Transport is open; handshake frames are in flight.
    Handshaking,
    /// Handshake done; regular traffic flows.
    Ready {
        /// When the session became ready.
        since: Instant,
    },
    /// Tearing the session down.
    Resetting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Handshaking => write!(f, "handshaking"),
            Self::Ready { .. } => write!(f, "ready"),
            Self::Resetting => write!(f, "resetting"),
        }
    }
}

impl ConnectionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    /// How long the session has been ready, `None` in any other state.
    pub fn ready_for(&self) -> Option<Duration> {
        match self {
            Self::Ready { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    /// Valid from: `Uninitialized`.
    pub fn begin_handshake(&mut self) -> Result<()> {
        match self {
            Self::Uninitialized => {
                *self = Self::Handshaking;
                Ok(())
            }
            other => Err(invalid_transition("begin handshake", *other)),
        }
    }

    /// Valid from: `Handshaking`.
    pub fn complete_handshake(&mut self) -> Result<()> {
        match self {
            Self::Handshaking => {
                *self = Self::Ready {
                    since: Instant::now(),
                };
                Ok(())
            }
            other => Err(invalid_transition("complete handshake", *other)),
        }
    }

    /// Valid from: `Handshaking`, `Ready`.
    pub fn begin_reset(&mut self) -> Result<()> {
        match self {
            Self::Handshaking | Self::Ready { .. } => {
                *self = Self::Resetting;
                Ok(())
            }
            other => Err(invalid_transition("begin reset", *other)),
        }
    }

    /// Valid from: `Resetting`.
    pub fn finish_reset(&mut self) -> Result<()> {
        match self {
            Self::Resetting => {
                *self = Self::Uninitialized;
                Ok(())
            }
            other => Err(invalid_transition("finish reset", *other)),
        }
    }
}

fn invalid_transition(action: &str, from: ConnectionState) -> EndpointError {
    EndpointError::violation(format!("cannot {action} while {from}"))
}

/// The loop thread's state, observable from other threads.
#[derive(Debug, Default)]
pub(crate) struct StateCell {
    inner: Mutex<Inner>,
    changed: Condvar,
}

#[derive(Debug, Default)]
struct Inner {
    state: ConnectionState,
    sessions: u64,
}

impl StateCell {
    pub(crate) fn get(&self) -> ConnectionState {
        self.lock().state
    }

    /// Number of handshakes completed so far.
    pub(crate) fn sessions(&self) -> u64 {
        self.lock().sessions
    }

    /// Run `work` with the current session number if the state is `Ready`.
    ///
    /// The state cannot change while `work` runs, so anything it queues is
    /// either seen by the next reset or not queued at all.
    pub(crate) fn when_ready<T>(&self, work: impl FnOnce(u64) -> T) -> Option<T> {
        let inner = self.lock();
        if inner.state.is_ready() {
            Some(work(inner.sessions))
        } else {
            None
        }
    }

    /// Apply a checked transition and wake anyone waiting on the state.
    pub(crate) fn transition(
        &self,
        apply: impl FnOnce(&mut ConnectionState) -> Result<()>,
    ) -> Result<()> {
        let mut inner = self.lock();
        let from = inner.state;
        apply(&mut inner.state)?;
        if inner.state.is_ready() {
            inner.sessions += 1;
        }
        info!(from = %from, to = %inner.state, "connection state changed");
        drop(inner);
        self.changed.notify_all();
        Ok(())
    }

    /// Block until the state is `Ready` or `timeout` elapses.
    pub(crate) fn wait_until_ready(&self, timeout: Duration) -> bool {
        let inner = self.lock();
        let (inner, _) = self
            .changed
            .wait_timeout_while(inner, timeout, |inner| !inner.state.is_ready())
            .unwrap_or_else(PoisonError::into_inner);
        inner.state.is_ready()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
