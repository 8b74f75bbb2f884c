//! Single-flight refresh gate
//!
//! Client-wide state machine:
//! - Idle → Refreshing (first 401 while idle; caller becomes the leader)
//! - Refreshing → Idle (leader resolves with the new credential or a failure)
//! - 401s while Refreshing enqueue a waiter instead of transitioning
//!
//! The state sits behind a `std::sync::Mutex` that is never held across an
//! await, so entering the gate is atomic on any runtime flavour. The leader
//! holds a `LeaderGuard`; dropping it unresolved (cancelled task) returns the
//! gate to Idle and fails every waiter with `RefreshInterrupted`.

use std::sync::{Mutex, MutexGuard, PoisonError};

use common::Secret;
use tokio::sync::oneshot;
use tracing::warn;

/// Outcome broadcast to waiters: the new access credential, or why the
/// refresh failed.
pub(crate) type Broadcast = std::result::Result<Secret<String>, String>;

enum RefreshState {
    Idle,
    Refreshing {
        waiters: Vec<oneshot::Sender<Broadcast>>,
    },
}

/// Snapshot of the gate for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshStatus {
    pub refreshing: bool,
    pub waiters: usize,
}

impl RefreshStatus {
    /// Status label for health/logging.
    pub fn label(&self) -> &'static str {
        if self.refreshing { "refreshing" } else { "idle" }
    }
}

/// What a 401'd request should do next.
pub(crate) enum Ticket<'a> {
    /// Run the refresh exchange and resolve the guard.
    Leader(LeaderGuard<'a>),
    /// Wait for the in-flight refresh.
    Waiter(oneshot::Receiver<Broadcast>),
}

pub(crate) struct RefreshGate {
    state: Mutex<RefreshState>,
}

impl RefreshGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RefreshState::Idle),
        }
    }

    /// Become the leader if idle, otherwise join the waiter queue.
    pub fn enter(&self) -> Ticket<'_> {
        let mut state = self.lock();
        match &mut *state {
            RefreshState::Idle => {
                *state = RefreshState::Refreshing {
                    waiters: Vec::new(),
                };
                Ticket::Leader(LeaderGuard {
                    gate: self,
                    resolved: false,
                })
            }
            RefreshState::Refreshing { waiters } => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                Ticket::Waiter(rx)
            }
        }
    }

    pub fn status(&self) -> RefreshStatus {
        match &*self.lock() {
            RefreshState::Idle => RefreshStatus {
                refreshing: false,
                waiters: 0,
            },
            RefreshState::Refreshing { waiters } => RefreshStatus {
                refreshing: true,
                waiters: waiters.len(),
            },
        }
    }

    /// Return to Idle and hand back the queued waiters in enqueue order.
    fn take_waiters(&self) -> Vec<oneshot::Sender<Broadcast>> {
        match std::mem::replace(&mut *self.lock(), RefreshState::Idle) {
            RefreshState::Refreshing { waiters } => waiters,
            RefreshState::Idle => Vec::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Proof of leadership over the in-flight refresh.
pub(crate) struct LeaderGuard<'a> {
    gate: &'a RefreshGate,
    resolved: bool,
}

impl LeaderGuard<'_> {
    /// Broadcast the outcome to every waiter in enqueue order and return the
    /// gate to Idle. Returns how many waiters were notified.
    pub fn resolve(mut self, outcome: Broadcast) -> usize {
        self.resolved = true;
        let waiters = self.gate.take_waiters();
        let count = waiters.len();
        for waiter in waiters {
            // A waiter that timed out has dropped its receiver
            let _ = waiter.send(outcome.clone());
        }
        count
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            let abandoned = self.gate.take_waiters().len();
            warn!(waiters = abandoned, "refresh abandoned before completion");
        }
    }
}
