//! Connection lifecycle tracking.
//!
//! A transport calls [`ConnStateHook::on_state_change`] every time one of its
//! connections moves between lifecycle states. [`ConnStateTracker`] is the
//! in-memory implementation: it remembers the last state of every live
//! connection and keeps one counter per state.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Lifecycle state of a server-side connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnState {
    /// Accepted, no request seen yet.
    New,
    /// A request is being processed.
    Active,
    /// Between requests on a kept-alive connection.
    Idle,
    /// Taken over by a non-HTTP protocol.
    Hijacked,
    /// Terminated.
    Closed,
}

impl ConnState {
    pub fn as_name(&self) -> &'static str {
        match self {
            ConnState::New => "new",
            ConnState::Active => "active",
            ConnState::Idle => "idle",
            ConnState::Hijacked => "hijacked",
            ConnState::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_name())
    }
}

/// Stable identity of an accepted connection, assigned once at accept time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Hands out monotonically increasing [`ConnId`]s, starting at 1.
#[derive(Debug, Default)]
pub struct ConnIdAllocator(AtomicU64);

impl ConnIdAllocator {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn next_id(&self) -> ConnId {
        ConnId(self.0.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// Capability a transport invokes on every connection state transition.
///
/// Transitions for a single connection arrive one at a time and in order;
/// transitions for different connections may arrive concurrently.
pub trait ConnStateHook: Send + Sync {
    fn on_state_change(&self, id: ConnId, state: ConnState);
}

/// Point-in-time copy of the tracker counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnSnapshot {
    pub new: u64,
    pub active: u64,
    pub idle: u64,
    pub hijacked: u64,
    pub total_accepted: u64,
    pub total_closed: u64,
}

impl ConnSnapshot {
    /// Sum of the per-state live counts.
    pub fn live(&self) -> u64 {
        self.new + self.active + self.idle + self.hijacked
    }
}

#[derive(Default)]
struct TrackerInner {
    states: HashMap<ConnId, ConnState>,
    counts: ConnSnapshot,
}

impl TrackerInner {
    fn counter_mut(&mut self, state: ConnState) -> Option<&mut u64> {
        match state {
            ConnState::New => Some(&mut self.counts.new),
            ConnState::Active => Some(&mut self.counts.active),
            ConnState::Idle => Some(&mut self.counts.idle),
            ConnState::Hijacked => Some(&mut self.counts.hijacked),
            ConnState::Closed => None,
        }
    }
}

/// Tracks the last-known state of every live connection.
///
/// The map and all counters sit behind one lock so that the
/// decrement-previous / increment-next pair of a transition is observed as a
/// single step: `snapshot.live() == total_accepted - total_closed` holds
/// between any two transitions.
#[derive(Default)]
pub struct ConnStateTracker {
    inner: Mutex<TrackerInner>,
}

impl ConnStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TrackerInner> {
        // Counters are plain integers; a panic elsewhere cannot leave them torn.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a transition of `id` to `state`. Returns the previous state, if
    /// the connection was already tracked.
    pub fn transition(&self, id: ConnId, state: ConnState) -> Option<ConnState> {
        let prev = {
            let mut inner = self.lock();
            let prev = inner.states.remove(&id);

            if let Some(p) = prev {
                if let Some(c) = inner.counter_mut(p) {
                    *c -= 1;
                }
            }

            match state {
                ConnState::Closed => {
                    // A close for an identity we never saw has nothing to retire.
                    if prev.is_some() {
                        inner.counts.total_closed += 1;
                    }
                }
                _ => {
                    if prev.is_none() {
                        inner.counts.total_accepted += 1;
                    }
                    inner.states.insert(id, state);
                    if let Some(c) = inner.counter_mut(state) {
                        *c += 1;
                    }
                }
            }
            prev
        };

        debug!(
            conn = %id,
            prev_state = prev.map(|s| s.as_name()).unwrap_or("none"),
            new_state = state.as_name(),
            "connection state changed"
        );
        prev
    }

    /// Last recorded state of `id`, or `None` once it has closed.
    pub fn state_of(&self, id: ConnId) -> Option<ConnState> {
        self.lock().states.get(&id).copied()
    }

    /// Number of identities currently held in the live mapping.
    pub fn tracked(&self) -> usize {
        self.lock().states.len()
    }

    pub fn snapshot(&self) -> ConnSnapshot {
        self.lock().counts
    }
}

impl ConnStateHook for ConnStateTracker {
    fn on_state_change(&self, id: ConnId, state: ConnState) {
        self.transition(id, state);
    }
}
