use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every simulated connection.
///
/// Plain atomics: nothing reads two of them as a pair mid-run, so each is
/// incremented on its own.
#[derive(Debug, Default)]
pub struct SlowStats {
    active: AtomicU64,
    attempted: AtomicU64,
    closed_by_peer: AtomicU64,
    dial_errors: AtomicU64,
    fragments_sent: AtomicU64,
    self_stopped: AtomicU64,
}

/// Point-in-time copy of [`SlowStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlowSnapshot {
    /// Connections currently open.
    pub active: u64,
    /// Dial attempts, failed ones included.
    pub attempted: u64,
    /// Connections the peer terminated. The signal a defensive timeout is active.
    pub closed_by_peer: u64,
    pub dial_errors: u64,
    /// Header lines written.
    pub fragments_sent: u64,
    /// Connections ended from this side: the peer answered, or the line limit
    /// was reached.
    pub self_stopped: u64,
}

impl SlowSnapshot {
    /// Dials that produced a connection.
    pub fn established(&self) -> u64 {
        self.attempted.saturating_sub(self.dial_errors)
    }
}

/// Keeps one connection counted in `active` until dropped.
#[must_use]
pub struct ActiveConnection<'a> {
    stats: &'a SlowStats,
}

impl Drop for ActiveConnection<'_> {
    fn drop(&mut self) {
        self.stats.active.fetch_sub(1, Ordering::Relaxed);
    }
}

impl SlowStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&self) {
        self.attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dial_error(&self) {
        self.dial_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a freshly established connection as active for the life of the
    /// returned guard.
    pub fn connected(&self) -> ActiveConnection<'_> {
        self.active.fetch_add(1, Ordering::Relaxed);
        ActiveConnection { stats: self }
    }

    pub fn record_fragment(&self) {
        self.fragments_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_peer_closed(&self) {
        self.closed_by_peer.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_self_stopped(&self) {
        self.self_stopped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SlowSnapshot {
        SlowSnapshot {
            active: self.active.load(Ordering::Relaxed),
            attempted: self.attempted.load(Ordering::Relaxed),
            closed_by_peer: self.closed_by_peer.load(Ordering::Relaxed),
            dial_errors: self.dial_errors.load(Ordering::Relaxed),
            fragments_sent: self.fragments_sent.load(Ordering::Relaxed),
            self_stopped: self.self_stopped.load(Ordering::Relaxed),
        }
    }
}
