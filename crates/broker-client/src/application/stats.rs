//! Lock-free traffic counters.
//!
//! Counters are `AtomicU64` with `Relaxed` ordering: each is an independent
//! tally, and a [`StatsSnapshot`] is only approximately consistent across
//! fields while traffic is flowing.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters updated by the sender and poller tasks.
#[derive(Debug, Default)]
pub struct BrokerStats {
    posts_attempted: AtomicU64,
    posts_failed: AtomicU64,
    polls_attempted: AtomicU64,
    polls_failed: AtomicU64,
    messages_dispatched: AtomicU64,
}

/// A point-in-time copy of [`BrokerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Envelopes taken off the queue for transmission.
    pub posts_attempted: u64,
    /// Envelopes whose delivery failed (encode, transport, or status).
    pub posts_failed: u64,
    /// Long-poll `GET`s started.
    pub polls_attempted: u64,
    /// Polls that ended in a transport error, non-200 status, or bad body.
    pub polls_failed: u64,
    /// Payloads handed to the dispatch executor.
    pub messages_dispatched: u64,
}

impl BrokerStats {
    pub fn record_post_attempt(&self) {
        self.posts_attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_post_failure(&self) {
        self.posts_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_poll_attempt(&self) {
        self.polls_attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_poll_failure(&self) {
        self.polls_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch(&self) {
        self.messages_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            posts_attempted: self.posts_attempted.load(Ordering::Relaxed),
            posts_failed: self.posts_failed.load(Ordering::Relaxed),
            polls_attempted: self.polls_attempted.load(Ordering::Relaxed),
            polls_failed: self.polls_failed.load(Ordering::Relaxed),
            messages_dispatched: self.messages_dispatched.load(Ordering::Relaxed),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_new_stats_are_zero() {
        assert_eq!(BrokerStats::default().snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn test_each_counter_is_independent() {
        // Arrange
        let stats = BrokerStats::default();

        // Act
        stats.record_post_attempt();
        stats.record_post_attempt();
        stats.record_post_failure();
        stats.record_poll_attempt();
        stats.record_poll_failure();
        stats.record_dispatch();
        stats.record_dispatch();
        stats.record_dispatch();

        // Assert
        assert_eq!(
            stats.snapshot(),
            StatsSnapshot {
                posts_attempted: 2,
                posts_failed: 1,
                polls_attempted: 1,
                polls_failed: 1,
                messages_dispatched: 3,
            }
        );
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        // Arrange
        let stats = Arc::new(BrokerStats::default());

        // Act
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let s = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        s.record_dispatch();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("thread panicked");
        }

        // Assert
        assert_eq!(stats.snapshot().messages_dispatched, 4000);
    }
}
