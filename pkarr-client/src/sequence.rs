//! Sources for record sequence numbers.
//!
//! Relays only accept a record whose sequence number is higher than the one they hold, so
//! every publish needs a fresh one.  The client does not check this itself.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use tracing::warn;

/// Produces the sequence number for the next publish.
pub trait SequenceSource: fmt::Debug + Send + Sync + 'static {
    /// Returns the sequence number to use for the record about to be signed.
    fn next_seq(&self) -> u64;
}

impl<T: SequenceSource> SequenceSource for Arc<T> {
    fn next_seq(&self) -> u64 {
        self.as_ref().next_seq()
    }
}

/// Uses the wall clock, in seconds since the unix epoch rounded up.
///
/// Two publishes within the same second get the same sequence number, a relay will
/// reject the second one unless the value is unchanged.  Use a [`MonotonicCounter`] when
/// publishing faster than that.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SequenceSource for SystemClock {
    fn next_seq(&self) -> u64 {
        // A clock before the epoch is treated as the epoch.
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        u64::try_from(millis.div_ceil(1000)).unwrap_or(u64::MAX)
    }
}

/// A counter handing out strictly increasing sequence numbers.
///
/// Seed it above whatever was last published under the key, e.g. with the `seq` of a
/// previously resolved record.
///
/// Once `u64::MAX` was handed out the counter is exhausted: it keeps returning
/// `u64::MAX` and logs a warning, it never wraps around.
#[derive(Debug, Default)]
pub struct MonotonicCounter {
    next: AtomicU64,
    exhausted: AtomicBool,
}

impl MonotonicCounter {
    /// Creates a counter whose first sequence number is `first`.
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
            exhausted: AtomicBool::new(false),
        }
    }
}

impl SequenceSource for MonotonicCounter {
    fn next_seq(&self) -> u64 {
        match self
            .next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_add(1))
        {
            Ok(seq) => seq,
            Err(seq) => {
                if self.exhausted.swap(true, Ordering::SeqCst) {
                    warn!(seq, "sequence numbers exhausted, repeating the last one");
                }
                seq
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;

    #[test]
    fn system_clock_is_seconds() {
        let before = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let seq = SystemClock.next_seq();
        let after = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        assert!(seq >= before, "{seq} < {before}");
        assert!(seq <= after + 1, "{seq} > {after} + 1");
    }

    #[test]
    fn counter_is_strictly_increasing() {
        let counter = MonotonicCounter::starting_at(41);
        assert_eq!(counter.next_seq(), 41);
        assert_eq!(counter.next_seq(), 42);

        let shared = Arc::new(MonotonicCounter::default());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let shared = shared.clone();
                std::thread::spawn(move || (0..100).map(|_| shared.next_seq()).collect::<Vec<_>>())
            })
            .collect();
        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 400);
    }

    #[test]
    #[traced_test]
    fn counter_saturates_instead_of_wrapping() {
        let counter = MonotonicCounter::starting_at(u64::MAX - 1);
        assert_eq!(counter.next_seq(), u64::MAX - 1);
        assert_eq!(counter.next_seq(), u64::MAX);
        assert!(!logs_contain("sequence numbers exhausted"));

        assert_eq!(counter.next_seq(), u64::MAX);
        assert_eq!(counter.next_seq(), u64::MAX);
        assert!(logs_contain("sequence numbers exhausted"));
    }

    #[test]
    fn counter_starting_at_max_hands_it_out_once() {
        let counter = MonotonicCounter::starting_at(u64::MAX);
        assert_eq!(counter.next_seq(), u64::MAX);
        assert_eq!(counter.next_seq(), u64::MAX);
    }
}
