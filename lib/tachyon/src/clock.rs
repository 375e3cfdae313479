//! Client-side view of server time. Inbound message times feed a running
//! drift estimate; consumers read a monotonic, deliberately lagged clock
//! that gives interpolation something to interpolate toward.

use quark::time;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Samples folded into the drift average before it becomes a pure
/// exponential-style running mean.
const MAX_DRIFT_SAMPLES: u64 = 100;

pub struct RemoteClock {
    /// Estimated server-minus-local offset, nanoseconds.
    drift: AtomicI64,
    samples: AtomicU64,
    /// Highest server time observed, for high-water filtering.
    high_water: AtomicU64,
    /// User-chosen bias, normally negative to create a receive-side
    /// interpolation window.
    offset: i64,
    /// Monotonic clamp over `time()` results.
    last_returned: AtomicU64,
}

impl RemoteClock {
    /// `offset` is added to every reading; the default of -100 ms trails
    /// the live server time by one interpolation window.
    #[inline]
    pub fn new(offset: i64) -> RemoteClock {
        RemoteClock {
            drift: AtomicI64::new(0),
            samples: AtomicU64::new(0),
            high_water: AtomicU64::new(0),
            offset,
            last_returned: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn drift(&self) -> i64 {
        self.drift.load(Ordering::Relaxed)
    }

    /// Folds a newly observed server message time into the drift average.
    /// Times at or below the high-water mark are ignored.
    pub fn observe(&self, server_time: u64) {
        let high = self.high_water.load(Ordering::Relaxed);
        if server_time <= high {
            return;
        }
        self.high_water.store(server_time, Ordering::Relaxed);

        let sample = server_time as i64 - time::nanos() as i64;
        let count = self.samples.load(Ordering::Relaxed).min(MAX_DRIFT_SAMPLES - 1) + 1;
        self.samples.store(count, Ordering::Relaxed);

        let drift = self.drift.load(Ordering::Relaxed);
        let next = drift + (sample - drift) / count as i64;
        self.drift.store(next, Ordering::Relaxed);
    }

    /// The current estimate of server time, biased by the configured
    /// offset and clamped to never run backwards.
    pub fn time(&self) -> u64 {
        let raw = time::nanos() as i64 + self.drift.load(Ordering::Relaxed) + self.offset;
        let raw = raw.max(0) as u64;

        let mut last = self.last_returned.load(Ordering::Relaxed);
        loop {
            if raw <= last {
                return last;
            }

            match self.last_returned.compare_exchange_weak(
                last,
                raw,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return raw,
                Err(observed) => last = observed,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_observation_sets_drift() {
        let clock = RemoteClock::new(0);
        let server = quark::time::nanos() + 5_000_000_000;

        clock.observe(server);

        // Within scheduling noise of the 5 s skew.
        let drift = clock.drift();
        assert!(drift > 4_900_000_000 && drift < 5_100_000_000);
    }

    #[test]
    fn test_stale_times_ignored() {
        let clock = RemoteClock::new(0);
        let server = quark::time::nanos() + 1_000_000_000;

        clock.observe(server);
        let drift = clock.drift();

        clock.observe(server - 500);
        assert_eq!(clock.drift(), drift);
    }

    #[test]
    fn test_averaging_converges() {
        let clock = RemoteClock::new(0);
        let base = quark::time::nanos() + 2_000_000_000;

        for i in 0..50u64 {
            clock.observe(base + i * 1_000_000);
        }

        let drift = clock.drift();
        assert!(drift > 1_900_000_000 && drift < 2_100_000_000);
    }

    #[test]
    fn test_time_monotonic() {
        let clock = RemoteClock::new(-100_000_000);
        clock.observe(quark::time::nanos() + 1_000_000_000);

        let mut last = 0;
        for _ in 0..1000 {
            let now = clock.time();
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn test_offset_applied() {
        let offset = -100_000_000i64;
        let biased = RemoteClock::new(offset);
        let unbiased = RemoteClock::new(0);
        let server = quark::time::nanos() + 1_000_000_000;

        biased.observe(server);
        unbiased.observe(server);

        let gap = unbiased.time() as i64 - biased.time() as i64;
        assert!(gap > 50_000_000, "gap {}", gap);
    }
}
