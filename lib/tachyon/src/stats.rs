//! Engine-scoped counters. There is no global registry: each engine
//! assembly owns an `Arc<ReplicationStats>` and passes it to the parts
//! that report into it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

macro_rules! counters {
    ($($(#[$doc:meta])* $name:ident),+ $(,)?) => {
        /// Monotone counters describing one engine instance. All updates
        /// are relaxed; the numbers are diagnostics, not synchronization.
        #[derive(Debug, Default)]
        pub struct ReplicationStats {
            $($(#[$doc])* pub $name: AtomicU64,)+
            /// Most recent observed round trip, nanoseconds.
            pub last_ping_nanos: AtomicU64,
        }

        /// Plain copy of the counters at one instant.
        #[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
        pub struct StatsSnapshot {
            $(pub $name: u64,)+
            pub last_ping_nanos: u64,
        }

        impl ReplicationStats {
            pub fn snapshot(&self) -> StatsSnapshot {
                StatsSnapshot {
                    $($name: self.$name.load(Ordering::Relaxed),)+
                    last_ping_nanos: self.last_ping_nanos.load(Ordering::Relaxed),
                }
            }
        }
    };
}

counters! {
    messages_sent,
    bytes_sent,
    messages_received,
    acks_matched,
    acks_stale,
    frames_published,
    frames_dropped,
    frames_split,
    baselines_promoted,
    /// Initial baseline arrived without a real id; current was substituted.
    baseline_real_id_fallback,
    unknown_network_id,
    ids_allocated,
    ids_retired,
    zones_created,
    zones_evicted,
    warps_observed,
    objects_removed,
}

impl ReplicationStats {
    #[inline]
    pub fn shared() -> Arc<ReplicationStats> {
        Arc::new(ReplicationStats::default())
    }

    #[inline]
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(counter: &AtomicU64, amount: u64) {
        counter.fetch_add(amount, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_ping(&self, nanos: u64) {
        self.last_ping_nanos.store(nanos, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counts() {
        let stats = ReplicationStats::shared();

        ReplicationStats::bump(&stats.messages_sent);
        ReplicationStats::add(&stats.bytes_sent, 120);
        stats.record_ping(5_000_000);

        let snap = stats.snapshot();
        assert_eq!(snap.messages_sent, 1);
        assert_eq!(snap.bytes_sent, 120);
        assert_eq!(snap.last_ping_nanos, 5_000_000);
        assert_eq!(snap.acks_stale, 0);
    }
}
