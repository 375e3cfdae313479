use lazy_static::lazy_static;
use std::time::{Instant, SystemTime};

lazy_static! {
    static ref EPOCH: Instant = Instant::now();
}

/// Returns the current unix timestamp (seconds elapsed since 1970-01-01)
#[inline]
pub fn timestamp_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("Closed timelike curve, reality compromised")
        .as_secs()
}

/// Monotonic nanoseconds elapsed since the first call in this process.
/// The origin is arbitrary; only differences are meaningful.
#[inline]
pub fn nanos() -> u64 {
    EPOCH.elapsed().as_nanos() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nanos_monotonic() {
        let a = nanos();
        let b = nanos();
        assert!(b >= a);
    }

    #[test]
    fn test_timestamp_nonzero() {
        assert!(timestamp_secs() > 1_500_000_000);
    }
}
