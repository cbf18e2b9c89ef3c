//! Nanosecond clocks.
//!
//! Shared-memory headers and order timestamps carry wall-clock nanoseconds
//! since the Unix epoch; loop latency accounting uses a monotonic clock that
//! survives wall-clock adjustments.

use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Wall-clock nanoseconds since the Unix epoch.
pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Monotonic nanoseconds since an arbitrary process-local origin.
pub fn now_monotonic_ns() -> u64 {
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    ORIGIN.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wall_clock_is_nonzero() {
        assert!(now_ns() > 0);
    }

    #[test]
    fn monotonic_never_goes_backwards() {
        let a = now_monotonic_ns();
        let b = now_monotonic_ns();
        assert!(b >= a);
    }
}
