//! Shared primitives: fixed-size strings, spinlocks, clocks.

mod fixed_string;
mod spin;
mod time;

pub use fixed_string::FixedString;
pub use spin::{Spinlock, SpinlockGuard};
pub use time::{now_monotonic_ns, now_ns};
