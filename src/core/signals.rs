//! SIGINT/SIGTERM handling.
//!
//! The handler only flips an atomic flag; both event loops observe it once
//! per iteration and exit cleanly.

use std::sync::atomic::{AtomicBool, Ordering};

static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_stop_signal(_signo: libc::c_int) {
    STOP_REQUESTED.store(true, Ordering::SeqCst);
}

/// Install SIGINT and SIGTERM handlers that request a stop.
pub fn install() {
    // SAFETY: the handler is async-signal-safe (a single atomic store).
    unsafe {
        libc::signal(libc::SIGINT, handle_stop_signal as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handle_stop_signal as libc::sighandler_t);
    }
}

/// Whether a stop signal has been received.
pub fn stop_requested() -> bool {
    STOP_REQUESTED.load(Ordering::Acquire)
}

/// Clear the stop flag. Tooling/test hook only.
pub fn reset() {
    STOP_REQUESTED.store(false, Ordering::Release);
}
