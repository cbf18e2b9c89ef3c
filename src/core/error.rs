//! Error taxonomy, global registry, and shutdown escalation.
//!
//! Every failure is classified along three axes: the *domain* it originated
//! in, a *code* describing what happened, and a *severity* derived
//! deterministically from the code. Recording a critical or fatal status
//! raises the process-wide shutdown flag, which both event loops observe
//! once per iteration; the flag only ever escalates.
//!
//! Callers never see panics from these paths. Fallible operations return
//! `false`/`None`/`Err` and record a status here as a side channel, so
//! counters and the bounded history survive even when the caller swallows
//! the failure signal.

use crate::common::Spinlock;
use crate::common::now_ns;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::panic::Location;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicI32, Ordering};
use tracing::error;

/// Module group an error logically originated in.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDomain {
    /// Unspecified.
    None = 0,
    /// Configuration loading/validation.
    Config,
    /// Shared-memory management.
    Shm,
    /// Service orchestration and the event loop.
    Core,
    /// Order book / router / splitter chain.
    Order,
    /// Risk rules and pipeline.
    Risk,
    /// Fund and position accounting.
    Portfolio,
    /// External adapter surface.
    Api,
}

/// What happened. Severity is derived from this code alone.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// No error.
    Ok = 0,
    /// Configuration value is semantically invalid.
    InvalidConfig,
    /// Invalid call argument.
    InvalidParam,
    /// Configuration could not be parsed.
    ConfigParseFailed,
    /// Configuration failed business-rule validation.
    ConfigValidateFailed,
    /// Operation not allowed in the current state.
    InvalidState,
    /// Order id is zero or out of range.
    InvalidOrderId,
    /// Duplicate order id.
    DuplicateOrder,
    /// Order book slab exhausted.
    OrderBookFull,
    /// Order pool slab exhausted.
    OrderPoolFull,
    /// Order not present in the book.
    OrderNotFound,
    /// Queue at capacity.
    QueueFull,
    /// Queue push failed (backpressure).
    QueuePushFailed,
    /// Queue pop failed.
    QueuePopFailed,
    /// Order routing failed.
    RouteFailed,
    /// Order splitting failed.
    SplitFailed,
    /// Fund or position update failed; account state is suspect.
    PositionUpdateFailed,
    /// A key order-book invariant was broken.
    OrderInvariantBroken,
    /// A required component is unavailable.
    ComponentUnavailable,
    /// Shared-memory segment open/create failed.
    ShmOpenFailed,
    /// Shared-memory metadata query failed.
    ShmFstatFailed,
    /// Shared-memory size mismatch.
    ShmResizeFailed,
    /// Shared-memory mapping failed.
    ShmMmapFailed,
    /// Shared-memory header failed validation.
    ShmHeaderInvalid,
    /// Shared-memory header is corrupted.
    ShmHeaderCorrupted,
    /// Health check failed.
    HealthCheckFailed,
    /// Logging backend initialization failed.
    LoggerInitFailed,
    /// Logging backend thread failed.
    LoggerThreadFailed,
    /// Logging queue full (degraded, not lost state).
    LoggerQueueFull,
    /// Unclassified internal error; treated as highest risk.
    InternalError,
}

const ERROR_CODE_SLOTS: usize = ErrorCode::InternalError as usize + 1;

/// How bad it is and what the process should do about it.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Record and continue.
    Recoverable = 0,
    /// Loops must exit promptly.
    Critical = 1,
    /// Same, and the process should exit; state is not trustworthy.
    Fatal = 2,
}

/// Reaction derived from an [`ErrorCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorPolicy {
    /// Derived severity.
    pub severity: ErrorSeverity,
    /// Whether service loops should stop.
    pub stop_service: bool,
    /// Whether the process should exit.
    pub exit_process: bool,
}

const RECOVERABLE: ErrorPolicy = ErrorPolicy {
    severity: ErrorSeverity::Recoverable,
    stop_service: false,
    exit_process: false,
};

const CRITICAL: ErrorPolicy = ErrorPolicy {
    severity: ErrorSeverity::Critical,
    stop_service: true,
    exit_process: true,
};

const FATAL: ErrorPolicy = ErrorPolicy {
    severity: ErrorSeverity::Fatal,
    stop_service: true,
    exit_process: true,
};

/// Map an error code to its fixed policy.
pub const fn classify(code: ErrorCode) -> ErrorPolicy {
    match code {
        ErrorCode::Ok
        | ErrorCode::InvalidParam
        | ErrorCode::InvalidOrderId
        | ErrorCode::DuplicateOrder
        | ErrorCode::OrderBookFull
        | ErrorCode::OrderPoolFull
        | ErrorCode::OrderNotFound
        | ErrorCode::QueueFull
        | ErrorCode::QueuePushFailed
        | ErrorCode::QueuePopFailed
        | ErrorCode::RouteFailed
        | ErrorCode::SplitFailed
        | ErrorCode::HealthCheckFailed
        | ErrorCode::LoggerQueueFull => RECOVERABLE,

        ErrorCode::InvalidConfig
        | ErrorCode::ConfigParseFailed
        | ErrorCode::ConfigValidateFailed
        | ErrorCode::InvalidState
        | ErrorCode::ComponentUnavailable
        | ErrorCode::ShmOpenFailed
        | ErrorCode::ShmFstatFailed
        | ErrorCode::ShmResizeFailed
        | ErrorCode::ShmMmapFailed
        | ErrorCode::ShmHeaderInvalid
        | ErrorCode::LoggerInitFailed
        | ErrorCode::LoggerThreadFailed => CRITICAL,

        ErrorCode::PositionUpdateFailed
        | ErrorCode::OrderInvariantBroken
        | ErrorCode::ShmHeaderCorrupted
        | ErrorCode::InternalError => FATAL,
    }
}

/// A recorded failure: where, what, when, and the call site.
#[derive(Debug, Clone)]
pub struct ErrorStatus {
    /// Originating domain.
    pub domain: ErrorDomain,
    /// What happened.
    pub code: ErrorCode,
    /// Wall-clock nanoseconds at record time.
    pub ts_ns: u64,
    /// Subsystem name (e.g. `"order_book"`).
    pub module: &'static str,
    /// Source location that reported the status.
    pub location: &'static Location<'static>,
    /// Human-readable context.
    pub message: String,
}

impl ErrorStatus {
    /// Build a status stamped with the caller's source location.
    #[track_caller]
    pub fn new(
        domain: ErrorDomain,
        code: ErrorCode,
        module: &'static str,
        message: impl Into<String>,
    ) -> Self {
        ErrorStatus {
            domain,
            code,
            ts_ns: now_ns(),
            module,
            location: Location::caller(),
            message: message.into(),
        }
    }

    /// Whether this status represents success.
    pub fn ok(&self) -> bool {
        self.code == ErrorCode::Ok
    }
}

/// Bounded process-wide error registry: per-code counters plus a history
/// ring of the most recent statuses.
pub struct ErrorRegistry {
    inner: Spinlock<RegistryInner>,
}

struct RegistryInner {
    counters: [u64; ERROR_CODE_SLOTS],
    history: VecDeque<ErrorStatus>,
}

impl ErrorRegistry {
    /// Maximum number of retained statuses.
    pub const HISTORY_CAPACITY: usize = 4096;

    fn new() -> Self {
        ErrorRegistry {
            inner: Spinlock::new(RegistryInner {
                counters: [0; ERROR_CODE_SLOTS],
                history: VecDeque::with_capacity(64),
            }),
        }
    }

    /// Record a status into counters and the history ring.
    pub fn record(&self, status: &ErrorStatus) {
        let mut inner = self.inner.lock();
        inner.counters[status.code as usize] += 1;
        if inner.history.len() == Self::HISTORY_CAPACITY {
            inner.history.pop_front();
        }
        inner.history.push_back(status.clone());
    }

    /// Number of times `code` has been recorded.
    pub fn count(&self, code: ErrorCode) -> u64 {
        self.inner.lock().counters[code as usize]
    }

    /// Snapshot of the retained history, oldest first.
    pub fn recent_errors(&self) -> Vec<ErrorStatus> {
        self.inner.lock().history.iter().cloned().collect()
    }

    /// Drop counters and history.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.counters = [0; ERROR_CODE_SLOTS];
        inner.history.clear();
    }
}

thread_local! {
    static LAST_ERROR: RefCell<Option<ErrorStatus>> = const { RefCell::new(None) };
}

static LATEST_ERROR: Spinlock<Option<ErrorStatus>> = Spinlock::new(None);
static SHUTDOWN_REASON: AtomicI32 = AtomicI32::new(-1);

/// The process-wide registry.
pub fn global_error_registry() -> &'static ErrorRegistry {
    static REGISTRY: OnceLock<ErrorRegistry> = OnceLock::new();
    REGISTRY.get_or_init(ErrorRegistry::new)
}

/// Record a status: thread-local last error, global latest, registry, and
/// shutdown escalation when the policy demands it.
pub fn record_error(status: &ErrorStatus) {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(status.clone()));
    *LATEST_ERROR.lock() = Some(status.clone());

    if !status.ok() {
        global_error_registry().record(status);
        let policy = classify(status.code);
        if policy.stop_service || policy.exit_process {
            request_shutdown(policy.severity);
        }
    }
}

/// Build, log, and record a failure status in one step.
///
/// This is the standard reporting path for every `false`/`None` return in
/// the crate; it stamps the caller's source location.
#[track_caller]
pub fn report(
    domain: ErrorDomain,
    code: ErrorCode,
    module: &'static str,
    message: impl Into<String>,
) -> ErrorStatus {
    let status = ErrorStatus::new(domain, code, module, message);
    error!(
        module = status.module,
        code = ?status.code,
        location = %status.location,
        "{}",
        status.message
    );
    record_error(&status);
    status
}

/// Most recent status recorded by the calling thread.
pub fn last_error() -> Option<ErrorStatus> {
    LAST_ERROR.with(|slot| slot.borrow().clone())
}

/// Most recent status recorded by any thread.
pub fn latest_error() -> Option<ErrorStatus> {
    LATEST_ERROR.lock().clone()
}

/// Clear the calling thread's last-error slot.
pub fn clear_last_error() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

/// Escalate the global shutdown flag. Severity only ever increases.
pub fn request_shutdown(severity: ErrorSeverity) {
    SHUTDOWN_REASON.fetch_max(severity as i32, Ordering::AcqRel);
}

/// Current shutdown severity, if any was requested.
pub fn shutdown_reason() -> Option<ErrorSeverity> {
    match SHUTDOWN_REASON.load(Ordering::Acquire) {
        r if r < 0 => None,
        0 => Some(ErrorSeverity::Recoverable),
        1 => Some(ErrorSeverity::Critical),
        _ => Some(ErrorSeverity::Fatal),
    }
}

/// Reset the shutdown flag. Tooling/test hook only.
pub fn clear_shutdown_reason() {
    SHUTDOWN_REASON.store(-1, Ordering::Release);
}

/// Whether loops must exit (critical or fatal requested).
pub fn should_stop_service() -> bool {
    SHUTDOWN_REASON.load(Ordering::Acquire) >= ErrorSeverity::Critical as i32
}

/// Whether the process should exit.
pub fn should_exit_process() -> bool {
    SHUTDOWN_REASON.load(Ordering::Acquire) >= ErrorSeverity::Critical as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_matches_policy_table() {
        assert_eq!(
            classify(ErrorCode::QueuePushFailed).severity,
            ErrorSeverity::Recoverable
        );
        assert_eq!(
            classify(ErrorCode::ShmHeaderInvalid).severity,
            ErrorSeverity::Critical
        );
        assert_eq!(
            classify(ErrorCode::PositionUpdateFailed).severity,
            ErrorSeverity::Fatal
        );
        assert_eq!(
            classify(ErrorCode::ShmHeaderCorrupted).severity,
            ErrorSeverity::Fatal
        );
        assert!(!classify(ErrorCode::OrderBookFull).stop_service);
        assert!(classify(ErrorCode::ShmResizeFailed).stop_service);
    }

    #[test]
    fn registry_counts_and_retains_history() {
        let registry = ErrorRegistry::new();
        let status = ErrorStatus::new(
            ErrorDomain::Order,
            ErrorCode::OrderNotFound,
            "test",
            "missing",
        );
        registry.record(&status);
        registry.record(&status);
        assert_eq!(registry.count(ErrorCode::OrderNotFound), 2);
        assert_eq!(registry.count(ErrorCode::OrderBookFull), 0);
        assert_eq!(registry.recent_errors().len(), 2);

        registry.reset();
        assert_eq!(registry.count(ErrorCode::OrderNotFound), 0);
        assert!(registry.recent_errors().is_empty());
    }

    #[test]
    fn history_ring_is_bounded() {
        let registry = ErrorRegistry::new();
        let status =
            ErrorStatus::new(ErrorDomain::Order, ErrorCode::QueueFull, "test", "full");
        for _ in 0..(ErrorRegistry::HISTORY_CAPACITY + 10) {
            registry.record(&status);
        }
        assert_eq!(
            registry.recent_errors().len(),
            ErrorRegistry::HISTORY_CAPACITY
        );
        assert_eq!(
            registry.count(ErrorCode::QueueFull),
            (ErrorRegistry::HISTORY_CAPACITY + 10) as u64
        );
    }
}
