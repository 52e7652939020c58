//! Cooperative cancellation around calls into script code
//!
//! Every call into running script code is bracketed by the host's
//! enter/exit predicates. A denied enter means no script code runs; a denied
//! exit discards whatever the script produced. Forced termination of code
//! that is already running goes through [`TerminationHandle`] and is reported
//! the same way.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

/// Message raised inside the engine while a termination is pending
pub(crate) const TERMINATION_MESSAGE: &str = "script execution terminated by host";

/// Host-supplied allow/deny checks for a cancellable region
pub trait CancellationGuard {
    /// Called before any script code runs. `false` aborts the operation.
    fn enter(&self) -> bool;

    /// Called after script code ran, whatever its outcome. `false` discards the result.
    fn exit(&self) -> bool;
}

/// Guard that never cancels
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl CancellationGuard for AllowAll {
    fn enter(&self) -> bool {
        true
    }

    fn exit(&self) -> bool {
        true
    }
}

/// Adapts a pair of closures into a [`CancellationGuard`]
pub struct FnGuard<E, X> {
    enter: E,
    exit: X,
}

impl<E, X> FnGuard<E, X>
where
    E: Fn() -> bool,
    X: Fn() -> bool,
{
    pub fn new(enter: E, exit: X) -> Self {
        Self { enter, exit }
    }
}

impl<E, X> CancellationGuard for FnGuard<E, X>
where
    E: Fn() -> bool,
    X: Fn() -> bool,
{
    fn enter(&self) -> bool {
        (self.enter)()
    }

    fn exit(&self) -> bool {
        (self.exit)()
    }
}

/// Notified when a guarded region is left while a forced termination is pending
pub trait TerminationObserver {
    fn on_terminating(&self, operation: &str);
}

impl<F> TerminationObserver for F
where
    F: Fn(&str),
{
    fn on_terminating(&self, operation: &str) {
        self(operation)
    }
}

/// Request flag for forcibly terminating running script code.
///
/// Cheap to clone and safe to trigger from any thread (a signal handler,
/// a watchdog). The engine polls it from an instruction hook.
#[derive(Debug, Clone, Default)]
pub struct TerminationHandle {
    requested: Arc<AtomicBool>,
}

impl TerminationHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the engine to stop running script code as soon as possible
    pub fn terminate(&self) {
        debug!(target: "scripting", "Termination requested");
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Withdraw a pending request so the engine can be used again
    pub fn reset(&self) {
        self.requested.store(false, Ordering::SeqCst);
    }
}

/// Result of running a body inside a cancellable region
#[derive(Debug)]
pub enum Guarded<T> {
    Completed(T),
    Terminated,
}

/// Everything a cancellable region consults
pub(crate) struct Region<'a> {
    pub guard: &'a dyn CancellationGuard,
    pub termination: &'a TerminationHandle,
    pub observer: Option<&'a dyn TerminationObserver>,
}

impl Region<'_> {
    /// Run `body` between the guard's enter and exit checks.
    ///
    /// `exit` is called exactly once whenever `enter` succeeded, including when
    /// `body` panics; the panic resumes after `exit` has been consulted.
    pub fn run<T>(&self, operation: &str, body: impl FnOnce() -> T) -> Guarded<T> {
        if self.termination.is_requested() {
            debug!(target: "scripting", "{} skipped: termination pending", operation);
            return Guarded::Terminated;
        }

        if !self.guard.enter() {
            debug!(target: "scripting", "{} denied at region entry", operation);
            return Guarded::Terminated;
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(body));

        let terminating = self.termination.is_requested();
        if terminating {
            warn!(target: "scripting", operation, "Leaving cancellable region while terminating");
            if let Some(observer) = self.observer {
                observer.on_terminating(operation);
            }
        }

        let allowed = self.guard.exit();

        let value = match outcome {
            Ok(value) => value,
            Err(payload) => panic::resume_unwind(payload),
        };

        if !allowed || terminating {
            debug!(target: "scripting", "{} result discarded at region exit", operation);
            return Guarded::Terminated;
        }

        Guarded::Completed(value)
    }
}
