use std::cell::Cell;
use std::time::{Duration, Instant};

use projector_bootstrap::{CancellationGuard, TerminationHandle};
use tracing::warn;

/// Cancels any guarded operation that overruns its time budget.
///
/// The budget can only be checked once the operation hands control back;
/// code stuck inside the engine is stopped by the watchdog in `main`.
pub struct DeadlineGuard {
    budget: Option<Duration>,
    termination: TerminationHandle,
    started: Cell<Option<Instant>>,
}

impl DeadlineGuard {
    pub fn new(budget: Option<Duration>, termination: TerminationHandle) -> Self {
        Self {
            budget,
            termination,
            started: Cell::new(None),
        }
    }
}

impl CancellationGuard for DeadlineGuard {
    fn enter(&self) -> bool {
        if self.termination.is_requested() {
            return false;
        }
        self.started.set(Some(Instant::now()));
        true
    }

    fn exit(&self) -> bool {
        let (Some(budget), Some(started)) = (self.budget, self.started.take()) else {
            return true;
        };

        let elapsed = started.elapsed();
        if elapsed > budget {
            warn!("Guarded operation took {:?}, over the {:?} budget", elapsed, budget);
            return false;
        }
        true
    }
}
