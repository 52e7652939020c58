//! Host-side collaborators consulted by the bootstrap layer
//!
//! The host supplies the cancellation guard, the sink for script log
//! messages, the module resolver and an optional termination observer.
//! Everything not supplied falls back to a harmless default.

use std::rc::Rc;

use tracing::info;

use crate::cancellation::{AllowAll, CancellationGuard, TerminationObserver};
use crate::modules::{ModuleHandle, ModuleRequest, ModuleResolver, NoModules};

/// Receives text passed to the script-visible `log` function
pub trait LogHandler {
    fn log(&self, message: &str);
}

impl<F> LogHandler for F
where
    F: Fn(&str),
{
    fn log(&self, message: &str) {
        self(message)
    }
}

/// Forwards script log messages to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLog;

impl LogHandler for TracingLog {
    fn log(&self, message: &str) {
        info!(target: "script", "{}", message);
    }
}

/// The set of host callbacks one bootstrap instance is bound to
pub struct HostBindings {
    guard: Rc<dyn CancellationGuard>,
    log: Box<dyn LogHandler>,
    resolver: Box<dyn ModuleResolver>,
    observer: Option<Box<dyn TerminationObserver>>,
}

impl HostBindings {
    pub fn builder() -> HostBindingsBuilder {
        HostBindingsBuilder::new()
    }

    pub fn guard(&self) -> &dyn CancellationGuard {
        self.guard.as_ref()
    }

    pub(crate) fn observer(&self) -> Option<&dyn TerminationObserver> {
        self.observer.as_deref()
    }

    pub(crate) fn log(&self, message: &str) {
        self.log.log(message);
    }

    pub(crate) fn resolve_module(&self, request: ModuleRequest<'_>) -> Option<ModuleHandle> {
        self.resolver.resolve(request)
    }
}

impl Default for HostBindings {
    fn default() -> Self {
        HostBindingsBuilder::new().build()
    }
}

/// Builder for [`HostBindings`]
pub struct HostBindingsBuilder {
    guard: Option<Rc<dyn CancellationGuard>>,
    log: Option<Box<dyn LogHandler>>,
    resolver: Option<Box<dyn ModuleResolver>>,
    observer: Option<Box<dyn TerminationObserver>>,
}

impl HostBindingsBuilder {
    pub fn new() -> Self {
        Self {
            guard: None,
            log: None,
            resolver: None,
            observer: None,
        }
    }

    /// Guard consulted around every call into script code.
    ///
    /// The guard stays shared with the host, which keeps its own `Rc` to
    /// flip cancellation state.
    pub fn with_guard(mut self, guard: Rc<dyn CancellationGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn with_log_handler(mut self, handler: impl LogHandler + 'static) -> Self {
        self.log = Some(Box::new(handler));
        self
    }

    pub fn with_module_resolver(mut self, resolver: impl ModuleResolver + 'static) -> Self {
        self.resolver = Some(Box::new(resolver));
        self
    }

    pub fn with_termination_observer(
        mut self,
        observer: impl TerminationObserver + 'static,
    ) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn build(self) -> HostBindings {
        HostBindings {
            guard: self.guard.unwrap_or_else(|| Rc::new(AllowAll)),
            log: self.log.unwrap_or_else(|| Box::new(TracingLog)),
            resolver: self.resolver.unwrap_or_else(|| Box::new(NoModules)),
            observer: self.observer,
        }
    }
}

impl Default for HostBindingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
