//! Shutdown coordination and health tracking.

use crate::{LoaderError, Metrics};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicBool, Ordering},
};
use tokio_util::sync::CancellationToken;

type TerminatingHook = Box<dyn FnOnce(Option<LoaderError>) + Send>;

/// A one-shot shutdown switch with a recorded cause.
///
/// The first call to [`Shutter::shutdown`] wins: it records the cause, cancels the
/// [`CancellationToken`] observed by the tasks bound to this shutter and runs every hook
/// registered with [`Shutter::on_terminating`]. Later calls are no-ops.
///
/// Hooks run outside of the internal lock, so a hook may shut down another shutter whose hooks
/// call back into this one.
#[derive(Clone)]
pub struct Shutter {
    inner: Arc<ShutterInner>,
}

struct ShutterInner {
    name: &'static str,
    token: CancellationToken,
    state: Mutex<ShutterState>,
}

#[derive(Default)]
struct ShutterState {
    cause: Option<LoaderError>,
    hooks: Vec<TerminatingHook>,
}

impl Shutter {
    /// Creates a new [`Shutter`]. `name` is used in logs.
    pub fn new(name: &'static str) -> Self {
        Self {
            inner: Arc::new(ShutterInner {
                name,
                token: CancellationToken::new(),
                state: Mutex::new(ShutterState::default()),
            }),
        }
    }

    /// Returns the token cancelled when this shutter terminates.
    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    /// Returns true once shutdown has started.
    pub fn is_terminating(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Returns the error the shutter was shut down with, if any.
    pub fn cause(&self) -> Option<LoaderError> {
        self.state().cause.clone()
    }

    /// Registers a hook run once when shutdown starts.
    ///
    /// If the shutter is already terminating, the hook runs immediately.
    pub fn on_terminating<F>(&self, hook: F)
    where
        F: FnOnce(Option<LoaderError>) + Send + 'static,
    {
        let mut state = self.state();
        if self.is_terminating() {
            let cause = state.cause.clone();
            drop(state);
            hook(cause);
            return;
        }
        state.hooks.push(Box::new(hook));
    }

    /// Starts shutdown with an optional error cause.
    pub fn shutdown(&self, cause: Option<LoaderError>) {
        let hooks = {
            let mut state = self.state();
            if self.is_terminating() {
                return;
            }
            state.cause = cause.clone();
            self.inner.token.cancel();
            core::mem::take(&mut state.hooks)
        };

        match &cause {
            Some(err) => {
                warn!(target: "lifecycle", shutter = self.inner.name, %err, "Shutting down")
            }
            None => debug!(target: "lifecycle", shutter = self.inner.name, "Shutting down"),
        }

        for hook in hooks {
            hook(cause.clone());
        }
    }

    /// Resolves once shutdown has started.
    pub async fn terminating(&self) {
        self.inner.token.cancelled().await
    }

    fn state(&self) -> MutexGuard<'_, ShutterState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl core::fmt::Debug for Shutter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.state();
        f.debug_struct("Shutter")
            .field("name", &self.inner.name)
            .field("terminating", &self.is_terminating())
            .field("cause", &state.cause)
            .field("hooks", &state.hooks.len())
            .finish()
    }
}

/// The liveness flag exposed to health probes.
///
/// Starts unhealthy.
#[derive(Debug, Clone, Default)]
pub struct HealthFlag(Arc<AtomicBool>);

impl HealthFlag {
    /// Returns the current health.
    pub fn is_healthy(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Marks the loader healthy.
    pub fn set_healthy(&self) {
        if !self.0.swap(true, Ordering::AcqRel) {
            Metrics::record_health(true);
        }
    }

    /// Marks the loader unhealthy.
    pub fn set_unhealthy(&self) {
        if self.0.swap(false, Ordering::AcqRel) {
            Metrics::record_health(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CommitError;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_shutdown_records_first_cause() {
        let shutter = Shutter::new("test");
        assert!(!shutter.is_terminating());

        shutter.shutdown(Some(LoaderError::Flush(CommitError::NotFound)));
        shutter.shutdown(None);

        assert!(shutter.is_terminating());
        assert!(shutter.token().is_cancelled());
        assert_eq!(shutter.cause(), Some(LoaderError::Flush(CommitError::NotFound)));
    }

    #[test]
    fn test_hooks_run_once() {
        let shutter = Shutter::new("test");
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        shutter.on_terminating(move |cause| {
            assert!(cause.is_none());
            counter.fetch_add(1, Ordering::SeqCst);
        });

        shutter.shutdown(None);
        shutter.shutdown(Some(LoaderError::PipelineNotBuilt));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(shutter.cause(), None);
    }

    #[test]
    fn test_hook_registered_late_runs_immediately() {
        let shutter = Shutter::new("test");
        shutter.shutdown(Some(LoaderError::PipelineNotBuilt));

        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        shutter.on_terminating(move |cause| *slot.lock().unwrap() = cause);

        assert_eq!(*seen.lock().unwrap(), Some(LoaderError::PipelineNotBuilt));
    }

    #[test]
    fn test_linked_shutters_cascade_both_ways() {
        let source = Shutter::new("source");
        let loader = Shutter::new("loader");

        let linked = loader.clone();
        source.on_terminating(move |cause| linked.shutdown(cause));
        let linked = source.clone();
        loader.on_terminating(move |cause| linked.shutdown(cause));

        source.shutdown(Some(LoaderError::PipelineNotBuilt));

        assert!(loader.is_terminating());
        assert_eq!(loader.cause(), Some(LoaderError::PipelineNotBuilt));

        let source = Shutter::new("source");
        let loader = Shutter::new("loader");
        let linked = source.clone();
        loader.on_terminating(move |cause| linked.shutdown(cause));

        loader.shutdown(None);

        assert!(source.is_terminating());
        assert_eq!(source.cause(), None);
    }

    #[tokio::test]
    async fn test_terminating_resolves_after_shutdown() {
        let shutter = Shutter::new("test");
        let waiter = shutter.clone();
        let handle = tokio::spawn(async move { waiter.terminating().await });

        shutter.shutdown(None);

        handle.await.unwrap();
    }

    #[test]
    fn test_health_flag_transitions() {
        let health = HealthFlag::default();
        assert!(!health.is_healthy());

        health.set_healthy();
        assert!(health.is_healthy());
        assert!(health.clone().is_healthy());

        health.set_unhealthy();
        assert!(!health.is_healthy());
    }
}
