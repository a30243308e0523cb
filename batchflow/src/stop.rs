//! Cooperative stop requests for running executions.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Callback invoked with the stop reason.
pub type StopCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Signals a running execution to stop at its next chunk boundary.
///
/// Stopping is idempotent; only the first reason is kept.
#[derive(Default)]
pub struct StopSignal {
    stopped: AtomicBool,
    reason: RwLock<Option<String>>,
    callbacks: RwLock<Vec<StopCallback>>,
}

impl StopSignal {
    /// Creates a signal that has not been raised.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the signal.
    ///
    /// Callbacks run immediately; a panicking callback is logged and ignored.
    pub fn request_stop(&self, reason: impl Into<String>) {
        if self
            .stopped
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let reason = reason.into();
            *self.reason.write() = Some(reason.clone());

            let callbacks = self.callbacks.read();
            for callback in callbacks.iter() {
                invoke(callback.as_ref(), &reason);
            }
        }
    }

    /// Registers a callback; runs it at once if the signal is already raised.
    pub fn on_stop<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let mut callbacks = self.callbacks.write();
        if let Some(reason) = self.reason() {
            drop(callbacks);
            invoke(&callback, &reason);
        } else {
            callbacks.push(Box::new(callback));
        }
    }

    /// Returns true once the signal is raised.
    #[must_use]
    pub fn is_stop_requested(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Returns the stop reason, if raised.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }

    /// Creates a signal that is raised whenever this one is, but can also be
    /// raised on its own without affecting this one.
    #[must_use]
    pub fn child(&self) -> Arc<Self> {
        let child = Arc::new(Self::new());
        let weak = Arc::downgrade(&child);
        self.on_stop(move |reason| {
            if let Some(child) = weak.upgrade() {
                child.request_stop(reason);
            }
        });
        child
    }
}

fn invoke(callback: &(dyn Fn(&str) + Send + Sync), reason: &str) {
    if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(reason))) {
        warn!("Stop callback panicked: {:?}", e);
    }
}

impl std::fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopSignal")
            .field("stopped", &self.is_stop_requested())
            .field("reason", &self.reason())
            .finish()
    }
}
