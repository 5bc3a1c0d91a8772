//! Injected logging capability.
//!
//! Components log through the `Logger` they were constructed with instead of
//! whatever subscriber happens to be global. The default logger discards
//! everything, which keeps tests quiet.

use std::fmt;
use tracing::Dispatch;

#[derive(Clone)]
pub struct Logger {
    dispatch: Dispatch,
}

impl Logger {
    /// Logger that discards all events.
    pub fn noop() -> Self {
        Self {
            dispatch: Dispatch::none(),
        }
    }

    /// Logger backed by the given dispatcher.
    pub fn new(dispatch: Dispatch) -> Self {
        Self { dispatch }
    }

    /// Run `f` with this logger's dispatcher as the default.
    ///
    /// `f` must not await; log events are emitted inside the closure.
    pub fn scope<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.dispatch, f)
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::noop()
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").finish_non_exhaustive()
    }
}
