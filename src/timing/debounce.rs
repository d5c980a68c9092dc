use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::clock::{system_clock, Clock};

/// Trailing-edge debouncer.
///
/// Every call cancels the pending invocation and schedules a new one `wait`
/// later, so only the last call of a burst reaches the wrapped function.
/// Calls must be made from within a tokio runtime.
pub struct Debouncer<A> {
    f: Arc<dyn Fn(A) + Send + Sync>,
    wait: Duration,
    clock: Arc<dyn Clock>,
    pending: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl<A: Send + 'static> Debouncer<A> {
    pub fn new<F>(f: F, wait: Duration) -> Self
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        Self::with_clock(f, wait, system_clock())
    }

    pub fn with_clock<F>(f: F, wait: Duration, clock: Arc<dyn Clock>) -> Self
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        Self {
            f: Arc::new(f),
            wait,
            clock,
            pending: Arc::new(Mutex::new(None)),
        }
    }

    fn pending(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Schedule `f(arg)` after the wait, replacing any pending invocation
    pub fn call(&self, arg: A) {
        let f = self.f.clone();
        let clock = self.clock.clone();
        let wait = self.wait;

        let mut pending = self.pending();
        if let Some(previous) = pending.take() {
            previous.abort();
        }
        *pending = Some(tokio::spawn(async move {
            clock.sleep(wait).await;
            f(arg);
        }));
    }

    /// Drop the pending invocation; returns whether one was waiting
    pub fn cancel(&self) -> bool {
        match self.pending().take() {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl<A> Clone for Debouncer<A> {
    fn clone(&self) -> Self {
        Self {
            f: self.f.clone(),
            wait: self.wait,
            clock: self.clock.clone(),
            pending: self.pending.clone(),
        }
    }
}

/// Wrap `f` in a [`Debouncer`]
pub fn debounce<A, F>(f: F, wait: Duration) -> Debouncer<A>
where
    A: Send + 'static,
    F: Fn(A) + Send + Sync + 'static,
{
    Debouncer::new(f, wait)
}
