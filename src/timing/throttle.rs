use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::clock::{system_clock, Clock};

/// Leading-edge throttle.
///
/// The first call runs immediately and opens a window of `limit`; calls inside
/// the window are dropped. The first call after the window runs and opens the
/// next one.
pub struct Throttle<A> {
    f: Arc<dyn Fn(A) + Send + Sync>,
    limit: Duration,
    clock: Arc<dyn Clock>,
    last_run: Arc<Mutex<Option<Instant>>>,
}

impl<A> Throttle<A> {
    pub fn new<F>(f: F, limit: Duration) -> Self
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        Self::with_clock(f, limit, system_clock())
    }

    pub fn with_clock<F>(f: F, limit: Duration, clock: Arc<dyn Clock>) -> Self
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        Self {
            f: Arc::new(f),
            limit,
            clock,
            last_run: Arc::new(Mutex::new(None)),
        }
    }

    /// Run the wrapped function unless a window is open; returns whether it ran
    pub fn call(&self, arg: A) -> bool {
        let now = self.clock.now();
        {
            let mut last_run = self.last_run.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(previous) = *last_run {
                if now.saturating_duration_since(previous) < self.limit {
                    return false;
                }
            }
            *last_run = Some(now);
        }
        (self.f)(arg);
        true
    }
}

impl<A> Clone for Throttle<A> {
    fn clone(&self) -> Self {
        Self {
            f: self.f.clone(),
            limit: self.limit,
            clock: self.clock.clone(),
            last_run: self.last_run.clone(),
        }
    }
}

/// Wrap `f` in a leading-edge [`Throttle`]
pub fn throttle<A, F>(f: F, limit: Duration) -> Throttle<A>
where
    F: Fn(A) + Send + Sync + 'static,
{
    Throttle::new(f, limit)
}
