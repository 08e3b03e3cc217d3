//! Deferred Operations
//!
//! The scheduler never blocks; everything it wants to do later is posted
//! to the control queue as a delayed task. These helpers make those
//! posts individually cancellable and let the policy expiry check be
//! re-armed without flooding the queue.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::queue::{TaskFn, TaskRunner};

/// Generation-counted cancellation for posted closures.
///
/// Cancelling bumps the generation; closures wrapped before the bump
/// become no-ops when they eventually run. A stale closure checks its
/// captured generation instead of relying on object lifetime.
#[derive(Debug, Default)]
pub(crate) struct Cancelable {
    generation: Arc<AtomicU64>,
}

impl Cancelable {
    pub fn new() -> Self {
        Self {
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Invalidate every closure wrapped so far
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Wrap a closure so it only runs if not cancelled in the meantime
    pub fn wrap(&self, task: impl FnOnce() + Send + 'static) -> TaskFn {
        let generation = Arc::clone(&self.generation);
        let armed_at = generation.load(Ordering::Acquire);
        Box::new(move || {
            if generation.load(Ordering::Acquire) == armed_at {
                task();
            }
        })
    }
}

/// Runs a fixed callback at the earliest requested deadline.
///
/// Re-arming with a deadline later than the pending one is ignored; the
/// pending wake-up only ever moves earlier.
pub(crate) struct DeadlineRunner {
    runner: Arc<dyn TaskRunner>,
    callback: Arc<dyn Fn() + Send + Sync>,
    pending: Arc<Mutex<Option<Instant>>>,
    cancelable: Cancelable,
}

impl DeadlineRunner {
    pub fn new(runner: Arc<dyn TaskRunner>, callback: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            runner,
            callback: Arc::new(callback),
            pending: Arc::new(Mutex::new(None)),
            cancelable: Cancelable::new(),
        }
    }

    pub fn set_deadline(&self, delay: Duration, now: Instant) {
        let deadline = now + delay;
        let mut pending = self.pending.lock().unwrap();
        if pending.is_some_and(|current| deadline >= current) {
            return;
        }
        *pending = Some(deadline);
        self.cancelable.cancel();

        let callback = Arc::clone(&self.callback);
        let pending_slot = Arc::clone(&self.pending);
        self.runner.post_delayed_task(
            self.cancelable.wrap(move || {
                *pending_slot.lock().unwrap() = None;
                callback();
            }),
            delay,
        );
    }

    pub fn cancel(&self) {
        *self.pending.lock().unwrap() = None;
        self.cancelable.cancel();
    }
}

impl fmt::Debug for DeadlineRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeadlineRunner")
            .field("pending", &*self.pending.lock().unwrap())
            .finish()
    }
}
