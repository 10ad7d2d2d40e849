use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Capacity-1 notification slot.
///
/// Raising an already pending signal is a no-op: the consumer only learns that
/// "something changed" and re-reads whatever state it cares about.
pub struct PendingSignal {
    pending: Mutex<bool>,
    cv_wakeup: Condvar,
}

impl PendingSignal {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(false),
            cv_wakeup: Condvar::new(),
        }
    }

    /// Sets the slot. Returns `false` if it was already set.
    pub fn raise(&self) -> bool {
        let mut pending = self.pending.lock();
        if *pending {
            return false;
        }
        *pending = true;
        self.cv_wakeup.notify_one();
        true
    }

    pub fn is_pending(&self) -> bool {
        *self.pending.lock()
    }

    /// Consumes the signal without blocking.
    pub fn take(&self) -> bool {
        std::mem::replace(&mut *self.pending.lock(), false)
    }

    /// Blocks until the signal is raised, then consumes it.
    pub fn wait(&self) {
        let mut pending = self.pending.lock();
        while !*pending {
            self.cv_wakeup.wait(&mut pending);
        }
        *pending = false;
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`. Returns `true` if the signal was consumed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pending = self.pending.lock();
        while !*pending {
            if self.cv_wakeup.wait_until(&mut pending, deadline).timed_out() {
                break;
            }
        }
        std::mem::replace(&mut *pending, false)
    }
}

impl Default for PendingSignal {
    fn default() -> Self {
        Self::new()
    }
}
