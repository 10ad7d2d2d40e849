//! Collection driven re-evaluation.
//!
//! Each completed collection cycle raises the pending signal exactly once. The
//! hook registered with the collector is one-shot: when it fires it raises the
//! signal and registers a fresh hook for the following cycle, so the chain lasts
//! as long as the collector does.
//!
//! The hook only holds a weak reference to the collector. A strong one would make
//! the collector own a hook that owns the collector, and neither would ever be freed.
//!
//! Collectors without cycle events get one of two degraded modes:
//! - [`HeartbeatMode::Polling`]: a background thread raises the signal on a fixed
//!   interval. This only approximates the cycle cadence.
//! - [`HeartbeatMode::Disabled`]: no heartbeat at all. Pacing then happens only at
//!   startup and on policy changes.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64},
        Arc, Weak,
    },
    thread::JoinHandle,
    time::Duration,
};

use atomic::Ordering;
use parking_lot::Mutex;

use crate::{
    collector::CycleEvents,
    log::Logger,
    signal::PendingSignal,
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum HeartbeatMode {
    /// One beat per completed collection cycle.
    Cycle,
    /// Fixed interval beats, the collector reports no cycle completion.
    Polling(Duration),
    /// No beats.
    Disabled,
}

struct Inner {
    cycles: Option<Weak<dyn CycleEvents>>,
    signal: Arc<PendingSignal>,
    logger: Arc<dyn Logger>,
    stopped: AtomicBool,
    /// Raised by `stop` to cut a polling wait short.
    halt: PendingSignal,
    beats: AtomicU64,
}

pub struct Heartbeat {
    inner: Arc<Inner>,
    poll_interval: Option<Duration>,
    mode: Mutex<Option<HeartbeatMode>>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl Heartbeat {
    pub fn new(
        cycles: Option<Weak<dyn CycleEvents>>,
        signal: Arc<PendingSignal>,
        poll_interval: Option<Duration>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                cycles,
                signal,
                logger,
                stopped: AtomicBool::new(false),
                halt: PendingSignal::new(),
                beats: AtomicU64::new(0),
            }),
            poll_interval,
            mode: Mutex::new(None),
            poller: Mutex::new(None),
        }
    }

    /// Establishes the first beat. Calling it again returns the mode picked the first time.
    pub fn arm(&self) -> HeartbeatMode {
        let mut mode = self.mode.lock();
        if let Some(mode) = *mode {
            return mode;
        }
        let chosen = if register_next(&self.inner) {
            HeartbeatMode::Cycle
        } else if let Some(interval) = self.poll_interval {
            self.start_polling(interval)
        } else {
            log_error!(
                self.inner.logger,
                "gctuner: collector reports no cycle completion, heartbeat disabled; \
                 pacing follows policy changes only"
            );
            HeartbeatMode::Disabled
        };
        *mode = Some(chosen);
        chosen
    }

    fn start_polling(&self, interval: Duration) -> HeartbeatMode {
        let inner = self.inner.clone();
        let spawned = std::thread::Builder::new()
            .name("pacer-heartbeat".to_string())
            .spawn(move || {
                while !inner.stopped.load(Ordering::Acquire) {
                    let halted = inner.halt.wait_timeout(interval);
                    if halted || inner.stopped.load(Ordering::Acquire) {
                        break;
                    }
                    beat(&inner);
                }
            });
        match spawned {
            Ok(handle) => {
                log_info!(
                    self.inner.logger,
                    "gctuner: collector reports no cycle completion, polling every {:?}",
                    interval
                );
                *self.poller.lock() = Some(handle);
                HeartbeatMode::Polling(interval)
            }
            Err(err) => {
                log_error!(
                    self.inner.logger,
                    "gctuner: failed to spawn heartbeat poller: {}, heartbeat disabled",
                    err
                );
                HeartbeatMode::Disabled
            }
        }
    }

    pub fn mode(&self) -> Option<HeartbeatMode> {
        *self.mode.lock()
    }

    /// Number of beats so far.
    pub fn beats(&self) -> u64 {
        self.inner.beats.load(Ordering::Relaxed)
    }

    /// Stops re-arming. A hook that is already registered fires once more without
    /// raising the signal.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::Release);
        self.inner.halt.raise();
        if let Some(handle) = self.poller.lock().take() {
            let _ = handle.join();
        }
    }
}

fn beat(inner: &Inner) {
    inner.beats.fetch_add(1, Ordering::Relaxed);
    // A pending signal already covers this cycle.
    let _ = inner.signal.raise();
}

fn on_fired(inner: Arc<Inner>) {
    if inner.stopped.load(Ordering::Acquire) {
        return;
    }
    beat(&inner);
    register_next(&inner);
}

/// Registers the next one-shot hook. Returns `false` when the collector is gone or
/// has no cycle events.
fn register_next(inner: &Arc<Inner>) -> bool {
    let cycles = match inner.cycles.as_ref().and_then(Weak::upgrade) {
        Some(cycles) => cycles,
        None => return false,
    };
    let next = inner.clone();
    cycles
        .register_cycle_hook(Box::new(move || on_fired(next)))
        .is_ok()
}
