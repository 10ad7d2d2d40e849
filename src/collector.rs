//! Boundary to the collector being paced.

/// Applies pacing decisions to a live collector. Re-applying the same value must be cheap.
pub trait CollectorApplier: Send + Sync {
    /// Sets the pacing ratio and returns the previous one.
    /// [`RATIO_OFF`](crate::calculator::RATIO_OFF) disables ratio driven collection.
    fn set_pacing_ratio(&self, ratio: i32) -> i32;

    /// Returns `true` if the collector honours an absolute memory ceiling next to the ratio.
    fn supports_memory_ceiling(&self) -> bool {
        false
    }

    /// Sets (or with `None` removes) the absolute memory ceiling and returns the previous one.
    fn set_memory_ceiling(&self, ceiling: Option<u64>) -> Option<u64> {
        let _ = ceiling;
        None
    }
}

/// One-shot callback run after a completed collection cycle.
pub type CycleHook = Box<dyn FnOnce() + Send>;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Unsupported;

/// Cycle completion events exposed by the collector.
pub trait CycleEvents: Send + Sync {
    /// Registers `hook` to run once, at the end of the next completed cycle.
    ///
    /// Hooks run on the collector's thread and must stay cheap. A collector that
    /// cannot report cycle completion returns [`Unsupported`].
    fn register_cycle_hook(&self, hook: CycleHook) -> Result<(), Unsupported>;
}
