use crate::{error::ProbeError, util::MB};

/// Floor for live memory readings, keeps the ratio math away from tiny divisors.
pub const MIN_LIVE_SIZE: u64 = 4 * MB;

/// Source of memory readings.
pub trait MemoryProbe: Send + Sync {
    /// Total memory the process may use. Container limits take precedence over
    /// machine memory.
    fn total_memory_limit(&self) -> Result<u64, ProbeError>;

    /// Live heap size the collector paces against. Best effort: when the exact
    /// figure is unknown implementations overestimate rather than fail.
    fn live_dataset_size(&self) -> u64;
}

/// Probe reporting the system memory limit and a caller supplied live size.
pub struct SystemProbe<F> {
    live: F,
}

impl<F: Fn() -> u64 + Send + Sync> SystemProbe<F> {
    pub fn new(live: F) -> Self {
        Self { live }
    }
}

impl<F: Fn() -> u64 + Send + Sync> MemoryProbe for SystemProbe<F> {
    fn total_memory_limit(&self) -> Result<u64, ProbeError> {
        crate::system::memory_limit()
    }

    fn live_dataset_size(&self) -> u64 {
        (self.live)()
    }
}

pub(crate) fn floored_live_size(probe: &dyn MemoryProbe) -> u64 {
    probe.live_dataset_size().max(MIN_LIVE_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_size_is_floored() {
        let probe = SystemProbe::new(|| 1024);
        assert_eq!(floored_live_size(&probe), MIN_LIVE_SIZE);
        let probe = SystemProbe::new(|| 64 * MB);
        assert_eq!(floored_live_size(&probe), 64 * MB);
    }
}
