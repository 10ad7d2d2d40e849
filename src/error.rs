use thiserror::Error;

/// Rejected [`Policy`](crate::policy::Policy) shape. The store is left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum PolicyError {
    #[error("invalid max_ram_percentage value: {0}, expected range (0, 100]")]
    MaxRamPercentage(f64),
}

/// The total memory budget could not be determined.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to get memory limit: {reason}")]
pub struct ProbeError {
    pub reason: String,
}

impl ProbeError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// A configuration source failed to produce a policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("get gc config error: {0}")]
pub struct SourceError(pub String);

/// Why a single evaluation did not reach the collector.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("check gc config error: {0}")]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Probe(#[from] ProbeError),
}

/// Failure to bring the controller up. Memoized by [`Installer`](crate::controller::Installer).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstallError {
    #[error("no pacer config source specified")]
    NoConfigSource,
    #[error("no collector specified: a memory probe and a collector applier are required")]
    NoCollector,
    #[error("failed to spawn pacer thread: {0}")]
    Spawn(String),
}
