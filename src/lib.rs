//! Adaptive pacing for tracing garbage collectors.
//!
//! The pacer keeps a process under a memory budget by recomputing the collector's
//! pacing ratio (how far the heap may grow past the live set before the next cycle)
//! after every completed collection cycle and on every policy change.
//!
//! ```no_run
//! use std::sync::Arc;
//! use pacer::{AccountingHeap, DynamicConfig, Installer, PacerOptions, Policy};
//!
//! static PACER: Installer = Installer::new();
//!
//! let heap = Arc::new(AccountingHeap::default());
//! let config = Arc::new(DynamicConfig::new(Policy::budget(70.0)).unwrap());
//! let controller = PACER
//!     .install(
//!         PacerOptions::new()
//!             .with_config_source(config.clone())
//!             .with_collector(heap.clone()),
//!     )
//!     .unwrap();
//!
//! config.set(Policy::ratio(200)).unwrap();
//! println!("{}", controller.statistics());
//! ```

#[macro_use]
mod log;

pub mod calculator;
pub mod collector;
pub mod config;
pub mod controller;
pub mod error;
pub mod heap;
pub mod heartbeat;
pub mod policy;
pub mod probe;
pub mod signal;
pub mod statistics;
pub mod system;
pub mod task;
pub mod util;

pub use calculator::{PacingDecision, Reason, DEFAULT_RATIO, MIN_RATIO, RATIO_OFF};
pub use collector::{CollectorApplier, CycleEvents, CycleHook, Unsupported};
pub use config::{ConfigSource, DynamicConfig, StaticConfig};
pub use controller::{Controller, ControllerState, Evaluation, Installer, PacerOptions};
pub use error::{EvalError, InstallError, PolicyError, ProbeError, SourceError};
pub use heap::{AccountingHeap, HeapOptions};
pub use heartbeat::HeartbeatMode;
pub use log::{Logger, TracingLogger};
pub use policy::Policy;
pub use probe::{MemoryProbe, SystemProbe, MIN_LIVE_SIZE};
pub use signal::PendingSignal;
pub use statistics::PacerStatistics;
