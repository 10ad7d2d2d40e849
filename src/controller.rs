//! The pacing controller.
//!
//! Startup runs one evaluation synchronously, arms the heartbeat and spawns two
//! threads:
//! - `pacer-signal` waits on the pending signal and runs an evaluation per wakeup;
//! - `pacer-watch` waits on the config source's update signal and raises the
//!   pending signal when the policy actually differs from the last applied one.
//!
//! Both loops run every unit of work behind [`guarded`], so a panic in an
//! evaluation is logged and the loop waits for its next trigger.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64},
        Arc, OnceLock, Weak,
    },
    thread::JoinHandle,
    time::Duration,
};

use atomic::Ordering;
use crossbeam_utils::atomic::AtomicCell;
use parking_lot::Mutex;

use crate::{
    calculator::{self, EvaluationInput, PacingDecision, DEFAULT_RATIO, RATIO_OFF},
    collector::{CollectorApplier, CycleEvents},
    config::{ConfigSource, StaticConfig},
    error::{EvalError, InstallError, ProbeError},
    heartbeat::{Heartbeat, HeartbeatMode},
    log::{Logger, RateLimit, TracingLogger},
    policy::Policy,
    probe::{self, MemoryProbe},
    signal::PendingSignal,
    statistics::PacerStatistics,
    task::guarded,
    util::formatted_size,
};

/// Probe failures are logged on the first and then every tenth consecutive one.
const PROBE_FAILURE_LOG_EVERY: u64 = 10;

/// Everything the controller needs. `source`, `probe` and `applier` are mandatory.
pub struct PacerOptions {
    pub source: Option<Arc<dyn ConfigSource>>,
    pub probe: Option<Arc<dyn MemoryProbe>>,
    pub applier: Option<Arc<dyn CollectorApplier>>,
    /// Cycle completion events. Held weakly so the pacer never keeps a collector alive.
    pub cycles: Option<Weak<dyn CycleEvents>>,
    pub logger: Arc<dyn Logger>,
    /// Ratio applied when the policy sets none, and the static ratio consulted
    /// when the budget is already exceeded.
    pub default_ratio: i32,
    /// Heartbeat interval for collectors without cycle events. `None` disables
    /// the heartbeat for such collectors.
    pub heartbeat_poll_interval: Option<Duration>,
}

impl Default for PacerOptions {
    fn default() -> Self {
        Self {
            source: None,
            probe: None,
            applier: None,
            cycles: None,
            logger: Arc::new(TracingLogger),
            default_ratio: DEFAULT_RATIO,
            heartbeat_poll_interval: None,
        }
    }
}

impl PacerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config_source(mut self, source: Arc<dyn ConfigSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Fixed policy, never updated.
    pub fn with_static_config(mut self, policy: Policy) -> Self {
        self.source = Some(Arc::new(StaticConfig(policy)));
        self
    }

    /// Uses `collector` as probe, applier and cycle event source.
    pub fn with_collector<C>(mut self, collector: Arc<C>) -> Self
    where
        C: MemoryProbe + CollectorApplier + CycleEvents + 'static,
    {
        self.probe = Some(collector.clone());
        self.applier = Some(collector.clone());
        let cycles: Arc<dyn CycleEvents> = collector;
        self.cycles = Some(Arc::downgrade(&cycles));
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn with_applier(mut self, applier: Arc<dyn CollectorApplier>) -> Self {
        self.applier = Some(applier);
        self
    }

    pub fn with_cycle_events(mut self, cycles: &Arc<dyn CycleEvents>) -> Self {
        self.cycles = Some(Arc::downgrade(cycles));
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_default_ratio(mut self, ratio: i32) -> Self {
        self.default_ratio = ratio;
        self
    }

    pub fn with_heartbeat_poll_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_poll_interval = Some(interval);
        self
    }
}

/// Result of one evaluation.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Evaluation {
    Applied {
        ratio: i32,
        /// Ratio the collector had before this evaluation.
        previous_ratio: i32,
        /// Present when the ratio was derived from the memory budget.
        decision: Option<PacingDecision>,
        /// Memory ceiling set by this evaluation.
        ceiling: Option<u64>,
    },
    /// The policy equals the last applied one and nothing needs recomputing.
    Skipped,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ControllerState {
    Running,
    Stopped,
}

struct Shared {
    source: Arc<dyn ConfigSource>,
    probe: Arc<dyn MemoryProbe>,
    applier: Arc<dyn CollectorApplier>,
    logger: Arc<dyn Logger>,
    default_ratio: i32,
    pending: Arc<PendingSignal>,
    updates: Option<Arc<PendingSignal>>,
    last_applied: AtomicCell<Option<Policy>>,
    applied_ratio: AtomicCell<Option<i32>>,
    applied_ceiling: AtomicCell<Option<u64>>,
    /// Ceiling the collector had before we first set one; restored when the budget is dropped.
    original_ceiling: AtomicCell<Option<Option<u64>>>,
    /// Held for a whole evaluation; `evaluate_now` may race the signal thread.
    evaluating: Mutex<()>,
    evaluations: AtomicU64,
    probe_failures: RateLimit,
    stopped: AtomicBool,
}

impl Shared {
    fn evaluate(&self) -> Result<Evaluation, EvalError> {
        let _evaluating = self.evaluating.lock();
        let result = self.check_and_apply();
        self.evaluations.fetch_add(1, Ordering::AcqRel);
        result
    }

    fn check_and_apply(&self) -> Result<Evaluation, EvalError> {
        let policy = match self.source.policy() {
            Ok(policy) => policy,
            Err(err) => {
                log_error!(self.logger, "gctuner: {}", err);
                return Err(err.into());
            }
        };
        if let Err(err) = policy.check_valid() {
            log_error!(self.logger, "gctuner: check gc config error: {}", err);
            return Err(err.into());
        }

        let unchanged = self.last_applied.load() == Some(policy);
        let evaluation = match policy.budget_percent() {
            Some(_) if unchanged && self.applier.supports_memory_ceiling() => Evaluation::Skipped,
            Some(percent) if self.applier.supports_memory_ceiling() => {
                self.apply_ceiling(&policy, percent)?
            }
            // Budget pacing by ratio tracks the live heap, so it is redone on every trigger.
            Some(percent) => self.apply_budget_ratio(&policy, percent)?,
            None if unchanged => Evaluation::Skipped,
            None => self.apply_static(&policy),
        };

        self.last_applied.store(Some(policy));
        Ok(evaluation)
    }

    fn total_memory(&self) -> Result<u64, ProbeError> {
        match self.probe.total_memory_limit() {
            Ok(total) => {
                self.probe_failures.reset();
                Ok(total)
            }
            Err(err) => {
                if self.probe_failures.should_log() {
                    log_error!(self.logger, "gctuner: failed to adjust GC, {}", err);
                }
                Err(err)
            }
        }
    }

    fn set_ratio(&self, ratio: i32) -> i32 {
        let previous = self.applier.set_pacing_ratio(ratio);
        self.applied_ratio.store(Some(ratio));
        previous
    }

    fn apply_ceiling(&self, policy: &Policy, percent: f64) -> Result<Evaluation, EvalError> {
        let total = self.total_memory()?;
        let limit = (percent / 100.0 * total as f64) as u64;
        // Without an explicit ratio only the ceiling triggers collections.
        let ratio = policy.target_ratio().unwrap_or(RATIO_OFF);
        let previous_ratio = self.set_ratio(ratio);
        let previous_ceiling = self.applier.set_memory_ceiling(Some(limit));
        if self.original_ceiling.load().is_none() {
            self.original_ceiling.store(Some(previous_ceiling));
        }
        self.applied_ceiling.store(Some(limit));
        log_info!(
            self.logger,
            "gctuner: set memory limit {}, pacing ratio {}",
            formatted_size(limit),
            ratio
        );
        Ok(Evaluation::Applied {
            ratio,
            previous_ratio,
            decision: None,
            ceiling: Some(limit),
        })
    }

    fn apply_budget_ratio(&self, policy: &Policy, percent: f64) -> Result<Evaluation, EvalError> {
        let total = self.total_memory()?;
        let live = probe::floored_live_size(&*self.probe);
        let ceiling_ratio = if policy.gc_percent > 0 {
            policy.gc_percent as f64
        } else {
            f64::INFINITY
        };
        let decision = calculator::decide(&EvaluationInput {
            budget_percent: percent,
            total_memory: total,
            live_memory: live,
            previous_ratio: self.applied_ratio.load().unwrap_or(RATIO_OFF),
            ceiling_ratio,
            fallback_ratio: self.default_ratio,
        });
        let previous_ratio = self.set_ratio(decision.ratio);
        log_info!(
            self.logger,
            "gctuner: limit {:.2}% ({}). adjusting pacing ratio to {} ({:?}), live {}",
            percent,
            formatted_size((percent / 100.0 * total as f64) as u64),
            decision.ratio,
            decision.reason,
            formatted_size(live)
        );
        Ok(Evaluation::Applied {
            ratio: decision.ratio,
            previous_ratio,
            decision: Some(decision),
            ceiling: None,
        })
    }

    fn apply_static(&self, policy: &Policy) -> Evaluation {
        if self.applied_ceiling.take().is_some() {
            let restore = self.original_ceiling.take().flatten();
            self.applier.set_memory_ceiling(restore);
            log_info!(
                self.logger,
                "gctuner: reset memory limit {}",
                formatted_size(restore.unwrap_or(u64::MAX))
            );
        }
        let ratio = match policy.target_ratio() {
            Some(ratio) => {
                log_info!(self.logger, "gctuner: set pacing ratio {}", ratio);
                ratio
            }
            None => {
                log_info!(
                    self.logger,
                    "gctuner: set pacing ratio to default: {}",
                    self.default_ratio
                );
                self.default_ratio
            }
        };
        let previous_ratio = self.set_ratio(ratio);
        Evaluation::Applied {
            ratio,
            previous_ratio,
            decision: None,
            ceiling: None,
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn consume_signals(&self) {
        loop {
            self.pending.wait();
            if self.is_stopped() {
                break;
            }
            let _ = guarded("check_and_apply", &*self.logger, || self.evaluate());
        }
    }

    fn watch_config_updates(&self) {
        let updates = match &self.updates {
            Some(updates) => updates.clone(),
            // Static sources never change.
            None => return,
        };
        loop {
            updates.wait();
            if self.is_stopped() {
                break;
            }
            let _ = guarded("watch_config_update", &*self.logger, || {
                match self.source.policy() {
                    Ok(policy) if self.last_applied.load() == Some(policy) => {}
                    Ok(_) => {
                        self.pending.raise();
                    }
                    Err(err) => log_error!(self.logger, "gctuner: {}", err),
                }
            });
        }
    }
}

pub struct Controller {
    shared: Arc<Shared>,
    heartbeat: Heartbeat,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Controller {
    /// Starts a controller. Prefer [`Installer::install`], which makes sure only
    /// one controller paces a collector.
    pub fn start(options: PacerOptions) -> Result<Arc<Controller>, InstallError> {
        let logger = options.logger;
        let source = match options.source {
            Some(source) => source,
            None => {
                let err = InstallError::NoConfigSource;
                log_error!(logger, "error while init gctuner: {}", err);
                return Err(err);
            }
        };
        let (probe, applier) = match (options.probe, options.applier) {
            (Some(probe), Some(applier)) => (probe, applier),
            _ => {
                let err = InstallError::NoCollector;
                log_error!(logger, "error while init gctuner: {}", err);
                return Err(err);
            }
        };

        let pending = Arc::new(PendingSignal::new());
        let updates = source.updates();
        let shared = Arc::new(Shared {
            source,
            probe,
            applier,
            logger: logger.clone(),
            default_ratio: options.default_ratio,
            pending: pending.clone(),
            updates,
            last_applied: AtomicCell::new(None),
            applied_ratio: AtomicCell::new(None),
            applied_ceiling: AtomicCell::new(None),
            original_ceiling: AtomicCell::new(None),
            evaluating: Mutex::new(()),
            evaluations: AtomicU64::new(0),
            probe_failures: RateLimit::new(PROBE_FAILURE_LOG_EVERY),
            stopped: AtomicBool::new(false),
        });
        let controller = Arc::new(Controller {
            heartbeat: Heartbeat::new(
                options.cycles,
                pending,
                options.heartbeat_poll_interval,
                logger,
            ),
            shared: shared.clone(),
            threads: Mutex::new(Vec::with_capacity(2)),
        });

        let _ = guarded("check_and_apply", &*shared.logger, || shared.evaluate());
        controller.heartbeat.arm();

        let consumer = shared.clone();
        controller.spawn("pacer-signal", move || consumer.consume_signals())?;
        let watcher = shared;
        controller.spawn("pacer-watch", move || watcher.watch_config_updates())?;
        Ok(controller)
    }

    fn spawn(&self, name: &str, f: impl FnOnce() + Send + 'static) -> Result<(), InstallError> {
        match std::thread::Builder::new().name(name.to_string()).spawn(f) {
            Ok(handle) => {
                self.threads.lock().push(handle);
                Ok(())
            }
            Err(err) => {
                let err = InstallError::Spawn(err.to_string());
                log_error!(self.shared.logger, "error while init gctuner: {}", err);
                self.shutdown();
                Err(err)
            }
        }
    }

    /// Runs one evaluation on the calling thread.
    pub fn evaluate_now(&self) -> Result<Evaluation, EvalError> {
        self.shared.evaluate()
    }

    /// Asks the background thread for an evaluation. Returns `false` if one was already pending.
    pub fn request_evaluation(&self) -> bool {
        self.shared.pending.raise()
    }

    pub fn state(&self) -> ControllerState {
        if self.shared.is_stopped() {
            ControllerState::Stopped
        } else {
            ControllerState::Running
        }
    }

    pub fn heartbeat_mode(&self) -> Option<HeartbeatMode> {
        self.heartbeat.mode()
    }

    /// Evaluations run so far, including skipped and failed ones.
    pub fn evaluations(&self) -> u64 {
        self.shared.evaluations.load(Ordering::Acquire)
    }

    pub fn last_applied(&self) -> Option<Policy> {
        self.shared.last_applied.load()
    }

    pub fn statistics(&self) -> PacerStatistics {
        PacerStatistics {
            evaluations: self.evaluations(),
            heartbeats: self.heartbeat.beats(),
            heartbeat_mode: self.heartbeat.mode(),
            pacing_ratio: self.shared.applied_ratio.load(),
            memory_ceiling: self.shared.applied_ceiling.load(),
            policy: self.last_applied(),
        }
    }

    /// Pacer threads that have not exited yet.
    #[cfg(test)]
    pub(crate) fn live_threads(&self) -> usize {
        self.threads
            .lock()
            .iter()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Stops the heartbeat and joins both pacer threads. Must not be called from a
    /// pacer thread. Calling it again is a no-op.
    pub fn shutdown(&self) {
        if self.shared.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.heartbeat.stop();
        self.shared.pending.raise();
        if let Some(updates) = &self.shared.updates {
            updates.raise();
        }
        let threads = std::mem::take(&mut *self.threads.lock());
        for handle in threads {
            let _ = handle.join();
        }
        log_info!(self.shared.logger, "gctuner: stopped");
    }
}

/// Once-only initialization guard. The first [`install`](Self::install) decides the
/// outcome, every later call returns it unchanged.
pub struct Installer {
    outcome: OnceLock<Result<Arc<Controller>, InstallError>>,
}

impl Installer {
    pub const fn new() -> Self {
        Self {
            outcome: OnceLock::new(),
        }
    }

    pub fn install(&self, options: PacerOptions) -> Result<Arc<Controller>, InstallError> {
        self.outcome
            .get_or_init(|| Controller::start(options))
            .clone()
    }

    /// The installed controller, if installation happened and succeeded.
    pub fn controller(&self) -> Option<Arc<Controller>> {
        self.outcome.get().and_then(|outcome| outcome.clone().ok())
    }
}

impl Default for Installer {
    fn default() -> Self {
        Self::new()
    }
}
