use std::fmt;

/// Two level log sink used by the pacer. Called from the pacer threads and from
/// collector threads running heartbeat hooks, so it has to be thread safe.
pub trait Logger: Send + Sync {
    fn info(&self, args: fmt::Arguments<'_>);
    fn error(&self, args: fmt::Arguments<'_>);
}

/// Default sink, forwards to `tracing` under the `comet_pacer` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn info(&self, args: fmt::Arguments<'_>) {
        tracing::info!(target: "comet_pacer", "{}", args);
    }

    fn error(&self, args: fmt::Arguments<'_>) {
        tracing::error!(target: "comet_pacer", "{}", args);
    }
}

macro_rules! log_info {
    ($logger: expr, $($t:tt)*) => {
        $logger.info(format_args!($($t)*))
    };
}

macro_rules! log_error {
    ($logger: expr, $($t:tt)*) => {
        $logger.error(format_args!($($t)*))
    };
}

/// Logs only every `every`-th call, starting with the first one.
pub(crate) struct RateLimit {
    count: std::sync::atomic::AtomicU64,
    every: u64,
}

impl RateLimit {
    pub(crate) const fn new(every: u64) -> Self {
        Self {
            count: std::sync::atomic::AtomicU64::new(0),
            every,
        }
    }

    pub(crate) fn should_log(&self) -> bool {
        let n = self.count.fetch_add(1, atomic::Ordering::Relaxed);
        n % self.every == 0
    }

    pub(crate) fn reset(&self) {
        self.count.store(0, atomic::Ordering::Relaxed);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use parking_lot::Mutex;

    use super::*;

    /// Collects messages so tests can assert on them.
    #[derive(Default)]
    pub struct MemoryLogger {
        pub infos: Mutex<Vec<String>>,
        pub errors: Mutex<Vec<String>>,
    }

    impl MemoryLogger {
        pub fn errors_containing(&self, needle: &str) -> usize {
            self.errors
                .lock()
                .iter()
                .filter(|m| m.contains(needle))
                .count()
        }
    }

    impl Logger for MemoryLogger {
        fn info(&self, args: fmt::Arguments<'_>) {
            self.infos.lock().push(args.to_string());
        }

        fn error(&self, args: fmt::Arguments<'_>) {
            self.errors.lock().push(args.to_string());
        }
    }

    #[test]
    fn rate_limit_every_tenth() {
        let limit = RateLimit::new(10);
        let logged: Vec<bool> = (0..21).map(|_| limit.should_log()).collect();
        assert!(logged[0] && logged[10] && logged[20]);
        assert_eq!(logged.iter().filter(|l| **l).count(), 3);
        limit.reset();
        assert!(limit.should_log());
    }
}
