//! Panic boundary for pacer work.
//!
//! A panic inside [`guarded`] is caught, logged with the task name, panic message and
//! the backtrace of the panicking frame, and turned into `None`. The calling loop keeps
//! going on its next trigger.

use std::{
    any::Any,
    cell::{Cell, RefCell},
    panic::{self, AssertUnwindSafe},
    sync::Once,
};

use backtrace::Backtrace;

use crate::log::Logger;

thread_local! {
    static GUARDED: Cell<bool> = Cell::new(false);
    static LAST_BACKTRACE: RefCell<Option<Backtrace>> = RefCell::new(None);
}

static INSTALL_HOOK: Once = Once::new();

/// Chains a panic hook that records a backtrace for guarded threads. Panics
/// outside of [`guarded`] go to the previous hook untouched.
fn install_panic_hook() {
    INSTALL_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let guarded = GUARDED.with(|g| g.get());
            if guarded {
                let bt = Backtrace::new();
                LAST_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(bt));
            } else {
                previous(info);
            }
        }));
    });
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "Box<dyn Any>"
    }
}

/// Runs `f`, catching and logging any panic.
pub fn guarded<R>(name: &str, logger: &dyn Logger, f: impl FnOnce() -> R) -> Option<R> {
    install_panic_hook();
    let was_guarded = GUARDED.with(|g| g.replace(true));
    let result = panic::catch_unwind(AssertUnwindSafe(f));
    GUARDED.with(|g| g.set(was_guarded));

    match result {
        Ok(value) => Some(value),
        Err(payload) => {
            let bt = LAST_BACKTRACE.with(|slot| slot.borrow_mut().take());
            match bt {
                Some(bt) => log_error!(
                    logger,
                    "{} panic: {}, stack: {:?}",
                    name,
                    panic_message(&*payload),
                    bt
                ),
                None => log_error!(
                    logger,
                    "{} panic: {}, stack: <unavailable>",
                    name,
                    panic_message(&*payload)
                ),
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::testing::MemoryLogger;

    #[test]
    fn passes_values_through() {
        let logger = MemoryLogger::default();
        assert_eq!(guarded("add", &logger, || 1 + 1), Some(2));
        assert!(logger.errors.lock().is_empty());
    }

    #[test]
    fn catches_and_logs_panics() {
        let logger = MemoryLogger::default();
        let result: Option<()> = guarded("check_and_apply", &logger, || panic!("probe exploded"));
        assert!(result.is_none());
        assert_eq!(logger.errors_containing("check_and_apply panic: probe exploded"), 1);
        assert_eq!(logger.errors_containing("stack:"), 1);

        // The boundary is reusable after a panic.
        assert_eq!(guarded("again", &logger, || 7), Some(7));
    }

    #[test]
    fn formatted_panic_messages() {
        let logger = MemoryLogger::default();
        let n = 3;
        let _ = guarded("task", &logger, || -> () { panic!("failed after {} tries", n) });
        assert_eq!(logger.errors_containing("task panic: failed after 3 tries"), 1);
    }
}
