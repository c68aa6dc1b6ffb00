//! Conditional logging macros gated on a module-level `ENABLE_LOGS` const.
//!
//! Hot-path modules (scheduler ticks, fusion, queue drains) define
//! `const ENABLE_LOGS: bool = ...;` and use these instead of the bare `log`
//! macros, so per-tick chatter can be silenced per module without touching
//! the global filter.

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}
