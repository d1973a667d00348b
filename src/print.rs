//! Logging helpers: every log line is tagged with the identity of the local
//! node so that multi-node test output (and multi-process deployments piping
//! into a shared log sink) stays attributable.

use std::cell::RefCell;

thread_local! {
    /// Per-thread node identity tag, set once by [`set_me`] when a
    /// [`crate::manager::ClusterManager`] spawns its background tasks.
    pub static ME: RefCell<String> = RefCell::new(String::new());
}

/// Sets the identity tag used by the `pf_*!` macros on the calling thread.
pub fn set_me(tag: impl Into<String>) {
    ME.with(|m| *m.borrow_mut() = tag.into());
}

/// Reads the identity tag used by the `pf_*!` macros on the calling thread.
pub fn get_me() -> String {
    ME.with(|m| m.borrow().clone())
}

/// Initializes `env_logger` once; safe to call multiple times.
pub fn logger_init() {
    let _ = env_logger::builder().is_test(false).try_init();
}

#[macro_export]
macro_rules! pf_error {
    ($($arg:tt)*) => {
        log::error!("[{}] {}", $crate::print::get_me(), format!($($arg)*))
    };
}

#[macro_export]
macro_rules! pf_warn {
    ($($arg:tt)*) => {
        log::warn!("[{}] {}", $crate::print::get_me(), format!($($arg)*))
    };
}

#[macro_export]
macro_rules! pf_info {
    ($($arg:tt)*) => {
        log::info!("[{}] {}", $crate::print::get_me(), format!($($arg)*))
    };
}

#[macro_export]
macro_rules! pf_debug {
    ($($arg:tt)*) => {
        log::debug!("[{}] {}", $crate::print::get_me(), format!($($arg)*))
    };
}

#[macro_export]
macro_rules! pf_trace {
    ($($arg:tt)*) => {
        log::trace!("[{}] {}", $crate::print::get_me(), format!($($arg)*))
    };
}
