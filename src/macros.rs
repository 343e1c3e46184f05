// src/macros.rs

//! Internal logging macros.
//!
//! With the `logging` feature (default) every level forwards to `tracing`
//! under the `link_rpc` target, so hosts can filter this crate's output as
//! a unit. Without the feature the crate stays silent except for errors,
//! which fall back to stderr so failures are never invisible.

#[cfg(feature = "logging")]
macro_rules! log_error {
    ($($arg:tt)*) => {
        tracing::error!(target: "link_rpc", $($arg)*)
    };
}

#[cfg(feature = "logging")]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        tracing::warn!(target: "link_rpc", $($arg)*)
    };
}

#[cfg(feature = "logging")]
macro_rules! log_info {
    ($($arg:tt)*) => {
        tracing::info!(target: "link_rpc", $($arg)*)
    };
}

#[cfg(feature = "logging")]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        tracing::debug!(target: "link_rpc", $($arg)*)
    };
}

#[cfg(feature = "logging")]
pub(crate) use {log_debug, log_error, log_info, log_warn};

#[cfg(not(feature = "logging"))]
macro_rules! log_error {
    ($($arg:tt)*) => {
        eprintln!($($arg)*)
    };
}

// Every non-error level shares one discard arm; the arguments must still
// parse but are never evaluated.
#[cfg(not(feature = "logging"))]
macro_rules! log_discard {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "logging"))]
pub(crate) use {
    log_discard as log_debug, log_discard as log_info, log_discard as log_warn, log_error,
};
