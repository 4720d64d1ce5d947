//! Logging macros.
//!
//! With the `tracing` feature (on by default) these forward to the `tracing`
//! crate. Without it they expand to nothing, so the allocator can be built
//! without any logging dependency.
//!
//! ```bash
//! RUST_LOG=bufheap=trace cargo test --test allocation
//! ```

#![allow(unused_macros, unused_imports)]

/// Trace-level event, used for every alloc/free decision.
#[cfg(feature = "tracing")]
macro_rules! trace_log {
    ($($arg:tt)*) => {
        tracing::trace!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace_log {
    ($($arg:tt)*) => {};
}

/// Debug-level event.
#[cfg(feature = "tracing")]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        tracing::debug!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! debug_log {
    ($($arg:tt)*) => {};
}

/// Warn-level event.
#[cfg(feature = "tracing")]
macro_rules! warn_log {
    ($($arg:tt)*) => {
        tracing::warn!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! warn_log {
    ($($arg:tt)*) => {};
}

pub(crate) use debug_log;
pub(crate) use trace_log;
pub(crate) use warn_log;
