//! Shared macros
//!
//! Per-edge tracing sits on the hottest path of the tabulation loop, so it
//! compiles to nothing unless the `trace` feature is enabled.

/// Edge-level tracing - no-op when trace feature is disabled
#[cfg(not(feature = "trace"))]
#[macro_export]
macro_rules! edge_trace {
    ($($arg:tt)*) => {};
}

#[cfg(feature = "trace")]
#[macro_export]
macro_rules! edge_trace {
    ($($arg:tt)*) => {
        ::tracing::trace!($($arg)*)
    };
}
