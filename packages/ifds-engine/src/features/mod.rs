//! Feature slices
//!
//! - [`ifds`]: the framework (domain, flow-function protocol, runners,
//!   manager, use cases)
//! - [`analyzers`]: problem instances built on it

pub mod analyzers;
pub mod ifds;
