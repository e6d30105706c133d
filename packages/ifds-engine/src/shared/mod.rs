//! Shared module - program model and utilities used by every feature

#[macro_use]
pub mod macros;
pub mod models;

pub use models::*;
