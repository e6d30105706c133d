//! Configuration System
//!
//! - Level 1: [`Preset`] (fast / balanced / thorough)
//! - Level 2: builder overrides on [`AnalysisConfig`]
//! - Level 3: YAML documents loaded with [`AnalysisConfig::from_yaml_file`]
//!
//! # Examples
//!
//! ```rust,ignore
//! use ifds_engine::config::{AnalysisConfig, Preset};
//!
//! let config = AnalysisConfig::from_preset(Preset::Fast).with_worker_threads(4);
//! let config = AnalysisConfig::from_yaml_file("rules.yaml")?;
//! ```

pub mod analysis_config;
pub mod error;
pub mod matchers;
pub mod preset;

pub use analysis_config::{AnalysisConfig, NpeConfig, TaintRulesConfig, UnitStrategy};
pub use error::{ConfigError, ConfigResult};
pub use matchers::MethodMatchers;
pub use preset::Preset;
