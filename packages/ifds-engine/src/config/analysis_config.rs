//! Analysis configuration
//!
//! One struct drives every analyzer: k-limiting, scheduling, and the method
//! pattern lists that the surrounding tool supplies.

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::error::{ConfigError, ConfigResult};
use super::preset::Preset;

// ============================================================================
// Unit partitioning
// ============================================================================

/// How methods are grouped into concurrently scheduled analysis units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStrategy {
    /// Whole program in one unit
    Singleton,
    /// One unit per method
    Method,
    /// One unit per declaring class
    Class,
    /// One unit per package (class name prefix up to the last '.')
    Package,
}

impl UnitStrategy {
    /// Parse strategy from string
    pub fn from_str(s: &str) -> ConfigResult<Self> {
        match s.to_lowercase().as_str() {
            "singleton" => Ok(Self::Singleton),
            "method" => Ok(Self::Method),
            "class" => Ok(Self::Class),
            "package" => Ok(Self::Package),
            _ => Err(ConfigError::UnknownUnitStrategy(s.to_string())),
        }
    }
}

impl Default for UnitStrategy {
    fn default() -> Self {
        Self::Class
    }
}

// ============================================================================
// Rule lists
// ============================================================================

/// Source/sink/sanitizer method patterns for the generic taint analyzer
///
/// Each entry is a regex matched against `"Class#method"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaintRulesConfig {
    pub sources: Vec<String>,
    pub sinks: Vec<String>,
    pub sanitizers: Vec<String>,
}

/// Null-dereference analyzer settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NpeConfig {
    /// Methods treated as nullable regardless of declarations, as `Class.method`
    pub known_nullable_methods: Vec<String>,
}

impl Default for NpeConfig {
    fn default() -> Self {
        Self {
            known_nullable_methods: vec![
                "java.lang.System.getProperty".to_string(),
                "java.util.Properties.getProperty".to_string(),
            ],
        }
    }
}

// ============================================================================
// AnalysisConfig
// ============================================================================

/// Top-level analysis configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// k for k-limiting access paths (1..=32)
    pub max_path_length: usize,

    /// Worker threads for the unit runtime (0 = number of CPUs, max 512)
    pub worker_threads: usize,

    /// Unit partitioning strategy
    pub unit_strategy: UnitStrategy,

    /// Reconstruct a witness graph for every reported vertex
    #[serde(default = "default_true")]
    pub build_trace_graphs: bool,

    pub taint: TaintRulesConfig,

    pub npe: NpeConfig,
}

fn default_true() -> bool {
    true
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self::from_preset(Preset::Balanced)
    }
}

impl AnalysisConfig {
    /// Configuration for a preset with empty rule lists
    pub fn from_preset(preset: Preset) -> Self {
        Self {
            max_path_length: preset.max_path_length(),
            worker_threads: 0,
            unit_strategy: UnitStrategy::default(),
            build_trace_graphs: preset.build_trace_graphs(),
            taint: TaintRulesConfig::default(),
            npe: NpeConfig::default(),
        }
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> ConfigResult<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Serialize to YAML
    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Effective number of runtime worker threads
    pub fn effective_worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            num_cpus::get()
        } else {
            self.worker_threads
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_path_length == 0 || self.max_path_length > 32 {
            return Err(ConfigError::range_with_hint(
                "max_path_length",
                self.max_path_length,
                1,
                32,
                "Access paths need at least one accessor; long paths explode the fact domain",
            ));
        }

        if self.worker_threads > 512 {
            return Err(ConfigError::range_with_hint(
                "worker_threads",
                self.worker_threads,
                0,
                512,
                "Use 0 to size the runtime by CPU count",
            ));
        }

        Ok(())
    }

    // Builders

    pub fn with_max_path_length(mut self, k: usize) -> Self {
        self.max_path_length = k;
        self
    }

    pub fn with_worker_threads(mut self, n: usize) -> Self {
        self.worker_threads = n;
        self
    }

    pub fn with_unit_strategy(mut self, strategy: UnitStrategy) -> Self {
        self.unit_strategy = strategy;
        self
    }

    pub fn with_taint_rules(mut self, rules: TaintRulesConfig) -> Self {
        self.taint = rules;
        self
    }

    pub fn with_trace_graphs(mut self, enabled: bool) -> Self {
        self.build_trace_graphs = enabled;
        self
    }
}
