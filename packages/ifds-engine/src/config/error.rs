//! Configuration error types

use thiserror::Error;

/// Configuration error type
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Range validation error
    #[error("Invalid range for field '{field}': {value} not in {min}..={max}. {hint}")]
    Range {
        field: String,
        value: String,
        min: String,
        max: String,
        hint: String,
    },

    /// Unknown preset name
    #[error("Unknown preset '{0}'. Valid presets: fast, balanced, thorough")]
    UnknownPreset(String),

    /// Unknown unit strategy name
    #[error("Unknown unit strategy '{0}'. Valid strategies: singleton, method, class, package")]
    UnknownUnitStrategy(String),

    /// Method matcher pattern failed to compile
    #[error("Invalid method pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;

impl ConfigError {
    /// Create a range error with a hint
    pub fn range_with_hint(
        field: impl Into<String>,
        value: impl ToString,
        min: impl ToString,
        max: impl ToString,
        hint: impl Into<String>,
    ) -> Self {
        Self::Range {
            field: field.into(),
            value: value.to_string(),
            min: min.to_string(),
            max: max.to_string(),
            hint: hint.into(),
        }
    }

    /// Create a pattern error
    pub fn pattern(pattern: impl Into<String>, source: regex::Error) -> Self {
        Self::Pattern {
            pattern: pattern.into(),
            source,
        }
    }
}
