//! Preset configurations
//!
//! Presets fix the precision/cost trade-off of an analysis run in one word.

use serde::{Deserialize, Serialize};

use super::error::{ConfigError, ConfigResult};

/// Configuration preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    /// CI: short access paths, no trace graphs
    ///
    /// - max_path_length = 3
    /// - trace graphs disabled
    Fast,

    /// Default: max_path_length = 5, trace graphs on
    Balanced,

    /// Security audit: max_path_length = 8, trace graphs on
    Thorough,
}

impl Preset {
    /// k used for k-limiting access paths
    pub fn max_path_length(&self) -> usize {
        match self {
            Self::Fast => 3,
            Self::Balanced => 5,
            Self::Thorough => 8,
        }
    }

    /// Whether witness graphs are reconstructed for each report
    pub fn build_trace_graphs(&self) -> bool {
        !matches!(self, Self::Fast)
    }

    /// Parse preset from string
    pub fn from_str(s: &str) -> ConfigResult<Self> {
        match s.to_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "balanced" => Ok(Self::Balanced),
            "thorough" => Ok(Self::Thorough),
            _ => Err(ConfigError::UnknownPreset(s.to_string())),
        }
    }

    /// Get preset name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Balanced => "balanced",
            Self::Thorough => "thorough",
        }
    }
}

impl Default for Preset {
    fn default() -> Self {
        Self::Balanced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_from_str() {
        assert_eq!(Preset::from_str("fast").unwrap(), Preset::Fast);
        assert_eq!(Preset::from_str("THOROUGH").unwrap(), Preset::Thorough);
        assert!(matches!(
            Preset::from_str("turbo"),
            Err(ConfigError::UnknownPreset(name)) if name == "turbo"
        ));
    }

    #[test]
    fn test_preset_path_lengths_increase() {
        assert!(Preset::Fast.max_path_length() < Preset::Balanced.max_path_length());
        assert!(Preset::Balanced.max_path_length() < Preset::Thorough.max_path_length());
        assert!(!Preset::Fast.build_trace_graphs());
    }
}
