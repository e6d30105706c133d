//! Method matchers
//!
//! Pattern lists from the configuration are compiled once into anchored
//! regexes and matched against `"Class#method"` signatures.

use regex::Regex;

use super::error::{ConfigError, ConfigResult};
use crate::shared::models::Method;

/// Compiled list of method patterns
#[derive(Debug, Clone, Default)]
pub struct MethodMatchers {
    patterns: Vec<Regex>,
}

impl MethodMatchers {
    /// Compile patterns; each one must match the whole signature
    pub fn compile(patterns: &[String]) -> ConfigResult<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(&format!("^(?:{})$", p)).map_err(|e| ConfigError::pattern(p.clone(), e))
            })
            .collect::<ConfigResult<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Matcher that accepts nothing
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Match a `"Class#method"` signature
    pub fn matches_signature(&self, signature: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(signature))
    }

    pub fn matches(&self, method: &Method) -> bool {
        !self.patterns.is_empty() && self.matches_signature(&method.signature())
    }
}
