//! Error types for ifds-engine
//!
//! Two failure classes exist. Contract violations inside a flow function
//! (for example a call instruction without a call expression) abort the
//! owning unit. Incomplete models (unresolved callees) are not errors at all
//! and never reach this type.

use thiserror::Error;

use crate::config::ConfigError;
use crate::shared::models::{InstId, MethodId};

/// Main error type for ifds-engine operations
#[derive(Debug, Error)]
pub enum IfdsError {
    /// A call instruction did not expose a call expression
    #[error("Call instruction {inst} has no call expression")]
    MissingCallExpr { inst: InstId },

    /// Method id is not part of the application graph
    #[error("Unknown method {0}")]
    UnknownMethod(MethodId),

    /// Instruction id is not part of the application graph
    #[error("Unknown instruction {0}")]
    UnknownInstruction(InstId),

    /// Program description is structurally inconsistent
    #[error("Invalid program: {0}")]
    InvalidProgram(String),

    /// A unit worker aborted its fixpoint
    #[error("Unit {unit} aborted: {reason}")]
    UnitCrashed { unit: String, reason: String },

    /// Mailbox or event channel closed while the analysis was running
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Async runtime failure (runtime construction, join errors)
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl IfdsError {
    /// Create a missing-call-expression error
    pub fn missing_call_expr(inst: InstId) -> Self {
        IfdsError::MissingCallExpr { inst }
    }

    /// Create an invalid-program error
    pub fn invalid_program(msg: impl Into<String>) -> Self {
        IfdsError::InvalidProgram(msg.into())
    }

    /// Create a unit crash error
    pub fn unit_crashed(unit: impl ToString, reason: impl Into<String>) -> Self {
        IfdsError::UnitCrashed {
            unit: unit.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a runtime error
    pub fn runtime(msg: impl Into<String>) -> Self {
        IfdsError::Runtime(msg.into())
    }

    /// Whether this error is a flow-function contract violation
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            IfdsError::MissingCallExpr { .. }
                | IfdsError::UnknownMethod(_)
                | IfdsError::UnknownInstruction(_)
        )
    }
}

/// Result type alias for ifds-engine operations
pub type Result<T> = std::result::Result<T, IfdsError>;
