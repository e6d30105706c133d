//! Dataflow facts
//!
//! Closed family of facts carried along exploded-graph edges. Facts are
//! values: flow functions derive new ones and never mutate an input. The
//! visited-set deduplication relies on structural equality, which covers the
//! activation point as well.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::access_path::AccessPath;
use crate::shared::models::InstId;

/// Flavour of a [`TaintNode`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaintKind {
    /// Generic source-to-sink taint
    Taint,
    /// Possibly-null value
    Npe,
    /// Value relevant to a crash slice; `is_from_return` marks importance
    /// learned from an early exit rather than from the crash point
    SliceData { is_from_return: Option<InstId> },
}

/// Fact about one access path, optionally gated by an activation point
///
/// `activation = None` means active now. `Some(i)` means the fact only
/// becomes live once control passes `i`, the instruction that witnessed the
/// alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaintNode {
    pub kind: TaintKind,
    pub variable: AccessPath,
    pub activation: Option<InstId>,
}

impl TaintNode {
    pub fn new(kind: TaintKind, variable: AccessPath) -> Self {
        Self {
            kind,
            variable,
            activation: None,
        }
    }

    pub fn update_activation(&self, activation: InstId) -> Self {
        Self {
            activation: Some(activation),
            ..self.clone()
        }
    }

    pub fn activated_copy(&self) -> Self {
        Self {
            activation: None,
            ..self.clone()
        }
    }

    pub fn move_to_other_path(&self, variable: AccessPath) -> Self {
        Self {
            variable,
            ..self.clone()
        }
    }

    pub fn is_active(&self) -> bool {
        self.activation.is_none()
    }
}

/// Exploded-graph fact
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainFact {
    /// Ground fact: always holds, seeds every analysis
    Zero,
    Taint(TaintNode),
    /// Control dependence for crash slicing; waits for `wait_for` when set
    SliceControl {
        wait_for: Option<InstId>,
        is_from_return: Option<InstId>,
    },
    /// Value written at `init` and not read so far
    Unused { variable: AccessPath, init: InstId },
}

impl DomainFact {
    pub fn taint(variable: AccessPath) -> Self {
        DomainFact::Taint(TaintNode::new(TaintKind::Taint, variable))
    }

    pub fn npe(variable: AccessPath) -> Self {
        DomainFact::Taint(TaintNode::new(TaintKind::Npe, variable))
    }

    pub fn slice_data(variable: AccessPath, is_from_return: Option<InstId>) -> Self {
        DomainFact::Taint(TaintNode::new(TaintKind::SliceData { is_from_return }, variable))
    }

    pub fn slice_control(wait_for: Option<InstId>, is_from_return: Option<InstId>) -> Self {
        DomainFact::SliceControl {
            wait_for,
            is_from_return,
        }
    }

    pub fn unused(variable: AccessPath, init: InstId) -> Self {
        DomainFact::Unused { variable, init }
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, DomainFact::Zero)
    }

    pub fn as_taint(&self) -> Option<&TaintNode> {
        match self {
            DomainFact::Taint(node) => Some(node),
            _ => None,
        }
    }

    /// Tracked path, for facts that have one
    pub fn variable(&self) -> Option<&AccessPath> {
        match self {
            DomainFact::Taint(node) => Some(&node.variable),
            DomainFact::Unused { variable, .. } => Some(variable),
            DomainFact::Zero | DomainFact::SliceControl { .. } => None,
        }
    }

    pub fn activation(&self) -> Option<InstId> {
        self.as_taint().and_then(|node| node.activation)
    }

    pub fn is_static(&self) -> bool {
        self.variable().is_some_and(AccessPath::is_static)
    }

    pub fn is_on_heap(&self) -> bool {
        self.variable().is_some_and(AccessPath::is_on_heap)
    }
}

impl From<TaintNode> for DomainFact {
    fn from(node: TaintNode) -> Self {
        DomainFact::Taint(node)
    }
}

impl fmt::Display for TaintNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            TaintKind::Taint => "Taint",
            TaintKind::Npe => "Npe",
            TaintKind::SliceData { .. } => "SliceData",
        };
        write!(f, "{}({})", kind, self.variable)?;
        if let Some(activation) = self.activation {
            write!(f, "@{}", activation)?;
        }
        Ok(())
    }
}

impl fmt::Display for DomainFact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainFact::Zero => write!(f, "ZERO"),
            DomainFact::Taint(node) => write!(f, "{}", node),
            DomainFact::SliceControl { wait_for, .. } => match wait_for {
                Some(inst) => write!(f, "SliceControl(wait {})", inst),
                None => write!(f, "SliceControl"),
            },
            DomainFact::Unused { variable, init } => write!(f, "Unused({} @ {})", variable, init),
        }
    }
}
