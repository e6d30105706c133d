//! Exploded-supergraph vertices and path edges

use serde::{Deserialize, Serialize};
use std::fmt;

use super::fact::DomainFact;
use crate::shared::models::{InstId, MethodId};

/// Node in the exploded supergraph: (instruction, fact)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Vertex {
    pub inst: InstId,
    pub fact: DomainFact,
}

impl Vertex {
    pub fn new(inst: InstId, fact: DomainFact) -> Self {
        Self { inst, fact }
    }

    pub fn method(&self) -> MethodId {
        self.inst.method
    }
}

impl fmt::Display for Vertex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.inst, self.fact)
    }
}

/// Path edge from the method-entry vertex `u` to `v` in the same method
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub u: Vertex,
    pub v: Vertex,
}

impl Edge {
    pub fn new(u: Vertex, v: Vertex) -> Self {
        Self { u, v }
    }

    /// Self-loop used to seed a start vertex
    pub fn start(vertex: Vertex) -> Self {
        Self {
            u: vertex.clone(),
            v: vertex,
        }
    }

    pub fn method(&self) -> MethodId {
        self.u.method()
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.u, self.v)
    }
}

/// How a path edge was first reached; drives witness reconstruction
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PredecessorKind {
    /// Seeded start vertex
    NoPredecessor,
    /// Injected from outside the unit (other runner or manager)
    Unknown,
    Sequent,
    CallToStart,
    /// Applied a callee summary edge
    ThroughSummary(Edge),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathEdgePredecessor {
    pub pred: Edge,
    pub kind: PredecessorKind,
}

impl PathEdgePredecessor {
    pub fn new(pred: Edge, kind: PredecessorKind) -> Self {
        Self { pred, kind }
    }
}
