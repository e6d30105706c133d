//! Facts a unit publishes to the rest of the analysis

use serde::{Deserialize, Serialize};

use super::vertex::{Edge, Vertex};
use crate::shared::models::MethodId;

/// Reported finding: rule id plus the exploded vertex where it was observed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VulnerabilityLocation {
    pub rule_id: String,
    pub vertex: Vertex,
    pub description: String,
}

impl VulnerabilityLocation {
    pub fn new(rule_id: impl Into<String>, vertex: Vertex, description: impl Into<String>) -> Self {
        Self {
            rule_id: rule_id.into(),
            vertex,
            description: description.into(),
        }
    }

    pub fn method(&self) -> MethodId {
        self.vertex.method()
    }
}

/// Propagation that needs a callee owned by another unit
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CrossUnitCallFact {
    pub caller_vertex: Vertex,
    pub callee_vertex: Vertex,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceEdge {
    pub from: Vertex,
    pub to: Vertex,
}

/// Witness graph explaining how a reported vertex was reached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceGraph {
    pub sink: Vertex,
    pub sources: Vec<Vertex>,
    pub edges: Vec<TraceEdge>,
}

impl TraceGraph {
    pub fn successors<'a>(&'a self, from: &'a Vertex) -> impl Iterator<Item = &'a Vertex> + 'a {
        self.edges.iter().filter(move |e| &e.from == from).map(|e| &e.to)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryFact {
    Vulnerability(VulnerabilityLocation),
    /// Path edge from a method start vertex to one of its exit vertices
    SummaryEdge(Edge),
    CrossUnitCall(CrossUnitCallFact),
    TraceGraph(TraceGraph),
}

impl SummaryFact {
    pub fn method(&self) -> MethodId {
        match self {
            SummaryFact::Vulnerability(v) => v.method(),
            SummaryFact::SummaryEdge(edge) => edge.method(),
            SummaryFact::CrossUnitCall(call) => call.caller_vertex.method(),
            SummaryFact::TraceGraph(graph) => graph.sink.method(),
        }
    }
}
