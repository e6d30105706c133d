//! IFDS domain model: access paths, facts, exploded vertices, summaries

pub mod access_path;
pub mod fact;
pub mod summary;
pub mod vertex;

pub use access_path::{Accessor, AccessPath, PathBase};
pub use fact::{DomainFact, TaintKind, TaintNode};
pub use summary::{CrossUnitCallFact, SummaryFact, TraceEdge, TraceGraph, VulnerabilityLocation};
pub use vertex::{Edge, PathEdgePredecessor, PredecessorKind, Vertex};
