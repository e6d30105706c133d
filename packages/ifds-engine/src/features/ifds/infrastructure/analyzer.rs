//! Analyzer contract
//!
//! An analyzer pairs a [`FlowFunctionsSpace`] with reactions to the
//! tabulation: every new path edge, every call that leaves the unit, and the
//! final per-unit result. Reactions are returned as [`AnalyzerEvent`]s and
//! routed by the unit worker; analyzers never talk to the manager directly.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::features::ifds::domain::{
    CrossUnitCallFact, DomainFact, Edge, PathEdgePredecessor, SummaryFact, Vertex,
};
use crate::shared::models::{InstId, SharedGraph};

use super::flow_functions::FlowFunctionsSpace;

/// Reaction of an analyzer to tabulation progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalyzerEvent {
    /// Persist a summary fact in the manager's storage
    NewSummaryFact(SummaryFact),
    /// Seed an edge in another runner (other direction, or another unit)
    EdgeForOtherRunner(Edge),
}

/// Final state of one runner, handed to [`Analyzer::handle_ifds_result`]
#[derive(Debug, Default)]
pub struct IfdsResult {
    pub path_edges: Vec<Edge>,
    /// Facts reaching each instruction
    pub result_facts: FxHashMap<InstId, FxHashSet<DomainFact>>,
    pub path_edge_preds: FxHashMap<Edge, FxHashSet<PathEdgePredecessor>>,
    /// Caller edges per callee start vertex owned by another unit
    pub cross_unit_callers: FxHashMap<Vertex, FxHashSet<Edge>>,
}

impl IfdsResult {
    pub fn facts_at(&self, inst: InstId) -> impl Iterator<Item = &DomainFact> + '_ {
        self.result_facts.get(&inst).into_iter().flatten()
    }
}

pub trait Analyzer: Send {
    fn flow_functions(&self) -> &dyn FlowFunctionsSpace;

    /// Graph the analyzer runs on (reversed for backward analyses)
    fn graph(&self) -> &SharedGraph;

    /// Main analyzers own the run's summaries; companions only feed them
    fn is_main_analyzer(&self) -> bool;

    fn handle_new_edge(&mut self, edge: &Edge) -> Vec<AnalyzerEvent> {
        self.summary_edge_events(edge)
    }

    fn handle_new_cross_unit_call(&mut self, fact: &CrossUnitCallFact) -> Vec<AnalyzerEvent> {
        self.cross_unit_call_events(fact)
    }

    fn handle_ifds_result(&mut self, _result: &IfdsResult) -> Vec<AnalyzerEvent> {
        Vec::new()
    }

    /// Base reaction to a new edge: a main analyzer reaching an exit
    /// publishes the summary edge
    fn summary_edge_events(&self, edge: &Edge) -> Vec<AnalyzerEvent> {
        if self.is_main_analyzer() && self.graph().is_exit_point(edge.v.inst) {
            vec![AnalyzerEvent::NewSummaryFact(SummaryFact::SummaryEdge(
                edge.clone(),
            ))]
        } else {
            Vec::new()
        }
    }

    /// Base reaction to a cross-unit call: a main analyzer records it
    fn cross_unit_call_events(&self, fact: &CrossUnitCallFact) -> Vec<AnalyzerEvent> {
        if self.is_main_analyzer() {
            vec![AnalyzerEvent::NewSummaryFact(SummaryFact::CrossUnitCall(
                fact.clone(),
            ))]
        } else {
            Vec::new()
        }
    }
}

/// Builds one analyzer per runner
///
/// Each runner owns its analyzer exclusively, so per-unit caches inside an
/// analyzer are never shared.
pub trait AnalyzerFactory: Send + Sync {
    fn create(&self, graph: SharedGraph) -> Box<dyn Analyzer>;
}

impl<F> AnalyzerFactory for F
where
    F: Fn(SharedGraph) -> Box<dyn Analyzer> + Send + Sync,
{
    fn create(&self, graph: SharedGraph) -> Box<dyn Analyzer> {
        self(graph)
    }
}

pub type SharedAnalyzerFactory = Arc<dyn AnalyzerFactory>;
