/*
 * Unit Runner - IFDS Tabulation
 *
 * One runner owns the exploded-graph state of one analysis unit:
 *
 *   path_edges       visited set, (start vertex -> vertex) edges
 *   summary_edges    start vertex -> exit vertices of in-unit callees
 *   call_sites_of    start vertex -> caller edges waiting for its exits
 *   cross_callers    start vertex (other unit) -> caller edges
 *   path_edge_preds  first-reached-by bookkeeping for witness graphs
 *
 * Worklist step for an edge (u -> v):
 *
 *   v is a call with resolved callees:
 *     call_to_return for every return site
 *     call_to_start for every callee start point
 *       in-unit  -> seed (s, s), apply known summaries, remember the caller
 *       extern   -> CrossUnitCallFact + subscription, apply known exits
 *   otherwise:
 *     v is an exit -> exit_to_return for every recorded caller, then record
 *                     the summary edge
 *     sequent for every successor
 *
 * Calls without resolved callees take the sequent branch: the analyzer's
 * transfer over the call expression stands in for the missing body.
 *
 * The runner never blocks; outputs (analyzer events, subscriptions) are
 * collected and drained by the unit worker after each `run`.
 */

use std::collections::VecDeque;
use std::mem;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::errors::{IfdsError, Result};
use crate::features::ifds::domain::{
    CrossUnitCallFact, Edge, PathEdgePredecessor, PredecessorKind, SummaryFact, Vertex,
};
use crate::shared::models::{Inst, InstId, MethodId, SharedGraph};

use super::analyzer::{Analyzer, AnalyzerEvent, IfdsResult, SharedAnalyzerFactory};
use super::unit_resolver::{UnitId, UnitResolver};

/// Something a runner needs routed outside of itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerOutput {
    Event(AnalyzerEvent),
    /// Interest in the exits of a start vertex owned by another unit
    Subscribe(Vertex),
}

/// Counters reported per unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitStatistics {
    pub processed_edges: usize,
    pub path_edges: usize,
    pub summary_edges: usize,
}

impl UnitStatistics {
    pub fn merge(&mut self, other: &UnitStatistics) {
        self.processed_edges += other.processed_edges;
        self.path_edges += other.path_edges;
        self.summary_edges += other.summary_edges;
    }
}

/// Schedulable analysis unit as seen by the manager's worker
pub trait IfdsUnit: Send {
    fn unit(&self) -> &UnitId;

    /// Seed every entry point of `method` with the analyzer's start facts
    fn start(&mut self, method: MethodId) -> Result<()>;

    /// Edge requested by the manager (recompute an entry vertex)
    fn submit_new_edge(&mut self, edge: Edge);

    /// Edge forwarded from an analyzer of another runner
    fn submit_other_runner_edge(&mut self, edge: Edge);

    /// Memoized exit of a start vertex this unit subscribed to
    fn submit_external_summary(&mut self, start: Vertex, exit: Vertex) -> Result<()>;

    /// Drain the worklist; returns everything that must leave the unit
    fn run(&mut self) -> Result<Vec<RunnerOutput>>;

    /// Post-fixpoint hooks: result handlers and witness graphs
    fn finish(&mut self) -> Result<Vec<RunnerOutput>>;

    fn statistics(&self) -> UnitStatistics;
}

pub struct IfdsRunner {
    unit: UnitId,
    graph: SharedGraph,
    resolver: UnitResolver,
    analyzer: Box<dyn Analyzer>,
    build_trace_graphs: bool,

    work_list: VecDeque<Edge>,
    path_edges: FxHashSet<Edge>,
    path_edge_preds: FxHashMap<Edge, FxHashSet<PathEdgePredecessor>>,
    summary_edges: FxHashMap<Vertex, FxHashSet<Vertex>>,
    call_sites_of: FxHashMap<Vertex, FxHashSet<Edge>>,

    cross_callers: FxHashMap<Vertex, FxHashSet<Edge>>,
    external_summaries: FxHashMap<Vertex, FxHashSet<Vertex>>,
    requested: FxHashSet<Vertex>,

    trace_vertices: FxHashSet<Vertex>,
    outbox: Vec<RunnerOutput>,
    processed: usize,
}

impl IfdsRunner {
    pub fn new(
        unit: UnitId,
        graph: SharedGraph,
        resolver: UnitResolver,
        analyzer: Box<dyn Analyzer>,
        build_trace_graphs: bool,
    ) -> Self {
        Self {
            unit,
            graph,
            resolver,
            analyzer,
            build_trace_graphs,
            work_list: VecDeque::new(),
            path_edges: FxHashSet::default(),
            path_edge_preds: FxHashMap::default(),
            summary_edges: FxHashMap::default(),
            call_sites_of: FxHashMap::default(),
            cross_callers: FxHashMap::default(),
            external_summaries: FxHashMap::default(),
            requested: FxHashSet::default(),
            trace_vertices: FxHashSet::default(),
            outbox: Vec::new(),
            processed: 0,
        }
    }

    pub fn graph(&self) -> &SharedGraph {
        &self.graph
    }

    pub fn is_main_analyzer(&self) -> bool {
        self.analyzer.is_main_analyzer()
    }

    pub fn path_edges(&self) -> impl Iterator<Item = &Edge> {
        self.path_edges.iter()
    }

    /// Snapshot handed to the analyzer's result hook
    pub fn ifds_result(&self) -> IfdsResult {
        let mut result = IfdsResult {
            path_edges: self.path_edges.iter().cloned().collect(),
            path_edge_preds: self.path_edge_preds.clone(),
            cross_unit_callers: self.cross_callers.clone(),
            ..IfdsResult::default()
        };
        for edge in &self.path_edges {
            result
                .result_facts
                .entry(edge.v.inst)
                .or_default()
                .insert(edge.v.fact.clone());
        }
        result
    }

    // ========================================================================
    // Propagation
    // ========================================================================

    fn propagate(&mut self, edge: Edge, pred: PathEdgePredecessor) -> bool {
        if self.build_trace_graphs {
            self.path_edge_preds
                .entry(edge.clone())
                .or_default()
                .insert(pred);
        }
        if !self.path_edges.insert(edge.clone()) {
            return false;
        }
        edge_trace!(unit = %self.unit, edge = %edge, "new path edge");
        let events = self.analyzer.handle_new_edge(&edge);
        self.emit(events);
        self.work_list.push_back(edge);
        true
    }

    fn emit(&mut self, events: Vec<AnalyzerEvent>) {
        for event in events {
            if let AnalyzerEvent::NewSummaryFact(SummaryFact::Vulnerability(location)) = &event {
                self.trace_vertices.insert(location.vertex.clone());
            }
            self.outbox.push(RunnerOutput::Event(event));
        }
    }

    fn is_extern(&self, method: MethodId) -> bool {
        self.resolver.resolve(self.graph.as_ref(), method) != self.unit
    }

    fn inst_of(graph: &SharedGraph, id: InstId) -> Result<&Inst> {
        graph.inst(id).ok_or(IfdsError::UnknownInstruction(id))
    }

    /// exit_to_return for one caller edge and one callee exit vertex
    fn apply_summary(&mut self, caller: &Edge, start: &Vertex, exit: &Vertex) -> Result<()> {
        let graph = self.graph.clone();
        let call = Self::inst_of(&graph, caller.v.inst)?;
        let exit_inst = Self::inst_of(&graph, exit.inst)?;
        let summary = Edge::new(start.clone(), exit.clone());

        for &return_site in graph.successors(call.id) {
            let return_inst = Self::inst_of(&graph, return_site)?;
            let facts = self.analyzer.flow_functions().exit_to_return(
                call,
                return_inst,
                exit_inst,
                &exit.fact,
            )?;
            for fact in facts {
                let new_edge = Edge::new(caller.u.clone(), Vertex::new(return_site, fact));
                let pred = PathEdgePredecessor::new(
                    caller.clone(),
                    PredecessorKind::ThroughSummary(summary.clone()),
                );
                self.propagate(new_edge, pred);
            }
        }
        Ok(())
    }

    fn process(&mut self, edge: Edge) -> Result<()> {
        self.processed += 1;
        let graph = self.graph.clone();
        let current = Self::inst_of(&graph, edge.v.inst)?;
        let callees = graph.callees(current.id);

        if callees.is_empty() {
            self.process_non_call(&graph, &edge, current)
        } else {
            self.process_call(&graph, &edge, current, callees)
        }
    }

    fn process_call(
        &mut self,
        graph: &SharedGraph,
        edge: &Edge,
        call: &Inst,
        callees: &[MethodId],
    ) -> Result<()> {
        for &return_site in graph.successors(call.id) {
            let return_inst = Self::inst_of(graph, return_site)?;
            let facts = self
                .analyzer
                .flow_functions()
                .call_to_return(call, return_inst, &edge.v.fact)?;
            for fact in facts {
                let new_edge = Edge::new(edge.u.clone(), Vertex::new(return_site, fact));
                self.propagate(
                    new_edge,
                    PathEdgePredecessor::new(edge.clone(), PredecessorKind::Sequent),
                );
            }
        }

        for &callee_id in callees {
            let callee = graph
                .method(callee_id)
                .ok_or(IfdsError::UnknownMethod(callee_id))?;
            let start_facts = self
                .analyzer
                .flow_functions()
                .call_to_start(call, callee, &edge.v.fact)?;
            let is_extern = self.is_extern(callee_id);

            for &start_point in graph.entry_points(callee_id) {
                for fact in &start_facts {
                    let start = Vertex::new(start_point, fact.clone());
                    if is_extern {
                        self.handle_cross_unit_call(edge, start)?;
                    } else {
                        self.propagate(
                            Edge::start(start.clone()),
                            PathEdgePredecessor::new(edge.clone(), PredecessorKind::CallToStart),
                        );
                        let exits: Vec<Vertex> = self
                            .summary_edges
                            .get(&start)
                            .map(|exits| exits.iter().cloned().collect())
                            .unwrap_or_default();
                        for exit in &exits {
                            self.apply_summary(edge, &start, exit)?;
                        }
                        self.call_sites_of
                            .entry(start)
                            .or_default()
                            .insert(edge.clone());
                    }
                }
            }
        }
        Ok(())
    }

    fn handle_cross_unit_call(&mut self, caller: &Edge, start: Vertex) -> Result<()> {
        let fact = CrossUnitCallFact {
            caller_vertex: caller.v.clone(),
            callee_vertex: start.clone(),
        };
        let events = self.analyzer.handle_new_cross_unit_call(&fact);
        self.emit(events);

        // Companion analyzers publish no summaries, so there is nothing to wait for
        if !self.analyzer.is_main_analyzer() {
            return Ok(());
        }

        let new_caller = self
            .cross_callers
            .entry(start.clone())
            .or_default()
            .insert(caller.clone());
        if self.requested.insert(start.clone()) {
            self.outbox.push(RunnerOutput::Subscribe(start.clone()));
        }
        if new_caller {
            let exits: Vec<Vertex> = self
                .external_summaries
                .get(&start)
                .map(|exits| exits.iter().cloned().collect())
                .unwrap_or_default();
            for exit in &exits {
                self.apply_summary(caller, &start, exit)?;
            }
        }
        Ok(())
    }

    fn process_non_call(&mut self, graph: &SharedGraph, edge: &Edge, current: &Inst) -> Result<()> {
        if graph.is_exit_point(current.id) {
            let callers: Vec<Edge> = self
                .call_sites_of
                .get(&edge.u)
                .map(|callers| callers.iter().cloned().collect())
                .unwrap_or_default();
            for caller in &callers {
                self.apply_summary(caller, &edge.u, &edge.v)?;
            }
            self.summary_edges
                .entry(edge.u.clone())
                .or_default()
                .insert(edge.v.clone());
        }

        for &next in graph.successors(current.id) {
            let next_inst = Self::inst_of(graph, next)?;
            let facts = self
                .analyzer
                .flow_functions()
                .sequent(current, next_inst, &edge.v.fact)?;
            for fact in facts {
                let new_edge = Edge::new(edge.u.clone(), Vertex::new(next, fact));
                self.propagate(
                    new_edge,
                    PathEdgePredecessor::new(edge.clone(), PredecessorKind::Sequent),
                );
            }
        }
        Ok(())
    }
}

impl IfdsUnit for IfdsRunner {
    fn unit(&self) -> &UnitId {
        &self.unit
    }

    fn start(&mut self, method: MethodId) -> Result<()> {
        if self.is_extern(method) {
            return Err(IfdsError::runtime(format!(
                "method {} does not belong to unit {}",
                method, self.unit
            )));
        }
        let graph = self.graph.clone();
        for &start_point in graph.entry_points(method) {
            let inst = Self::inst_of(&graph, start_point)?;
            let facts = self.analyzer.flow_functions().obtain_possible_start_facts(inst);
            for fact in facts {
                let edge = Edge::start(Vertex::new(start_point, fact));
                let pred = PathEdgePredecessor::new(edge.clone(), PredecessorKind::NoPredecessor);
                self.propagate(edge, pred);
            }
        }
        debug!(unit = %self.unit, method = %method, "seeded start method");
        Ok(())
    }

    fn submit_new_edge(&mut self, edge: Edge) {
        let pred = PathEdgePredecessor::new(edge.clone(), PredecessorKind::Unknown);
        self.propagate(edge, pred);
    }

    fn submit_other_runner_edge(&mut self, edge: Edge) {
        self.submit_new_edge(edge);
    }

    fn submit_external_summary(&mut self, start: Vertex, exit: Vertex) -> Result<()> {
        let is_new = self
            .external_summaries
            .entry(start.clone())
            .or_default()
            .insert(exit.clone());
        if !is_new {
            return Ok(());
        }
        let callers: Vec<Edge> = self
            .cross_callers
            .get(&start)
            .map(|callers| callers.iter().cloned().collect())
            .unwrap_or_default();
        for caller in &callers {
            self.apply_summary(caller, &start, &exit)?;
        }
        Ok(())
    }

    fn run(&mut self) -> Result<Vec<RunnerOutput>> {
        while let Some(edge) = self.work_list.pop_front() {
            self.process(edge)?;
        }
        Ok(mem::take(&mut self.outbox))
    }

    fn finish(&mut self) -> Result<Vec<RunnerOutput>> {
        let result = self.ifds_result();
        let events = self.analyzer.handle_ifds_result(&result);
        self.emit(events);

        if self.build_trace_graphs {
            let mut sinks: Vec<Vertex> = self.trace_vertices.iter().cloned().collect();
            sinks.sort_by_key(|v| v.to_string());
            for sink in sinks {
                let graph = result.resolve_trace_graph(&sink);
                self.outbox.push(RunnerOutput::Event(AnalyzerEvent::NewSummaryFact(
                    SummaryFact::TraceGraph(graph),
                )));
            }
        }
        debug!(
            unit = %self.unit,
            processed = self.processed,
            path_edges = self.path_edges.len(),
            "unit finished"
        );
        Ok(mem::take(&mut self.outbox))
    }

    fn statistics(&self) -> UnitStatistics {
        UnitStatistics {
            processed_edges: self.processed,
            path_edges: self.path_edges.len(),
            summary_edges: self.summary_edges.values().map(|exits| exits.len()).sum(),
        }
    }
}

// ============================================================================
// Factories
// ============================================================================

/// Creates the runner hosted by a unit worker
pub trait UnitRunnerFactory: Send + Sync {
    fn create(
        &self,
        unit: UnitId,
        graph: SharedGraph,
        resolver: UnitResolver,
        build_trace_graphs: bool,
    ) -> Box<dyn IfdsUnit>;
}

/// One [`IfdsRunner`] per unit, all running the same analyzer
pub struct BaseUnitRunnerFactory {
    analyzer_factory: SharedAnalyzerFactory,
}

impl BaseUnitRunnerFactory {
    pub fn new(analyzer_factory: SharedAnalyzerFactory) -> Self {
        Self { analyzer_factory }
    }
}

impl UnitRunnerFactory for BaseUnitRunnerFactory {
    fn create(
        &self,
        unit: UnitId,
        graph: SharedGraph,
        resolver: UnitResolver,
        build_trace_graphs: bool,
    ) -> Box<dyn IfdsUnit> {
        let analyzer = self.analyzer_factory.create(graph.clone());
        Box::new(IfdsRunner::new(
            unit,
            graph,
            resolver,
            analyzer,
            build_trace_graphs,
        ))
    }
}
