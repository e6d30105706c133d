//! Bidirectional unit
//!
//! Hosts a forward and a backward runner over the same unit. Edges one
//! analyzer hands to "the other runner" are routed here without a round trip
//! through the manager, unless they belong to another unit.

use tracing::debug;

use crate::errors::Result;
use crate::features::ifds::domain::{Edge, Vertex};
use crate::shared::models::{BackwardGraph, MethodId, SharedGraph};

use super::analyzer::{AnalyzerEvent, SharedAnalyzerFactory};
use super::runner::{IfdsRunner, IfdsUnit, RunnerOutput, UnitRunnerFactory, UnitStatistics};
use super::unit_resolver::{UnitId, UnitResolver};

pub struct BidiRunner {
    unit: UnitId,
    forward: IfdsRunner,
    backward: IfdsRunner,
    resolver: UnitResolver,
    /// Forward graph, used for unit membership
    graph: SharedGraph,
}

impl BidiRunner {
    pub fn new(
        unit: UnitId,
        graph: SharedGraph,
        resolver: UnitResolver,
        forward: IfdsRunner,
        backward: IfdsRunner,
    ) -> Self {
        Self {
            unit,
            forward,
            backward,
            resolver,
            graph,
        }
    }

    fn owns(&self, edge: &Edge) -> bool {
        self.resolver.resolve(self.graph.as_ref(), edge.method()) == self.unit
    }

    /// Route outputs of one side; returns how many edges were handed to the
    /// opposite side
    fn route(
        &mut self,
        outputs: Vec<RunnerOutput>,
        from_forward: bool,
        external: &mut Vec<RunnerOutput>,
    ) -> usize {
        let mut handed_over = 0;
        for output in outputs {
            match output {
                RunnerOutput::Event(AnalyzerEvent::EdgeForOtherRunner(edge)) if self.owns(&edge) => {
                    if from_forward {
                        self.backward.submit_new_edge(edge);
                    } else {
                        self.forward.submit_new_edge(edge);
                    }
                    handed_over += 1;
                }
                // Backward results only matter to this unit's forward pass
                RunnerOutput::Event(AnalyzerEvent::EdgeForOtherRunner(edge)) if !from_forward => {
                    debug!(unit = %self.unit, edge = %edge, "dropping foreign backward edge");
                }
                // The backward companion never subscribes to summaries
                RunnerOutput::Subscribe(_) if !from_forward => {}
                other => external.push(other),
            }
        }
        handed_over
    }
}

impl IfdsUnit for BidiRunner {
    fn unit(&self) -> &UnitId {
        &self.unit
    }

    fn start(&mut self, method: MethodId) -> Result<()> {
        self.forward.start(method)
    }

    fn submit_new_edge(&mut self, edge: Edge) {
        self.forward.submit_new_edge(edge);
    }

    /// Alias queries coming from forward runners of other units
    fn submit_other_runner_edge(&mut self, edge: Edge) {
        self.backward.submit_new_edge(edge);
    }

    fn submit_external_summary(&mut self, start: Vertex, exit: Vertex) -> Result<()> {
        self.forward.submit_external_summary(start, exit)
    }

    fn run(&mut self) -> Result<Vec<RunnerOutput>> {
        let mut external = Vec::new();
        loop {
            let outputs = self.forward.run()?;
            let to_backward = self.route(outputs, true, &mut external);
            let outputs = self.backward.run()?;
            let to_forward = self.route(outputs, false, &mut external);
            if to_backward == 0 && to_forward == 0 {
                break;
            }
        }
        Ok(external)
    }

    fn finish(&mut self) -> Result<Vec<RunnerOutput>> {
        let mut outputs = self.forward.finish()?;
        outputs.extend(self.backward.finish()?);
        debug!(unit = %self.unit, "bidi unit finished");
        Ok(outputs)
    }

    fn statistics(&self) -> UnitStatistics {
        let mut stats = self.forward.statistics();
        stats.merge(&self.backward.statistics());
        stats
    }
}

/// Pairs a forward analyzer with a backward companion in every unit
pub struct BidiUnitRunnerFactory {
    forward: SharedAnalyzerFactory,
    backward: SharedAnalyzerFactory,
}

impl BidiUnitRunnerFactory {
    pub fn new(forward: SharedAnalyzerFactory, backward: SharedAnalyzerFactory) -> Self {
        Self { forward, backward }
    }
}

impl UnitRunnerFactory for BidiUnitRunnerFactory {
    fn create(
        &self,
        unit: UnitId,
        graph: SharedGraph,
        resolver: UnitResolver,
        build_trace_graphs: bool,
    ) -> Box<dyn IfdsUnit> {
        let reversed = BackwardGraph::shared(graph.clone());
        let forward = IfdsRunner::new(
            unit.clone(),
            graph.clone(),
            resolver,
            self.forward.create(graph.clone()),
            build_trace_graphs,
        );
        let backward = IfdsRunner::new(
            unit.clone(),
            reversed.clone(),
            resolver,
            self.backward.create(reversed),
            false,
        );
        Box::new(BidiRunner::new(unit, graph, resolver, forward, backward))
    }
}
