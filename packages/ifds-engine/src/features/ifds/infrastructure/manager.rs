/*
 * Unit Manager
 *
 * Owns the tokio runtime, spawns one worker per analysis unit on first use,
 * and is the single consumer of every unit's events.
 *
 *   manager --UnitMessage--> unit mailbox (one unbounded mpsc per unit)
 *   units   --UnitEvent----> manager     (one shared unbounded mpsc)
 *
 * Summary exchange:
 *   Subscribe{start}      -> replay memoized exits; first request also asks
 *                            the owning unit to compute (start, start)
 *   SummaryEdge(start, e) -> forward e to every subscriber of start
 *
 * Termination: every message sent to a unit is counted. A unit reports
 * Idle{processed} after draining its mailbox and worklist. Once every unit's
 * last Idle count equals its sent count, no work is in flight anywhere: the
 * manager sends Shutdown, collects the post-fixpoint events, and joins.
 */

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tokio::runtime::Runtime;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::AnalysisConfig;
use crate::errors::{IfdsError, Result};
use crate::features::ifds::domain::{
    CrossUnitCallFact, Edge, SummaryFact, TraceGraph, Vertex, VulnerabilityLocation,
};
use crate::shared::models::{MethodId, SharedGraph};

use super::analyzer::AnalyzerEvent;
use super::runner::{IfdsUnit, RunnerOutput, UnitRunnerFactory, UnitStatistics};
use super::summary_storage::SummaryStorage;
use super::unit_resolver::{UnitId, UnitResolver};

/// Manager -> unit
#[derive(Debug, Clone)]
pub enum UnitMessage {
    Start(MethodId),
    /// Compute from this edge (typically a callee start vertex)
    NewEdge(Edge),
    /// Edge an analyzer in another unit addressed to "the other runner"
    EdgeForOtherRunner(Edge),
    ExternalSummary { start: Vertex, exit: Vertex },
    Shutdown,
}

/// Unit -> manager
#[derive(Debug)]
pub enum UnitEvent {
    Event { unit: UnitId, event: AnalyzerEvent },
    Subscribe { unit: UnitId, start: Vertex },
    /// Mailbox and worklist drained after `processed` messages
    Idle { unit: UnitId, processed: usize },
    Finished { unit: UnitId, statistics: UnitStatistics },
    Crashed { unit: UnitId, reason: String },
}

/// Everything a finished run produced
#[derive(Debug, Clone, Default)]
pub struct ManagerOutcome {
    pub vulnerabilities: Vec<VulnerabilityLocation>,
    pub trace_graphs: Vec<TraceGraph>,
    pub cross_unit_calls: Vec<CrossUnitCallFact>,
    pub units: usize,
    pub statistics: UnitStatistics,
}

pub struct UnitManager {
    graph: SharedGraph,
    resolver: UnitResolver,
    factory: Arc<dyn UnitRunnerFactory>,
    build_trace_graphs: bool,
    runtime: Runtime,
}

impl UnitManager {
    pub fn new(
        graph: SharedGraph,
        config: &AnalysisConfig,
        factory: Arc<dyn UnitRunnerFactory>,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.effective_worker_threads())
            .thread_name("ifds-unit")
            .build()?;
        Ok(Self {
            graph,
            resolver: UnitResolver::new(config.unit_strategy),
            factory,
            build_trace_graphs: config.build_trace_graphs,
            runtime,
        })
    }

    pub fn resolver(&self) -> UnitResolver {
        self.resolver
    }

    /// Run to the fixpoint from the given start methods
    ///
    /// Methods without a body are skipped. Blocks until every unit has shut
    /// down; a failing unit aborts the whole run with its error.
    pub fn run(&self, start_methods: &[MethodId]) -> Result<ManagerOutcome> {
        self.runtime.block_on(self.run_async(start_methods))
    }

    async fn run_async(&self, start_methods: &[MethodId]) -> Result<ManagerOutcome> {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let mut state = ManagerState {
            graph: self.graph.clone(),
            resolver: self.resolver,
            factory: self.factory.clone(),
            build_trace_graphs: self.build_trace_graphs,
            storage: SummaryStorage::new(),
            units: FxHashMap::default(),
            event_tx: Some(event_tx),
            statistics: UnitStatistics::default(),
            failure: None,
        };

        for &method in start_methods {
            let has_body = self.graph.method(method).is_some_and(|m| m.has_body());
            if !has_body {
                debug!(method = %method, "skipping start method without body");
                continue;
            }
            let unit = self.resolver.resolve(self.graph.as_ref(), method);
            state.send(unit, UnitMessage::Start(method));
        }

        if !state.units.is_empty() {
            while let Some(event) = event_rx.recv().await {
                state.handle(event);
                if state.failure.is_some() || state.is_quiescent() {
                    break;
                }
            }
        }

        // Post-fixpoint phase: result hooks run inside each unit
        let units = state.units.len();
        for handle in state.units.values() {
            // A crashed unit has already dropped its mailbox
            let _ = handle.sender.send(UnitMessage::Shutdown);
        }
        state.event_tx = None;
        while let Some(event) = event_rx.recv().await {
            state.handle_final(event);
        }

        let handles: Vec<JoinHandle<()>> = state.units.drain().map(|(_, h)| h.join).collect();
        for join in handles {
            join.await
                .map_err(|e| IfdsError::runtime(format!("unit worker failed: {}", e)))?;
        }

        if let Some(error) = state.failure {
            return Err(error);
        }

        let mut statistics = state.statistics;
        statistics.summary_edges = state.storage.summary_edge_count();
        let outcome = ManagerOutcome {
            vulnerabilities: state.storage.vulnerabilities(),
            trace_graphs: state.storage.trace_graphs(),
            cross_unit_calls: state.storage.cross_unit_calls(),
            units,
            statistics,
        };
        info!(
            units = outcome.units,
            vulnerabilities = outcome.vulnerabilities.len(),
            processed_edges = outcome.statistics.processed_edges,
            "analysis finished"
        );
        Ok(outcome)
    }
}

// ============================================================================
// Manager state
// ============================================================================

struct UnitHandle {
    sender: UnboundedSender<UnitMessage>,
    join: JoinHandle<()>,
    sent: usize,
    idle_at: Option<usize>,
}

struct ManagerState {
    graph: SharedGraph,
    resolver: UnitResolver,
    factory: Arc<dyn UnitRunnerFactory>,
    build_trace_graphs: bool,
    storage: SummaryStorage,
    units: FxHashMap<UnitId, UnitHandle>,
    /// Dropped once shutdown starts so the event channel can close
    event_tx: Option<UnboundedSender<UnitEvent>>,
    statistics: UnitStatistics,
    failure: Option<IfdsError>,
}

impl ManagerState {
    fn owner_of(&self, edge: &Edge) -> UnitId {
        self.resolver.resolve(self.graph.as_ref(), edge.method())
    }

    fn send(&mut self, unit: UnitId, message: UnitMessage) {
        let Some(event_tx) = self.event_tx.clone() else {
            warn!(unit = %unit, "message dropped after shutdown");
            return;
        };
        let handle = self.units.entry(unit.clone()).or_insert_with(|| {
            let runner = self.factory.create(
                unit.clone(),
                self.graph.clone(),
                self.resolver,
                self.build_trace_graphs,
            );
            let (sender, mailbox) = mpsc::unbounded_channel();
            debug!(unit = %unit, "spawning unit worker");
            let join = tokio::spawn(unit_worker(runner, mailbox, event_tx));
            UnitHandle {
                sender,
                join,
                sent: 0,
                idle_at: None,
            }
        });
        if handle.sender.send(message).is_ok() {
            handle.sent += 1;
        } else {
            warn!(unit = %unit, "unit mailbox closed");
        }
    }

    fn is_quiescent(&self) -> bool {
        self.units
            .values()
            .all(|handle| handle.idle_at == Some(handle.sent))
    }

    fn handle(&mut self, event: UnitEvent) {
        match event {
            UnitEvent::Event { unit, event } => self.handle_analyzer_event(unit, event),
            UnitEvent::Subscribe { unit, start } => {
                let subscription = self.storage.subscribe(unit.clone(), &start);
                for exit in subscription.known_exits {
                    self.send(
                        unit.clone(),
                        UnitMessage::ExternalSummary {
                            start: start.clone(),
                            exit,
                        },
                    );
                }
                if subscription.first_request {
                    let edge = Edge::start(start);
                    let owner = self.owner_of(&edge);
                    self.send(owner, UnitMessage::NewEdge(edge));
                }
            }
            UnitEvent::Idle { unit, processed } => {
                if let Some(handle) = self.units.get_mut(&unit) {
                    handle.idle_at = Some(processed);
                }
            }
            UnitEvent::Finished { statistics, .. } => self.statistics.merge(&statistics),
            UnitEvent::Crashed { unit, reason } => {
                warn!(unit = %unit, reason = %reason, "unit crashed");
                self.failure.get_or_insert(IfdsError::unit_crashed(unit, reason));
            }
        }
    }

    fn handle_analyzer_event(&mut self, unit: UnitId, event: AnalyzerEvent) {
        match event {
            AnalyzerEvent::NewSummaryFact(fact) => self.store(fact),
            AnalyzerEvent::EdgeForOtherRunner(edge) => {
                let owner = self.owner_of(&edge);
                debug!(from = %unit, to = %owner, "edge for other runner");
                self.send(owner, UnitMessage::EdgeForOtherRunner(edge));
            }
        }
    }

    fn store(&mut self, fact: SummaryFact) {
        match fact {
            SummaryFact::SummaryEdge(edge) => {
                for subscriber in self.storage.add_summary_edge(&edge) {
                    self.send(
                        subscriber,
                        UnitMessage::ExternalSummary {
                            start: edge.u.clone(),
                            exit: edge.v.clone(),
                        },
                    );
                }
            }
            SummaryFact::Vulnerability(location) => {
                let vertex = location.vertex.to_string();
                let rule = location.rule_id.clone();
                if self.storage.add_vulnerability(location) {
                    info!(rule = %rule, vertex = %vertex, "vulnerability found");
                }
            }
            SummaryFact::CrossUnitCall(call) => {
                self.storage.add_cross_unit_call(call);
            }
            SummaryFact::TraceGraph(graph) => self.storage.add_trace_graph(graph),
        }
    }

    /// Events after shutdown: only facts and statistics still matter
    fn handle_final(&mut self, event: UnitEvent) {
        match event {
            UnitEvent::Event {
                event: AnalyzerEvent::NewSummaryFact(fact),
                ..
            } => self.store(fact),
            UnitEvent::Finished { statistics, .. } => self.statistics.merge(&statistics),
            UnitEvent::Crashed { unit, reason } => {
                warn!(unit = %unit, reason = %reason, "unit crashed during shutdown");
                self.failure.get_or_insert(IfdsError::unit_crashed(unit, reason));
            }
            _ => {}
        }
    }
}

// ============================================================================
// Unit worker
// ============================================================================

fn apply(runner: &mut dyn IfdsUnit, message: UnitMessage) -> Result<()> {
    match message {
        UnitMessage::Start(method) => runner.start(method),
        UnitMessage::NewEdge(edge) => {
            runner.submit_new_edge(edge);
            Ok(())
        }
        UnitMessage::EdgeForOtherRunner(edge) => {
            runner.submit_other_runner_edge(edge);
            Ok(())
        }
        UnitMessage::ExternalSummary { start, exit } => runner.submit_external_summary(start, exit),
        UnitMessage::Shutdown => Ok(()),
    }
}

/// Run a synchronous runner step, turning panics into errors
fn guarded<T>(step: impl FnOnce() -> Result<T>) -> Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(step)) {
        Ok(result) => result,
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic".to_string());
            Err(IfdsError::runtime(reason))
        }
    }
}

fn forward_outputs(
    unit: &UnitId,
    outputs: Vec<RunnerOutput>,
    events: &UnboundedSender<UnitEvent>,
) -> bool {
    for output in outputs {
        let event = match output {
            RunnerOutput::Event(event) => UnitEvent::Event {
                unit: unit.clone(),
                event,
            },
            RunnerOutput::Subscribe(start) => UnitEvent::Subscribe {
                unit: unit.clone(),
                start,
            },
        };
        if events.send(event).is_err() {
            return false;
        }
    }
    true
}

async fn unit_worker(
    mut runner: Box<dyn IfdsUnit>,
    mut mailbox: UnboundedReceiver<UnitMessage>,
    events: UnboundedSender<UnitEvent>,
) {
    let unit = runner.unit().clone();
    let mut processed = 0usize;

    while let Some(first) = mailbox.recv().await {
        let mut shutdown = false;
        let mut batch = vec![first];
        while let Ok(message) = mailbox.try_recv() {
            batch.push(message);
        }

        let step = guarded(|| {
            for message in batch {
                if matches!(message, UnitMessage::Shutdown) {
                    shutdown = true;
                    continue;
                }
                processed += 1;
                apply(runner.as_mut(), message)?;
            }
            runner.run()
        });
        let outputs = match step {
            Ok(outputs) => outputs,
            Err(error) => {
                let _ = events.send(UnitEvent::Crashed {
                    unit: unit.clone(),
                    reason: error.to_string(),
                });
                return;
            }
        };
        if !forward_outputs(&unit, outputs, &events) {
            return;
        }

        if shutdown {
            match guarded(|| runner.finish()) {
                Ok(outputs) => {
                    forward_outputs(&unit, outputs, &events);
                    let _ = events.send(UnitEvent::Finished {
                        unit: unit.clone(),
                        statistics: runner.statistics(),
                    });
                }
                Err(error) => {
                    let _ = events.send(UnitEvent::Crashed {
                        unit: unit.clone(),
                        reason: error.to_string(),
                    });
                }
            }
            debug!(unit = %unit, processed, "unit worker stopped");
            return;
        }

        if events
            .send(UnitEvent::Idle {
                unit: unit.clone(),
                processed,
            })
            .is_err()
        {
            return;
        }
        // Runner steps are CPU-bound; let other units on this worker thread in
        tokio::task::yield_now().await;
    }
}
