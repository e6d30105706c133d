/*
 * Generic Taint Analyzer
 *
 * Source/sink/sanitizer rules come from configuration as `Class#method`
 * patterns:
 *
 *   r = Source#read()      generates   Taint(r)
 *   Sink#exec(a, b.f)      sinks       Taint(a), Taint(b.f), Taint(b)
 *   Util#escape(x)         sanitizes   facts related to x (inactive ones kept)
 *
 * The forward analyzer reports a finding whenever a fact listed by the sink
 * rule reaches the sink instruction. With alias queries enabled, every
 * heap fact that is born at a store hands a gated copy to the backward
 * companion, which walks back to the method entry looking for other names
 * of the same object and returns them to the forward pass.
 */

use std::sync::Arc;

use crate::config::{AnalysisConfig, ConfigResult, MethodMatchers};
use crate::features::ifds::domain::{
    AccessPath, DomainFact, Edge, SummaryFact, TaintNode, Vertex, VulnerabilityLocation,
};
use crate::features::ifds::infrastructure::{
    normal_fact_flow, Analyzer, AnalyzerEvent, BackwardFunctions, BackwardTransmit, Facts,
    FlowFunctionsSpace, ForwardFunctions, ForwardTransmit, SharedAnalyzerFactory,
};
use crate::shared::models::{ApplicationGraph, Expr, Inst, SharedGraph, Value};

use super::callee_method;

pub const TAINT_RULE_ID: &str = "taint-analysis";

/// Compiled source/sink/sanitizer rules
#[derive(Debug, Clone, Default)]
pub struct TaintRules {
    sources: MethodMatchers,
    sinks: MethodMatchers,
    sanitizers: MethodMatchers,
    max_path_length: usize,
}

impl TaintRules {
    pub fn new(
        sources: MethodMatchers,
        sinks: MethodMatchers,
        sanitizers: MethodMatchers,
        max_path_length: usize,
    ) -> Self {
        Self {
            sources,
            sinks,
            sanitizers,
            max_path_length,
        }
    }

    pub fn from_config(config: &AnalysisConfig) -> ConfigResult<Self> {
        Ok(Self::new(
            MethodMatchers::compile(&config.taint.sources)?,
            MethodMatchers::compile(&config.taint.sinks)?,
            MethodMatchers::compile(&config.taint.sanitizers)?,
            config.max_path_length,
        ))
    }

    pub fn max_path_length(&self) -> usize {
        self.max_path_length
    }

    /// `Taint(lhv)` for an assignment from a source call
    pub fn generates(&self, graph: &dyn ApplicationGraph, inst: &Inst) -> Facts {
        let Some((lhv, rhv)) = inst.assign_parts() else {
            return Vec::new();
        };
        let is_source = rhv
            .as_call()
            .and_then(|call| callee_method(graph, call))
            .is_some_and(|method| self.sources.matches(method));
        match lhv.to_path() {
            Some(path) if is_source => vec![DomainFact::taint(path)],
            _ => Vec::new(),
        }
    }

    /// Facts that trigger a report at a sink call
    pub fn sinks(&self, graph: &dyn ApplicationGraph, inst: &Inst) -> Facts {
        let Some(call) = inst.call_expr() else {
            return Vec::new();
        };
        if !callee_method(graph, call).is_some_and(|method| self.sinks.matches(method)) {
            return Vec::new();
        }
        call.values()
            .into_iter()
            .filter_map(Value::to_path)
            .map(DomainFact::taint)
            .collect()
    }

    /// Whether a sanitizer call in `expr` clears `node`
    pub fn sanitizes(&self, graph: &dyn ApplicationGraph, expr: &Expr, node: &TaintNode) -> bool {
        let Some(call) = expr.as_call() else {
            return false;
        };
        if node.activation.is_some() {
            return false;
        }
        if !callee_method(graph, call).is_some_and(|method| self.sanitizers.matches(method)) {
            return false;
        }
        call.values()
            .into_iter()
            .any(|value| is_related(value, &node.variable))
    }
}

/// `value` and `path` are prefixes of one another
fn is_related(value: &Value, path: &AccessPath) -> bool {
    value
        .to_path()
        .is_some_and(|p| p.starts_with(path) || path.starts_with(&p))
}

// ============================================================================
// Forward
// ============================================================================

pub struct TaintForwardTransmit {
    graph: SharedGraph,
    rules: Arc<TaintRules>,
}

impl TaintForwardTransmit {
    pub fn new(graph: SharedGraph, rules: Arc<TaintRules>) -> Self {
        Self { graph, rules }
    }
}

impl ForwardTransmit for TaintForwardTransmit {
    fn obtain_possible_start_facts(&self, _start: &Inst) -> Facts {
        vec![DomainFact::Zero]
    }

    fn transmit_data_flow(
        &self,
        from: &Expr,
        to: &Value,
        at: &Inst,
        fact: &DomainFact,
        drop_fact: bool,
    ) -> Facts {
        let graph = self.graph.as_ref();
        let k = self.rules.max_path_length;

        let node = match fact {
            // Generation happens once per instruction, on the non-dropping flow
            DomainFact::Zero if drop_fact => return vec![DomainFact::Zero],
            DomainFact::Zero => {
                let mut out = vec![DomainFact::Zero];
                out.extend(self.rules.generates(graph, at));
                return out;
            }
            DomainFact::Taint(node) => node,
            _ => return Vec::new(),
        };

        let sanitized = self.rules.sanitizes(graph, from, node);
        let receiver = from
            .as_call()
            .and_then(|call| call.instance.as_ref())
            .and_then(Value::to_path);
        let mut default = if drop_fact || (sanitized && receiver.as_ref() == Some(&node.variable)) {
            Vec::new()
        } else {
            vec![fact.clone()]
        };

        let Some(to_path) = to.to_path().map(|p| p.limit(k)) else {
            return default;
        };

        if let Some(from_path) = from.to_path() {
            if sanitized {
                return default;
            }
            if from_path.starts_with(&node.variable) {
                default.push(node.move_to_other_path(to_path).into());
                return default;
            }
            return normal_fact_flow(fact, &from_path, &to_path, drop_fact, k);
        }

        if from.values().into_iter().any(|v| is_related(v, &node.variable)) {
            if !sanitized {
                default.push(node.move_to_other_path(to_path).into());
                if let Some(receiver) = receiver {
                    default.push(node.move_to_other_path(receiver).into());
                }
            }
            return default;
        }

        if node.variable.starts_with(&to_path) {
            return Vec::new();
        }
        default
    }

    fn transmit_data_flow_at_normal_inst(
        &self,
        inst: &Inst,
        _next: &Inst,
        fact: &DomainFact,
    ) -> Facts {
        let node = match fact {
            DomainFact::Zero => {
                let mut out = vec![DomainFact::Zero];
                out.extend(self.rules.generates(self.graph.as_ref(), inst));
                return out;
            }
            DomainFact::Taint(node) => node,
            _ => return Vec::new(),
        };

        // A sanitizer call clears whatever it is handed, receiver or argument
        let Some(call) = inst.call_expr() else {
            return vec![fact.clone()];
        };
        let as_expr = Expr::Call(call.clone());
        if self.rules.sanitizes(self.graph.as_ref(), &as_expr, node) {
            return Vec::new();
        }
        vec![fact.clone()]
    }
}

/// Forward taint analyzer; the run's main analyzer
pub struct TaintAnalyzer {
    graph: SharedGraph,
    rules: Arc<TaintRules>,
    flow_functions: ForwardFunctions<TaintForwardTransmit>,
    alias_queries: bool,
}

impl TaintAnalyzer {
    pub fn new(graph: SharedGraph, rules: Arc<TaintRules>, alias_queries: bool) -> Self {
        let transmit = TaintForwardTransmit::new(graph.clone(), rules.clone());
        Self {
            flow_functions: ForwardFunctions::new(graph.clone(), transmit),
            graph,
            rules,
            alias_queries,
        }
    }

    fn describe(&self, inst: &Inst, node: &TaintNode) -> String {
        let callee = inst
            .call_expr()
            .and_then(|call| callee_method(self.graph.as_ref(), call))
            .map(|m| m.signature())
            .unwrap_or_default();
        format!("tainted {} reaches {}", node.variable, callee)
    }

    /// Gated copies of a heap fact for each predecessor that may have
    /// written it
    fn alias_query_events(&self, vertex: &Vertex, node: &TaintNode) -> Vec<AnalyzerEvent> {
        if !node.is_active() || !node.variable.is_on_heap() || node.variable.is_static() {
            return Vec::new();
        }
        self.graph
            .predecessors(vertex.inst)
            .iter()
            .filter_map(|&pred| self.graph.inst(pred))
            .filter(|pred| writes_prefix_of(pred, &node.variable))
            .map(|pred| {
                let gated = DomainFact::from(node.update_activation(pred.id));
                AnalyzerEvent::EdgeForOtherRunner(Edge::start(Vertex::new(pred.id, gated)))
            })
            .collect()
    }
}

/// `inst` stores into `path` or into an object `path` is reachable from
fn writes_prefix_of(inst: &Inst, path: &AccessPath) -> bool {
    let target_written = inst
        .lhv()
        .and_then(Value::to_path)
        .is_some_and(|lhv| path.starts_with(&lhv));
    let passed_to_call = inst.call_expr().is_some_and(|call| {
        call.operands()
            .into_iter()
            .any(|v| v.to_path().is_some_and(|p| path.starts_with(&p)))
    });
    target_written || passed_to_call
}

impl Analyzer for TaintAnalyzer {
    fn flow_functions(&self) -> &dyn FlowFunctionsSpace {
        &self.flow_functions
    }

    fn graph(&self) -> &SharedGraph {
        &self.graph
    }

    fn is_main_analyzer(&self) -> bool {
        true
    }

    fn handle_new_edge(&mut self, edge: &Edge) -> Vec<AnalyzerEvent> {
        let mut events = Vec::new();
        if let (Some(inst), Some(node)) = (self.graph.inst(edge.v.inst), edge.v.fact.as_taint()) {
            if self.rules.sinks(self.graph.as_ref(), inst).contains(&edge.v.fact) {
                let location =
                    VulnerabilityLocation::new(TAINT_RULE_ID, edge.v.clone(), self.describe(inst, node));
                events.push(AnalyzerEvent::NewSummaryFact(SummaryFact::Vulnerability(location)));
            }
            if self.alias_queries {
                events.extend(self.alias_query_events(&edge.v, node));
            }
        }
        events.extend(self.summary_edge_events(edge));
        events
    }
}

// ============================================================================
// Backward companion
// ============================================================================

pub struct TaintBackwardTransmit {
    /// Reversed graph
    graph: SharedGraph,
    rules: Arc<TaintRules>,
}

impl TaintBackwardTransmit {
    pub fn new(graph: SharedGraph, rules: Arc<TaintRules>) -> Self {
        Self { graph, rules }
    }
}

impl BackwardTransmit for TaintBackwardTransmit {
    fn transmit_back_data_flow(
        &self,
        from: &Value,
        to: &Expr,
        at: &Inst,
        fact: &DomainFact,
        drop_fact: bool,
    ) -> Facts {
        let graph = self.graph.as_ref();
        let node = match fact {
            DomainFact::Zero => {
                let mut out = vec![DomainFact::Zero];
                out.extend(self.rules.sinks(graph, at));
                return out;
            }
            DomainFact::Taint(node) => node,
            _ => return Vec::new(),
        };

        let default = if drop_fact || self.rules.generates(graph, at).contains(fact) {
            Vec::new()
        } else {
            vec![fact.clone()]
        };
        let Some(from_path) = from.to_path() else {
            return default;
        };

        if let Some(to_path) = to.to_path() {
            if let Some(diff) = node.variable.minus(&from_path) {
                let moved = (&to_path / diff.as_slice()).limit(self.rules.max_path_length);
                return vec![node.move_to_other_path(moved).into()];
            }
            return default;
        }

        let through_receiver = to
            .as_call()
            .and_then(|call| call.instance.as_ref())
            .and_then(Value::to_path)
            .is_some_and(|receiver| node.variable.starts_with(&receiver));
        if node.variable.starts_with(&from_path) || through_receiver {
            return to
                .values()
                .into_iter()
                .filter_map(Value::to_path)
                .map(|p| node.move_to_other_path(p).into())
                .collect();
        }
        default
    }

    fn transmit_data_flow_at_normal_inst(
        &self,
        inst: &Inst,
        _next: &Inst,
        fact: &DomainFact,
    ) -> Facts {
        let node = match fact {
            DomainFact::Zero => {
                let mut out = vec![DomainFact::Zero];
                out.extend(self.rules.sinks(self.graph.as_ref(), inst));
                return out;
            }
            DomainFact::Taint(node) => node,
            _ => return Vec::new(),
        };

        let receiver = inst
            .call_expr()
            .and_then(|call| call.instance.as_ref())
            .and_then(Value::to_path);
        match receiver {
            Some(receiver) if node.variable.starts_with(&receiver) => inst
                .value_paths()
                .into_iter()
                .map(|p| node.move_to_other_path(p).into())
                .collect(),
            _ => vec![fact.clone()],
        }
    }
}

/// Alias search on the reversed graph; hands method-entry facts back to the
/// forward runner
pub struct TaintBackwardAnalyzer {
    graph: SharedGraph,
    flow_functions: BackwardFunctions<TaintBackwardTransmit>,
}

impl TaintBackwardAnalyzer {
    /// `graph` must be the reversed view
    pub fn new(graph: SharedGraph, rules: Arc<TaintRules>) -> Self {
        let transmit = TaintBackwardTransmit::new(graph.clone(), rules);
        Self {
            flow_functions: BackwardFunctions::new(graph.clone(), transmit),
            graph,
        }
    }
}

impl Analyzer for TaintBackwardAnalyzer {
    fn flow_functions(&self) -> &dyn FlowFunctionsSpace {
        &self.flow_functions
    }

    fn graph(&self) -> &SharedGraph {
        &self.graph
    }

    fn is_main_analyzer(&self) -> bool {
        false
    }

    fn handle_new_edge(&mut self, edge: &Edge) -> Vec<AnalyzerEvent> {
        if self.graph.is_exit_point(edge.v.inst) {
            vec![AnalyzerEvent::EdgeForOtherRunner(Edge::start(edge.v.clone()))]
        } else {
            Vec::new()
        }
    }
}

// ============================================================================
// Factories
// ============================================================================

pub fn taint_analyzer_factory(rules: Arc<TaintRules>, alias_queries: bool) -> SharedAnalyzerFactory {
    Arc::new(move |graph: SharedGraph| -> Box<dyn Analyzer> {
        Box::new(TaintAnalyzer::new(graph, rules.clone(), alias_queries))
    })
}

pub fn taint_backward_analyzer_factory(rules: Arc<TaintRules>) -> SharedAnalyzerFactory {
    Arc::new(move |graph: SharedGraph| -> Box<dyn Analyzer> {
        Box::new(TaintBackwardAnalyzer::new(graph, rules.clone()))
    })
}
