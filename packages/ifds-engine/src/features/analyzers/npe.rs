//! Null-dereference analyzer
//!
//! `Npe(p)` means "p may be null here". Facts are born at null constants,
//! nullable calls and arrays of nullable elements, refined by `p == null`
//! branches, and reported where `p` is dereferenced while active.

use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::config::AnalysisConfig;
use crate::features::ifds::domain::{
    AccessPath, Accessor, CrossUnitCallFact, DomainFact, Edge, SummaryFact, TaintKind,
    VulnerabilityLocation,
};
use crate::features::ifds::infrastructure::{
    normal_fact_flow, Analyzer, AnalyzerEvent, Facts, FlowFunctionsSpace, ForwardFunctions,
    ForwardTransmit, SharedAnalyzerFactory,
};
use crate::shared::models::{CallExpr, CmpOp, Condition, Expr, Inst, InstKind, SharedGraph, Value};

use super::callee_method;

pub const NPE_RULE_ID: &str = "npe-analysis";

/// Whether executing `inst` dereferences `path`
pub fn is_dereferenced_at(path: &AccessPath, inst: &Inst) -> bool {
    let receiver_deref = inst
        .call_expr()
        .and_then(|call| call.instance.as_ref())
        .and_then(Value::to_path)
        .is_some_and(|receiver| receiver.starts_with(path));
    if receiver_deref {
        return true;
    }

    if let Some((_, Expr::Length(array))) = inst.assign_parts() {
        if array.to_path().is_some_and(|a| a.starts_with(path)) {
            return true;
        }
    }

    inst.operands()
        .into_iter()
        .filter_map(Value::to_path)
        .any(|p| p.minus(path).is_some_and(|suffix| !suffix.is_empty()))
}

pub struct NpeTransmit {
    graph: SharedGraph,
    max_path_length: usize,
    known_nullable: Arc<FxHashSet<String>>,
}

impl NpeTransmit {
    pub fn new(graph: SharedGraph, max_path_length: usize, known_nullable: Arc<FxHashSet<String>>) -> Self {
        Self {
            graph,
            max_path_length,
            known_nullable,
        }
    }

    fn treat_as_nullable(&self, call: &CallExpr) -> bool {
        callee_method(self.graph.as_ref(), call).is_some_and(|method| {
            method.return_nullable == Some(true) || self.known_nullable.contains(&method.qualified_name())
        })
    }

    fn path_compared_with_null(&self, condition: &Condition) -> Option<AccessPath> {
        let compared = if condition.rhs.is_null_constant() {
            &condition.lhs
        } else if condition.lhs.is_null_constant() {
            &condition.rhs
        } else {
            return None;
        };
        compared.to_path().map(|p| p.limit(self.max_path_length))
    }
}

impl ForwardTransmit for NpeTransmit {
    fn obtain_possible_start_facts(&self, start: &Inst) -> Facts {
        let mut facts = vec![DomainFact::Zero];
        let Some(method) = self.graph.method(start.id.method) else {
            return facts;
        };

        // Fields are not expanded further: deeper paths only add noise
        facts.extend(
            method
                .params
                .iter()
                .enumerate()
                .filter(|(_, p)| p.nullable != Some(false))
                .map(|(index, _)| DomainFact::npe(AccessPath::from_argument(index as u32))),
        );

        let fields = self.graph.fields_of(&method.class_name);
        facts.extend(
            fields
                .iter()
                .filter(|f| f.is_static && f.nullable != Some(false))
                .map(|f| DomainFact::npe(AccessPath::from_static_field(f.reference(&method.class_name)))),
        );
        if !method.is_static {
            facts.extend(
                fields
                    .iter()
                    .filter(|f| !f.is_static && f.is_public && !f.is_final && f.nullable != Some(false))
                    .map(|f| {
                        DomainFact::npe(
                            AccessPath::from_this().extend([Accessor::Field(f.reference(&method.class_name))]),
                        )
                    }),
            );
        }
        facts
    }

    fn transmit_data_flow(
        &self,
        from: &Expr,
        to: &Value,
        at: &Inst,
        fact: &DomainFact,
        drop_fact: bool,
    ) -> Facts {
        let k = self.max_path_length;
        let default = if drop_fact && !fact.is_zero() {
            Vec::new()
        } else {
            vec![fact.clone()]
        };
        let Some(to_path) = to.to_path().map(|p| p.limit(k)) else {
            return default;
        };

        if fact.is_zero() {
            return match from {
                Expr::Value(v) if v.is_null_constant() => {
                    vec![DomainFact::Zero, DomainFact::npe(to_path)]
                }
                Expr::Call(call) if self.treat_as_nullable(call) => {
                    vec![DomainFact::Zero, DomainFact::npe(to_path)]
                }
                Expr::NewArray {
                    element_nullable,
                    dimensions,
                    ..
                } if *element_nullable != Some(false) => {
                    let elements = to_path.extend((0..*dimensions).map(|_| Accessor::Element));
                    vec![DomainFact::Zero, DomainFact::npe(elements.limit(k))]
                }
                _ => vec![DomainFact::Zero],
            };
        }

        let node = match fact.as_taint() {
            Some(node) if node.kind == TaintKind::Npe => node,
            _ => return Vec::new(),
        };
        if is_dereferenced_at(&node.variable, at) {
            return Vec::new();
        }

        let non_null_value = match from {
            Expr::New { .. } | Expr::NewArray { .. } => true,
            Expr::Value(Value::Constant(_)) => true,
            Expr::Call(call) => !self.treat_as_nullable(call),
            _ => false,
        };
        if non_null_value {
            return if node.variable.starts_with(&to_path) {
                Vec::new()
            } else {
                default
            };
        }

        match from.to_path() {
            Some(from_path) => normal_fact_flow(fact, &from_path.limit(k), &to_path, drop_fact, k),
            None => default,
        }
    }

    fn transmit_data_flow_at_normal_inst(&self, inst: &Inst, next: &Inst, fact: &DomainFact) -> Facts {
        let fact_path = match fact {
            DomainFact::Zero => None,
            DomainFact::Taint(node) if node.kind == TaintKind::Npe => Some(&node.variable),
            _ => return Vec::new(),
        };
        if fact_path.is_some_and(|p| is_dereferenced_at(p, inst)) {
            return Vec::new();
        }

        let InstKind::If {
            condition,
            true_branch,
            ..
        } = &inst.kind
        else {
            return vec![fact.clone()];
        };

        // On the "null" edge the compared path is known to be null; on the
        // other edge it is known not to be
        let next_is_true_branch = next.id.index == *true_branch;
        let null_branch = match condition.op {
            CmpOp::Eq => next_is_true_branch,
            CmpOp::Neq => !next_is_true_branch,
            _ => false,
        };
        let compared = self.path_compared_with_null(condition);

        match fact_path {
            None => match compared {
                Some(path) if null_branch => vec![DomainFact::npe(path)],
                _ => vec![DomainFact::Zero],
            },
            Some(path) if compared.as_ref() == Some(path) => {
                if null_branch {
                    vec![DomainFact::Zero]
                } else {
                    Vec::new()
                }
            }
            Some(_) => vec![fact.clone()],
        }
    }
}

pub struct NpeAnalyzer {
    graph: SharedGraph,
    flow_functions: ForwardFunctions<NpeTransmit>,
}

impl NpeAnalyzer {
    pub fn new(graph: SharedGraph, max_path_length: usize, known_nullable: Arc<FxHashSet<String>>) -> Self {
        let transmit = NpeTransmit::new(graph.clone(), max_path_length, known_nullable);
        Self {
            flow_functions: ForwardFunctions::new(graph.clone(), transmit),
            graph,
        }
    }
}

impl Analyzer for NpeAnalyzer {
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
        let reported = match (edge.v.fact.as_taint(), self.graph.inst(edge.v.inst)) {
            (Some(node), Some(inst)) => {
                node.kind == TaintKind::Npe && node.is_active() && is_dereferenced_at(&node.variable, inst)
            }
            _ => false,
        };
        if reported {
            let location = VulnerabilityLocation::new(
                NPE_RULE_ID,
                edge.v.clone(),
                format!("{} may be null", edge.v.fact),
            );
            events.push(AnalyzerEvent::NewSummaryFact(SummaryFact::Vulnerability(location)));
        }
        events.extend(self.summary_edge_events(edge));
        events
    }

    fn handle_new_cross_unit_call(&mut self, fact: &CrossUnitCallFact) -> Vec<AnalyzerEvent> {
        let mut events = vec![AnalyzerEvent::EdgeForOtherRunner(Edge::start(
            fact.callee_vertex.clone(),
        ))];
        events.extend(self.cross_unit_call_events(fact));
        events
    }
}

pub fn npe_analyzer_factory(config: &AnalysisConfig) -> SharedAnalyzerFactory {
    let max_path_length = config.max_path_length;
    let known_nullable: Arc<FxHashSet<String>> =
        Arc::new(config.npe.known_nullable_methods.iter().cloned().collect());
    Arc::new(move |graph: SharedGraph| -> Box<dyn Analyzer> {
        Box::new(NpeAnalyzer::new(graph, max_path_length, known_nullable.clone()))
    })
}
