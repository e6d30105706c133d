/*
 * Crash Slice Analyzer
 *
 * Runs on the reversed graph, starting from a stack trace given as an
 * ordered list of instructions (outermost frame first, crash point last).
 *
 *   crash point      every value it mentions becomes SliceData, plus an
 *                    active SliceControl
 *   x = f(y, z)      SliceData(x) -> SliceData(y), SliceData(z), SliceControl
 *   join point       SliceControl skips the diamond: it waits for the
 *                    instruction before the branch that split the paths
 *   if (c)           active SliceControl -> SliceData(c)
 *   early return     ZERO -> SliceControl(is_from_return = return)
 *
 * Each instruction where a slice fact is written, consumed by a bodiless
 * call, returned, or branched on is reported as part of the slice.
 */

use std::sync::Arc;

use crate::features::ifds::domain::{
    AccessPath, CrossUnitCallFact, DomainFact, Edge, SummaryFact, TaintKind, VulnerabilityLocation,
};
use crate::features::ifds::infrastructure::{
    Analyzer, AnalyzerEvent, BackwardFunctions, BackwardTransmit, Facts, FlowFunctionsSpace,
    SharedAnalyzerFactory,
};
use crate::shared::models::{Expr, Inst, InstId, InstKind, SharedGraph, Value};

use super::dominators::DominatorCache;

pub const SLICE_RULE_ID: &str = "slicing";

/// `"m3#7"` or `"m3#7 (line 42)"`
fn location(inst: &Inst) -> String {
    match inst.line {
        Some(line) => format!("{} (line {})", inst.id, line),
        None => inst.id.to_string(),
    }
}

pub struct CrashSliceTransmit {
    /// Reversed graph
    graph: SharedGraph,
    sinks: Arc<Vec<InstId>>,
    max_path_length: usize,
    dominators: DominatorCache,
}

impl CrashSliceTransmit {
    pub fn new(graph: SharedGraph, sinks: Arc<Vec<InstId>>, max_path_length: usize) -> Self {
        Self {
            graph,
            sinks,
            max_path_length,
            dominators: DominatorCache::new(),
        }
    }

    fn is_crash_point(&self, inst: &Inst) -> bool {
        self.sinks.last() == Some(&inst.id)
    }

    /// Method entry in forward order, where facts leave for the callers
    fn is_method_boundary(&self, inst: &Inst) -> bool {
        inst.is_noop() || self.graph.is_exit_point(inst.id)
    }

    /// Flow at the crash point: ZERO seeds the slice, return-learned
    /// control is dropped
    fn crash_point_flow(&self, inst: &Inst, fact: &DomainFact) -> Facts {
        match fact {
            DomainFact::Zero => {
                let mut out = vec![DomainFact::Zero];
                out.extend(
                    inst.value_paths()
                        .into_iter()
                        .map(|p| DomainFact::slice_data(p.limit(self.max_path_length), None)),
                );
                out.push(DomainFact::slice_control(None, None));
                out
            }
            DomainFact::SliceControl {
                is_from_return: Some(_),
                ..
            } => Vec::new(),
            _ => vec![fact.clone()],
        }
    }

    /// Whether `to` is a callee-side value the traced call never passed
    fn is_not_in_trace(&self, at: &Inst, to: &Expr) -> bool {
        for window in self.sinks.windows(2) {
            let (caller_site, frame) = (window[0], window[1]);
            if frame.method == at.id.method {
                return match self.graph.inst(caller_site).and_then(Inst::call_expr) {
                    Some(call) => !call
                        .args
                        .iter()
                        .any(|arg| matches!(to, Expr::Value(v) if v == arg)),
                    None => false,
                };
            }
        }
        false
    }

    /// Return or throw placed before a sink of the same method
    fn is_early_exit(&self, inst: &Inst) -> bool {
        inst.is_terminating()
            && self
                .sinks
                .iter()
                .any(|sink| sink.method == inst.id.method && inst.id.index < sink.index)
    }

    /// Active control fact at `inst`: wait for the branch point when paths
    /// join here
    fn control_at_join(&self, inst: &Inst, is_from_return: Option<InstId>) -> Option<DomainFact> {
        let graph = self.graph.as_ref();
        if graph.successors(inst.id).len() <= 1 {
            return Some(DomainFact::slice_control(None, is_from_return));
        }

        let mut branch = self.dominators.immediate_dominator(graph, inst.id);
        let mut successors = graph.successors(branch);
        while successors.len() > 1 {
            let branch_is_if = graph.inst(branch).is_some_and(Inst::is_if);
            let up = self.dominators.immediate_dominator(graph, branch);
            if !branch_is_if || up == branch {
                return Some(DomainFact::slice_control(Some(branch), is_from_return));
            }
            branch = up;
            successors = graph.successors(branch);
        }
        successors
            .first()
            .map(|&next| DomainFact::slice_control(Some(next), is_from_return))
    }

    fn control_flow(
        &self,
        inst: &Inst,
        wait_for: Option<InstId>,
        is_from_return: Option<InstId>,
        fact: &DomainFact,
    ) -> Facts {
        if is_from_return.is_some() && self.is_method_boundary(inst) {
            return Vec::new();
        }

        let condition_values = match &inst.kind {
            InstKind::If { condition, .. } => condition.operands(),
            InstKind::Switch { .. } => inst.operands(),
            _ => Vec::new(),
        };
        let condition_facts = condition_values
            .into_iter()
            .filter_map(Value::to_path)
            .map(|p| DomainFact::slice_data(p.limit(self.max_path_length), is_from_return));

        match wait_for {
            None => self
                .control_at_join(inst, is_from_return)
                .into_iter()
                .chain(condition_facts)
                .collect(),
            Some(branch) if branch == inst.id => {
                std::iter::once(DomainFact::slice_control(None, is_from_return))
                    .chain(condition_facts)
                    .collect()
            }
            Some(_) => vec![fact.clone()],
        }
    }
}

impl BackwardTransmit for CrashSliceTransmit {
    fn transmit_back_data_flow(
        &self,
        from: &Value,
        to: &Expr,
        at: &Inst,
        fact: &DomainFact,
        drop_fact: bool,
    ) -> Facts {
        if self.is_crash_point(at) {
            return self.crash_point_flow(at, fact);
        }
        let node = match fact {
            DomainFact::Zero => return vec![DomainFact::Zero],
            _ if self.is_method_boundary(at) && self.is_not_in_trace(at, to) => return Vec::new(),
            DomainFact::SliceControl {
                wait_for,
                is_from_return,
            } => return self.control_flow(at, *wait_for, *is_from_return, fact),
            DomainFact::Taint(node) => node,
            DomainFact::Unused { .. } => return vec![fact.clone()],
        };
        let TaintKind::SliceData { is_from_return } = node.kind else {
            return vec![fact.clone()];
        };

        let keep = if drop_fact { Vec::new() } else { vec![fact.clone()] };
        let Some(from_path) = from.to_path() else {
            return keep;
        };
        let fact_path = &node.variable;
        let writes_fact = fact_path.starts_with(&from_path);
        let reads_fact = from_path.starts_with(fact_path);
        if !writes_fact && !reads_fact {
            return keep;
        }

        let k = self.max_path_length;
        let derived: Vec<AccessPath> = match to.to_path() {
            Some(to_path) => {
                let rebased = match fact_path.minus(&from_path) {
                    Some(diff) => &to_path / diff.as_slice(),
                    None => to_path,
                };
                vec![rebased.limit(k)]
            }
            None => to
                .operands()
                .into_iter()
                .filter_map(Value::to_path)
                .map(|p| p.limit(k))
                .collect(),
        };

        // A partial overwrite leaves the rest of the tracked value in place
        let mut out = if writes_fact { Vec::new() } else { keep };
        out.extend(
            derived
                .into_iter()
                .map(|p| DomainFact::slice_data(p, is_from_return)),
        );
        out.push(DomainFact::slice_control(None, is_from_return));
        out
    }

    fn transmit_data_flow_at_normal_inst(&self, inst: &Inst, _next: &Inst, fact: &DomainFact) -> Facts {
        if self.is_crash_point(inst) {
            return self.crash_point_flow(inst, fact);
        }

        let node = match fact {
            DomainFact::SliceControl {
                wait_for,
                is_from_return,
            } => return self.control_flow(inst, *wait_for, *is_from_return, fact),
            DomainFact::Zero if self.is_early_exit(inst) => {
                return vec![DomainFact::slice_control(None, Some(inst.id))];
            }
            DomainFact::Taint(node) => node,
            _ => return vec![fact.clone()],
        };
        let TaintKind::SliceData { is_from_return } = node.kind else {
            return vec![fact.clone()];
        };

        let receiver = inst
            .call_expr()
            .and_then(|call| call.instance.as_ref())
            .and_then(Value::to_path);
        match receiver {
            Some(receiver) if node.variable.starts_with(&receiver) => inst
                .value_paths()
                .into_iter()
                .map(|p| DomainFact::slice_data(p.limit(self.max_path_length), is_from_return))
                .collect(),
            _ => vec![fact.clone()],
        }
    }
}

pub struct CrashSliceAnalyzer {
    graph: SharedGraph,
    sinks: Arc<Vec<InstId>>,
    flow_functions: BackwardFunctions<CrashSliceTransmit>,
}

impl CrashSliceAnalyzer {
    /// `graph` must be the reversed view; `sinks` is the stack trace with
    /// the crash point last
    pub fn new(graph: SharedGraph, sinks: Arc<Vec<InstId>>, max_path_length: usize) -> Self {
        let transmit = CrashSliceTransmit::new(graph.clone(), sinks.clone(), max_path_length);
        Self {
            flow_functions: BackwardFunctions::new(graph.clone(), transmit),
            graph,
            sinks,
        }
    }

    /// Whether the slice fact at `inst` marks `inst` as part of the slice
    fn is_relevant(&self, inst: &Inst, fact: &DomainFact) -> bool {
        match fact {
            DomainFact::Taint(node) if matches!(node.kind, TaintKind::SliceData { .. }) => {
                let variable = &node.variable;
                let mentions = || inst.value_paths().iter().any(|p| p.starts_with(variable));

                let consumed_by_bodiless_call = inst.call_expr().is_some()
                    && self.graph.callees(inst.id).is_empty()
                    && mentions();
                let assigned = inst.lhv().and_then(Value::to_path).is_some_and(|lhv| {
                    lhv.starts_with(variable) || variable.starts_with(&lhv)
                });
                let returned = matches!(inst.kind, InstKind::Return(_)) && mentions();
                consumed_by_bodiless_call || assigned || returned
            }
            DomainFact::SliceControl { wait_for: None, .. } => inst.is_if(),
            _ => false,
        }
    }

    fn describe(&self, inst: &Inst, fact: &DomainFact) -> Option<String> {
        let is_from_return = match fact {
            DomainFact::Taint(node) => match node.kind {
                TaintKind::SliceData { is_from_return } => is_from_return,
                _ => None,
            },
            DomainFact::SliceControl { is_from_return, .. } => *is_from_return,
            _ => None,
        };
        let Some(exit) = is_from_return else {
            return Some(format!("modified: {} at {}", fact, location(inst)));
        };
        // Control learned from a return only matters inside that method
        if matches!(fact, DomainFact::SliceControl { .. }) && exit.method != inst.id.method {
            return None;
        }
        let exit_location = self
            .graph
            .inst(exit)
            .map_or_else(|| exit.to_string(), location);
        Some(format!(
            "modified from {}: {} at {}",
            exit_location,
            fact,
            location(inst)
        ))
    }
}

impl Analyzer for CrashSliceAnalyzer {
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
        if let Some(inst) = self.graph.inst(edge.v.inst) {
            let fact = &edge.v.fact;
            let description = if self.sinks.last() == Some(&inst.id) {
                Some(format!("modified: {} at crash point {}", fact, location(inst)))
            } else if self.is_relevant(inst, fact) {
                self.describe(inst, fact)
            } else {
                None
            };
            if let Some(description) = description {
                let location = VulnerabilityLocation::new(SLICE_RULE_ID, edge.v.clone(), description);
                events.push(AnalyzerEvent::NewSummaryFact(SummaryFact::Vulnerability(location)));
            }
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

/// `sinks` is the stack trace, crash point last
pub fn crash_slice_analyzer_factory(sinks: Vec<InstId>, max_path_length: usize) -> SharedAnalyzerFactory {
    let sinks = Arc::new(sinks);
    Arc::new(move |graph: SharedGraph| -> Box<dyn Analyzer> {
        Box::new(CrashSliceAnalyzer::new(graph, sinks.clone(), max_path_length))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::ifds::domain::Vertex;
    use crate::shared::models::{
        BackwardGraph, CallExpr, CmpOp, Condition, MethodId, ProgramBuilder,
    };
    use pretty_assertions::assert_eq;

    fn path(name: &str) -> AccessPath {
        AccessPath::from_local(name)
    }

    /// ```text
    /// 0: a = input()
    /// 1: if (a == null) goto 4 else 2
    /// 2: b = a
    /// 3: goto 5
    /// 4: b = null
    /// 5: use(b)          <- crash point
    /// 6: return
    /// ```
    fn program() -> (SharedGraph, MethodId) {
        let mut b = ProgramBuilder::new();
        let input = b.method("Io", "input").static_method().finish();
        let use_it = b.method("Io", "use").static_method().params(&["v"]).finish();
        let main = b
            .method("App", "main")
            .static_method()
            .body(vec![
                InstKind::Assign {
                    lhv: Value::local("a"),
                    rhv: Expr::Call(CallExpr::static_call(input, vec![])),
                },
                InstKind::If {
                    condition: Condition {
                        op: CmpOp::Eq,
                        lhs: Value::local("a"),
                        rhs: Value::null(),
                    },
                    true_branch: 4,
                    false_branch: 2,
                },
                InstKind::Assign {
                    lhv: Value::local("b"),
                    rhv: Value::local("a").into(),
                },
                InstKind::Goto { target: 5 },
                InstKind::Assign {
                    lhv: Value::local("b"),
                    rhv: Value::null().into(),
                },
                InstKind::Call(CallExpr::static_call(use_it, vec![Value::local("b")])),
                InstKind::Return(None),
            ])
            .finish();
        let forward: SharedGraph = Arc::new(b.build().unwrap());
        (BackwardGraph::shared(forward), main)
    }

    fn transmit(graph: &SharedGraph, main: MethodId) -> CrashSliceTransmit {
        CrashSliceTransmit::new(graph.clone(), Arc::new(vec![InstId::new(main, 5)]), 5)
    }

    fn inst(graph: &SharedGraph, main: MethodId, index: u32) -> Inst {
        graph.inst(InstId::new(main, index)).unwrap().clone()
    }

    #[test]
    fn test_crash_point_seeds_values_and_control() {
        let (graph, main) = program();
        let t = transmit(&graph, main);
        let crash = inst(&graph, main, 5);
        let prev = inst(&graph, main, 4);
        assert_eq!(
            t.transmit_data_flow_at_normal_inst(&crash, &prev, &DomainFact::Zero),
            vec![
                DomainFact::Zero,
                DomainFact::slice_data(path("b"), None),
                DomainFact::slice_control(None, None),
            ]
        );
        let from_return = DomainFact::slice_control(None, Some(InstId::new(main, 6)));
        assert!(t.transmit_data_flow_at_normal_inst(&crash, &prev, &from_return).is_empty());
    }

    #[test]
    fn test_assignment_moves_slice_to_operands() {
        let (graph, main) = program();
        let t = transmit(&graph, main);
        let copy = inst(&graph, main, 2);
        let (lhv, rhv) = copy.assign_parts().unwrap();

        assert_eq!(
            t.transmit_back_data_flow(lhv, rhv, &copy, &DomainFact::slice_data(path("b"), None), false),
            vec![
                DomainFact::slice_data(path("a"), None),
                DomainFact::slice_control(None, None),
            ]
        );
        let other = DomainFact::slice_data(path("z"), None);
        assert_eq!(
            t.transmit_back_data_flow(lhv, rhv, &copy, &other, false),
            vec![other.clone()]
        );

        // a null constant has no operands: only the control fact survives
        let null = inst(&graph, main, 4);
        let (lhv, rhv) = null.assign_parts().unwrap();
        assert_eq!(
            t.transmit_back_data_flow(lhv, rhv, &null, &DomainFact::slice_data(path("b"), None), false),
            vec![DomainFact::slice_control(None, None)]
        );
    }

    #[test]
    fn test_control_skips_diamond_and_slices_live_branch() {
        let (graph, main) = program();
        let t = transmit(&graph, main);
        let join = inst(&graph, main, 5);
        let branch = inst(&graph, main, 1);
        let before = inst(&graph, main, 0);
        let active = DomainFact::slice_control(None, None);

        // both arms of the branch at 1 reach the join: wait until 0
        let waiting = t.control_flow(&join, None, None, &active);
        assert_eq!(waiting, vec![DomainFact::slice_control(Some(before.id), None)]);
        assert_eq!(
            t.transmit_data_flow_at_normal_inst(&branch, &before, &waiting[0]),
            vec![waiting[0].clone()]
        );

        let (lhv, rhv) = before.assign_parts().unwrap();
        assert_eq!(
            t.transmit_back_data_flow(lhv, rhv, &before, &waiting[0], false),
            vec![active.clone()]
        );

        // an active fact at a branch slices its condition
        assert_eq!(
            t.transmit_data_flow_at_normal_inst(&branch, &before, &active),
            vec![active.clone(), DomainFact::slice_data(path("a"), None)]
        );
    }

    #[test]
    fn test_early_exit_turns_zero_into_return_control() {
        let mut b = ProgramBuilder::new();
        let crash = b.method("Io", "crash").static_method().finish();
        let main = b
            .method("App", "main")
            .static_method()
            .body(vec![
                InstKind::If {
                    condition: Condition {
                        op: CmpOp::Eq,
                        lhs: Value::local("a"),
                        rhs: Value::null(),
                    },
                    true_branch: 1,
                    false_branch: 2,
                },
                InstKind::Return(None),
                InstKind::Call(CallExpr::static_call(crash, vec![])),
                InstKind::Return(None),
            ])
            .finish();
        let forward: SharedGraph = Arc::new(b.build().unwrap());
        let graph = BackwardGraph::shared(forward);
        let t = CrashSliceTransmit::new(graph.clone(), Arc::new(vec![InstId::new(main, 2)]), 5);

        let early = inst(&graph, main, 1);
        let late = inst(&graph, main, 3);
        let branch = inst(&graph, main, 0);
        assert_eq!(
            t.transmit_data_flow_at_normal_inst(&early, &branch, &DomainFact::Zero),
            vec![DomainFact::slice_control(None, Some(early.id))]
        );
        assert_eq!(
            t.transmit_data_flow_at_normal_inst(&late, &branch, &DomainFact::Zero),
            vec![DomainFact::Zero]
        );
    }

    #[test]
    fn test_trace_filter_blocks_untraced_arguments() {
        let mut b = ProgramBuilder::new();
        let callee = b
            .method("App", "inner")
            .static_method()
            .params(&["p", "q"])
            .body(vec![InstKind::Noop, InstKind::Return(None)])
            .finish();
        let main = b
            .method("App", "main")
            .static_method()
            .body(vec![
                InstKind::Call(CallExpr::static_call(callee, vec![Value::local("x"), Value::local("y")])),
                InstKind::Return(None),
            ])
            .finish();
        let forward: SharedGraph = Arc::new(b.build().unwrap());
        let graph = BackwardGraph::shared(forward);
        let sinks = Arc::new(vec![InstId::new(main, 0), InstId::new(callee, 1)]);
        let t = CrashSliceTransmit::new(graph.clone(), sinks, 5);

        let entry = inst(&graph, callee, 0);
        assert!(!t.is_not_in_trace(&entry, &Value::local("x").into()));
        assert!(t.is_not_in_trace(&entry, &Value::local("w").into()));
        let outer = inst(&graph, main, 1);
        assert!(!t.is_not_in_trace(&outer, &Value::local("w").into()));
    }

    #[test]
    fn test_reports_assignments_and_crash_point() {
        let (graph, main) = program();
        let mut analyzer = CrashSliceAnalyzer::new(graph.clone(), Arc::new(vec![InstId::new(main, 5)]), 5);
        let start = Vertex::new(InstId::new(main, 6), DomainFact::Zero);

        let crash = Vertex::new(InstId::new(main, 5), DomainFact::Zero);
        let events = analyzer.handle_new_edge(&Edge::new(start.clone(), crash.clone()));
        assert_eq!(events.len(), 1);

        let assigned = Vertex::new(InstId::new(main, 2), DomainFact::slice_data(path("b"), None));
        let events = analyzer.handle_new_edge(&Edge::new(start.clone(), assigned.clone()));
        assert_eq!(
            events,
            vec![AnalyzerEvent::NewSummaryFact(SummaryFact::Vulnerability(
                VulnerabilityLocation::new(
                    SLICE_RULE_ID,
                    assigned,
                    format!("modified: SliceData(b) at {}", InstId::new(main, 2))
                )
            ))]
        );

        let unrelated = Vertex::new(InstId::new(main, 3), DomainFact::slice_data(path("b"), None));
        assert!(analyzer
            .handle_new_edge(&Edge::new(start.clone(), unrelated))
            .is_empty());

        let branch = Vertex::new(InstId::new(main, 1), DomainFact::slice_control(None, None));
        assert_eq!(analyzer.handle_new_edge(&Edge::new(start, branch)).len(), 1);
    }

    #[test]
    fn test_return_control_reported_only_in_its_method() {
        let (graph, main) = program();
        let analyzer = CrashSliceAnalyzer::new(graph.clone(), Arc::new(vec![InstId::new(main, 5)]), 5);
        let branch = inst(&graph, main, 1);
        let here = DomainFact::slice_control(None, Some(InstId::new(main, 6)));
        let elsewhere = DomainFact::slice_control(None, Some(InstId::new(MethodId(99), 0)));

        assert_eq!(
            analyzer.describe(&branch, &here),
            Some(format!("modified from {}: {} at {}", InstId::new(main, 6), here, branch.id))
        );
        assert_eq!(analyzer.describe(&branch, &elsewhere), None);
    }
}
