//! Unused-assignment analyzer
//!
//! Every local write births `Unused(x, init)`; plain copies carry the fact
//! over to the new local. Nothing is reported while the tabulation runs.
//! Once the unit's result is final, an `init` whose facts were never read
//! at any instruction they reached is reported at `(init, ZERO)`.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::errors::Result;
use crate::features::ifds::domain::{
    AccessPath, CrossUnitCallFact, DomainFact, SummaryFact, Vertex, VulnerabilityLocation,
};
use crate::features::ifds::infrastructure::{
    call_expr_of, Analyzer, AnalyzerEvent, Facts, FlowFunctionsSpace, IfdsResult,
    SharedAnalyzerFactory,
};
use crate::shared::models::{CallKind, Expr, Inst, InstId, InstKind, Method, SharedGraph, Value};

use super::callee_method;

pub const UNUSED_RULE_ID: &str = "unused-variable";

pub struct UnusedVariableFunctions;

impl UnusedVariableFunctions {
    fn assignment_flow(&self, current: &Inst, fact: &DomainFact) -> Facts {
        let Some((lhv, rhv)) = current.assign_parts() else {
            return vec![fact.clone()];
        };
        let to_path = lhv.to_path();

        let (variable, init) = match fact {
            DomainFact::Zero => {
                return match to_path {
                    Some(path) if !path.is_on_heap() => {
                        vec![DomainFact::Zero, DomainFact::unused(path, current.id)]
                    }
                    _ => vec![DomainFact::Zero],
                };
            }
            DomainFact::Unused { variable, init } => (variable, *init),
            _ => return Vec::new(),
        };

        let mut out = if to_path.as_ref() == Some(variable) {
            Vec::new()
        } else {
            vec![fact.clone()]
        };
        let (Some(from_path), Some(to_path)) = (rhv.to_path(), to_path) else {
            return out;
        };
        if from_path.is_on_heap() || to_path.is_on_heap() {
            return out;
        }
        if &from_path == variable {
            out.push(DomainFact::unused(to_path, init));
        }
        out
    }
}

impl FlowFunctionsSpace for UnusedVariableFunctions {
    fn obtain_possible_start_facts(&self, _start: &Inst) -> Facts {
        vec![DomainFact::Zero]
    }

    fn sequent(&self, current: &Inst, _next: &Inst, fact: &DomainFact) -> Result<Facts> {
        Ok(self.assignment_flow(current, fact))
    }

    /// Formals of static and special calls start out unused; virtual
    /// dispatch targets are not reported
    fn call_to_start(&self, call: &Inst, callee: &Method, fact: &DomainFact) -> Result<Facts> {
        if !fact.is_zero() {
            return Ok(Vec::new());
        }
        let call_expr = call_expr_of(call)?;
        if call_expr.kind == CallKind::Virtual {
            return Ok(vec![DomainFact::Zero]);
        }
        let mut out: Facts = callee
            .formal_values()
            .iter()
            .filter_map(Value::to_path)
            .map(|formal| DomainFact::unused(formal, call.id))
            .collect();
        out.push(DomainFact::Zero);
        Ok(out)
    }

    fn call_to_return(&self, call: &Inst, _return_site: &Inst, fact: &DomainFact) -> Result<Facts> {
        Ok(self.assignment_flow(call, fact))
    }

    fn exit_to_return(
        &self,
        _call: &Inst,
        _return_site: &Inst,
        _exit: &Inst,
        fact: &DomainFact,
    ) -> Result<Facts> {
        Ok(if fact.is_zero() {
            vec![DomainFact::Zero]
        } else {
            Vec::new()
        })
    }
}

pub struct UnusedVariableAnalyzer {
    graph: SharedGraph,
    flow_functions: UnusedVariableFunctions,
}

impl UnusedVariableAnalyzer {
    pub fn new(graph: SharedGraph) -> Self {
        Self {
            graph,
            flow_functions: UnusedVariableFunctions,
        }
    }

    /// Whether `inst` reads the value stored at `path`
    pub fn is_used_at(&self, path: &AccessPath, inst: &Inst) -> bool {
        let mentions = |values: Vec<&Value>| values.into_iter().any(|v| v.to_path().as_ref() == Some(path));

        if let Some(call) = inst.call_expr() {
            // Running a constructor on the value is not a read of it
            let is_constructor = callee_method(self.graph.as_ref(), call).is_some_and(Method::is_constructor);
            let on_receiver = call
                .instance
                .as_ref()
                .is_some_and(|receiver| mentions(receiver_values(receiver)));
            if is_constructor && on_receiver {
                return false;
            }
            return mentions(call.values());
        }

        match &inst.kind {
            InstKind::Assign { lhv, rhv } => {
                if matches!(lhv, Value::ArrayAccess { .. }) && mentions(receiver_values(lhv)) {
                    return true;
                }
                let plain_copy = matches!(lhv, Value::Local(_)) && matches!(rhv, Expr::Value(Value::Local(_)));
                mentions(rhv.values()) && !plain_copy
            }
            InstKind::Return(_) | InstKind::Throw(_) | InstKind::If { .. } | InstKind::Switch { .. } => {
                mentions(inst.operands())
            }
            _ => false,
        }
    }
}

fn receiver_values(value: &Value) -> Vec<&Value> {
    let mut out = Vec::new();
    value.collect_values(&mut out);
    out
}

impl Analyzer for UnusedVariableAnalyzer {
    fn flow_functions(&self) -> &dyn FlowFunctionsSpace {
        &self.flow_functions
    }

    fn graph(&self) -> &SharedGraph {
        &self.graph
    }

    fn is_main_analyzer(&self) -> bool {
        true
    }

    fn handle_new_cross_unit_call(&mut self, _fact: &CrossUnitCallFact) -> Vec<AnalyzerEvent> {
        Vec::new()
    }

    fn handle_ifds_result(&mut self, result: &IfdsResult) -> Vec<AnalyzerEvent> {
        // init -> (first tracked path, read anywhere)
        let mut used: BTreeMap<InstId, (AccessPath, bool)> = BTreeMap::new();
        for (inst_id, facts) in &result.result_facts {
            let Some(inst) = self.graph.inst(*inst_id) else {
                continue;
            };
            for fact in facts {
                let DomainFact::Unused { variable, init } = fact else {
                    continue;
                };
                let read = self.is_used_at(variable, inst);
                let entry = used.entry(*init).or_insert_with(|| (variable.clone(), false));
                entry.1 |= read;
            }
        }

        used.into_iter()
            .filter(|(_, (_, read))| !read)
            .map(|(init, (variable, _))| {
                let location = VulnerabilityLocation::new(
                    UNUSED_RULE_ID,
                    Vertex::new(init, DomainFact::Zero),
                    format!("assigned value of {} is unused", variable),
                );
                AnalyzerEvent::NewSummaryFact(SummaryFact::Vulnerability(location))
            })
            .collect()
    }
}

pub fn unused_variable_analyzer_factory() -> SharedAnalyzerFactory {
    Arc::new(|graph: SharedGraph| -> Box<dyn Analyzer> { Box::new(UnusedVariableAnalyzer::new(graph)) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::{CallExpr, FieldRef, MethodId, ProgramBuilder};
    use pretty_assertions::assert_eq;
    use rustc_hash::FxHashSet;

    fn local(name: &str) -> AccessPath {
        AccessPath::from_local(name)
    }

    /// `x = compute(); y = x; a[i] = y; b.f = x; return 0`
    fn program() -> (SharedGraph, MethodId, MethodId) {
        let mut b = ProgramBuilder::new();
        let compute = b.method("Lib", "compute").static_method().finish();
        let init = b.method("Box", "<init>").finish();
        let main = b
            .method("App", "main")
            .static_method()
            .body(vec![
                InstKind::Assign {
                    lhv: Value::local("x"),
                    rhv: Expr::Call(CallExpr::static_call(compute, vec![])),
                },
                InstKind::Assign {
                    lhv: Value::local("y"),
                    rhv: Expr::Value(Value::local("x")),
                },
                InstKind::Assign {
                    lhv: Value::element(Value::local("a"), Value::local("i")),
                    rhv: Expr::Value(Value::local("y")),
                },
                InstKind::Assign {
                    lhv: Value::field(Value::local("b"), FieldRef::new("Box", "f")),
                    rhv: Expr::Value(Value::local("x")),
                },
                InstKind::Call(CallExpr::special_call(init, Value::local("b"), vec![])),
                InstKind::Return(Some(Value::Constant(crate::shared::models::Constant::Int(0)))),
            ])
            .finish();
        let graph: SharedGraph = Arc::new(b.build().unwrap());
        (graph, main, compute)
    }

    fn inst(graph: &SharedGraph, main: MethodId, index: u32) -> Inst {
        graph.inst(InstId::new(main, index)).unwrap().clone()
    }

    #[test]
    fn test_local_write_births_fact() {
        let (graph, main, _) = program();
        let ff = UnusedVariableFunctions;
        let def = inst(&graph, main, 0);
        let next = inst(&graph, main, 1);
        assert_eq!(
            ff.sequent(&def, &next, &DomainFact::Zero).unwrap(),
            vec![DomainFact::Zero, DomainFact::unused(local("x"), def.id)]
        );

        // heap writes are not tracked
        let store = inst(&graph, main, 3);
        assert_eq!(
            ff.sequent(&store, &next, &DomainFact::Zero).unwrap(),
            vec![DomainFact::Zero]
        );
    }

    #[test]
    fn test_copy_moves_and_overwrite_kills() {
        let (graph, main, _) = program();
        let ff = UnusedVariableFunctions;
        let copy = inst(&graph, main, 1);
        let next = inst(&graph, main, 2);
        let x = DomainFact::unused(local("x"), InstId::new(main, 0));
        assert_eq!(
            ff.sequent(&copy, &next, &x).unwrap(),
            vec![x.clone(), DomainFact::unused(local("y"), InstId::new(main, 0))]
        );

        let old_y = DomainFact::unused(local("y"), InstId::new(main, 7));
        assert!(ff.sequent(&copy, &next, &old_y).unwrap().is_empty());
    }

    #[test]
    fn test_call_to_start_seeds_formals_of_static_calls() {
        let mut b = ProgramBuilder::new();
        let callee = b
            .method("Lib", "take")
            .static_method()
            .params(&["p", "q"])
            .body(vec![InstKind::Return(None)])
            .finish();
        let virt = b
            .method("Lib", "virt")
            .params(&["p"])
            .body(vec![InstKind::Return(None)])
            .finish();
        let main = b
            .method("App", "main")
            .static_method()
            .body(vec![
                InstKind::Call(CallExpr::static_call(callee, vec![Value::local("a"), Value::local("b")])),
                InstKind::Call(CallExpr::virtual_call(virt, Value::local("o"), vec![Value::local("a")])),
                InstKind::Return(None),
            ])
            .finish();
        let graph: SharedGraph = Arc::new(b.build().unwrap());
        let ff = UnusedVariableFunctions;

        let call = inst(&graph, main, 0);
        assert_eq!(
            ff.call_to_start(&call, graph.method(callee).unwrap(), &DomainFact::Zero)
                .unwrap(),
            vec![
                DomainFact::unused(AccessPath::from_argument(0), call.id),
                DomainFact::unused(AccessPath::from_argument(1), call.id),
                DomainFact::Zero,
            ]
        );

        let vcall = inst(&graph, main, 1);
        assert_eq!(
            ff.call_to_start(&vcall, graph.method(virt).unwrap(), &DomainFact::Zero)
                .unwrap(),
            vec![DomainFact::Zero]
        );
        let fact = DomainFact::unused(local("a"), call.id);
        assert!(ff
            .call_to_start(&call, graph.method(callee).unwrap(), &fact)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_usage_rules() {
        let (graph, main, _) = program();
        let analyzer = UnusedVariableAnalyzer::new(graph.clone());

        // plain local copy is not a read
        assert!(!analyzer.is_used_at(&local("x"), &inst(&graph, main, 1)));
        // index of an array store is a read
        assert!(analyzer.is_used_at(&local("i"), &inst(&graph, main, 2)));
        assert!(analyzer.is_used_at(&local("y"), &inst(&graph, main, 2)));
        // storing into the heap reads the stored local
        assert!(analyzer.is_used_at(&local("x"), &inst(&graph, main, 3)));
        // constructor receiver is not a read
        assert!(!analyzer.is_used_at(&local("b"), &inst(&graph, main, 4)));
        assert!(!analyzer.is_used_at(&local("x"), &inst(&graph, main, 5)));
    }

    #[test]
    fn test_result_reports_unread_inits_only() {
        let (graph, main, _) = program();
        let mut analyzer = UnusedVariableAnalyzer::new(graph.clone());
        let x_def = InstId::new(main, 0);
        let z_def = InstId::new(main, 9);

        let mut result = IfdsResult::default();
        let mut at_store = FxHashSet::default();
        at_store.insert(DomainFact::unused(local("x"), x_def));
        at_store.insert(DomainFact::unused(local("z"), z_def));
        result.result_facts.insert(InstId::new(main, 3), at_store);

        let events = analyzer.handle_ifds_result(&result);
        assert_eq!(
            events,
            vec![AnalyzerEvent::NewSummaryFact(SummaryFact::Vulnerability(
                VulnerabilityLocation::new(
                    UNUSED_RULE_ID,
                    Vertex::new(z_def, DomainFact::Zero),
                    "assigned value of z is unused"
                )
            ))]
        );
    }
}
