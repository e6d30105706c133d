//! Backward adapter
//!
//! Runs against a reversed [`ApplicationGraph`](crate::shared::models::ApplicationGraph):
//! the callee "entry points" seen here are its forward exits, and facts move
//! from an assignment target to the values it was computed from.

use crate::errors::{IfdsError, Result};
use crate::features::ifds::domain::DomainFact;
use crate::shared::models::{Expr, Inst, InstKind, Method, SharedGraph, Value};

use super::flow_functions::{call_expr_of, Facts, FlowFunctionsSpace};

/// Per-analysis transfer rules plugged into [`BackwardFunctions`]
pub trait BackwardTransmit: Send {
    fn obtain_possible_start_facts(&self, _start: &Inst) -> Facts {
        vec![DomainFact::Zero]
    }

    /// Flow of `fact` from `from` back to the expression `to` it was
    /// assigned from at `at`
    fn transmit_back_data_flow(
        &self,
        from: &Value,
        to: &Expr,
        at: &Inst,
        fact: &DomainFact,
        drop_fact: bool,
    ) -> Facts;

    fn transmit_data_flow_at_normal_inst(&self, inst: &Inst, next: &Inst, fact: &DomainFact)
        -> Facts;
}

pub struct BackwardFunctions<T> {
    /// Reversed graph
    graph: SharedGraph,
    inner: T,
}

impl<T: BackwardTransmit> BackwardFunctions<T> {
    pub fn new(graph: SharedGraph, inner: T) -> Self {
        Self { graph, inner }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T: BackwardTransmit> FlowFunctionsSpace for BackwardFunctions<T> {
    fn obtain_possible_start_facts(&self, start: &Inst) -> Facts {
        self.inner.obtain_possible_start_facts(start)
    }

    fn sequent(&self, current: &Inst, next: &Inst, fact: &DomainFact) -> Result<Facts> {
        // A fact gated at `current` was born here: step over the assignment
        let gated_here = fact.activation() == Some(current.id);
        match current.assign_parts() {
            Some((lhv, rhv)) if !gated_here => {
                Ok(self.inner.transmit_back_data_flow(lhv, rhv, current, fact, false))
            }
            _ => Ok(self.inner.transmit_data_flow_at_normal_inst(current, next, fact)),
        }
    }

    fn call_to_start(&self, call: &Inst, callee: &Method, fact: &DomainFact) -> Result<Facts> {
        let call_expr = call_expr_of(call)?;
        let mut out = Vec::new();

        if fact.is_zero() || fact.is_static() {
            out.push(fact.clone());
        }

        if let Some(lhv) = call.lhv() {
            for &exit in self.graph.entry_points(callee.id) {
                let inst = self
                    .graph
                    .inst(exit)
                    .ok_or(IfdsError::UnknownInstruction(exit))?;
                if let InstKind::Return(Some(value)) = &inst.kind {
                    let to = Expr::Value(value.clone());
                    out.extend(self.inner.transmit_back_data_flow(lhv, &to, call, fact, true));
                }
            }
        }

        if let Some(instance) = &call_expr.instance {
            let to = Expr::Value(Value::This);
            out.extend(self.inner.transmit_back_data_flow(instance, &to, call, fact, true));
        }

        // filterNot: a non-heap formal is a callee local, so an actual's own
        // value never reaches the caller through it
        for (actual, formal) in call_expr.args.iter().zip(callee.formal_values()) {
            let to = Expr::Value(formal);
            out.extend(
                self.inner
                    .transmit_back_data_flow(actual, &to, call, fact, true)
                    .into_iter()
                    .filter(|f| !(f.as_taint().is_some() && !f.is_on_heap())),
            );
        }
        Ok(out)
    }

    fn call_to_return(&self, call: &Inst, return_site: &Inst, fact: &DomainFact) -> Result<Facts> {
        let node = match fact {
            DomainFact::Taint(node) => node,
            // Neither ZERO nor control dependence is affected by the call
            // itself; the analysis may still generate facts at it
            DomainFact::Zero | DomainFact::SliceControl { .. } => {
                return Ok(self
                    .inner
                    .transmit_data_flow_at_normal_inst(call, return_site, fact))
            }
            DomainFact::Unused { .. } => return Ok(Vec::new()),
        };
        let call_expr = call_expr_of(call)?;

        if node.activation == Some(call.id) {
            return Ok(vec![fact.clone()]);
        }
        if node.variable.is_static() {
            return Ok(Vec::new());
        }
        let touched = call_expr
            .operands()
            .into_iter()
            .chain(call.lhv())
            .any(|value| node.variable.starts_with_opt(value.to_path().as_ref()));
        if touched {
            return Ok(Vec::new());
        }

        Ok(self
            .inner
            .transmit_data_flow_at_normal_inst(call, return_site, fact))
    }

    fn exit_to_return(
        &self,
        call: &Inst,
        _return_site: &Inst,
        exit: &Inst,
        fact: &DomainFact,
    ) -> Result<Facts> {
        let call_expr = call_expr_of(call)?;
        let callee_id = self.graph.method_of(exit.id);
        let callee = self
            .graph
            .method(callee_id)
            .ok_or(IfdsError::UnknownMethod(callee_id))?;

        let mut out = Vec::new();
        for (formal, actual) in callee.formal_values().iter().zip(&call_expr.args) {
            let to = Expr::Value(actual.clone());
            out.extend(self.inner.transmit_back_data_flow(formal, &to, exit, fact, true));
        }
        if let Some(instance) = &call_expr.instance {
            let to = Expr::Value(instance.clone());
            out.extend(
                self.inner
                    .transmit_back_data_flow(&Value::This, &to, exit, fact, true),
            );
        }
        if fact.is_static() {
            out.push(fact.clone());
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::ifds::domain::{AccessPath, Accessor};
    use crate::features::ifds::infrastructure::flow_functions::normal_fact_flow;
    use crate::shared::models::{
        BackwardGraph, CallExpr, FieldRef, InstId, MethodId, ProgramBuilder,
    };
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    struct PathBack;

    impl BackwardTransmit for PathBack {
        fn transmit_back_data_flow(
            &self,
            from: &Value,
            to: &Expr,
            _at: &Inst,
            fact: &DomainFact,
            drop_fact: bool,
        ) -> Facts {
            if fact.is_zero() {
                return vec![DomainFact::Zero];
            }
            match (from.to_path(), to.to_path()) {
                (Some(from), Some(to)) => normal_fact_flow(fact, &from, &to, drop_fact, 5),
                _ if drop_fact => Vec::new(),
                _ => vec![fact.clone()],
            }
        }

        fn transmit_data_flow_at_normal_inst(
            &self,
            _inst: &Inst,
            _next: &Inst,
            fact: &DomainFact,
        ) -> Facts {
            vec![fact.clone()]
        }
    }

    fn field() -> Accessor {
        Accessor::Field(FieldRef::new("Box", "v"))
    }

    fn fixture() -> (SharedGraph, MethodId, MethodId) {
        let mut b = ProgramBuilder::new();
        let callee = b
            .method("Box", "get")
            .params(&["p"])
            .body(vec![InstKind::Return(Some(Value::local("t")))])
            .finish();
        let caller = b
            .method("Main", "run")
            .static_method()
            .body(vec![
                InstKind::Assign {
                    lhv: Value::local("r"),
                    rhv: Expr::Call(CallExpr::virtual_call(
                        callee,
                        Value::local("b"),
                        vec![Value::local("a")],
                    )),
                },
                InstKind::Return(None),
            ])
            .finish();
        let forward: SharedGraph = Arc::new(b.build().unwrap());
        (BackwardGraph::shared(forward), caller, callee)
    }

    #[test]
    fn test_call_to_start_enters_through_return_value() {
        let (graph, caller, callee) = fixture();
        let bf = BackwardFunctions::new(graph.clone(), PathBack);
        let call = graph.inst(InstId::new(caller, 0)).unwrap();
        let callee_method = graph.method(callee).unwrap();

        let fact = DomainFact::taint(AccessPath::from_local("r"));
        assert_eq!(
            bf.call_to_start(call, callee_method, &fact).unwrap(),
            vec![DomainFact::taint(AccessPath::from_local("t"))]
        );
    }

    #[test]
    fn test_call_to_start_filters_non_heap_formals() {
        let (graph, caller, callee) = fixture();
        let bf = BackwardFunctions::new(graph.clone(), PathBack);
        let call = graph.inst(InstId::new(caller, 0)).unwrap();
        let callee_method = graph.method(callee).unwrap();

        let plain = DomainFact::taint(AccessPath::from_local("a"));
        assert!(bf.call_to_start(call, callee_method, &plain).unwrap().is_empty());

        let heap = DomainFact::taint(AccessPath::from_local("a").extend([field()]));
        assert_eq!(
            bf.call_to_start(call, callee_method, &heap).unwrap(),
            vec![DomainFact::taint(AccessPath::from_argument(0).extend([field()]))]
        );
    }

    #[test]
    fn test_call_to_return_keeps_control_and_zero() {
        let (graph, caller, _) = fixture();
        let bf = BackwardFunctions::new(graph.clone(), PathBack);
        let call = graph.inst(InstId::new(caller, 0)).unwrap();
        let ret = graph.inst(InstId::new(caller, 1)).unwrap();

        assert_eq!(bf.call_to_return(call, ret, &DomainFact::Zero).unwrap(), vec![DomainFact::Zero]);
        let control = DomainFact::slice_control(None, None);
        assert_eq!(bf.call_to_return(call, ret, &control).unwrap(), vec![control.clone()]);
        let lhv = DomainFact::taint(AccessPath::from_local("r"));
        assert!(bf.call_to_return(call, ret, &lhv).unwrap().is_empty());
    }

    #[test]
    fn test_exit_to_return_maps_formals_back() {
        let (graph, caller, callee) = fixture();
        let bf = BackwardFunctions::new(graph.clone(), PathBack);
        let call = graph.inst(InstId::new(caller, 0)).unwrap();
        let ret = graph.inst(InstId::new(caller, 1)).unwrap();
        // reversed graph: the forward entry is the exit
        let exit_id = graph.exit_points(callee)[0];
        let exit = graph.inst(exit_id).unwrap();

        let fact = DomainFact::taint(AccessPath::from_this().extend([field()]));
        assert_eq!(
            bf.exit_to_return(call, ret, exit, &fact).unwrap(),
            vec![DomainFact::taint(AccessPath::from_local("b").extend([field()]))]
        );
    }
}
