//! Forward adapter
//!
//! Implements the four flow-function shapes once for every forward
//! analysis. An analysis only supplies how a fact crosses a single
//! assignment (`transmit_data_flow`) and how it survives any other
//! instruction (`transmit_data_flow_at_normal_inst`).

use crate::errors::{IfdsError, Result};
use crate::features::ifds::domain::DomainFact;
use crate::shared::models::{Expr, Inst, Method, SharedGraph, Value};

use super::flow_functions::{call_expr_of, Facts, FlowFunctionsSpace};

/// Per-analysis transfer rules plugged into [`ForwardFunctions`]
pub trait ForwardTransmit: Send {
    fn obtain_possible_start_facts(&self, start: &Inst) -> Facts;

    /// Flow of `fact` across `to := from` at `at`; `drop_fact` removes the
    /// incoming fact unless it is re-derived
    fn transmit_data_flow(
        &self,
        from: &Expr,
        to: &Value,
        at: &Inst,
        fact: &DomainFact,
        drop_fact: bool,
    ) -> Facts;

    fn transmit_data_flow_at_normal_inst(&self, inst: &Inst, next: &Inst, fact: &DomainFact)
        -> Facts;
}

pub struct ForwardFunctions<T> {
    graph: SharedGraph,
    inner: T,
}

impl<T: ForwardTransmit> ForwardFunctions<T> {
    pub fn new(graph: SharedGraph, inner: T) -> Self {
        Self { graph, inner }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    fn method(&self, inst: &Inst) -> Result<&Method> {
        let id = self.graph.method_of(inst.id);
        self.graph.method(id).ok_or(IfdsError::UnknownMethod(id))
    }
}

impl<T: ForwardTransmit> FlowFunctionsSpace for ForwardFunctions<T> {
    fn obtain_possible_start_facts(&self, start: &Inst) -> Facts {
        self.inner.obtain_possible_start_facts(start)
    }

    fn sequent(&self, current: &Inst, next: &Inst, fact: &DomainFact) -> Result<Facts> {
        if let Some(node) = fact.as_taint() {
            if node.activation == Some(current.id) {
                return Ok(vec![node.activated_copy().into()]);
            }
        }
        Ok(match current.assign_parts() {
            Some((lhv, rhv)) => self.inner.transmit_data_flow(rhv, lhv, current, fact, false),
            None => self.inner.transmit_data_flow_at_normal_inst(current, next, fact),
        })
    }

    fn call_to_start(&self, call: &Inst, callee: &Method, fact: &DomainFact) -> Result<Facts> {
        if fact.activation() == Some(call.id) {
            return Ok(Vec::new());
        }
        let call_expr = call_expr_of(call)?;

        let mut out = Vec::new();
        for (formal, actual) in callee.formal_values().iter().zip(&call_expr.args) {
            let from = Expr::Value(actual.clone());
            out.extend(self.inner.transmit_data_flow(&from, formal, call, fact, true));
        }
        if let Some(instance) = &call_expr.instance {
            let from = Expr::Value(instance.clone());
            out.extend(self.inner.transmit_data_flow(&from, &Value::This, call, fact, true));
        }
        if fact.is_zero() || fact.is_static() {
            out.push(fact.clone());
        }
        Ok(out)
    }

    fn call_to_return(&self, call: &Inst, return_site: &Inst, fact: &DomainFact) -> Result<Facts> {
        let call_expr = call_expr_of(call)?;
        // Constructors are modelled as leaving the caller's facts untouched
        if self
            .graph
            .method(call_expr.callee)
            .is_some_and(Method::is_constructor)
        {
            return Ok(vec![fact.clone()]);
        }

        if fact.is_zero() {
            return Ok(self
                .inner
                .transmit_data_flow_at_normal_inst(call, return_site, fact));
        }
        let node = match fact.as_taint() {
            Some(node) => node,
            None => return Ok(Vec::new()),
        };
        if node.activation == Some(call.id) {
            return Ok(vec![node.activated_copy().into()]);
        }
        if node.variable.is_static() {
            return Ok(Vec::new());
        }

        // Facts reachable from the arguments, receiver or target are
        // handled by the callee summary
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
        let callee = self.method(exit)?;

        let updated = match fact.as_taint() {
            Some(node) if node.activation.is_some_and(|a| a.method == callee.id) => {
                DomainFact::from(node.update_activation(call.id))
            }
            _ => fact.clone(),
        };

        let mut out = Vec::new();
        // Only heap-reachable parts of a formal are visible to the caller;
        // the formal itself is a callee local
        if fact.as_taint().is_some_and(|node| node.variable.is_on_heap()) {
            for (formal, actual) in callee.formal_values().into_iter().zip(&call_expr.args) {
                let from = Expr::Value(formal);
                out.extend(self.inner.transmit_data_flow(&from, actual, exit, &updated, true));
            }
        }
        if let Some(instance) = &call_expr.instance {
            let from = Expr::Value(Value::This);
            out.extend(self.inner.transmit_data_flow(&from, instance, exit, &updated, true));
        }
        if let (Some(lhv), Some(ret)) = (call.lhv(), exit.return_value()) {
            let from = Expr::Value(ret.clone());
            out.extend(self.inner.transmit_data_flow(&from, lhv, exit, &updated, true));
        }
        if fact.is_static() {
            out.push(fact.clone());
        }
        Ok(out)
    }
}
