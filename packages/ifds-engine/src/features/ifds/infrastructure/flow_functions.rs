/*
 * Flow-Function Protocol
 *
 * Every analysis supplies four transfer functions over the exploded
 * supergraph, each mapping one incoming fact to a set of outgoing facts:
 *
 *   sequent         (current, next)              intra-procedural step
 *   call_to_start   (call site, callee)          actuals/receiver -> formals/this
 *   call_to_return  (call site, return site)     facts the call cannot touch
 *   exit_to_return  (call site, return site, exit) summary composition
 *
 * Inputs are never mutated; the runner deduplicates outputs.
 *
 * The shared propagation algebra (`normal_fact_flow`) decides strong vs.
 * weak update for a renaming `from -> to`:
 *
 *   diff = fact - from
 *   diff exists && (active || from != fact)  => default + fact@(to/diff).limit(k)
 *   fact starts with to                      => {}            (strong update)
 *   otherwise                                => default
 */

use crate::errors::{IfdsError, Result};
use crate::features::ifds::domain::{AccessPath, DomainFact};
use crate::shared::models::{CallExpr, Inst, Method};

/// Output of one flow-function application
pub type Facts = Vec<DomainFact>;

/// The four transfer-function shapes plus start facts
pub trait FlowFunctionsSpace: Send {
    /// Seeds at a method start instruction
    fn obtain_possible_start_facts(&self, start: &Inst) -> Facts;

    fn sequent(&self, current: &Inst, next: &Inst, fact: &DomainFact) -> Result<Facts>;

    fn call_to_start(&self, call: &Inst, callee: &Method, fact: &DomainFact) -> Result<Facts>;

    fn call_to_return(&self, call: &Inst, return_site: &Inst, fact: &DomainFact) -> Result<Facts>;

    fn exit_to_return(
        &self,
        call: &Inst,
        return_site: &Inst,
        exit: &Inst,
        fact: &DomainFact,
    ) -> Result<Facts>;
}

/// Call expression of a call instruction, or a contract violation
pub fn call_expr_of(inst: &Inst) -> Result<&CallExpr> {
    inst.call_expr()
        .ok_or_else(|| IfdsError::missing_call_expr(inst.id))
}

/// `[]` when the fact is dropped, `[fact]` otherwise
pub fn default_facts(fact: &DomainFact, drop_fact: bool) -> Facts {
    if drop_fact {
        Vec::new()
    } else {
        vec![fact.clone()]
    }
}

/// Shared strong/weak-update algebra for a renaming `from -> to`
///
/// Facts without an access path only pass through (subject to `drop_fact`).
pub fn normal_fact_flow(
    fact: &DomainFact,
    from: &AccessPath,
    to: &AccessPath,
    drop_fact: bool,
    max_path_length: usize,
) -> Facts {
    let mut default = default_facts(fact, drop_fact);
    let node = match fact.as_taint() {
        Some(node) => node,
        None => return default,
    };
    let fact_path = &node.variable;

    if let Some(diff) = fact_path.minus(from) {
        if node.activation.is_none() || from != fact_path {
            let moved = (to / diff.as_slice()).limit(max_path_length);
            default.push(node.move_to_other_path(moved).into());
            return default;
        }
    }

    if fact_path.starts_with(to) {
        return Vec::new();
    }

    default
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::ifds::domain::{Accessor, TaintKind, TaintNode};
    use crate::shared::models::{FieldRef, InstId, MethodId};
    use pretty_assertions::assert_eq;

    fn f() -> Accessor {
        Accessor::Field(FieldRef::new("C", "f"))
    }

    fn path(name: &str) -> AccessPath {
        AccessPath::from_local(name)
    }

    #[test]
    fn test_strong_update_kills_exact_path() {
        // X := Y with a fact on X
        let fact = DomainFact::taint(path("x"));
        assert_eq!(normal_fact_flow(&fact, &path("y"), &path("x"), false, 5), Vec::new());
    }

    #[test]
    fn test_unrelated_fact_unchanged() {
        let fact = DomainFact::taint(path("z"));
        assert_eq!(
            normal_fact_flow(&fact, &path("y"), &path("x"), false, 5),
            vec![fact.clone()]
        );
        assert_eq!(normal_fact_flow(&fact, &path("y"), &path("x"), true, 5), Vec::new());
    }

    #[test]
    fn test_weak_update_keeps_original() {
        // Y := X with a fact on X.f
        let fact = DomainFact::taint(path("x").extend([f()]));
        let out = normal_fact_flow(&fact, &path("x"), &path("y"), false, 5);
        assert_eq!(out, vec![fact.clone(), DomainFact::taint(path("y").extend([f()]))]);
    }

    #[test]
    fn test_derived_path_is_k_limited() {
        let fact = DomainFact::taint(path("x").extend([f(), f()]));
        let to = path("y").extend([f()]);
        let out = normal_fact_flow(&fact, &path("x"), &to, true, 2);
        assert_eq!(out, vec![DomainFact::taint(path("y").extend([f(), f()]))]);
    }

    #[test]
    fn test_inactive_exact_match_is_not_moved() {
        let at = InstId::new(MethodId(0), 3);
        let node = TaintNode::new(TaintKind::Taint, path("x")).update_activation(at);
        let fact = DomainFact::from(node);
        // from == fact path and fact not active: no alias is derived
        let out = normal_fact_flow(&fact, &path("x"), &path("y"), false, 5);
        assert_eq!(out, vec![fact.clone()]);
        // the gated fact is still overwritten by a direct store
        assert_eq!(normal_fact_flow(&fact, &path("z"), &path("x"), false, 5), Vec::new());
    }

    #[test]
    fn test_zero_passes() {
        let out = normal_fact_flow(&DomainFact::Zero, &path("a"), &path("b"), false, 5);
        assert_eq!(out, vec![DomainFact::Zero]);
    }
}
