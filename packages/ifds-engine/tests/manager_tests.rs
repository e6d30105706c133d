//! Unit manager integration tests
//!
//! Cross-unit summary exchange, bidirectional routing and the backward
//! analyzers, driven through `UnitManager` directly.

mod common;

use std::sync::Arc;

use common::*;
use ifds_engine::config::{AnalysisConfig, UnitStrategy};
use ifds_engine::features::analyzers::{
    crash_slice_analyzer_factory, taint_analyzer_factory, TaintRules, SLICE_RULE_ID, TAINT_RULE_ID,
};
use ifds_engine::features::ifds::domain::{AccessPath, Accessor, DomainFact, Vertex};
use ifds_engine::features::ifds::infrastructure::{BaseUnitRunnerFactory, UnitManager};
use ifds_engine::shared::models::{
    BackwardGraph, Expr, FieldRef, InstKind, ProgramBuilder, Value,
};
use ifds_engine::InstId;
use pretty_assertions::assert_eq;

fn taint_manager(graph: ifds_engine::SharedGraph, config: &AnalysisConfig) -> UnitManager {
    let rules = Arc::new(TaintRules::from_config(config).unwrap());
    let factory = BaseUnitRunnerFactory::new(taint_analyzer_factory(rules, false));
    UnitManager::new(graph, config, Arc::new(factory)).unwrap()
}

#[test]
fn test_summary_crosses_class_units() {
    let program = cross_unit_program();
    let config = taint_config().with_unit_strategy(UnitStrategy::Class);
    let outcome = taint_manager(program.graph.clone(), &config)
        .run(&[program.main])
        .unwrap();

    // `Lib#id` returns its argument: only the tainted call result reaches a sink
    let found: Vec<InstId> = outcome.vulnerabilities.iter().map(|v| v.vertex.inst).collect();
    assert_eq!(found, vec![InstId::new(program.main, 2)]);

    assert_eq!(outcome.units, 2);
    assert!(outcome.statistics.summary_edges > 0);
    assert!(outcome
        .cross_unit_calls
        .iter()
        .all(|c| c.callee_vertex.inst.method == program.id));
    assert!(outcome.cross_unit_calls.iter().any(|c| {
        c.callee_vertex == Vertex::new(InstId::new(program.id, 0), DomainFact::taint(AccessPath::from_argument(0)))
    }));
}

#[test]
fn test_unit_strategies_agree() {
    let program = cross_unit_program();
    let mut results = Vec::new();
    for strategy in [
        UnitStrategy::Singleton,
        UnitStrategy::Method,
        UnitStrategy::Class,
        UnitStrategy::Package,
    ] {
        let config = taint_config().with_unit_strategy(strategy);
        let outcome = taint_manager(program.graph.clone(), &config)
            .run(&[program.main])
            .unwrap();
        results.push(outcome.vulnerabilities);
    }
    for other in &results[1..] {
        assert_eq!(other, &results[0]);
    }
    assert_eq!(results[0].len(), 1);
}

#[test]
fn test_start_method_without_body_is_skipped() {
    let program = cross_unit_program();
    let bodiless: Vec<ifds_engine::MethodId> = program
        .graph
        .methods()
        .into_iter()
        .filter(|m| !program.graph.method(*m).unwrap().has_body())
        .collect();
    assert!(!bodiless.is_empty());

    let outcome = taint_manager(program.graph.clone(), &taint_config())
        .run(&bodiless)
        .unwrap();
    assert!(outcome.vulnerabilities.is_empty());
    assert_eq!(outcome.units, 0);
}

/// ```text
/// 0: noop
/// 1: x = y
/// 2: t = Http#param()
/// 3: x.v = t
/// 4: Db#exec(y.v)
/// 5: return
/// ```
fn aliased_store() -> (ifds_engine::SharedGraph, ifds_engine::MethodId) {
    let mut b = ProgramBuilder::new();
    let lib = taint_library(&mut b);
    let field = FieldRef::new("Box", "v");
    let main = b
        .method("App", "main")
        .static_method()
        .body(vec![
            InstKind::Noop,
            copy("x", "y"),
            call_into("t", lib.param, vec![]),
            assign(Value::field(local("x"), field.clone()), Expr::Value(local("t"))),
            call(lib.exec, vec![Value::field(local("y"), field)]),
            InstKind::Return(None),
        ])
        .finish();
    (shared(b), main)
}

#[test]
fn test_alias_found_only_with_backward_companion() {
    let (graph, main) = aliased_store();

    let forward_only = service(graph.clone(), taint_config()).run_taint(&[main]).unwrap();
    assert!(forward_only.is_clean(), "unexpected: {:?}", forward_only.vulnerabilities);

    let bidi = service(graph, taint_config()).run_taint_bidi(&[main]).unwrap();
    let y_v = AccessPath::from_local("y").extend([Accessor::Field(FieldRef::new("Box", "v"))]);
    assert_eq!(
        bidi.vulnerabilities.iter().map(|v| v.vertex.clone()).collect::<Vec<_>>(),
        vec![Vertex::new(InstId::new(main, 4), DomainFact::taint(y_v))]
    );
    assert!(bidi.vulnerabilities.iter().all(|v| v.rule_id == TAINT_RULE_ID));
}

/// ```text
/// 0: x = y
/// 1: Db#exec(y.v)       <- before the store
/// 2: t = Http#param()
/// 3: x.v = t
/// 4: return
/// ```
#[test]
fn test_alias_gated_at_later_store_misses_earlier_sink() {
    let mut b = ProgramBuilder::new();
    let lib = taint_library(&mut b);
    let field = FieldRef::new("Box", "v");
    let main = b
        .method("App", "main")
        .static_method()
        .body(vec![
            copy("x", "y"),
            call(lib.exec, vec![Value::field(local("y"), field.clone())]),
            call_into("t", lib.param, vec![]),
            assign(Value::field(local("x"), field), Expr::Value(local("t"))),
            InstKind::Return(None),
        ])
        .finish();

    let report = service(shared(b), taint_config()).run_taint_bidi(&[main]).unwrap();
    assert!(report.is_clean(), "unexpected: {:?}", report.vulnerabilities);
}

/// `Lib#rec(p) { y.f = p; Lib#rec(y); return }` grows the path on every call
#[test]
fn test_recursive_path_growth_terminates() {
    let mut b = ProgramBuilder::new();
    let lib = taint_library(&mut b);
    let field = FieldRef::new("Node", "f");
    let rec = b.method("Lib", "rec").static_method().params(&["p"]).finish();
    b.define(rec)
        .unwrap()
        .body(vec![
            assign(Value::field(local("y"), field), Expr::Value(arg(0, "p"))),
            call(rec, vec![local("y")]),
            InstKind::Return(None),
        ])
        .finish();
    let main = b
        .method("App", "main")
        .static_method()
        .body(vec![
            call_into("a", lib.param, vec![]),
            call(rec, vec![local("a")]),
            InstKind::Return(None),
        ])
        .finish();
    let graph = shared(b);

    for strategy in [UnitStrategy::Singleton, UnitStrategy::Class] {
        let config = taint_config().with_unit_strategy(strategy).with_max_path_length(3);
        let outcome = taint_manager(graph.clone(), &config).run(&[main]).unwrap();

        assert!(outcome.vulnerabilities.is_empty());
        assert!(outcome.statistics.summary_edges > 0);
        assert!(outcome.cross_unit_calls.iter().all(|c| c
            .callee_vertex
            .fact
            .as_taint()
            .map_or(true, |node| node.variable.len() <= 3)));
    }
}

#[test]
fn test_backward_slice_on_reversed_graph() {
    let (graph, main) = crash_diamond();
    let config = AnalysisConfig::default().with_worker_threads(2);
    let sinks = vec![InstId::new(main, 5)];
    let factory = BaseUnitRunnerFactory::new(crash_slice_analyzer_factory(sinks, config.max_path_length));
    let manager = UnitManager::new(BackwardGraph::shared(graph), &config, Arc::new(factory)).unwrap();
    let outcome = manager.run(&[main]).unwrap();

    assert_eq!(outcome.units, 1);
    assert!(outcome.vulnerabilities.iter().all(|v| v.rule_id == SLICE_RULE_ID));
    // `b = null` feeds the crash point
    assert!(outcome.vulnerabilities.iter().any(|v| {
        v.vertex == Vertex::new(InstId::new(main, 4), DomainFact::slice_data(AccessPath::from_local("b"), None))
    }));
}

#[test]
fn test_repeated_runs_are_deterministic() {
    let program = cross_unit_program();
    let config = taint_config().with_worker_threads(4);
    let manager = taint_manager(program.graph.clone(), &config);
    let first = manager.run(&[program.main, program.id]).unwrap();
    let second = manager.run(&[program.main, program.id]).unwrap();

    assert_eq!(first.vulnerabilities, second.vulnerabilities);
    assert_eq!(first.cross_unit_calls, second.cross_unit_calls);
    assert_eq!(first.units, second.units);
}
