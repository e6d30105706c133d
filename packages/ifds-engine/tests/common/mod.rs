//! Program fixtures shared by the integration tests

#![allow(dead_code)]

use std::sync::Arc;

use ifds_engine::config::{AnalysisConfig, TaintRulesConfig, UnitStrategy};
use ifds_engine::shared::models::{
    CallExpr, CmpOp, Condition, Constant, Expr, InstKind, ProgramBuilder, Value,
};
use ifds_engine::{AnalysisService, MethodId, SharedGraph};

pub fn local(name: &str) -> Value {
    Value::local(name)
}

pub fn arg(index: u32, name: &str) -> Value {
    Value::Argument {
        index,
        name: name.to_string(),
    }
}

pub fn assign(lhv: Value, rhv: Expr) -> InstKind {
    InstKind::Assign { lhv, rhv }
}

pub fn copy(to: &str, from: &str) -> InstKind {
    assign(local(to), Expr::Value(local(from)))
}

pub fn call_into(to: &str, callee: MethodId, args: Vec<Value>) -> InstKind {
    assign(local(to), Expr::Call(CallExpr::static_call(callee, args)))
}

pub fn call(callee: MethodId, args: Vec<Value>) -> InstKind {
    InstKind::Call(CallExpr::static_call(callee, args))
}

pub fn if_null(on: &str, true_branch: u32, false_branch: u32) -> InstKind {
    InstKind::If {
        condition: Condition {
            op: CmpOp::Eq,
            lhs: local(on),
            rhs: Value::null(),
        },
        true_branch,
        false_branch,
    }
}

pub fn shared(builder: ProgramBuilder) -> SharedGraph {
    Arc::new(builder.build().unwrap())
}

/// Sources `Http#param`, sinks `Db#exec`, sanitizers `Util#escape`
pub fn taint_config() -> AnalysisConfig {
    AnalysisConfig::default()
        .with_worker_threads(2)
        .with_unit_strategy(UnitStrategy::Class)
        .with_taint_rules(TaintRulesConfig {
            sources: vec!["Http#param".into()],
            sinks: vec!["Db#exec".into()],
            sanitizers: vec!["Util#escape".into()],
        })
}

pub fn service(graph: SharedGraph, config: AnalysisConfig) -> AnalysisService {
    AnalysisService::new(graph, config).unwrap()
}

/// Library methods every taint fixture declares
pub struct TaintLibrary {
    pub param: MethodId,
    pub exec: MethodId,
    pub escape: MethodId,
}

pub fn taint_library(b: &mut ProgramBuilder) -> TaintLibrary {
    TaintLibrary {
        param: b.method("Http", "param").static_method().finish(),
        exec: b.method("Db", "exec").static_method().params(&["q"]).finish(),
        escape: b.method("Util", "escape").static_method().params(&["s"]).finish(),
    }
}

/// ```text
/// 0: a = Http#param()
/// 1: b = a                 (or b = Util#escape(a))
/// 2: Db#exec(b)
/// 3: return
/// ```
pub fn source_to_sink(sanitized: bool) -> (SharedGraph, MethodId) {
    let mut b = ProgramBuilder::new();
    let lib = taint_library(&mut b);
    let second = if sanitized {
        call_into("b", lib.escape, vec![local("a")])
    } else {
        copy("b", "a")
    };
    let main = b
        .method("App", "main")
        .static_method()
        .body(vec![
            call_into("a", lib.param, vec![]),
            second,
            call(lib.exec, vec![local("b")]),
            InstKind::Return(None),
        ])
        .finish();
    (shared(b), main)
}

/// Taint passes through `Lib#id` (another class, so another unit)
///
/// ```text
/// App#main: a = Http#param(); b = Lib#id(a); Db#exec(b); c = Lib#id(k); Db#exec(c); return
/// Lib#id:   return p
/// ```
pub struct CrossUnitProgram {
    pub graph: SharedGraph,
    pub main: MethodId,
    pub id: MethodId,
}

pub fn cross_unit_program() -> CrossUnitProgram {
    let mut b = ProgramBuilder::new();
    let lib = taint_library(&mut b);
    let id = b
        .method("Lib", "id")
        .static_method()
        .params(&["p"])
        .body(vec![InstKind::Return(Some(arg(0, "p")))])
        .finish();
    let main = b
        .method("App", "main")
        .static_method()
        .body(vec![
            call_into("a", lib.param, vec![]),
            call_into("b", id, vec![local("a")]),
            call(lib.exec, vec![local("b")]),
            call_into("c", id, vec![local("k")]),
            call(lib.exec, vec![local("c")]),
            InstKind::Return(None),
        ])
        .finish();
    CrossUnitProgram {
        graph: shared(b),
        main,
        id,
    }
}

/// `s = null; s.length(); return`
pub fn null_dereference() -> (SharedGraph, MethodId) {
    let mut b = ProgramBuilder::new();
    let length = b.method("java.lang.String", "length").finish();
    let main = b
        .method("App", "main")
        .static_method()
        .body(vec![
            assign(local("s"), Expr::Value(Value::null())),
            InstKind::Call(CallExpr::virtual_call(length, local("s"), vec![])),
            InstKind::Return(None),
        ])
        .finish();
    (shared(b), main)
}

/// `x = Lib#compute(); return 0` or `...; return x`
pub fn compute_then_return(returns_x: bool) -> (SharedGraph, MethodId) {
    let mut b = ProgramBuilder::new();
    let compute = b.method("Lib", "compute").static_method().finish();
    let ret = if returns_x {
        InstKind::Return(Some(local("x")))
    } else {
        InstKind::Return(Some(Value::Constant(Constant::Int(0))))
    };
    let main = b
        .method("App", "main")
        .static_method()
        .body(vec![call_into("x", compute, vec![]), ret])
        .finish();
    (shared(b), main)
}

/// ```text
/// 0: a = Io#input()
/// 1: if (a == null) goto 4 else 2
/// 2: b = a
/// 3: goto 5
/// 4: b = null
/// 5: Io#use(b)          <- crash point
/// 6: t = Io#input()
/// 7: return
/// ```
pub fn crash_diamond() -> (SharedGraph, MethodId) {
    let mut b = ProgramBuilder::new();
    let input = b.method("Io", "input").static_method().finish();
    let use_it = b.method("Io", "use").static_method().params(&["v"]).finish();
    let main = b
        .method("App", "main")
        .static_method()
        .body(vec![
            call_into("a", input, vec![]),
            if_null("a", 4, 2),
            copy("b", "a"),
            InstKind::Goto { target: 5 },
            assign(local("b"), Expr::Value(Value::null())),
            call(use_it, vec![local("b")]),
            call_into("t", input, vec![]),
            InstKind::Return(None),
        ])
        .finish();
    (shared(b), main)
}
