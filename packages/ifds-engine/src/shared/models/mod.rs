//! Program model consumed by the engine

pub mod graph;
pub mod ir;
pub mod program;

pub use graph::{ApplicationGraph, BackwardGraph, SharedGraph};
pub use ir::{
    BinaryOp, CallExpr, CallKind, CmpOp, Condition, Constant, Expr, Field, FieldRef, Inst, InstId,
    InstKind, Method, MethodId, Param, Value,
};
pub use program::{CallTargets, ClassDecl, MethodBuilder, ProgramBuilder, ProgramGraph, ProgramSpec};
