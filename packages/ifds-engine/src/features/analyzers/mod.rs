//! Representative analyzers
//!
//! - [`taint`]: configurable source/sink/sanitizer taint, with a backward
//!   alias companion
//! - [`npe`]: possible null dereferences
//! - [`crash_slice`]: backward slice from a crash stack trace
//! - [`unused_variable`]: assignments whose value is never read

pub mod crash_slice;
pub mod dominators;
pub mod npe;
pub mod taint;
pub mod unused_variable;

pub use crash_slice::{crash_slice_analyzer_factory, CrashSliceAnalyzer, SLICE_RULE_ID};
pub use dominators::DominatorCache;
pub use npe::{is_dereferenced_at, npe_analyzer_factory, NpeAnalyzer, NPE_RULE_ID};
pub use taint::{
    taint_analyzer_factory, taint_backward_analyzer_factory, TaintAnalyzer, TaintBackwardAnalyzer,
    TaintRules, TAINT_RULE_ID,
};
pub use unused_variable::{unused_variable_analyzer_factory, UnusedVariableAnalyzer, UNUSED_RULE_ID};

use crate::shared::models::{ApplicationGraph, CallExpr, Method};

/// Declared target of a call, bodies or not
pub(crate) fn callee_method<'g>(graph: &'g dyn ApplicationGraph, call: &CallExpr) -> Option<&'g Method> {
    graph.method(call.callee)
}
