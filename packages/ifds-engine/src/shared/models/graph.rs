//! ApplicationGraph abstraction
//!
//! The only view of the program the engine consumes: entry/exit points,
//! intra-procedural successors, resolved callees and the owning method of an
//! instruction. [`BackwardGraph`] flips it for backward analyses.

use std::sync::Arc;

use super::ir::{Field, Inst, InstId, Method, MethodId};

/// Program view consumed by runners and flow functions
///
/// Every front-end supplies one implementation. Lookups of ids that do not
/// belong to the graph return `None`; structural queries on such ids return
/// empty slices.
pub trait ApplicationGraph: Send + Sync {
    fn method(&self, id: MethodId) -> Option<&Method>;

    fn inst(&self, id: InstId) -> Option<&Inst>;

    /// All methods known to the graph, bodies or not
    fn methods(&self) -> Vec<MethodId>;

    fn entry_points(&self, method: MethodId) -> &[InstId];

    fn exit_points(&self, method: MethodId) -> &[InstId];

    fn successors(&self, inst: InstId) -> &[InstId];

    fn predecessors(&self, inst: InstId) -> &[InstId];

    /// Resolved callees with bodies; empty for external or unresolved calls
    fn callees(&self, inst: InstId) -> &[MethodId];

    /// Declared fields of a class
    fn fields_of(&self, class_name: &str) -> &[Field];

    fn method_of(&self, inst: InstId) -> MethodId {
        inst.method
    }

    /// Whether the graph runs against execution order
    fn is_backward(&self) -> bool {
        false
    }

    fn is_exit_point(&self, inst: InstId) -> bool {
        self.exit_points(inst.method).contains(&inst)
    }

    fn is_entry_point(&self, inst: InstId) -> bool {
        self.entry_points(inst.method).contains(&inst)
    }
}

/// Shared, thread-safe handle to a graph
pub type SharedGraph = Arc<dyn ApplicationGraph>;

/// Reversed view: entries become exits and successors become predecessors
pub struct BackwardGraph {
    forward: SharedGraph,
}

impl BackwardGraph {
    pub fn new(forward: SharedGraph) -> Self {
        Self { forward }
    }

    pub fn shared(forward: SharedGraph) -> SharedGraph {
        Arc::new(Self::new(forward))
    }

    pub fn forward(&self) -> &SharedGraph {
        &self.forward
    }
}

impl ApplicationGraph for BackwardGraph {
    fn method(&self, id: MethodId) -> Option<&Method> {
        self.forward.method(id)
    }

    fn inst(&self, id: InstId) -> Option<&Inst> {
        self.forward.inst(id)
    }

    fn methods(&self) -> Vec<MethodId> {
        self.forward.methods()
    }

    fn entry_points(&self, method: MethodId) -> &[InstId] {
        self.forward.exit_points(method)
    }

    fn exit_points(&self, method: MethodId) -> &[InstId] {
        self.forward.entry_points(method)
    }

    fn successors(&self, inst: InstId) -> &[InstId] {
        self.forward.predecessors(inst)
    }

    fn predecessors(&self, inst: InstId) -> &[InstId] {
        self.forward.successors(inst)
    }

    fn callees(&self, inst: InstId) -> &[MethodId] {
        self.forward.callees(inst)
    }

    fn fields_of(&self, class_name: &str) -> &[Field] {
        self.forward.fields_of(class_name)
    }

    fn is_backward(&self) -> bool {
        !self.forward.is_backward()
    }
}
