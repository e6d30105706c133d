//! Immediate-dominator search for control-dependence facts
//!
//! Works on whatever graph it is handed. On the reversed graph a join point's
//! "successors" are its forward predecessors, so the node found is the branch
//! that split the paths meeting there. Results are memoized per instruction.
//!
//! The walk climbs one idom step at a time from every successor until the
//! trails meet:
//!
//! ```text
//!        0: if            trails from 4:  [2, 1, 0]
//!       /   \                             [3, 0]
//!     1       3           first common:   0
//!     |       |
//!     2       |
//!      \     /
//!        4
//! ```

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::shared::models::{ApplicationGraph, InstId};

/// Instructions reached from one starting successor, in discovery order
#[derive(Debug, Default)]
struct Trail {
    order: Vec<InstId>,
    seen: FxHashSet<InstId>,
}

impl Trail {
    fn starting_at(inst: InstId) -> Self {
        let mut trail = Self::default();
        trail.push(inst);
        trail
    }

    fn push(&mut self, inst: InstId) {
        if self.seen.insert(inst) {
            self.order.push(inst);
        }
    }
}

#[derive(Debug, Default)]
pub struct DominatorCache {
    idoms: Mutex<FxHashMap<InstId, InstId>>,
}

impl DominatorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Immediate dominator of `inst` with respect to `graph`'s successor
    /// relation; an instruction without successors is its own
    pub fn immediate_dominator(&self, graph: &dyn ApplicationGraph, inst: InstId) -> InstId {
        self.cached(graph, inst, &FxHashSet::default())
    }

    pub fn len(&self) -> usize {
        self.idoms.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cached(&self, graph: &dyn ApplicationGraph, inst: InstId, visited: &FxHashSet<InstId>) -> InstId {
        if let Some(&idom) = self.idoms.lock().get(&inst) {
            return idom;
        }
        // Lock released while searching: the search re-enters the cache
        let idom = self.find_idom(graph, inst, visited);
        *self.idoms.lock().entry(inst).or_insert(idom)
    }

    fn find_idom(&self, graph: &dyn ApplicationGraph, inst: InstId, visited: &FxHashSet<InstId>) -> InstId {
        let successors: Vec<InstId> = graph
            .successors(inst)
            .iter()
            .copied()
            .filter(|s| !visited.contains(s))
            .collect();

        match successors.as_slice() {
            [] => return inst,
            [single] => return *single,
            _ => {}
        }

        // Loop header: the back-edge goto sits right before the condition
        if graph.inst(inst).is_some_and(|i| i.is_if()) {
            let gotos: Vec<InstId> = successors
                .iter()
                .copied()
                .filter(|s| graph.inst(*s).is_some_and(|i| i.is_goto()))
                .collect();
            if gotos.len() > 1 {
                if let Some(back_edge) = gotos
                    .iter()
                    .find(|g| g.method == inst.method && g.index + 1 == inst.index)
                {
                    return *back_edge;
                }
            }
        }

        let trails = successors.iter().map(|s| Trail::starting_at(*s)).collect();
        self.find_common_ancestor(graph, inst, successors, trails)
    }

    fn find_common_ancestor(
        &self,
        graph: &dyn ApplicationGraph,
        origin: InstId,
        mut front: Vec<InstId>,
        mut trails: Vec<Trail>,
    ) -> InstId {
        let first_head = front.first().copied().unwrap_or(origin);
        let budget = graph
            .method(origin.method)
            .map_or(0, |m| m.insts.len())
            + 1;

        for _ in 0..budget {
            let next_front: Vec<InstId> = front
                .iter()
                .zip(&trails)
                .map(|(inst, trail)| self.cached(graph, *inst, &trail.seen))
                .collect();
            for (trail, inst) in trails.iter_mut().zip(&next_front) {
                trail.push(*inst);
            }

            if let Some((first, rest)) = trails.split_first() {
                let common = first
                    .order
                    .iter()
                    .find(|inst| rest.iter().all(|t| t.seen.contains(inst)));
                if let Some(common) = common {
                    return *common;
                }
            }
            if next_front == front {
                break;
            }
            front = next_front;
        }
        // no meeting point: stop at the first branch
        first_head
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::{
        BackwardGraph, CmpOp, Condition, InstKind, MethodId, ProgramBuilder, SharedGraph, Value,
    };
    use petgraph::algo::dominators::simple_fast;
    use petgraph::graph::{DiGraph, NodeIndex};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn branch(on: &str, true_branch: u32, false_branch: u32) -> InstKind {
        InstKind::If {
            condition: Condition {
                op: CmpOp::Eq,
                lhs: Value::local(on),
                rhs: Value::null(),
            },
            true_branch,
            false_branch,
        }
    }

    fn assign(name: &str) -> InstKind {
        InstKind::Assign {
            lhv: Value::local(name),
            rhv: Value::local("src").into(),
        }
    }

    fn build(body: Vec<InstKind>) -> (SharedGraph, MethodId) {
        let mut b = ProgramBuilder::new();
        let m = b.method("App", "f").static_method().body(body).finish();
        let graph: SharedGraph = Arc::new(b.build().unwrap());
        (graph, m)
    }

    /// Forward idoms from petgraph, rooted at the method entry
    fn reference_idoms(graph: &SharedGraph, m: MethodId) -> FxHashMap<InstId, InstId> {
        let len = graph.method(m).unwrap().insts.len() as u32;
        let mut g: DiGraph<InstId, ()> = DiGraph::new();
        let nodes: Vec<NodeIndex> = (0..len).map(|i| g.add_node(InstId::new(m, i))).collect();
        for i in 0..len {
            for succ in graph.successors(InstId::new(m, i)) {
                g.add_edge(nodes[i as usize], nodes[succ.index as usize], ());
            }
        }
        let doms = simple_fast(&g, nodes[0]);
        (0..len)
            .filter_map(|i| {
                doms.immediate_dominator(nodes[i as usize])
                    .map(|d| (InstId::new(m, i), g[d]))
            })
            .collect()
    }

    fn assert_join_points_agree(body: Vec<InstKind>) {
        let (forward, m) = build(body);
        let reversed = BackwardGraph::shared(forward.clone());
        let cache = DominatorCache::new();
        let reference = reference_idoms(&forward, m);

        for (&inst, &idom) in &reference {
            // join points are where the reversed walk has a choice to make
            if forward.predecessors(inst).len() > 1 {
                assert_eq!(cache.immediate_dominator(reversed.as_ref(), inst), idom, "at {}", inst);
            }
        }
    }

    #[test]
    fn test_diamond_matches_reference() {
        assert_join_points_agree(vec![
            branch("a", 3, 1),
            assign("y"),
            InstKind::Goto { target: 4 },
            assign("y"),
            InstKind::Return(Some(Value::local("y"))),
        ]);
    }

    #[test]
    fn test_nested_diamonds_match_reference() {
        assert_join_points_agree(vec![
            branch("a", 5, 1),
            branch("b", 3, 2),
            assign("y"),
            InstKind::Noop,
            InstKind::Goto { target: 6 },
            assign("y"),
            InstKind::Return(None),
        ]);
    }

    #[test]
    fn test_single_successor_and_entry() {
        let (forward, m) = build(vec![assign("x"), assign("y"), InstKind::Return(None)]);
        let reversed = BackwardGraph::shared(forward);
        let cache = DominatorCache::new();
        assert_eq!(
            cache.immediate_dominator(reversed.as_ref(), InstId::new(m, 2)),
            InstId::new(m, 1)
        );
        // the forward entry has nothing before it
        assert_eq!(
            cache.immediate_dominator(reversed.as_ref(), InstId::new(m, 0)),
            InstId::new(m, 0)
        );
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_disjoint_branches_stop_at_first_head() {
        // both arms return, so their trails never meet
        let (forward, m) = build(vec![
            branch("a", 1, 2),
            InstKind::Return(None),
            InstKind::Return(None),
        ]);
        let cache = DominatorCache::new();
        let head = forward.successors(InstId::new(m, 0))[0];
        assert_eq!(cache.immediate_dominator(forward.as_ref(), InstId::new(m, 0)), head);
    }

    #[test]
    fn test_loop_header_prefers_back_edge_goto() {
        // 1: goto 3 enters the loop, 5: goto 2 -> 2: goto 3 is the back edge;
        // reversed, the header at 3 sees both gotos
        let (forward, m) = build(vec![
            assign("i"),
            InstKind::Goto { target: 3 },
            InstKind::Goto { target: 3 },
            branch("i", 6, 4),
            assign("i"),
            InstKind::Goto { target: 2 },
            InstKind::Return(None),
        ]);
        let reversed = BackwardGraph::shared(forward);
        let cache = DominatorCache::new();
        assert_eq!(
            cache.immediate_dominator(reversed.as_ref(), InstId::new(m, 3)),
            InstId::new(m, 2)
        );
    }
}
