//! Witness reconstruction
//!
//! Walks `path_edge_preds` backwards from a reported vertex and collects the
//! vertices that explain it. Summary applications are expanded into the
//! callee's start-to-exit edge so the witness enters and leaves callees.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::features::ifds::domain::{Edge, PredecessorKind, TraceEdge, TraceGraph, Vertex};

use super::analyzer::IfdsResult;

struct TraceGraphBuilder<'a> {
    result: &'a IfdsResult,
    sink: Vertex,
    sources: FxHashSet<Vertex>,
    edges: FxHashMap<Vertex, FxHashSet<Vertex>>,
    visited: FxHashSet<Edge>,
}

/// Pending DFS step: edge to explain, vertex it leads to, and whether the
/// walk is confined to the current method
struct Step {
    edge: Edge,
    last: Vertex,
    stop_at_method_start: bool,
}

impl<'a> TraceGraphBuilder<'a> {
    fn new(result: &'a IfdsResult, sink: Vertex) -> Self {
        Self {
            result,
            sink,
            sources: FxHashSet::default(),
            edges: FxHashMap::default(),
            visited: FxHashSet::default(),
        }
    }

    fn add_edge(&mut self, from: &Vertex, to: &Vertex) {
        if from != to {
            self.edges
                .entry(from.clone())
                .or_default()
                .insert(to.clone());
        }
    }

    fn build(mut self) -> TraceGraph {
        let mut stack: Vec<Step> = self
            .result
            .path_edges
            .iter()
            .filter(|e| e.v == self.sink)
            .map(|e| Step {
                edge: e.clone(),
                last: e.v.clone(),
                stop_at_method_start: false,
            })
            .collect();

        while let Some(step) = stack.pop() {
            self.visit(step, &mut stack);
        }

        let mut sources: Vec<Vertex> = self.sources.into_iter().collect();
        sources.sort_by_key(|v| v.to_string());
        let mut edges: Vec<TraceEdge> = self
            .edges
            .into_iter()
            .flat_map(|(from, tos)| {
                tos.into_iter().map(move |to| TraceEdge {
                    from: from.clone(),
                    to,
                })
            })
            .collect();
        edges.sort_by_key(|e| (e.from.to_string(), e.to.to_string()));

        TraceGraph {
            sink: self.sink,
            sources,
            edges,
        }
    }

    fn visit(&mut self, step: Step, stack: &mut Vec<Step>) {
        let Step {
            edge,
            last,
            stop_at_method_start,
        } = step;
        if !self.visited.insert(edge.clone()) {
            return;
        }

        if stop_at_method_start && edge.u == edge.v {
            self.add_edge(&edge.u, &last);
            return;
        }

        let v = &edge.v;
        if v.fact.is_zero() {
            self.add_edge(v, &last);
            self.sources.insert(v.clone());
            return;
        }

        let preds = match self.result.path_edge_preds.get(&edge) {
            Some(preds) => preds.clone(),
            None => return,
        };
        for pred in preds {
            let pred_v = pred.pred.v.clone();
            match pred.kind {
                PredecessorKind::CallToStart => {
                    if !stop_at_method_start {
                        self.add_edge(&pred_v, &last);
                        stack.push(Step {
                            edge: pred.pred,
                            last: pred_v,
                            stop_at_method_start: false,
                        });
                    }
                }
                PredecessorKind::Sequent => {
                    // Unchanged fact: the step carries no information
                    let last = if pred_v.fact == v.fact {
                        last.clone()
                    } else {
                        self.add_edge(&pred_v, &last);
                        pred_v
                    };
                    stack.push(Step {
                        edge: pred.pred,
                        last,
                        stop_at_method_start,
                    });
                }
                PredecessorKind::ThroughSummary(summary) => {
                    self.add_edge(&summary.v, &last);
                    self.add_edge(&pred_v, &summary.u);
                    let through_zero = summary.u.fact.is_zero();
                    stack.push(Step {
                        last: summary.v.clone(),
                        edge: summary,
                        stop_at_method_start: true,
                    });
                    if !through_zero {
                        stack.push(Step {
                            edge: pred.pred,
                            last: pred_v,
                            stop_at_method_start,
                        });
                    }
                }
                PredecessorKind::Unknown => {
                    // Injected edge: restart from the method start
                    self.add_edge(&pred_v, &last);
                    stack.push(Step {
                        edge: Edge::start(pred.pred.u.clone()),
                        last: pred_v,
                        stop_at_method_start,
                    });
                }
                PredecessorKind::NoPredecessor => {
                    self.sources.insert(v.clone());
                    self.add_edge(&pred_v, &last);
                }
            }
        }
    }
}

impl IfdsResult {
    /// Witness graph for a vertex reported by an analyzer
    pub fn resolve_trace_graph(&self, sink: &Vertex) -> TraceGraph {
        TraceGraphBuilder::new(self, sink.clone()).build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::ifds::domain::{AccessPath, DomainFact, PathEdgePredecessor};
    use crate::shared::models::{InstId, MethodId};
    use pretty_assertions::assert_eq;

    fn vx(index: u32, fact: DomainFact) -> Vertex {
        Vertex::new(InstId::new(MethodId(0), index), fact)
    }

    fn record(result: &mut IfdsResult, edge: Edge, pred: Edge, kind: PredecessorKind) {
        result.path_edges.push(edge.clone());
        result
            .path_edge_preds
            .entry(edge)
            .or_default()
            .insert(PathEdgePredecessor::new(pred, kind));
    }

    #[test]
    fn test_linear_witness() {
        let start = vx(0, DomainFact::Zero);
        let tainted = DomainFact::taint(AccessPath::from_local("a"));
        let e0 = Edge::start(start.clone());
        let e1 = Edge::new(start.clone(), vx(1, DomainFact::Zero));
        let e2 = Edge::new(start.clone(), vx(2, tainted.clone()));
        let e3 = Edge::new(start.clone(), vx(3, tainted.clone()));

        let mut result = IfdsResult::default();
        record(&mut result, e0.clone(), e0.clone(), PredecessorKind::NoPredecessor);
        record(&mut result, e1.clone(), e0.clone(), PredecessorKind::Sequent);
        record(&mut result, e2.clone(), e1.clone(), PredecessorKind::Sequent);
        record(&mut result, e3.clone(), e2.clone(), PredecessorKind::Sequent);

        let graph = result.resolve_trace_graph(&e3.v);
        assert_eq!(graph.sink, e3.v);
        assert_eq!(graph.sources, vec![vx(1, DomainFact::Zero)]);
        // the unchanged step 2 -> 3 collapses into one witness edge
        assert_eq!(
            graph.edges,
            vec![TraceEdge {
                from: vx(1, DomainFact::Zero),
                to: vx(3, tainted)
            }]
        );
    }

    #[test]
    fn test_unknown_vertex_has_empty_graph() {
        let result = IfdsResult::default();
        let graph = result.resolve_trace_graph(&vx(0, DomainFact::Zero));
        assert!(graph.sources.is_empty());
        assert!(graph.edges.is_empty());
    }
}
