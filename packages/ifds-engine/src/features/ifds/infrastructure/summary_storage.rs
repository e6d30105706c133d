//! Memoized summaries shared across units
//!
//! The only cross-unit shared structure. Units never read it directly: the
//! manager consults it when a unit subscribes to a callee start vertex and
//! forwards new exits to every subscriber.

use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::{DashMap, DashSet};
use rustc_hash::FxHashSet;

use crate::features::ifds::domain::{CrossUnitCallFact, Edge, TraceGraph, Vertex, VulnerabilityLocation};

use super::unit_resolver::UnitId;

/// Outcome of a subscription
#[derive(Debug, Default)]
pub struct Subscription {
    /// No unit asked for this start vertex before
    pub first_request: bool,
    /// Exits already known for the start vertex
    pub known_exits: Vec<Vertex>,
}

#[derive(Debug, Default)]
pub struct SummaryStorage {
    summaries: DashMap<Vertex, FxHashSet<Vertex>>,
    subscribers: DashMap<Vertex, FxHashSet<UnitId>>,
    vulnerabilities: DashSet<VulnerabilityLocation>,
    cross_unit_calls: DashSet<CrossUnitCallFact>,
    trace_graphs: DashMap<Vertex, TraceGraph>,
    summary_edges: AtomicUsize,
}

impl SummaryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a start-to-exit edge; returns the units to notify when the exit
    /// is new for that start vertex
    pub fn add_summary_edge(&self, edge: &Edge) -> Vec<UnitId> {
        let inserted = self
            .summaries
            .entry(edge.u.clone())
            .or_default()
            .insert(edge.v.clone());
        if !inserted {
            return Vec::new();
        }
        self.summary_edges.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .get(&edge.u)
            .map(|units| units.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Register `unit` as interested in the exits of `start`
    pub fn subscribe(&self, unit: UnitId, start: &Vertex) -> Subscription {
        let mut entry = self.subscribers.entry(start.clone()).or_default();
        let first_request = entry.is_empty();
        entry.insert(unit);
        drop(entry);

        Subscription {
            first_request,
            known_exits: self.exits_of(start),
        }
    }

    pub fn exits_of(&self, start: &Vertex) -> Vec<Vertex> {
        self.summaries
            .get(start)
            .map(|exits| exits.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn add_vulnerability(&self, location: VulnerabilityLocation) -> bool {
        self.vulnerabilities.insert(location)
    }

    pub fn add_cross_unit_call(&self, fact: CrossUnitCallFact) -> bool {
        self.cross_unit_calls.insert(fact)
    }

    pub fn add_trace_graph(&self, graph: TraceGraph) {
        self.trace_graphs.insert(graph.sink.clone(), graph);
    }

    pub fn summary_edge_count(&self) -> usize {
        self.summary_edges.load(Ordering::Relaxed)
    }

    /// Findings in a stable order: method, instruction, rule, fact
    pub fn vulnerabilities(&self) -> Vec<VulnerabilityLocation> {
        let mut out: Vec<VulnerabilityLocation> =
            self.vulnerabilities.iter().map(|v| v.key().clone()).collect();
        out.sort_by_key(|v| {
            (
                v.vertex.inst,
                v.rule_id.clone(),
                v.vertex.fact.to_string(),
                v.description.clone(),
            )
        });
        out
    }

    pub fn cross_unit_calls(&self) -> Vec<CrossUnitCallFact> {
        let mut out: Vec<CrossUnitCallFact> =
            self.cross_unit_calls.iter().map(|c| c.key().clone()).collect();
        out.sort_by_key(|c| (c.caller_vertex.to_string(), c.callee_vertex.to_string()));
        out
    }

    pub fn trace_graphs(&self) -> Vec<TraceGraph> {
        let mut out: Vec<TraceGraph> = self.trace_graphs.iter().map(|g| g.value().clone()).collect();
        out.sort_by_key(|g| g.sink.to_string());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::ifds::domain::DomainFact;
    use crate::shared::models::{InstId, MethodId};
    use pretty_assertions::assert_eq;

    fn vx(method: u32, index: u32) -> Vertex {
        Vertex::new(InstId::new(MethodId(method), index), DomainFact::Zero)
    }

    #[test]
    fn test_subscription_replays_known_exits() {
        let storage = SummaryStorage::new();
        let start = vx(1, 0);
        let unit = UnitId::Class("A".into());

        assert!(storage.add_summary_edge(&Edge::new(start.clone(), vx(1, 3))).is_empty());
        let sub = storage.subscribe(unit.clone(), &start);
        assert!(sub.first_request);
        assert_eq!(sub.known_exits, vec![vx(1, 3)]);

        // repeated subscription: no new request, same exits
        let again = storage.subscribe(UnitId::Class("B".into()), &start);
        assert!(!again.first_request);
        assert_eq!(again.known_exits, vec![vx(1, 3)]);
    }

    #[test]
    fn test_new_exit_notifies_subscribers_once() {
        let storage = SummaryStorage::new();
        let start = vx(2, 0);
        let unit = UnitId::Method(MethodId(7));
        storage.subscribe(unit.clone(), &start);

        let edge = Edge::new(start.clone(), vx(2, 4));
        assert_eq!(storage.add_summary_edge(&edge), vec![unit]);
        assert!(storage.add_summary_edge(&edge).is_empty());
        assert_eq!(storage.summary_edge_count(), 1);
    }

    #[test]
    fn test_vulnerabilities_are_deduplicated_and_sorted() {
        let storage = SummaryStorage::new();
        let late = VulnerabilityLocation::new("taint-analysis", vx(3, 5), "");
        let early = VulnerabilityLocation::new("taint-analysis", vx(0, 1), "");
        assert!(storage.add_vulnerability(late.clone()));
        assert!(!storage.add_vulnerability(late.clone()));
        assert!(storage.add_vulnerability(early.clone()));
        assert_eq!(storage.vulnerabilities(), vec![early, late]);
    }
}
