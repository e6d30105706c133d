/*
 * IFDS Ports (Hexagonal Architecture)
 *
 * Boundary between the engine and whoever drives it.
 *
 * Architecture:
 * ```
 *                    +-------------------------+
 *                    |     External World      |
 *                    |     (CLI, Tests)        |
 *                    +------------+------------+
 *                                 |
 *                    +------------v------------+
 *                    |      Input Port         | ← Driving adapters call this
 *                    | (IfdsAnalysisService)   |
 *                    +------------+------------+
 *                                 |
 *                    +------------v------------+
 *                    |    Application Layer    |
 *                    |  (run_taint, run_npe..) |
 *                    +------------+------------+
 *                                 |
 *                    +------------v------------+
 *                    |  Manager / Unit Runners |
 *                    |    (Infrastructure)     |
 *                    +-------------------------+
 * ```
 */

use serde::{Deserialize, Serialize};

use super::domain::{TraceGraph, VulnerabilityLocation};
use super::infrastructure::{ManagerOutcome, UnitStatistics};
use crate::errors::Result;
use crate::shared::models::{InstId, MethodId};

// ============================================================================
// DTOs (Data Transfer Objects)
// ============================================================================

/// Which analyzer a request runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisKind {
    Taint,
    /// Forward taint paired with the backward alias companion
    TaintBidi,
    Npe,
    CrashSlice,
    UnusedVariable,
}

impl AnalysisKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisKind::Taint => "taint",
            AnalysisKind::TaintBidi => "taint-bidi",
            AnalysisKind::Npe => "npe",
            AnalysisKind::CrashSlice => "crash-slice",
            AnalysisKind::UnusedVariable => "unused-variable",
        }
    }
}

/// Request for one analysis run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub kind: AnalysisKind,

    /// Start methods; empty means every method with a body
    #[serde(default)]
    pub entry_points: Vec<MethodId>,

    /// Crash stack trace, crash point last (crash slice only)
    #[serde(default)]
    pub sinks: Vec<InstId>,
}

impl AnalysisRequest {
    pub fn new(kind: AnalysisKind) -> Self {
        Self {
            kind,
            entry_points: Vec::new(),
            sinks: Vec::new(),
        }
    }

    pub fn with_entry_points(mut self, entry_points: Vec<MethodId>) -> Self {
        self.entry_points = entry_points;
        self
    }

    pub fn with_sinks(mut self, sinks: Vec<InstId>) -> Self {
        self.sinks = sinks;
        self
    }
}

/// Run counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatistics {
    /// Units that received at least one message
    pub units: usize,
    pub processed_edges: usize,
    /// Distinct summary edges memoized by the manager
    pub summary_edges: usize,
}

impl RunStatistics {
    fn from_outcome(units: usize, statistics: &UnitStatistics) -> Self {
        Self {
            units,
            processed_edges: statistics.processed_edges,
            summary_edges: statistics.summary_edges,
        }
    }
}

/// Everything one run reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub kind: AnalysisKind,
    pub vulnerabilities: Vec<VulnerabilityLocation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trace_graphs: Vec<TraceGraph>,
    pub statistics: RunStatistics,
}

impl AnalysisReport {
    pub fn from_outcome(kind: AnalysisKind, outcome: ManagerOutcome) -> Self {
        let statistics = RunStatistics::from_outcome(outcome.units, &outcome.statistics);
        Self {
            kind,
            vulnerabilities: outcome.vulnerabilities,
            trace_graphs: outcome.trace_graphs,
            statistics,
        }
    }

    /// Findings of one rule
    pub fn by_rule<'a>(&'a self, rule_id: &'a str) -> impl Iterator<Item = &'a VulnerabilityLocation> + 'a {
        self.vulnerabilities.iter().filter(move |v| v.rule_id == rule_id)
    }

    pub fn is_clean(&self) -> bool {
        self.vulnerabilities.is_empty()
    }
}

// ============================================================================
// Input Port
// ============================================================================

/// Driving port: run an analysis over an already loaded program
pub trait IfdsAnalysisService: Send + Sync {
    fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisReport>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_request_defaults_from_json() {
        let request: AnalysisRequest = serde_json::from_str(r#"{"kind": "crash-slice"}"#).unwrap();
        assert_eq!(request, AnalysisRequest::new(AnalysisKind::CrashSlice));
    }

    #[test]
    fn test_report_from_empty_outcome() {
        let report = AnalysisReport::from_outcome(AnalysisKind::Npe, ManagerOutcome::default());
        assert!(report.is_clean());
        assert_eq!(report.statistics, RunStatistics::default());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["kind"], "npe");
        // empty trace graph lists stay out of the output
        assert!(json.get("trace_graphs").is_none());
    }
}
