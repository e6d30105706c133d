//! Analysis Service
//!
//! Connects [`AnalysisConfig`] with the unit manager and the analyzer
//! factories. One service wraps one loaded program; every `run_*` call is an
//! independent fixpoint with its own manager and runtime.
//!
//! # Architecture
//! ```text
//! AnalysisConfig (validated once)
//!       ↓
//! AnalysisService (Config Adapter)
//!       ↓
//! UnitRunnerFactory (base / bidi) → UnitManager → AnalysisReport
//! ```
//!
//! # Usage
//! ```rust,ignore
//! use ifds_engine::config::{AnalysisConfig, Preset};
//! use ifds_engine::features::ifds::application::AnalysisService;
//!
//! let service = AnalysisService::new(graph, AnalysisConfig::from_preset(Preset::Balanced))?;
//! let report = service.run_npe(&[])?;
//! ```

use std::sync::Arc;
use std::time::Instant;

use rustc_hash::FxHashSet;
use tracing::info;

use super::super::infrastructure::{
    BaseUnitRunnerFactory, BidiUnitRunnerFactory, SharedAnalyzerFactory, UnitManager,
    UnitRunnerFactory,
};
use super::super::ports::{AnalysisKind, AnalysisReport, AnalysisRequest, IfdsAnalysisService};
use crate::config::AnalysisConfig;
use crate::errors::{IfdsError, Result};
use crate::features::analyzers::{
    crash_slice_analyzer_factory, npe_analyzer_factory, taint_analyzer_factory,
    taint_backward_analyzer_factory, unused_variable_analyzer_factory, TaintRules,
};
use crate::shared::models::{BackwardGraph, InstId, MethodId, SharedGraph};

pub struct AnalysisService {
    graph: SharedGraph,
    config: AnalysisConfig,
}

impl AnalysisService {
    /// Wrap a program; the config is validated up front
    pub fn new(graph: SharedGraph, config: AnalysisConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { graph, config })
    }

    pub fn graph(&self) -> &SharedGraph {
        &self.graph
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Every method with a body, in id order
    pub fn default_start_methods(&self) -> Vec<MethodId> {
        let mut methods: Vec<MethodId> = self
            .graph
            .methods()
            .into_iter()
            .filter(|m| self.graph.method(*m).is_some_and(|method| method.has_body()))
            .collect();
        methods.sort();
        methods
    }

    // ========================================================================
    // Use cases
    // ========================================================================

    pub fn run_taint(&self, start_methods: &[MethodId]) -> Result<AnalysisReport> {
        let rules = Arc::new(TaintRules::from_config(&self.config)?);
        let factory = BaseUnitRunnerFactory::new(taint_analyzer_factory(rules, false));
        self.execute(AnalysisKind::Taint, self.graph.clone(), Arc::new(factory), start_methods)
    }

    /// Forward taint plus a backward companion answering alias queries
    pub fn run_taint_bidi(&self, start_methods: &[MethodId]) -> Result<AnalysisReport> {
        let rules = Arc::new(TaintRules::from_config(&self.config)?);
        let factory = BidiUnitRunnerFactory::new(
            taint_analyzer_factory(rules.clone(), true),
            taint_backward_analyzer_factory(rules),
        );
        self.execute(AnalysisKind::TaintBidi, self.graph.clone(), Arc::new(factory), start_methods)
    }

    pub fn run_npe(&self, start_methods: &[MethodId]) -> Result<AnalysisReport> {
        self.run_base(AnalysisKind::Npe, npe_analyzer_factory(&self.config), start_methods)
    }

    pub fn run_unused_variables(&self, start_methods: &[MethodId]) -> Result<AnalysisReport> {
        self.run_base(
            AnalysisKind::UnusedVariable,
            unused_variable_analyzer_factory(),
            start_methods,
        )
    }

    /// Backward slice over the reversed graph
    ///
    /// `sinks` is the crash stack trace, crash point last. The run
    /// starts in every method that owns a frame.
    pub fn run_crash_slice(&self, sinks: &[InstId]) -> Result<AnalysisReport> {
        if sinks.is_empty() {
            return Err(IfdsError::invalid_program("crash slice needs at least one sink"));
        }
        if let Some(unknown) = sinks.iter().find(|s| self.graph.inst(**s).is_none()) {
            return Err(IfdsError::UnknownInstruction(*unknown));
        }

        let mut seen = FxHashSet::default();
        let start_methods: Vec<MethodId> = sinks
            .iter()
            .map(|s| s.method)
            .filter(|m| seen.insert(*m))
            .collect();

        let factory = BaseUnitRunnerFactory::new(crash_slice_analyzer_factory(
            sinks.to_vec(),
            self.config.max_path_length,
        ));
        self.execute(
            AnalysisKind::CrashSlice,
            BackwardGraph::shared(self.graph.clone()),
            Arc::new(factory),
            &start_methods,
        )
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn run_base(
        &self,
        kind: AnalysisKind,
        analyzers: SharedAnalyzerFactory,
        start_methods: &[MethodId],
    ) -> Result<AnalysisReport> {
        let factory = BaseUnitRunnerFactory::new(analyzers);
        self.execute(kind, self.graph.clone(), Arc::new(factory), start_methods)
    }

    fn resolve_start_methods(&self, start_methods: &[MethodId]) -> Result<Vec<MethodId>> {
        if start_methods.is_empty() {
            return Ok(self.default_start_methods());
        }
        match start_methods.iter().find(|m| self.graph.method(**m).is_none()) {
            Some(unknown) => Err(IfdsError::UnknownMethod(*unknown)),
            None => Ok(start_methods.to_vec()),
        }
    }

    fn execute(
        &self,
        kind: AnalysisKind,
        graph: SharedGraph,
        factory: Arc<dyn UnitRunnerFactory>,
        start_methods: &[MethodId],
    ) -> Result<AnalysisReport> {
        let start_methods = self.resolve_start_methods(start_methods)?;
        let started = Instant::now();

        let manager = UnitManager::new(graph, &self.config, factory)?;
        let outcome = manager.run(&start_methods)?;
        let report = AnalysisReport::from_outcome(kind, outcome);

        info!(
            analysis = kind.as_str(),
            start_methods = start_methods.len(),
            units = report.statistics.units,
            vulnerabilities = report.vulnerabilities.len(),
            summary_edges = report.statistics.summary_edges,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "analysis run complete"
        );
        Ok(report)
    }
}

// ============================================================================
// Implement Input Port
// ============================================================================

impl IfdsAnalysisService for AnalysisService {
    fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisReport> {
        match request.kind {
            AnalysisKind::Taint => self.run_taint(&request.entry_points),
            AnalysisKind::TaintBidi => self.run_taint_bidi(&request.entry_points),
            AnalysisKind::Npe => self.run_npe(&request.entry_points),
            AnalysisKind::CrashSlice => self.run_crash_slice(&request.sinks),
            AnalysisKind::UnusedVariable => self.run_unused_variables(&request.entry_points),
        }
    }
}
