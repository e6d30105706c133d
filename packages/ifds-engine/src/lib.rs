/*
 * IFDS Engine - Interprocedural Dataflow Analysis
 *
 * Feature-First Hexagonal Architecture:
 * - shared/      : Program model (IR, ApplicationGraph, ProgramGraph)
 * - config/      : AnalysisConfig, presets, YAML, method matchers
 * - features/    : Vertical slices (ifds framework → analyzers)
 *
 * Execution:
 * - One tokio worker per analysis unit, coordinated by the unit manager
 * - Summaries memoized across units and replayed to late subscribers
 */

// Crate-level lint configuration
#![allow(clippy::too_many_arguments)] // Flow-function adapters need many params
#![allow(clippy::type_complexity)] // Worklist and summary maps
#![allow(clippy::collapsible_if)] // Readability over brevity
#![allow(clippy::clone_on_copy)] // Explicit clone for clarity
#![allow(clippy::should_implement_trait)] // from_str naming intentional
#![allow(clippy::only_used_in_recursion)] // Dominator search threads the graph through
#![allow(clippy::new_without_default)] // Default impl not always needed
#![allow(clippy::module_inception)] // Module naming intentional
#![allow(clippy::single_match)] // Single match for readability
#![allow(clippy::match_like_matches_macro)] // Match for readability

pub mod config;
pub mod errors;
#[macro_use]
pub mod shared;
pub mod features;

pub use config::{AnalysisConfig, Preset, UnitStrategy};
pub use errors::{IfdsError, Result};
pub use features::ifds::application::AnalysisService;
pub use features::ifds::domain::{AccessPath, DomainFact, Edge, Vertex, VulnerabilityLocation};
pub use features::ifds::ports::{AnalysisKind, AnalysisReport, AnalysisRequest, IfdsAnalysisService};
pub use shared::models::{ApplicationGraph, InstId, MethodId, ProgramBuilder, ProgramGraph, SharedGraph};
