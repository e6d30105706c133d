//! IFDS/IDE framework
//!
//! ```text
//! ports (AnalysisRequest / AnalysisReport)
//!   ↓
//! application (AnalysisService)
//!   ↓
//! infrastructure (UnitManager → runners → flow functions)
//!   ↓
//! domain (AccessPath, DomainFact, Vertex, Edge, summaries)
//! ```

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod ports;
