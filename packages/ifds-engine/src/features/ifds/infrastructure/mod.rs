//! IFDS infrastructure: flow-function protocol, runners, manager

pub mod analyzer;
pub mod backward_functions;
pub mod bidi_runner;
pub mod flow_functions;
pub mod forward_functions;
pub mod manager;
pub mod runner;
pub mod summary_storage;
pub mod trace_graph;
pub mod unit_resolver;

pub use analyzer::{Analyzer, AnalyzerEvent, AnalyzerFactory, IfdsResult, SharedAnalyzerFactory};
pub use backward_functions::{BackwardFunctions, BackwardTransmit};
pub use bidi_runner::{BidiRunner, BidiUnitRunnerFactory};
pub use flow_functions::{call_expr_of, default_facts, normal_fact_flow, Facts, FlowFunctionsSpace};
pub use forward_functions::{ForwardFunctions, ForwardTransmit};
pub use manager::{ManagerOutcome, UnitEvent, UnitManager, UnitMessage};
pub use runner::{BaseUnitRunnerFactory, IfdsRunner, IfdsUnit, RunnerOutput, UnitRunnerFactory, UnitStatistics};
pub use summary_storage::{Subscription, SummaryStorage};
pub use unit_resolver::{UnitId, UnitResolver};
