/*
 * IFDS Application Layer
 *
 * Use cases wiring an analyzer family to the unit manager.
 *
 * Architecture:
 * ```
 * +------------------+     +-------------------+     +-------------------+
 * |   Input Port     | --> |    Use Cases      | --> |   Unit Manager    |
 * | (Service Trait)  |     | (run_taint, ...)  |     | (Runners, Units)  |
 * +------------------+     +-------------------+     +-------------------+
 *        ^                         |                         |
 *        |                         v                         v
 *   Adapters               Analyzer factories        ApplicationGraph
 *     (CLI)              (taint, npe, slice...)    (forward / reversed)
 * ```
 *
 * Use Cases:
 * 1. run_taint            - forward source/sink taint
 * 2. run_taint_bidi       - forward taint with backward alias queries
 * 3. run_npe              - possible null dereferences
 * 4. run_crash_slice      - backward slice from a crash stack trace
 * 5. run_unused_variables - assignments never read
 */

pub mod analysis_service;
pub use analysis_service::AnalysisService;
