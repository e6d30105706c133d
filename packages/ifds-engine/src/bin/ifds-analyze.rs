//! IFDS Analysis CLI
//!
//! Runs one analyzer over a program description and prints the report as JSON.
//!
//! # Usage
//!
//! ```bash
//! # Taint with rules from YAML
//! cargo run --bin ifds-analyze -- taint --program app.json --config rules.yaml
//!
//! # Forward taint with backward alias queries
//! cargo run --bin ifds-analyze -- taint --program app.json --config rules.yaml --bidi
//!
//! # Null dereferences, fast preset, only from App#main
//! cargo run --bin ifds-analyze -- npe --program app.json --preset fast --entry 'App#main'
//!
//! # Crash slice, crash point last
//! cargo run --bin ifds-analyze -- slice --program app.json --sink 'App#main:7' --sink 'Util#parse:3'
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use ifds_engine::config::{AnalysisConfig, Preset};
use ifds_engine::{
    AnalysisKind, AnalysisRequest, AnalysisService, IfdsAnalysisService, IfdsError, InstId,
    MethodId, ProgramGraph, SharedGraph,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ifds-analyze")]
#[command(about = "IFDS dataflow analyses over a JSON program description", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CommonArgs {
    /// Program description (JSON)
    #[arg(short, long)]
    program: PathBuf,

    /// Analysis config (YAML); takes precedence over --preset
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Preset: fast, balanced, thorough
    #[arg(long)]
    preset: Option<String>,

    /// Start method, `Class#name` or numeric id; repeatable. Defaults to every method with a body
    #[arg(short, long = "entry")]
    entries: Vec<String>,

    /// Debug-level logging (overridden by RUST_LOG)
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Source-to-sink taint
    Taint {
        #[command(flatten)]
        common: CommonArgs,

        /// Pair forward taint with the backward alias analyzer
        #[arg(long)]
        bidi: bool,
    },

    /// Possible null dereferences
    Npe {
        #[command(flatten)]
        common: CommonArgs,
    },

    /// Assignments whose value is never read
    Unused {
        #[command(flatten)]
        common: CommonArgs,
    },

    /// Backward slice from a crash stack trace
    Slice {
        #[command(flatten)]
        common: CommonArgs,

        /// Stack frame `method:index`, outermost first so the crash point comes last; repeatable
        #[arg(short, long = "sink", required = true)]
        sinks: Vec<String>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let (common, kind, sinks) = match cli.command {
        Commands::Taint { common, bidi } => {
            let kind = if bidi {
                AnalysisKind::TaintBidi
            } else {
                AnalysisKind::Taint
            };
            (common, kind, Vec::new())
        }
        Commands::Npe { common } => (common, AnalysisKind::Npe, Vec::new()),
        Commands::Unused { common } => (common, AnalysisKind::UnusedVariable, Vec::new()),
        Commands::Slice { common, sinks } => (common, AnalysisKind::CrashSlice, sinks),
    };

    init_tracing(common.verbose);

    let program = load_program(&common.program)?;
    let entry_points = common
        .entries
        .iter()
        .map(|e| parse_method(&program, e))
        .collect::<Result<Vec<_>, _>>()?;
    let sinks = sinks
        .iter()
        .map(|s| parse_sink(&program, s))
        .collect::<Result<Vec<_>, _>>()?;

    let config = load_config(common.config.as_deref(), common.preset.as_deref())?;
    let graph: SharedGraph = Arc::new(program);
    let service = AnalysisService::new(graph, config)?;

    let request = AnalysisRequest::new(kind)
        .with_entry_points(entry_points)
        .with_sinks(sinks);
    let report = service.analyze(&request)?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_program(path: &Path) -> Result<ProgramGraph, IfdsError> {
    let json = std::fs::read_to_string(path)?;
    ProgramGraph::from_json_str(&json)
}

fn load_config(path: Option<&Path>, preset: Option<&str>) -> Result<AnalysisConfig, IfdsError> {
    let config = match (path, preset) {
        (Some(path), _) => AnalysisConfig::from_yaml_file(path)?,
        (None, Some(preset)) => AnalysisConfig::from_preset(Preset::from_str(preset)?),
        (None, None) => AnalysisConfig::default(),
    };
    Ok(config)
}

/// `Class#name` or a numeric method id
fn parse_method(program: &ProgramGraph, text: &str) -> Result<MethodId, IfdsError> {
    if let Ok(id) = text.parse::<u32>() {
        return Ok(MethodId(id));
    }
    program
        .find_method(text)
        .ok_or_else(|| IfdsError::invalid_program(format!("no method named '{}'", text)))
}

/// `method:index`, split at the last colon
fn parse_sink(program: &ProgramGraph, text: &str) -> Result<InstId, IfdsError> {
    let (method, index) = text
        .rsplit_once(':')
        .ok_or_else(|| IfdsError::invalid_program(format!("sink '{}' is not method:index", text)))?;
    let index = index
        .parse::<u32>()
        .map_err(|_| IfdsError::invalid_program(format!("bad instruction index in '{}'", text)))?;
    Ok(InstId::new(parse_method(program, method)?, index))
}
