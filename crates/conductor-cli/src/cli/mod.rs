//! CLI command definitions for the `conductor` binary.

pub mod executions;
pub mod render;
pub mod run;
pub mod validate;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use run::RunArgs;

/// Run and inspect orchestration plans.
#[derive(Parser)]
#[command(name = "conductor", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed logs (-v for engine debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Export spans to stdout through OpenTelemetry.
    #[arg(long, global = true)]
    pub otel: bool,

    /// Directory holding `conductor.toml` and the default database.
    #[arg(long, global = true, env = "CONDUCTOR_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Parse and validate a plan file.
    Validate {
        /// Path to the plan YAML file.
        file: PathBuf,
    },

    /// Run a plan against a simulated task executor.
    Run(RunArgs),

    /// List the node executions of a persisted plan execution.
    #[command(alias = "ls")]
    Executions {
        /// Plan execution id printed by `conductor run --persist`.
        plan_execution_id: String,
    },
}
