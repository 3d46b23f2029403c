//! Conductor CLI entry point.
//!
//! Binary name: `conductor`
//!
//! Parses arguments, loads `conductor.toml` from the data directory, then
//! dispatches to the command handler.

mod cli;
mod executor;
mod steps;

use std::path::PathBuf;

use clap::Parser;
use conductor_infra::config::load_engine_config;
use conductor_infra::sqlite::pool::default_data_dir;
use conductor_observe::tracing_setup::{
    LogFormat, TracingOptions, init_tracing, shutdown_tracing,
};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_directive = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,conductor_core=debug",
        _ => "trace",
    };
    init_tracing(&TracingOptions {
        format: if cli.log_json {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        },
        enable_otel: cli.otel,
        default_directive: default_directive.to_string(),
    })
    .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(default_data_dir()));
    let config = load_engine_config(&data_dir).await;

    let result = match cli.command {
        Commands::Validate { file } => cli::validate::validate_plan_file(&file, cli.json),
        Commands::Run(args) => cli::run::run_plan(args, config, &data_dir, cli.json).await,
        Commands::Executions { plan_execution_id } => {
            cli::executions::show_executions(&plan_execution_id, &config, &data_dir, cli.json)
                .await
        }
    };

    shutdown_tracing();
    result
}
