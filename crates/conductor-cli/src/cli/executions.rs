//! `conductor executions`: inspect a persisted plan execution.

use std::path::Path;

use anyhow::{Context, Result, bail};
use conductor_core::repository::node_execution::NodeExecutionStore;
use conductor_infra::config::resolve_database_url;
use conductor_infra::sqlite::node_execution::SqliteNodeExecutionStore;
use conductor_infra::sqlite::pool::DatabasePool;
use conductor_types::config::EngineConfig;
use console::style;

use super::render::execution_table;

pub async fn show_executions(
    plan_execution_id: &str,
    config: &EngineConfig,
    data_dir: &Path,
    json: bool,
) -> Result<()> {
    if config.database_url.is_none() && !data_dir.exists() {
        bail!("no data directory at {}; run a plan with --persist first", data_dir.display());
    }
    let Some(url) = resolve_database_url(config, Some(data_dir)) else {
        bail!("no database configured");
    };
    let pool = DatabasePool::new(&url)
        .await
        .with_context(|| format!("failed to open database {url}"))?;
    let store = SqliteNodeExecutionStore::new(pool);

    let executions = store.list_by_plan_execution(plan_execution_id).await?;
    if executions.is_empty() {
        bail!("no node executions recorded for plan execution '{plan_execution_id}'");
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&executions)?);
        return Ok(());
    }

    println!();
    println!(
        "  Plan execution {} ({} node executions)",
        style(plan_execution_id).cyan(),
        executions.len()
    );
    println!();
    println!("{}", execution_table(&executions));
    println!();
    Ok(())
}
