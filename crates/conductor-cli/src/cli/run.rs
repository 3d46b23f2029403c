//! `conductor run`: execute a plan against the simulated executor.
//!
//! The plan's root node is started under a fresh plan execution id. The
//! command then polls until the root reaches a final status, driving the
//! externally triggered parts of the lifecycle on every tick: intervention
//! deadlines, optional repair actions and optional chain resumes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, ValueEnum};
use conductor_core::advise::{AdviserChain, AdviserRegistry};
use conductor_core::codec::{ParameterCodec, VersionedJsonCodec};
use conductor_core::engine::{EngineParts, OrchestrationEngine};
use conductor_core::plan::compile_plan;
use conductor_core::repository::memory::InMemoryNodeExecutionStore;
use conductor_core::repository::node_execution::NodeExecutionStore;
use conductor_core::step::BoxTaskDispatcher;
use conductor_core::waiter::WaitNotifyEngine;
use conductor_infra::config::resolve_database_url;
use conductor_infra::sqlite::node_execution::SqliteNodeExecutionStore;
use conductor_infra::sqlite::pool::DatabasePool;
use conductor_types::advise::RepairActionCode;
use conductor_types::ambiance::Ambiance;
use conductor_types::config::EngineConfig;
use conductor_types::execution::{ExecutableResponse, NodeExecution, Status};
use console::style;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use super::render::{execution_table, status_mark};
use super::validate::load_plan;
use crate::executor::SimulatedExecutor;
use crate::steps::cli_step_registry;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Args)]
pub struct RunArgs {
    /// Path to the plan YAML file.
    pub file: PathBuf,

    /// Store executions in SQLite (`database_url` from conductor.toml, or
    /// `conductor.db` in the data directory).
    #[arg(long)]
    pub persist: bool,

    /// Delay before the simulated executor answers a task.
    #[arg(long, default_value = "10")]
    pub task_delay_ms: u64,

    /// Resolve every intervention wait with this action.
    #[arg(long, value_enum)]
    pub repair: Option<RepairArg>,

    /// Resume chains that suspended for an external signal.
    #[arg(long)]
    pub resume_chains: bool,

    /// Give up after this many seconds and error out the remaining nodes.
    #[arg(long, default_value = "30")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RepairArg {
    MarkAsSuccess,
    Ignore,
    Retry,
    EndExecution,
}

impl From<RepairArg> for RepairActionCode {
    fn from(arg: RepairArg) -> Self {
        match arg {
            RepairArg::MarkAsSuccess => RepairActionCode::MarkAsSuccess,
            RepairArg::Ignore => RepairActionCode::Ignore,
            RepairArg::Retry => RepairActionCode::Retry,
            RepairArg::EndExecution => RepairActionCode::EndExecution,
        }
    }
}

pub async fn run_plan(
    args: RunArgs,
    config: EngineConfig,
    data_dir: &Path,
    json: bool,
) -> Result<()> {
    match resolve_database_url(&config, args.persist.then_some(data_dir)) {
        Some(url) => {
            tokio::fs::create_dir_all(data_dir)
                .await
                .with_context(|| format!("failed to create {}", data_dir.display()))?;
            let pool = DatabasePool::new(&url)
                .await
                .with_context(|| format!("failed to open database {url}"))?;
            let store = Arc::new(SqliteNodeExecutionStore::new(pool));
            drive(store, &args, config, json).await
        }
        None => drive(Arc::new(InMemoryNodeExecutionStore::new()), &args, config, json).await,
    }
}

async fn drive<S>(store: Arc<S>, args: &RunArgs, config: EngineConfig, json: bool) -> Result<()>
where
    S: NodeExecutionStore + 'static,
{
    let doc = load_plan(&args.file)?;
    let codec: Arc<dyn ParameterCodec> = Arc::new(VersionedJsonCodec);
    let plan = compile_plan(&doc, codec.as_ref()).context("failed to compile plan")?;

    let waiter = Arc::new(WaitNotifyEngine::with_retention(Duration::from_secs(
        config.wait_key_retention_secs,
    )));
    let advisers =
        AdviserRegistry::with_defaults(codec.clone(), config.default_intervention_timeout_secs);
    advisers
        .check_plan(&plan)
        .context("plan uses an adviser this engine does not provide")?;
    let engine = OrchestrationEngine::new(EngineParts {
        store: store.clone(),
        waiter: waiter.clone(),
        plan: Arc::new(plan),
        steps: cli_step_registry(),
        advisers: AdviserChain::new(advisers),
        dispatcher: BoxTaskDispatcher::new(SimulatedExecutor::new(
            waiter.clone(),
            Duration::from_millis(args.task_delay_ms),
        )),
        codec,
        config,
    });

    let mut events = engine.event_bus().subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::info!(
                    node_execution_id = %event.node_execution_id(),
                    event = ?event,
                    "orchestration event"
                ),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event log lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let plan_execution_id = Uuid::now_v7().to_string();
    let ambiance = Ambiance::new(plan_execution_id.clone(), doc.plan_id.clone());
    tracing::info!(plan_execution_id = %plan_execution_id, plan_id = %doc.plan_id, "starting plan execution");

    let root = engine
        .start_node(&ambiance, &doc.root, None)
        .await
        .context("failed to start root node")?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(args.timeout_secs);
    let root_status = loop {
        let current = fetch(store.as_ref(), root).await?;
        if current.status.is_final() {
            break current.status;
        }

        engine
            .expire_due_interventions(&plan_execution_id, chrono::Utc::now())
            .await?;
        let active = store.list_by_plan_execution(&plan_execution_id).await?;
        for ne in &active {
            if let (Some(repair), Status::InterventionWaiting) = (args.repair, ne.status) {
                tracing::info!(node = %ne.identifier, repair = ?repair, "resolving intervention");
                engine.apply_repair_action(ne.uuid, repair.into()).await?;
            } else if args.resume_chains && awaits_chain_resume(ne) {
                tracing::info!(node = %ne.identifier, "resuming suspended chain");
                engine.resume_chain(ne.uuid).await?;
            }
        }

        if tokio::time::Instant::now() >= deadline {
            let errored = engine.error_out_active_nodes(&plan_execution_id).await?;
            tracing::warn!(errored, "plan execution timed out");
            break fetch(store.as_ref(), root).await?.status;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    };

    let executions = store.list_by_plan_execution(&plan_execution_id).await?;
    report(&plan_execution_id, root_status, &executions, json)?;

    if !root_status.is_positive() {
        bail!("plan execution {plan_execution_id} ended {root_status}");
    }
    Ok(())
}

async fn fetch<S: NodeExecutionStore>(store: &S, id: Uuid) -> Result<NodeExecution> {
    store
        .get(id)
        .await?
        .with_context(|| format!("node execution {id} disappeared"))
}

/// Parked by a chain link that suspended for an external resume.
fn awaits_chain_resume(ne: &NodeExecution) -> bool {
    ne.status == Status::AsyncWaiting
        && matches!(
            ne.obtain_latest_executable_response(),
            Some(ExecutableResponse::ChildChain { suspend: true, .. })
        )
}

fn report(
    plan_execution_id: &str,
    root_status: Status,
    executions: &[NodeExecution],
    json: bool,
) -> Result<()> {
    if json {
        let summary = serde_json::json!({
            "plan_execution_id": plan_execution_id,
            "status": root_status,
            "executions": executions,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Plan execution {} ended {}",
        status_mark(root_status),
        style(plan_execution_id).cyan(),
        style(root_status).bold()
    );
    println!();
    println!("{}", execution_table(executions));
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(file: PathBuf) -> RunArgs {
        RunArgs {
            file,
            persist: false,
            task_delay_ms: 1,
            repair: None,
            resume_chains: false,
            timeout_secs: 10,
        }
    }

    fn write_plan(dir: &Path, yaml: &str) -> PathBuf {
        let path = dir.join("plan.yaml");
        std::fs::write(&path, yaml).unwrap();
        path
    }

    #[tokio::test]
    async fn runs_plan_to_success() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_plan(
            dir.path(),
            r#"
plan_id: demo
root: main
nodes:
  - id: main
    type: SECTION_CHAIN
    parameters: { children: [hello, build] }
  - id: hello
    type: ECHO
    parameters: { message: hi }
  - id: build
    type: TASK
    parameters: { output: 42 }
"#,
        );
        run_plan(args(file), EngineConfig::default(), dir.path(), true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn retries_flaky_task() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_plan(
            dir.path(),
            r#"
plan_id: demo
root: main
nodes:
  - id: main
    type: SECTION
    parameters: { child: flaky }
  - id: flaky
    type: TASK
    parameters: { fail_attempts: 2 }
    advisers:
      - type: RETRY
        parameters:
          retry_count: 3
          wait_intervals_secs: []
          applicable_failure_types: [CONNECTIVITY]
"#,
        );
        run_plan(args(file), EngineConfig::default(), dir.path(), true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failing_task_fails_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_plan(
            dir.path(),
            r#"
plan_id: demo
root: main
nodes:
  - id: main
    type: SECTION
    parameters: { child: broken }
  - id: broken
    type: TASK
    parameters: { fail_attempts: 5 }
"#,
        );
        let err = run_plan(args(file), EngineConfig::default(), dir.path(), true)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ended errored"));
    }

    #[tokio::test]
    async fn suspended_chain_is_resumed_on_request() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_plan(
            dir.path(),
            r#"
plan_id: demo
root: main
nodes:
  - id: main
    type: SECTION_CHAIN
    parameters: { children: [first, second], suspend_before: 1 }
  - id: first
    type: ECHO
  - id: second
    type: ECHO
"#,
        );
        let mut run = args(file);
        run.resume_chains = true;
        run_plan(run, EngineConfig::default(), dir.path(), true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unknown_adviser_is_rejected_before_running() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_plan(
            dir.path(),
            r#"
plan_id: demo
root: hello
nodes:
  - id: hello
    type: ECHO
    advisers:
      - type: PAGE_ONCALL
"#,
        );
        let err = run_plan(args(file), EngineConfig::default(), dir.path(), true)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("adviser this engine does not provide"));
    }

    #[tokio::test]
    async fn persisted_run_writes_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_plan(
            dir.path(),
            r#"
plan_id: demo
root: hello
nodes:
  - id: hello
    type: ECHO
"#,
        );
        let config = EngineConfig {
            database_url: Some(format!(
                "sqlite://{}?mode=rwc",
                dir.path().join("run.db").display()
            )),
            ..EngineConfig::default()
        };
        run_plan(args(file), config, dir.path(), true).await.unwrap();
        assert!(dir.path().join("run.db").exists());
    }
}
