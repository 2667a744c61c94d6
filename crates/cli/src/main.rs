//! `jobmon` CLI entry-point.
//!
//! Two kinds of sub-command:
//! - Operational (`serve`, `migrate`, `validate-dag`) run in-process against
//!   the database directly.
//! - Reference client commands (`workflow-status`, `workflow-tasks`,
//!   `task-status`, `workflow-resume`, `workflow-reset`, `update-task-status`,
//!   `concurrency-limit`, `get-filepaths`) are thin wrappers over the core's
//!   own HTTP API, useful for scripting and smoke-testing a running server.

mod client;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::info;

use client::{ClientError, JobmonClient};

#[derive(Parser)]
#[command(name = "jobmon", about = "Jobmon workflow-orchestration core", version)]
struct Cli {
    /// Base URL of a running jobmon API server. Only consulted by the
    /// reference client commands below.
    #[arg(long, env = "JOBMON_BASE_URL", default_value = "http://localhost:8080", global = true)]
    base_url: String,

    /// Username sent as the trusted `X-Jobmon-User` header.
    #[arg(long, env = "JOBMON_USER", default_value = "jobmon", global = true)]
    user: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the REST API server.
    Serve {
        #[arg(long, env = "JOBMON_BIND", default_value = "0.0.0.0:8080")]
        bind: String,
    },
    /// Run pending database migrations.
    Migrate {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
    /// Validate a materialized DAG (nodes + edges) JSON file without
    /// contacting a server — the same check `bind_workflow` runs server-side.
    ValidateDag {
        /// Path to a JSON file shaped `{"nodes": [...], "edges": [{"from": "...", "to": "..."}]}`.
        path: std::path::PathBuf,
    },
    /// Print a Workflow's current roll-up status.
    WorkflowStatus { workflow_id: i64 },
    /// List every Task belonging to a Workflow.
    WorkflowTasks { workflow_id: i64 },
    /// Print one Task's current row.
    TaskStatus { task_id: i64 },
    /// Open a new WorkflowRun against an already-bound Workflow.
    WorkflowResume {
        workflow_id: i64,
        /// `hot` keeps in-flight work running; `cold` kills unrecoverable
        /// in-flight TaskInstances before resuming.
        #[arg(long, default_value = "hot")]
        mode: String,
        #[arg(long, default_value = "0.0.0")]
        jobmon_version: String,
    },
    /// Force every non-Done Task of a Workflow back to Registering. Requires
    /// that the Workflow currently have no open WorkflowRun.
    WorkflowReset { workflow_id: i64 },
    /// Administrative status override for one Task (bypasses the cascade).
    UpdateTaskStatus {
        task_id: i64,
        /// Single-character Task status code, e.g. `G`, `Q`, `D`, `F`.
        status: char,
    },
    /// Get, or with `--set`, update a Workflow's `max_concurrently_running` cap.
    ConcurrencyLimit {
        workflow_id: i64,
        #[arg(long)]
        set: Option<i32>,
    },
    /// Print stdout/stderr paths for every TaskInstance attempt of a Task.
    GetFilepaths { task_id: i64 },
}

/// Exit codes per the documented CLI contract: 0 success, 1 transient
/// error, 2 usage error. `clap` itself already exits 2 on a malformed
/// invocation before `main` runs.
enum CommandError {
    Transient(String),
    Usage(String),
}

impl From<ClientError> for CommandError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Transient(msg) => Self::Transient(msg),
            ClientError::Rejected(msg) => Self::Transient(msg),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let result = run(cli).await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(CommandError::Transient(message)) => {
            eprintln!("error: {message}");
            ExitCode::from(1)
        }
        Err(CommandError::Usage(message)) => {
            eprintln!("error: {message}");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<(), CommandError> {
    match cli.command {
        Command::Serve { bind } => run_serve(bind).await,
        Command::Migrate { database_url } => run_migrate(database_url).await,
        Command::ValidateDag { path } => run_validate_dag(path),
        other => run_client_command(&cli.base_url, &cli.user, other).await,
    }
}

async fn run_serve(bind: String) -> Result<(), CommandError> {
    info!("Starting API server on {bind}");

    let mut config = api::ServerConfig::load()
        .map_err(|e| CommandError::Usage(format!("invalid configuration: {e}")))?;
    config.bind = bind;

    let pool = db::pool::create_pool(&config.database_url, 10)
        .await
        .map_err(|e| CommandError::Transient(format!("failed to connect to database: {e}")))?;

    api::serve(pool, config)
        .await
        .map_err(|e| CommandError::Transient(format!("server error: {e}")))
}

async fn run_migrate(database_url: String) -> Result<(), CommandError> {
    info!("Running migrations against {database_url}");

    let pool = db::pool::create_pool(&database_url, 2)
        .await
        .map_err(|e| CommandError::Transient(format!("failed to connect to database: {e}")))?;
    db::pool::run_migrations(&pool)
        .await
        .map_err(|e| CommandError::Transient(format!("migration failed: {e}")))?;

    info!("Migrations applied successfully");
    Ok(())
}

fn run_validate_dag(path: std::path::PathBuf) -> Result<(), CommandError> {
    let content = std::fs::read_to_string(&path)
        .map_err(|e| CommandError::Usage(format!("cannot read {}: {e}", path.display())))?;

    let dag: engine::DagDefinition =
        serde_json::from_str(&content).map_err(|e| CommandError::Usage(format!("invalid JSON: {e}")))?;

    match engine::validate_dag(&dag) {
        Ok(order) => {
            println!("valid, bind order: {order:?}");
            Ok(())
        }
        Err(e) => Err(CommandError::Usage(e.to_string())),
    }
}

async fn run_client_command(base_url: &str, user: &str, command: Command) -> Result<(), CommandError> {
    let client = JobmonClient::new(base_url, user);

    match command {
        Command::WorkflowStatus { workflow_id } => {
            let status: String = client.get(&format!("/workflow/{workflow_id}/status")).await?;
            println!("{status}");
        }
        Command::WorkflowTasks { workflow_id } => {
            let tasks: Value = client.get(&format!("/workflow/{workflow_id}/tasks")).await?;
            print_json(&tasks);
        }
        Command::TaskStatus { task_id } => {
            let task: Value = client.get(&format!("/task/{task_id}")).await?;
            print_json(&task);
        }
        Command::WorkflowResume { workflow_id, mode, jobmon_version } => {
            let mode = match mode.to_ascii_lowercase().as_str() {
                "hot" => "hot",
                "cold" => "cold",
                other => {
                    return Err(CommandError::Usage(format!(
                        "unknown resume mode '{other}' (expected 'hot' or 'cold')"
                    )))
                }
            };
            let body = json!({ "jobmon_version": jobmon_version, "mode": mode });
            let run: Value = client.post(&format!("/workflow/{workflow_id}/set_resume"), &body).await?;
            print_json(&run);
        }
        Command::WorkflowReset { workflow_id } => {
            let tasks: Value = client.post(&format!("/workflow/{workflow_id}/reset"), &json!({})).await?;
            print_json(&tasks);
        }
        Command::UpdateTaskStatus { task_id, status } => {
            let body = json!({ "status": status.to_string() });
            let task: Value = client.put(&format!("/task/{task_id}/status"), &body).await?;
            print_json(&task);
        }
        Command::ConcurrencyLimit { workflow_id, set } => match set {
            Some(value) => {
                let body = json!({ "max_concurrently_running": value });
                let updated: i32 =
                    client.put(&format!("/workflow/{workflow_id}/max_concurrently_running"), &body).await?;
                println!("{updated}");
            }
            None => {
                let current: i32 = client.get(&format!("/workflow/{workflow_id}/max_concurrently_running")).await?;
                println!("{current}");
            }
        },
        Command::GetFilepaths { task_id } => {
            let paths: Value = client.get(&format!("/task/{task_id}/filepaths")).await?;
            print_json(&paths);
        }
        Command::Serve { .. } | Command::Migrate { .. } | Command::ValidateDag { .. } => {
            unreachable!("handled in run() before dispatch")
        }
    }

    Ok(())
}

fn print_json(value: &Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()));
}
