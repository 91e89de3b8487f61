//! Migration engine seam and the health gate in front of it.
//!
//! The engine that turns a snapshot directory into content records is an
//! external system. The import core only needs three capabilities from it
//! (status, run, rollback), captured by [`MigrationEngine`].

use crate::config::ImportConfig;
use crate::{ImportError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// State of a single migration task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationTaskStatus {
    Idle,
    Running,
    Stuck,
}

/// Status row for one migration task in a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationTask {
    pub id: String,
    pub status: MigrationTaskStatus,
}

/// Options passed through to a migration run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportOptions {
    /// Delete destination records that no longer exist in the source.
    pub sync: bool,
}

/// Capabilities consumed from the migration engine.
#[async_trait]
pub trait MigrationEngine: Send + Sync {
    /// Status of every task in `group`.
    async fn status(&self, group: &str) -> Result<Vec<MigrationTask>>;

    /// Import the snapshot in `directory` through every task of `group`.
    async fn run(&self, group: &str, directory: &Path, options: ImportOptions) -> Result<()>;

    /// Roll back every task of `group`.
    async fn rollback(&self, group: &str) -> Result<()>;
}

/// Read-only precondition check before an import starts.
#[derive(Clone)]
pub struct MigrationGate {
    engine: Arc<dyn MigrationEngine>,
    group: String,
}

impl MigrationGate {
    pub fn new(engine: Arc<dyn MigrationEngine>, group: impl Into<String>) -> Self {
        Self {
            engine,
            group: group.into(),
        }
    }

    /// `true` iff no task of the group is running or stuck.
    ///
    /// A failed status query counts as unhealthy.
    pub async fn check_migrations_status(&self) -> bool {
        let tasks = match self.engine.status(&self.group).await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(
                    "Unable to read status of migration group {}: {}",
                    self.group, e
                );
                return false;
            }
        };

        let busy: Vec<&MigrationTask> = tasks
            .iter()
            .filter(|task| task.status != MigrationTaskStatus::Idle)
            .collect();

        for task in &busy {
            info!("Migration {} is {:?}", task.id, task.status);
        }
        busy.is_empty()
    }
}

/// Migration engine driven through an external command line tool.
///
/// Defaults match Drush with migrate_tools:
/// `migrate:status --group=G --format=json`, `migrate:import --group=G --update [--sync]`
/// and `migrate:rollback --group=G`. The snapshot directory of a run is passed
/// in the `TRACTION_REC_JSON_DIR` environment variable.
pub struct CommandMigrationEngine {
    program: PathBuf,
    base_args: Vec<String>,
}

impl CommandMigrationEngine {
    pub fn new(program: impl Into<PathBuf>, base_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            base_args,
        }
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args).args(args).kill_on_drop(true);
        cmd
    }

    fn describe(&self, args: &[String]) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.base_args.iter().cloned());
        parts.extend(args.iter().cloned());
        parts.join(" ")
    }

    async fn output(&self, mut cmd: Command, args: &[String]) -> Result<String> {
        let description = self.describe(args);
        debug!("Running {}", description);

        let output = cmd.output().await.map_err(|e| ImportError::MigrationFailed {
            command: description.clone(),
            message: e.to_string(),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ImportError::MigrationFailed {
                command: description,
                message: format!("{}: {}", output.status, stderr.trim()),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl MigrationEngine for CommandMigrationEngine {
    async fn status(&self, group: &str) -> Result<Vec<MigrationTask>> {
        let args = vec![
            "migrate:status".to_string(),
            format!("--group={group}"),
            "--format=json".to_string(),
        ];
        let stdout = self.output(self.command(&args), &args).await?;
        parse_status_output(&stdout)
    }

    async fn run(&self, group: &str, directory: &Path, options: ImportOptions) -> Result<()> {
        let mut args = vec![
            "migrate:import".to_string(),
            format!("--group={group}"),
            "--update".to_string(),
        ];
        if options.sync {
            args.push("--sync".to_string());
        }

        let mut cmd = self.command(&args);
        cmd.env(ImportConfig::JSON_DIR_ENV, directory);
        self.output(cmd, &args).await?;
        Ok(())
    }

    async fn rollback(&self, group: &str) -> Result<()> {
        let args = vec!["migrate:rollback".to_string(), format!("--group={group}")];
        self.output(self.command(&args), &args).await?;
        Ok(())
    }
}

#[derive(Deserialize)]
struct StatusRow {
    id: String,
    status: String,
}

/// Map `migrate:status --format=json` rows onto task states.
fn parse_status_output(stdout: &str) -> Result<Vec<MigrationTask>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    // Drush emits either an array of rows or an object keyed by migration id.
    let value: serde_json::Value = serde_json::from_str(trimmed)?;
    let rows: Vec<StatusRow> = match value {
        serde_json::Value::Object(map) => map
            .into_values()
            .map(serde_json::from_value)
            .collect::<std::result::Result<_, _>>()?,
        other => serde_json::from_value(other)?,
    };

    rows.into_iter()
        .map(|row| {
            let status = match row.status.trim().to_ascii_lowercase().as_str() {
                "idle" | "disabled" => MigrationTaskStatus::Idle,
                "importing" | "rolling back" => MigrationTaskStatus::Running,
                "stopping" => MigrationTaskStatus::Stuck,
                _ => {
                    return Err(ImportError::UnknownMigrationStatus {
                        task: row.id,
                        status: row.status,
                    })
                }
            };
            Ok(MigrationTask { id: row.id, status })
        })
        .collect()
}
