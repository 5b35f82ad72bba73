//! Command-line interface for runledger.
//!
//! Provides commands for registering projects, creating and transitioning
//! runs, reading a run's timeline and artifacts, and firing webhook triggers.

use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::core::{Annotation, Ledger};
use crate::dispatch;
use crate::domain::{NewRun, RunStatus};

/// runledger - Replay-safe execution ledger for workflow runs
#[derive(Parser, Debug)]
#[command(name = "runledger")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Database file (overrides config and RUNLEDGER_DATABASE)
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage projects
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },

    /// Manage workflow runs
    Run {
        #[command(subcommand)]
        command: RunCommands,
    },

    /// Show the event timeline of a run
    Events {
        /// Run ID (UUID)
        run_id: String,

        /// Only events attributed to this step
        #[arg(long)]
        step: Option<String>,
    },

    /// Add an annotation to a run's timeline
    Annotate {
        /// Run ID (UUID)
        run_id: String,

        /// Annotation title
        title: String,

        /// Annotation body
        #[arg(short, long, default_value = "")]
        body: String,

        /// Author of the annotation
        #[arg(short, long, env = "USER")]
        user: String,

        /// Phase (defaults to the run's current phase)
        #[arg(long)]
        phase: Option<String>,
    },

    /// Inspect artifacts
    Artifact {
        #[command(subcommand)]
        command: ArtifactCommands,
    },

    /// Fire a configured webhook trigger
    Dispatch {
        /// Trigger name from the config file
        trigger: String,

        /// JSON payload file (reads stdin if not provided)
        #[arg(short, long)]
        payload: Option<PathBuf>,
    },

    /// Show resolved configuration
    Config,
}

#[derive(Subcommand, Debug)]
pub enum ProjectCommands {
    /// Register or update a project
    Add {
        id: String,
        name: String,
        /// Project root directory
        root: PathBuf,
    },

    /// Show a project
    Show { id: String },
}

#[derive(Subcommand, Debug)]
pub enum RunCommands {
    /// Create a pending run
    Create {
        /// Workflow definition ID
        workflow: String,

        /// Owning project ID
        #[arg(short, long)]
        project: String,

        /// Requesting user
        #[arg(short, long, env = "USER")]
        user: String,

        /// Run arguments as JSON
        #[arg(short, long)]
        args: Option<String>,
    },

    /// Show a run and its steps
    Status { run_id: String },

    /// List recent runs
    List {
        /// Only runs of this project
        #[arg(short, long)]
        project: Option<String>,

        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Move a run to a new status
    Transition {
        run_id: String,

        /// pending, running, paused, completed, failed or cancelled
        status: RunStatus,

        /// Enter this phase
        #[arg(long)]
        phase: Option<String>,
    },

    /// Delete a run and everything recorded for it
    Delete { run_id: String },
}

#[derive(Subcommand, Debug)]
pub enum ArtifactCommands {
    /// Resolve an artifact to its absolute path
    Resolve { artifact_id: String },

    /// List a run's artifacts
    List {
        run_id: String,

        #[arg(long)]
        phase: Option<String>,
    },
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let mut config = LedgerConfig::load()?;
        if let Some(database) = self.database {
            config = config.with_database(database);
        }

        if let Commands::Config = self.command {
            show_config(&config);
            return Ok(());
        }

        let ledger = Ledger::open(&config)
            .await
            .with_context(|| {
                format!("Failed to open ledger at {}", config.database_path.display())
            })?;

        match self.command {
            Commands::Project { command } => execute_project(&ledger, command).await,
            Commands::Run { command } => execute_run(&ledger, command).await,
            Commands::Events { run_id, step } => {
                show_events(&ledger, &run_id, step.as_deref()).await
            }
            Commands::Annotate {
                run_id,
                title,
                body,
                user,
                phase,
            } => {
                let run_id = parse_id(&run_id, "run")?;
                let event = ledger
                    .annotate(
                        run_id,
                        Annotation {
                            user_id: user,
                            title,
                            body,
                            phase,
                            step_id: None,
                        },
                    )
                    .await?;
                println!("{}", event.id);
                Ok(())
            }
            Commands::Artifact { command } => execute_artifact(&ledger, command).await,
            Commands::Dispatch { trigger, payload } => {
                dispatch_trigger(&ledger, &config, &trigger, payload).await
            }
            Commands::Config => Ok(()),
        }
    }
}

async fn execute_project(ledger: &Ledger, command: ProjectCommands) -> Result<()> {
    match command {
        ProjectCommands::Add { id, name, root } => {
            let root = if root.is_absolute() {
                root
            } else {
                std::env::current_dir()
                    .context("Failed to determine current directory")?
                    .join(root)
            };
            let project = ledger.register_project(&id, &name, &root).await?;
            println!("Project {} -> {}", project.id, project.root_path.display());
        }
        ProjectCommands::Show { id } => {
            let project = ledger.get_project(&id).await?;
            println!("Project ID: {}", project.id);
            println!("Name: {}", project.name);
            println!("Root: {}", project.root_path.display());
            println!("Created: {}", project.created_at);
        }
    }
    Ok(())
}

async fn execute_run(ledger: &Ledger, command: RunCommands) -> Result<()> {
    match command {
        RunCommands::Create {
            workflow,
            project,
            user,
            args,
        } => {
            let args: Value = match args {
                Some(raw) => {
                    serde_json::from_str(&raw).context("Run arguments must be valid JSON")?
                }
                None => Value::Null,
            };
            let run = ledger
                .create_run(NewRun::new(workflow, project, user).with_args(args))
                .await?;
            println!("{}", run.id);
        }
        RunCommands::Status { run_id } => {
            let run_id = parse_id(&run_id, "run")?;
            let run = ledger.get_run(run_id).await?;
            let steps = ledger.list_steps(run_id).await?;

            println!("Run ID: {}", run.id);
            println!("Workflow: {}", run.workflow_definition_id);
            println!("Project: {}", run.project_id);
            println!("Status: {}", run.status);
            println!("Phase: {}", run.current_phase.as_deref().unwrap_or("-"));
            println!("Created: {}", run.created_at);
            println!("Updated: {}", run.updated_at);
            println!("\nSteps:");
            if steps.is_empty() {
                println!("  (none)");
            }
            for step in steps {
                println!("  {:<30} {:<10} {}", step.external_step_key, step.status, step.name);
            }
        }
        RunCommands::List { project, limit } => {
            let runs = ledger.list_runs(project.as_deref(), limit).await?;
            if runs.is_empty() {
                println!("No runs found");
                return Ok(());
            }

            println!("{:<38} {:<20} {:<12} {:<15}", "RUN ID", "WORKFLOW", "STATUS", "PHASE");
            println!("{}", "-".repeat(88));
            for run in runs {
                println!(
                    "{:<38} {:<20} {:<12} {:<15}",
                    run.id,
                    run.workflow_definition_id,
                    run.status,
                    run.current_phase.as_deref().unwrap_or("-")
                );
            }
        }
        RunCommands::Transition {
            run_id,
            status,
            phase,
        } => {
            let run_id = parse_id(&run_id, "run")?;
            let run = ledger.transition_run(run_id, status, phase.as_deref()).await?;
            println!("Run {} is now {}", run.id, run.status);
        }
        RunCommands::Delete { run_id } => {
            let run_id = parse_id(&run_id, "run")?;
            ledger.delete_run(run_id).await?;
            println!("Deleted run {}", run_id);
        }
    }
    Ok(())
}

async fn show_events(ledger: &Ledger, run_id: &str, step: Option<&str>) -> Result<()> {
    let run_id = parse_id(run_id, "run")?;
    let step_id = step.map(|s| parse_id(s, "step")).transpose()?;
    let events = ledger.list_events(run_id, step_id).await?;

    if events.is_empty() {
        println!("No events recorded");
        return Ok(());
    }

    for event in events {
        println!(
            "{}  {:<22} {:<12} {}",
            event.created_at.format("%Y-%m-%d %H:%M:%S%.3f"),
            event.event_type(),
            event.phase.as_deref().unwrap_or("-"),
            event.title()
        );
    }
    Ok(())
}

async fn execute_artifact(ledger: &Ledger, command: ArtifactCommands) -> Result<()> {
    match command {
        ArtifactCommands::Resolve { artifact_id } => {
            let artifact_id = parse_id(&artifact_id, "artifact")?;
            let resolved = ledger.resolve_for_download(artifact_id).await?;
            println!("{}", resolved.absolute_path.display());
        }
        ArtifactCommands::List { run_id, phase } => {
            let run_id = parse_id(&run_id, "run")?;
            let artifacts = ledger.list_artifacts(run_id, phase.as_deref()).await?;
            if artifacts.is_empty() {
                println!("No artifacts found");
                return Ok(());
            }

            println!("{:<38} {:<24} {:<6} {:>10} PATH", "ARTIFACT ID", "NAME", "TYPE", "BYTES");
            for artifact in artifacts {
                println!(
                    "{:<38} {:<24} {:<6} {:>10} {}",
                    artifact.id,
                    artifact.name,
                    artifact.file_type,
                    artifact.size_bytes,
                    artifact.file_path
                );
            }
        }
    }
    Ok(())
}

async fn dispatch_trigger(
    ledger: &Ledger,
    config: &LedgerConfig,
    name: &str,
    payload_file: Option<PathBuf>,
) -> Result<()> {
    let trigger = config
        .trigger(name)
        .with_context(|| format!("No trigger named '{}' in config", name))?;

    let raw = if let Some(path) = payload_file {
        std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read payload file: {}", path.display()))?
    } else {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read payload from stdin")?;
        buffer
    };
    let payload: Value = serde_json::from_str(&raw).context("Payload must be valid JSON")?;

    let run = dispatch::dispatch(ledger, trigger, &payload).await?;
    println!("{}", run.id);
    Ok(())
}

fn show_config(config: &LedgerConfig) {
    let config_file = config
        .config_file
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(none - using defaults)".to_string());

    println!("Config file: {}", config_file);
    println!();
    println!("Paths:");
    println!("  Home:     {}", config.home.display());
    println!("  Database: {}", config.database_path.display());
    println!();
    println!("Ledger:");
    println!("  Busy timeout:       {}ms", config.busy_timeout.as_millis());
    println!("  Broadcast capacity: {}", config.broadcast_capacity);
    println!();
    println!("Artifacts:");
    println!("  Max size: {} bytes", config.artifact_policy.max_size_bytes);
    println!("  Denylist: {}", config.artifact_policy.denylist_patterns.join(", "));
    println!();
    println!("Triggers:");
    if config.triggers.is_empty() {
        println!("  (none)");
    }
    for trigger in &config.triggers {
        println!(
            "  {} -> {} (project {})",
            trigger.name, trigger.workflow_definition_id, trigger.project_id
        );
    }
}

fn parse_id(raw: &str, kind: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("Invalid {} ID: {}", kind, raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_transition() {
        let cli = Cli::parse_from([
            "runledger",
            "run",
            "transition",
            "00000000-0000-0000-0000-000000000000",
            "running",
            "--phase",
            "build",
        ]);

        match cli.command {
            Commands::Run {
                command: RunCommands::Transition { status, phase, .. },
            } => {
                assert_eq!(status, RunStatus::Running);
                assert_eq!(phase.as_deref(), Some("build"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_rejects_unknown_status() {
        let result = Cli::try_parse_from(["runledger", "run", "transition", "x", "exploded"]);
        assert!(result.is_err());
    }
}
