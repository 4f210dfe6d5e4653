// Strand agent task runtime
// Main entry point for the strand binary

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use sdk::Role;
use strand_engine::capability::builtin::builtin_registry;
use strand_engine::cli::{Cli, Command, ConfigAction};
use strand_engine::config::Config;
use strand_engine::llm::openai::OpenAiCompatProvider;
use strand_engine::store::MemoryStore;
use strand_engine::telemetry::{init_telemetry, init_telemetry_with_level};
use strand_engine::workflow::orchestrator::Orchestrator;
use strand_engine::workflow::{TodoStatus, WorkflowStatus};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_telemetry();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load_or_default()?,
    };
    if let Some(level) = &cli.log {
        init_telemetry_with_level(level);
    }

    match cli.command {
        Command::Config { action } => match action {
            ConfigAction::Show => {
                println!("{}", toml::to_string_pretty(&config)?);
                Ok(())
            }
            ConfigAction::Path => {
                println!("{}", Config::default_path().display());
                Ok(())
            }
        },
        Command::Run {
            goal,
            user,
            artifacts,
        } => run_goal(config, goal, user, artifacts).await,
    }
}

async fn run_goal(
    config: Config,
    goal: String,
    user: String,
    artifacts: Option<PathBuf>,
) -> anyhow::Result<()> {
    let provider = Arc::new(OpenAiCompatProvider::new(config.llm.clone()));
    let capabilities = Arc::new(builtin_registry());

    let mut orchestrator = Orchestrator::new(config, provider, capabilities, Role::Owner)
        .with_store(Arc::new(MemoryStore::new()));
    if let Some(dir) = artifacts {
        orchestrator = orchestrator.with_artifact_dir(dir);
    }
    let orchestrator = Arc::new(orchestrator);

    let id = Arc::clone(&orchestrator).start(user, goal).await?;
    let handle = orchestrator
        .registry()
        .get(&id)
        .await
        .context("Workflow vanished after creation")?;

    // The loop runs as its own task; wait for it to settle
    loop {
        tokio::time::sleep(Duration::from_millis(250)).await;
        let wf = handle.lock().await;
        if wf.status == WorkflowStatus::Running {
            continue;
        }

        println!(
            "Workflow {} — {:?} after {} iteration(s)",
            wf.id, wf.status, wf.iteration
        );
        for todo in &wf.todos {
            let mark = match todo.status {
                TodoStatus::Completed => "✓",
                TodoStatus::Failed => "✗",
                TodoStatus::InProgress => "…",
                TodoStatus::Pending => "·",
            };
            println!("  {} {}", mark, todo.content);
        }
        if let Some(answer) = wf.context.get("last_response").and_then(|v| v.as_str()) {
            println!("\n{}", answer);
        }
        if let Some(error) = &wf.error {
            println!("\nError: {}", error);
        }
        break;
    }
    Ok(())
}
