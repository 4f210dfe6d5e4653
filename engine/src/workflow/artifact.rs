//! Debug artifact emission
//!
//! On workflow termination a structured record of the whole run (goal,
//! status, todos, notes, history, and every prompt/reply pair from both
//! the decision phase and the loop) is written to a durable sink for
//! offline audit.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use super::Workflow;

/// The audit record written on termination
#[derive(Serialize)]
pub struct DebugArtifact<'a> {
    pub emitted_at: DateTime<Utc>,
    pub workflow: &'a Workflow,
}

/// Write the artifact as pretty-printed JSON under `dir`, one file per
/// workflow. Returns the path written.
pub fn emit(workflow: &Workflow, dir: &Path) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create artifact directory {}", dir.display()))?;

    let artifact = DebugArtifact {
        emitted_at: Utc::now(),
        workflow,
    };
    let path = dir.join(format!("workflow-{}.json", workflow.id));
    let body = serde_json::to_string_pretty(&artifact).context("Failed to serialize artifact")?;
    fs::write(&path, body)
        .with_context(|| format!("Failed to write artifact {}", path.display()))?;

    info!("Wrote debug artifact {}", path.display());
    Ok(path)
}
