//! Workflow state machine
//!
//! A workflow is one run of a user goal, decomposed into todos and
//! driven by the orchestrator loop. The workflow value is owned
//! exclusively by the orchestrator while running; `history`,
//! `decision_steps`, and `debug_steps` are append-only audit logs and
//! are never mutated after append.

pub mod artifact;
pub mod orchestrator;
pub mod registry;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a workflow run.
///
/// `Running` transitions to `Completed`, `Failed`, or `Paused`.
/// `Paused` is resumable only by creating a fresh run for the same
/// goal; the other two are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Running,
    Completed,
    Failed,
    Paused,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Status of one decomposed step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// A free-text annotation produced during execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub content: String,

    /// Todo the note was produced while processing
    pub source_todo: String,

    /// Durable notes survive into the debug artifact's summary;
    /// temporary ones only feed subsequent prompts.
    pub durable: bool,

    pub time: DateTime<Utc>,
}

/// One audit-trail entry per loop iteration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub todo_id: String,
    pub iteration: u32,
    pub model_reply: String,
    pub completion_rate: f64,
    pub note: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Raw prompt/reply pair from one model call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub label: String,
    pub prompt: String,
    pub reply: String,
    pub timestamp: DateTime<Utc>,
}

impl StepRecord {
    pub fn new(label: impl Into<String>, prompt: impl Into<String>, reply: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            prompt: prompt.into(),
            reply: reply.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Outcome of the last directive-execution pass for a todo
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TodoResult {
    /// Whether any directive was executed at all
    pub executed: bool,

    /// Capability names that ran, in execution order
    pub functions: Vec<String>,

    /// Whether every executed directive succeeded
    pub success: bool,

    pub error: Option<String>,

    /// Snapshot of the shared context after the pass
    pub context: HashMap<String, serde_json::Value>,
}

/// One decomposed step of a goal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Todo {
    pub id: String,
    pub content: String,
    pub status: TodoStatus,
    pub result: Option<TodoResult>,
    pub error: Option<String>,

    /// Snapshot of the notes relevant at last processing
    pub notes: Vec<String>,
}

impl Todo {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            status: TodoStatus::Pending,
            result: None,
            error: None,
            notes: Vec::new(),
        }
    }
}

/// One run of a goal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub user_id: String,
    pub goal: String,
    pub status: WorkflowStatus,
    pub todos: Vec<Todo>,
    pub iteration: u32,
    pub max_iterations: u32,
    pub notes: Vec<Note>,
    pub history: Vec<HistoryEntry>,
    pub decision_steps: Vec<StepRecord>,
    pub debug_steps: Vec<StepRecord>,

    /// Side-effect outputs published by directive handlers, threaded
    /// into subsequent prompts
    pub context: HashMap<String, serde_json::Value>,

    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Workflow {
    pub fn new(user_id: impl Into<String>, goal: impl Into<String>, max_iterations: u32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            goal: goal.into(),
            status: WorkflowStatus::Running,
            todos: Vec::new(),
            iteration: 0,
            max_iterations,
            notes: Vec::new(),
            history: Vec::new(),
            decision_steps: Vec::new(),
            debug_steps: Vec::new(),
            context: HashMap::new(),
            created_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }

    /// Index of the todo to process next: the first `pending` one, else
    /// the first `in_progress` one.
    pub fn next_todo(&self) -> Option<usize> {
        self.todos
            .iter()
            .position(|t| t.status == TodoStatus::Pending)
            .or_else(|| {
                self.todos
                    .iter()
                    .position(|t| t.status == TodoStatus::InProgress)
            })
    }

    /// Append a note produced while processing `source_todo`
    pub fn add_note(&mut self, content: impl Into<String>, source_todo: impl Into<String>, durable: bool) {
        self.notes.push(Note {
            content: content.into(),
            source_todo: source_todo.into(),
            durable,
            time: Utc::now(),
        });
    }

    /// The most recent `n` notes, oldest first
    pub fn recent_notes(&self, n: usize) -> Vec<&Note> {
        let skip = self.notes.len().saturating_sub(n);
        self.notes.iter().skip(skip).collect()
    }

    /// Todos already completed, for the prompt's progress summary
    pub fn completed_todos(&self) -> impl Iterator<Item = &Todo> {
        self.todos
            .iter()
            .filter(|t| t.status == TodoStatus::Completed)
    }

    pub fn mark_completed(&mut self) {
        self.status = WorkflowStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = WorkflowStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }
}
