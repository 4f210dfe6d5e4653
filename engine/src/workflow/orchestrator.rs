//! Orchestrator loop
//!
//! Drives a workflow from goal intake to a terminal status. Creation
//! runs a decision phase (goal classification + initial todo list),
//! then the loop is spawned as an independent task: pick a todo, build
//! a prompt from the goal, progress summary, relevant history and
//! notes, call the model, execute any directives it emitted, and rate
//! the todo from the model's completion estimate.
//!
//! Component-local failures (a directive, a malformed action) feed back
//! into the next prompt as notes; only model-call exhaustion or the
//! iteration ceiling terminates a run.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use chrono::{DateTime, Utc};
use sdk::{Role, SharedContext};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::artifact;
use super::registry::{ReserveOutcome, WorkflowRegistry};
use super::{HistoryEntry, StepRecord, Todo, TodoResult, TodoStatus, Workflow, WorkflowStatus};
use crate::capability::CapabilityRegistry;
use crate::config::Config;
use crate::directive::executor::{Executor, ExecutionOutcome};
use crate::directive::scheduler::WaveRunner;
use crate::directive::parse;
use crate::llm::retry::{chat_with_retry, RetryPolicy};
use crate::llm::{extract_json_value, ChatProvider, Message};
use crate::retrieval::{packing, ContextCandidate, Query, Ranker};
use crate::store::{best_effort, ContextStore};

/// Token budget for the retrieved-context section of a prompt
const CONTEXT_PACK_BUDGET: usize = 256;

/// Notes included verbatim in each prompt
const PROMPT_NOTE_COUNT: usize = 3;

/// Parsed fields of one loop-iteration reply
#[derive(Debug, Clone, PartialEq)]
struct IterationReply {
    completion: f64,
    action: Option<String>,
    next_step: Option<String>,
    note: Option<String>,
}

/// Snippet persisted to the history pool for later retrieval
#[derive(Serialize, Deserialize)]
struct HistorySnippet {
    text: String,
    time: DateTime<Utc>,
}

/// Workflow orchestrator. One instance serves all users; per-workflow
/// state lives in the registry.
pub struct Orchestrator {
    config: Config,
    provider: Arc<dyn ChatProvider>,
    capabilities: Arc<CapabilityRegistry>,
    registry: Arc<WorkflowRegistry>,
    runner: WaveRunner,
    ranker: Ranker,
    retry: RetryPolicy,
    store: Option<Arc<dyn ContextStore>>,
    artifact_dir: Option<PathBuf>,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        provider: Arc<dyn ChatProvider>,
        capabilities: Arc<CapabilityRegistry>,
        role: Role,
    ) -> Self {
        let registry = Arc::new(WorkflowRegistry::new(&config.orchestrator));
        let executor = Arc::new(Executor::new(Arc::clone(&capabilities), role));
        let retry = RetryPolicy {
            max_retries: config.llm.max_retries,
            backoff_base_ms: config.llm.backoff_base_ms,
        };
        let ranker = Ranker::new(config.retrieval.clone());
        Self {
            config,
            provider,
            capabilities,
            registry,
            runner: WaveRunner::new(executor),
            ranker,
            retry,
            store: None,
            artifact_dir: None,
        }
    }

    /// Attach a persistence backend (notes, history pool, snapshots)
    pub fn with_store(mut self, store: Arc<dyn ContextStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Emit a debug artifact into this directory on termination
    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = Some(dir.into());
        self
    }

    pub fn registry(&self) -> &Arc<WorkflowRegistry> {
        &self.registry
    }

    /// Create a workflow for a goal and schedule its execution.
    ///
    /// Returns the workflow id. If the user already has a running
    /// workflow its id is returned instead of creating a new one. The
    /// loop itself is fire-and-forget from the caller's perspective.
    pub async fn start(
        self: Arc<Self>,
        user_id: impl Into<String>,
        goal: impl Into<String>,
    ) -> anyhow::Result<String> {
        let user_id = user_id.into();
        let goal = goal.into();

        match self.registry.reserve(&user_id).await {
            ReserveOutcome::Existing(id) => return Ok(id),
            ReserveOutcome::Busy => bail!("A workflow is already being created for this user"),
            ReserveOutcome::Reserved => {}
        }

        let mut workflow = Workflow::new(
            user_id.clone(),
            goal,
            self.config.orchestrator.max_iterations,
        );
        if let Err(e) = self.decision_phase(&mut workflow).await {
            self.registry.abandon(&user_id).await;
            bail!("Decision phase failed: {}", e);
        }

        let id = workflow.id.clone();
        let handle = self.registry.register(workflow).await;
        info!("Starting workflow {} for user '{}'", id, user_id);

        let this = Arc::clone(&self);
        tokio::spawn(async move {
            this.run(handle).await;
        });
        Ok(id)
    }

    /// Classify the goal and extract the initial todo list.
    ///
    /// Extraction failure is not an error: a generic two-step plan is
    /// used instead. Only a transport failure propagates.
    async fn decision_phase(&self, workflow: &mut Workflow) -> anyhow::Result<()> {
        let prompt = format!(
            "Classify this goal and break it into steps.\n\
             \n\
             Goal: {}\n\
             \n\
             Available capabilities:\n{}\n\
             \n\
             Respond with a JSON object:\n\
             {{\"multi_step\": <bool>, \"todos\": [\"<step>\", ...]}}\n\
             For a single-step goal, \"todos\" may be omitted.",
            workflow.goal,
            self.capabilities.describe()
        );
        let messages = [
            Message::system("You plan multi-step tasks for an execution engine."),
            Message::user(prompt.as_str()),
        ];
        let reply = chat_with_retry(self.provider.as_ref(), &messages, self.retry).await?;
        workflow
            .decision_steps
            .push(StepRecord::new("decision", prompt.as_str(), reply.as_str()));

        let todos = extract_json_value(&reply)
            .and_then(|v| {
                let multi = v.get("multi_step").and_then(|m| m.as_bool())?;
                if !multi {
                    return Some(vec![workflow.goal.clone()]);
                }
                let list: Vec<String> = v
                    .get("todos")?
                    .as_array()?
                    .iter()
                    .filter_map(|t| t.as_str().map(|s| s.trim().to_string()))
                    .filter(|s| !s.is_empty())
                    .collect();
                if list.is_empty() {
                    None
                } else {
                    Some(list)
                }
            })
            .unwrap_or_else(|| {
                debug!("Todo extraction failed, using the generic plan");
                vec![
                    format!("Work toward the goal: {}", workflow.goal),
                    "Verify the goal has been achieved".to_string(),
                ]
            });

        workflow.todos = todos.into_iter().map(Todo::new).collect();
        Ok(())
    }

    /// The orchestrator loop. Runs until a terminal status or pause.
    pub async fn run(&self, handle: Arc<Mutex<Workflow>>) {
        loop {
            let mut wf = handle.lock().await;

            // Pausing is cooperative: it only stops the next iteration
            if wf.status != WorkflowStatus::Running {
                break;
            }
            let Some(idx) = wf.next_todo() else {
                info!("Workflow {}: all todos settled, completing", wf.id);
                wf.mark_completed();
                break;
            };
            if wf.iteration >= wf.max_iterations {
                warn!("Workflow {}: iteration ceiling reached", wf.id);
                wf.mark_failed("max iterations");
                break;
            }
            wf.iteration += 1;

            let retrieved = self.relevant_context(&wf, idx).await;
            let prompt = self.build_prompt(&wf, idx, &retrieved);
            let reply = match self.chat_bounded(&prompt).await {
                Ok(reply) => reply,
                Err(reason) => {
                    error!("Workflow {}: {}", wf.id, reason);
                    wf.mark_failed(reason);
                    break;
                }
            };
            let iteration = wf.iteration;
            wf.debug_steps.push(StepRecord::new(
                format!("iteration-{}", iteration),
                prompt.as_str(),
                reply.as_str(),
            ));

            let parsed = parse_reply(&reply);
            let (result, exec_note) = match &parsed.action {
                Some(action) => self.execute_action(&mut wf, action).await,
                None => (TodoResult::default(), None),
            };

            let todo_id = wf.todos[idx].id.clone();
            let note = parsed.note.clone().or(exec_note);

            {
                let todo = &mut wf.todos[idx];
                todo.error = result.error.clone();
                if result.executed {
                    todo.result = Some(result);
                }
                todo.status = if parsed.completion >= self.config.orchestrator.complete_threshold {
                    TodoStatus::Completed
                } else if parsed.completion >= self.config.orchestrator.progress_threshold {
                    TodoStatus::InProgress
                } else {
                    TodoStatus::Pending
                };
                if let Some(n) = &note {
                    todo.notes.push(n.clone());
                }
            }

            if parsed.completion < self.config.orchestrator.complete_threshold {
                if let Some(step) = &parsed.next_step {
                    if is_actionable_suggestion(step) {
                        debug!("Workflow {}: appending suggested step", wf.id);
                        wf.todos.push(Todo::new(step.trim()));
                    }
                }
            }

            if let Some(n) = &note {
                wf.add_note(n.clone(), &todo_id, false);
            }
            wf.history.push(HistoryEntry {
                todo_id,
                iteration,
                model_reply: reply,
                completion_rate: parsed.completion,
                note,
                timestamp: Utc::now(),
            });

            self.persist_iteration(&wf).await;
            drop(wf);
            tokio::task::yield_now().await;
        }

        self.finish(&handle).await;
    }

    /// Parse the action text and run its directives as dependency
    /// waves, with at most one synthesized correction or supplement
    /// pass. Returns the merged result and an optional feedback note.
    async fn execute_action(
        &self,
        wf: &mut Workflow,
        action: &str,
    ) -> (TodoResult, Option<String>) {
        let (directives, _clean) = parse(action, &self.capabilities, false);
        if directives.is_empty() {
            // Malformed actions are recorded, never thrown
            return (
                TodoResult::default(),
                Some(format!("No executable action recognized in: {}", action.trim())),
            );
        }

        let context: SharedContext =
            Arc::new(std::sync::Mutex::new(wf.context.clone()));
        let mut report = self.runner.run_pass(&directives, Arc::clone(&context)).await;

        if !report.all_succeeded() && !report.corrections.is_empty() {
            debug!("Workflow {}: running correction pass", wf.id);
            let followup = self
                .runner
                .run_pass(&report.corrections.clone(), Arc::clone(&context))
                .await;
            report.outcomes.extend(followup.outcomes);
        } else if !report.consistent() && !report.supplements.is_empty() {
            debug!("Workflow {}: running supplement pass", wf.id);
            let followup = self
                .runner
                .run_pass(&report.supplements.clone(), Arc::clone(&context))
                .await;
            report.outcomes.extend(followup.outcomes);
        }

        let snapshot = match context.lock() {
            Ok(map) => map.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        wf.context = snapshot.clone();

        let (success, first_error) = settle_outcomes(&report.outcomes);
        let functions = report.executed_kinds();
        let note = first_error
            .as_ref()
            .map(|e| format!("Directive failed: {}", e));
        (
            TodoResult {
                executed: true,
                functions,
                success,
                error: first_error,
                context: snapshot,
            },
            note,
        )
    }

    /// Model call with the bounded empty-reply retry, distinct from the
    /// transport-level classified retry.
    async fn chat_bounded(&self, prompt: &str) -> Result<String, String> {
        let messages = [
            Message::system(
                "You execute one step of a task at a time. \
                 Reply only with the requested JSON object.",
            ),
            Message::user(prompt),
        ];

        for attempt in 0..=self.config.orchestrator.empty_reply_retries {
            let reply = chat_with_retry(self.provider.as_ref(), &messages, self.retry)
                .await
                .map_err(|e| format!("Model call failed: {}", e))?;
            if !reply.trim().is_empty() {
                return Ok(reply);
            }
            debug!("Empty model reply (attempt {})", attempt + 1);
            tokio::time::sleep(Duration::from_millis(
                self.config.orchestrator.empty_reply_delay_ms,
            ))
            .await;
        }
        Err("Model returned only empty replies".to_string())
    }

    /// Rank stored history and durable notes against the current todo
    /// and pack the winners into the prompt's context budget.
    async fn relevant_context(&self, wf: &Workflow, idx: usize) -> Vec<String> {
        let mut pool: Vec<ContextCandidate> = wf
            .notes
            .iter()
            .map(|n| ContextCandidate::new(&n.content, n.time))
            .collect();

        if let Some(store) = &self.store {
            let key = history_key(&wf.user_id);
            if let Some(items) = best_effort(
                "history list",
                store.list(&key, self.config.store.history_limit),
            )
            .await
            {
                pool.extend(items.iter().filter_map(|raw| {
                    let snippet: HistorySnippet = serde_json::from_str(raw).ok()?;
                    Some(ContextCandidate::new(snippet.text, snippet.time))
                }));
            }
        }

        if pool.is_empty() {
            return Vec::new();
        }
        let query = Query::text(format!("{} {}", wf.goal, wf.todos[idx].content));
        let ranked = self.ranker.rank(&pool, &query, 5);
        packing::pack_into_budget(
            &ranked,
            CONTEXT_PACK_BUDGET,
            self.config.retrieval.min_pack_tokens,
        )
    }

    fn build_prompt(&self, wf: &Workflow, idx: usize, retrieved: &[String]) -> String {
        let todo = &wf.todos[idx];
        let mut prompt = format!(
            "Goal: {}\nCurrent step: {}\n",
            wf.goal, todo.content
        );

        let completed: Vec<String> = wf
            .completed_todos()
            .map(|t| {
                let ran = t
                    .result
                    .as_ref()
                    .filter(|r| !r.functions.is_empty())
                    .map(|r| format!(" (ran: {})", r.functions.join(", ")))
                    .unwrap_or_default();
                format!("- {}{}", t.content, ran)
            })
            .collect();
        if !completed.is_empty() {
            prompt.push_str("\nCompleted so far:\n");
            prompt.push_str(&completed.join("\n"));
            prompt.push('\n');
        }

        if !retrieved.is_empty() {
            prompt.push_str("\nRelevant context:\n");
            for snippet in retrieved {
                prompt.push_str(&format!("- {}\n", snippet));
            }
        }

        let notes = wf.recent_notes(PROMPT_NOTE_COUNT);
        if !notes.is_empty() {
            prompt.push_str("\nNotes:\n");
            for note in notes {
                prompt.push_str(&format!("- {}\n", note.content));
            }
        }

        if !wf.context.is_empty() {
            prompt.push_str("\nPublished values:\n");
            let mut keys: Vec<&String> = wf.context.keys().collect();
            keys.sort();
            for key in keys {
                let value = preview(&wf.context[key]);
                prompt.push_str(&format!("- {}: {}\n", key, value));
            }
        }

        prompt.push_str(&format!(
            "\nAvailable capabilities:\n{}\n\
             \n\
             Respond with a JSON object:\n\
             {{\"completion\": <0..1 estimate that the current step is done>,\n \
             \"action\": \"<capability markers like [name: {{...}}], or none>\",\n \
             \"next_step\": \"<optional concrete follow-up step>\",\n \
             \"note\": \"<optional observation worth remembering>\"}}\n",
            self.capabilities.describe()
        ));
        prompt
    }

    /// Best-effort persistence of the latest iteration: a retrievable
    /// history snippet plus a workflow snapshot with a TTL.
    async fn persist_iteration(&self, wf: &Workflow) {
        let Some(store) = &self.store else { return };

        if let Some(entry) = wf.history.last() {
            let text = entry
                .note
                .clone()
                .unwrap_or_else(|| entry.model_reply.clone());
            if let Ok(raw) = serde_json::to_string(&HistorySnippet {
                text,
                time: entry.timestamp,
            }) {
                best_effort(
                    "history push",
                    store.push(
                        &history_key(&wf.user_id),
                        &raw,
                        self.config.store.history_limit,
                    ),
                )
                .await;
            }
        }

        if let Ok(snapshot) = serde_json::to_string(wf) {
            best_effort(
                "snapshot set",
                store.set(
                    &format!("workflow:{}", wf.id),
                    &snapshot,
                    Some(Duration::from_secs(self.config.store.snapshot_ttl_secs)),
                ),
            )
            .await;
        }
    }

    /// Post-loop bookkeeping: free the running slot and emit the audit
    /// artifact for terminal runs.
    async fn finish(&self, handle: &Arc<Mutex<Workflow>>) {
        let wf = handle.lock().await;
        if !wf.status.is_terminal() {
            return;
        }
        self.registry.release_running(&wf.user_id, &wf.id).await;
        info!(
            "Workflow {} finished with status {:?} after {} iteration(s)",
            wf.id, wf.status, wf.iteration
        );
        if let Some(dir) = &self.artifact_dir {
            if let Err(e) = artifact::emit(&wf, dir) {
                warn!("Failed to emit artifact for {}: {:#}", wf.id, e);
            }
        }
    }
}

fn history_key(user_id: &str) -> String {
    format!("history:{}", user_id)
}

/// Tolerant parse of a loop-iteration reply.
///
/// A reply without a JSON object is treated as a raw action with zero
/// completion, so bracket markers in plain text still execute.
fn parse_reply(reply: &str) -> IterationReply {
    let Some(value) = extract_json_value(reply) else {
        return IterationReply {
            completion: 0.0,
            action: Some(reply.to_string()),
            next_step: None,
            note: None,
        };
    };

    let completion = value
        .get("completion")
        .and_then(|c| c.as_f64())
        .unwrap_or(0.0)
        .clamp(0.0, 1.0);
    let field = |name: &str| {
        value
            .get(name)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("none"))
            .map(|s| s.to_string())
    };

    IterationReply {
        completion,
        action: field("action"),
        next_step: field("next_step"),
        note: field("note"),
    }
}

/// Whether a proposed next step is worth appending as a todo
fn is_actionable_suggestion(step: &str) -> bool {
    let t = step.trim().to_lowercase();
    t.len() > 3 && !matches!(t.as_str(), "none" | "done" | "n/a" | "nothing" | "stop")
}

/// Collapse a pass's outcomes to (overall success, first error),
/// judging each directive by its latest outcome so that a successful
/// correction overrides the original failure.
fn settle_outcomes(outcomes: &[ExecutionOutcome]) -> (bool, Option<String>) {
    let mut latest: HashMap<&str, &ExecutionOutcome> = HashMap::new();
    for outcome in outcomes {
        latest.insert(outcome.directive_id.as_str(), outcome);
    }
    let success = !latest.is_empty() && latest.values().all(|o| o.success);
    let first_error = outcomes
        .iter()
        .filter(|o| !latest.get(o.directive_id.as_str()).map_or(false, |l| l.success))
        .find_map(|o| o.error.clone());
    (success, first_error)
}

fn preview(value: &serde_json::Value) -> String {
    let raw = match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if raw.chars().count() > 200 {
        let cut: String = raw.chars().take(200).collect();
        format!("{}…", cut)
    } else {
        raw
    }
}
