//! End-to-end orchestrator scenarios with a scripted model

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use sdk::{CapabilityDef, FnHandler, Role};
use strand_engine::capability::CapabilityRegistry;
use strand_engine::config::Config;
use strand_engine::llm::{ChatError, ChatProvider, Message, MessageRole};
use strand_engine::store::MemoryStore;
use strand_engine::workflow::orchestrator::Orchestrator;
use strand_engine::workflow::{TodoStatus, Workflow, WorkflowStatus};
use tokio::sync::Mutex;

/// Provider that replays a fixed script of replies and records every
/// prompt it was sent.
struct ScriptedProvider {
    replies: StdMutex<VecDeque<String>>,
    fallback: String,
    prompts: StdMutex<Vec<String>>,
    delay: Duration,
}

impl ScriptedProvider {
    fn new(replies: &[&str], fallback: &str) -> Self {
        Self {
            replies: StdMutex::new(replies.iter().map(|r| r.to_string()).collect()),
            fallback: fallback.to_string(),
            prompts: StdMutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, messages: &[Message]) -> Result<String, ChatError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let prompt = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, MessageRole::User))
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.prompts.lock().unwrap().push(prompt);

        let reply = self.replies.lock().unwrap().pop_front();
        Ok(reply.unwrap_or_else(|| self.fallback.clone()))
    }
}

fn counting_capability(
    name: &str,
    description: &str,
    counter: Arc<AtomicUsize>,
) -> CapabilityDef {
    CapabilityDef::new(
        name,
        description,
        Arc::new(FnHandler(move |_params: serde_json::Value, _context| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(serde_json::json!({"ok": true, "status": "done"}))
            }
        })),
    )
}

fn fast_config(max_iterations: u32) -> Config {
    let mut config = Config::default();
    config.orchestrator.max_iterations = max_iterations;
    config.orchestrator.empty_reply_retries = 1;
    config.orchestrator.empty_reply_delay_ms = 1;
    config.llm.max_retries = 0;
    config.llm.backoff_base_ms = 1;
    config
}

async fn wait_terminal(handle: &Arc<Mutex<Workflow>>) -> Workflow {
    for _ in 0..500 {
        {
            let wf = handle.lock().await;
            if wf.status != WorkflowStatus::Running {
                return wf.clone();
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("workflow never left running status");
}

#[tokio::test]
async fn test_two_step_goal_completes_in_two_iterations() {
    let restarts = Arc::new(AtomicUsize::new(0));
    let probes = Arc::new(AtomicUsize::new(0));
    let mut capabilities = CapabilityRegistry::new();
    capabilities.register(counting_capability(
        "restart",
        "Restart a service",
        Arc::clone(&restarts),
    ));
    capabilities.register(counting_capability(
        "health_check",
        "Probe a service",
        Arc::clone(&probes),
    ));

    let provider = Arc::new(ScriptedProvider::new(
        &[
            r#"{"multi_step": true, "todos": ["Reboot the gateway", "Confirm it is back online"]}"#,
            r#"{"completion": 0.9, "action": "[restart: {\"service\": \"gateway\"}]"}"#,
            r#"{"completion": 1.0, "action": "[health_check]"}"#,
        ],
        r#"{"completion": 1.0, "action": "none"}"#,
    ));

    let orchestrator = Arc::new(
        Orchestrator::new(
            fast_config(20),
            provider,
            Arc::new(capabilities),
            Role::Owner,
        )
        .with_store(Arc::new(MemoryStore::new())),
    );

    let id = Arc::clone(&orchestrator)
        .start("u1", "reboot the gateway then confirm it's back online")
        .await
        .unwrap();
    let handle = orchestrator.registry().get(&id).await.unwrap();
    let wf = wait_terminal(&handle).await;

    assert_eq!(wf.status, WorkflowStatus::Completed);
    assert_eq!(wf.iteration, 2);
    assert_eq!(wf.todos.len(), 2);
    assert!(wf.todos.iter().all(|t| t.status == TodoStatus::Completed));
    assert_eq!(restarts.load(Ordering::SeqCst), 1);
    assert_eq!(probes.load(Ordering::SeqCst), 1);

    // Audit trail: one history entry per iteration, never rewritten
    assert_eq!(wf.history.len(), 2);
    assert_eq!(wf.decision_steps.len(), 1);
    assert_eq!(wf.debug_steps.len(), 2);
    let functions = &wf.todos[0].result.as_ref().unwrap().functions;
    assert_eq!(functions, &vec!["restart".to_string()]);
}

#[tokio::test]
async fn test_unrecognized_action_becomes_note_in_next_prompt() {
    let mut capabilities = CapabilityRegistry::new();
    capabilities.register(counting_capability(
        "restart",
        "Restart a service",
        Arc::new(AtomicUsize::new(0)),
    ));

    let provider = Arc::new(ScriptedProvider::new(
        &[
            r#"{"multi_step": false}"#,
            r#"{"completion": 0.2, "action": "[teleport]"}"#,
            r#"{"completion": 1.0, "action": "none"}"#,
        ],
        r#"{"completion": 1.0, "action": "none"}"#,
    ));
    let scripted = Arc::clone(&provider);

    let orchestrator = Arc::new(Orchestrator::new(
        fast_config(20),
        provider,
        Arc::new(capabilities),
        Role::Owner,
    ));

    let id = Arc::clone(&orchestrator).start("u1", "teleport somewhere").await.unwrap();
    let handle = orchestrator.registry().get(&id).await.unwrap();
    let wf = wait_terminal(&handle).await;

    assert_eq!(wf.status, WorkflowStatus::Completed);

    // The malformed action was recorded as a note, not thrown
    let note = &wf.notes[0].content;
    assert!(note.contains("[teleport]"), "note was: {}", note);
    assert_eq!(wf.history[0].completion_rate, 0.2);
    assert_eq!(wf.history[0].note.as_ref().unwrap(), note);

    // The next iteration's prompt carries the note verbatim
    let prompts = scripted.prompts();
    assert!(prompts.len() >= 3);
    assert!(prompts[2].contains(note.as_str()), "prompt was: {}", prompts[2]);
}

#[tokio::test]
async fn test_stalled_goal_fails_at_iteration_ceiling() {
    let capabilities = CapabilityRegistry::new();
    let provider = Arc::new(ScriptedProvider::new(
        &[r#"{"multi_step": false}"#],
        r#"{"completion": 0.1, "action": "none"}"#,
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        fast_config(4),
        provider,
        Arc::new(capabilities),
        Role::Owner,
    ));

    let id = Arc::clone(&orchestrator).start("u1", "an impossible goal").await.unwrap();
    let handle = orchestrator.registry().get(&id).await.unwrap();
    let wf = wait_terminal(&handle).await;

    assert_eq!(wf.status, WorkflowStatus::Failed);
    assert_eq!(wf.error.as_deref(), Some("max iterations"));
    assert_eq!(wf.iteration, 4);
}

#[tokio::test]
async fn test_second_start_returns_existing_workflow() {
    let capabilities = CapabilityRegistry::new();
    let provider = Arc::new(
        ScriptedProvider::new(
            &[r#"{"multi_step": false}"#],
            r#"{"completion": 0.1, "action": "none"}"#,
        )
        .with_delay(Duration::from_millis(30)),
    );

    let orchestrator = Arc::new(Orchestrator::new(
        fast_config(100),
        provider,
        Arc::new(capabilities),
        Role::Owner,
    ));

    let first = Arc::clone(&orchestrator).start("u1", "a long-running goal").await.unwrap();
    let second = Arc::clone(&orchestrator).start("u1", "another goal").await.unwrap();
    assert_eq!(first, second);

    // A different user is unaffected by the invariant
    let other = Arc::clone(&orchestrator).start("u2", "another goal").await.unwrap();
    assert_ne!(first, other);

    orchestrator.registry().pause(&first).await;
    orchestrator.registry().pause(&other).await;
}

#[tokio::test]
async fn test_pause_stops_next_iteration() {
    let capabilities = CapabilityRegistry::new();
    let provider = Arc::new(
        ScriptedProvider::new(
            &[r#"{"multi_step": false}"#],
            r#"{"completion": 0.1, "action": "none"}"#,
        )
        .with_delay(Duration::from_millis(20)),
    );

    let orchestrator = Arc::new(Orchestrator::new(
        fast_config(1000),
        provider,
        Arc::new(capabilities),
        Role::Owner,
    ));

    let id = Arc::clone(&orchestrator).start("u1", "a goal that never finishes").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(orchestrator.registry().pause(&id).await);

    let handle = orchestrator.registry().get(&id).await.unwrap();
    let wf = wait_terminal(&handle).await;
    assert_eq!(wf.status, WorkflowStatus::Paused);
    assert!(wf.iteration < 1000);

    // The user may start a fresh run against the same goal
    let fresh = Arc::clone(&orchestrator).start("u1", "a goal that never finishes").await.unwrap();
    assert_ne!(fresh, id);
    orchestrator.registry().pause(&fresh).await;
}

#[tokio::test]
async fn test_artifact_emitted_on_termination() {
    let dir = tempfile::tempdir().unwrap();
    let capabilities = CapabilityRegistry::new();
    let provider = Arc::new(ScriptedProvider::new(
        &[r#"{"multi_step": false}"#],
        r#"{"completion": 1.0, "action": "none"}"#,
    ));

    let orchestrator = Arc::new(
        Orchestrator::new(
            fast_config(20),
            provider,
            Arc::new(capabilities),
            Role::Owner,
        )
        .with_artifact_dir(dir.path()),
    );

    let id = Arc::clone(&orchestrator).start("u1", "a quick goal").await.unwrap();
    let handle = orchestrator.registry().get(&id).await.unwrap();
    let wf = wait_terminal(&handle).await;
    assert_eq!(wf.status, WorkflowStatus::Completed);

    // Emission happens right after the loop settles
    let path = dir.path().join(format!("workflow-{}.json", id));
    for _ in 0..100 {
        if path.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let body = std::fs::read_to_string(&path).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(parsed["workflow"]["goal"], "a quick goal");
    assert_eq!(parsed["workflow"]["status"], "completed");
    assert!(parsed["workflow"]["debug_steps"].as_array().is_some());
}

#[tokio::test]
async fn test_fallback_plan_when_extraction_fails() {
    let capabilities = CapabilityRegistry::new();
    let provider = Arc::new(ScriptedProvider::new(
        &["I could not decide how to break this down."],
        r#"{"completion": 1.0, "action": "none"}"#,
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        fast_config(20),
        provider,
        Arc::new(capabilities),
        Role::Owner,
    ));

    let id = Arc::clone(&orchestrator).start("u1", "tidy the logs").await.unwrap();
    let handle = orchestrator.registry().get(&id).await.unwrap();
    let wf = wait_terminal(&handle).await;

    // Generic two-step plan: work toward the goal, then verify
    assert_eq!(wf.todos.len(), 2);
    assert!(wf.todos[0].content.contains("tidy the logs"));
    assert_eq!(wf.status, WorkflowStatus::Completed);
}
