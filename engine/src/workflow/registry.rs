//! In-memory workflow registry
//!
//! Tracks live workflows and enforces the per-user invariant: at most
//! one workflow per user key may be `running` at a time. Creation is
//! guarded by a short-lived per-user lock held across the decision
//! phase, released once the new run is registered or after a grace
//! period. Terminal workflows are garbage-collected after a grace
//! period past completion.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{Workflow, WorkflowStatus};
use crate::config::OrchestratorConfig;

/// Result of attempting to reserve a creation slot for a user
#[derive(Debug)]
pub enum ReserveOutcome {
    /// Slot reserved; caller must `register` or `abandon`
    Reserved,

    /// The user already has a running workflow; its id is returned
    /// instead of creating a new one
    Existing(String),

    /// Another creation for this user is in flight
    Busy,
}

struct Inner {
    workflows: HashMap<String, Arc<Mutex<Workflow>>>,
    running_by_user: HashMap<String, String>,
    creation_locks: HashMap<String, Instant>,
}

/// Registry of live workflows
pub struct WorkflowRegistry {
    lock_ttl: Duration,
    gc_grace: Duration,
    inner: Mutex<Inner>,
}

impl WorkflowRegistry {
    pub fn new(config: &OrchestratorConfig) -> Self {
        Self {
            lock_ttl: Duration::from_secs(config.creation_lock_secs),
            gc_grace: Duration::from_secs(config.gc_grace_secs),
            inner: Mutex::new(Inner {
                workflows: HashMap::new(),
                running_by_user: HashMap::new(),
                creation_locks: HashMap::new(),
            }),
        }
    }

    /// Try to reserve the creation slot for a user. A stale lock (older
    /// than the configured TTL) is treated as released.
    pub async fn reserve(&self, user_id: &str) -> ReserveOutcome {
        let mut inner = self.inner.lock().await;

        if let Some(existing) = inner.running_by_user.get(user_id) {
            debug!("User '{}' already has running workflow {}", user_id, existing);
            return ReserveOutcome::Existing(existing.clone());
        }

        if let Some(acquired) = inner.creation_locks.get(user_id) {
            if acquired.elapsed() < self.lock_ttl {
                return ReserveOutcome::Busy;
            }
        }

        inner
            .creation_locks
            .insert(user_id.to_string(), Instant::now());
        ReserveOutcome::Reserved
    }

    /// Register a freshly created workflow, releasing the creation lock
    pub async fn register(&self, workflow: Workflow) -> Arc<Mutex<Workflow>> {
        let mut inner = self.inner.lock().await;
        let id = workflow.id.clone();
        let user = workflow.user_id.clone();

        inner.creation_locks.remove(&user);
        inner.running_by_user.insert(user, id.clone());
        let handle = Arc::new(Mutex::new(workflow));
        inner.workflows.insert(id.clone(), Arc::clone(&handle));
        info!("Registered workflow {}", id);
        handle
    }

    /// Release the creation lock without registering (creation failed)
    pub async fn abandon(&self, user_id: &str) {
        let mut inner = self.inner.lock().await;
        inner.creation_locks.remove(user_id);
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Mutex<Workflow>>> {
        let inner = self.inner.lock().await;
        inner.workflows.get(id).map(Arc::clone)
    }

    /// Free the user's running slot once the workflow leaves `running`
    pub async fn release_running(&self, user_id: &str, workflow_id: &str) {
        let mut inner = self.inner.lock().await;
        if inner.running_by_user.get(user_id).map(String::as_str) == Some(workflow_id) {
            inner.running_by_user.remove(user_id);
        }
    }

    /// Cooperatively pause a running workflow. The current iteration
    /// runs to completion; the next one will not start.
    pub async fn pause(&self, id: &str) -> bool {
        let handle = match self.get(id).await {
            Some(h) => h,
            None => return false,
        };
        let (user_id, paused) = {
            let mut wf = handle.lock().await;
            if wf.status == WorkflowStatus::Running {
                wf.status = WorkflowStatus::Paused;
                (wf.user_id.clone(), true)
            } else {
                (wf.user_id.clone(), false)
            }
        };
        if paused {
            self.release_running(&user_id, id).await;
            info!("Paused workflow {}", id);
        }
        paused
    }

    /// Drop terminal workflows whose grace period has elapsed. Returns
    /// the number collected.
    pub async fn collect_garbage(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let grace = chrono::Duration::from_std(self.gc_grace).unwrap_or(chrono::Duration::zero());

        let mut stale = Vec::new();
        for (id, handle) in &inner.workflows {
            // Skip workflows currently locked by a running loop
            let Ok(wf) = handle.try_lock() else { continue };
            if wf.status.is_terminal() {
                if let Some(done) = wf.completed_at {
                    if now - done >= grace {
                        stale.push(id.clone());
                    }
                }
            }
        }

        for id in &stale {
            inner.workflows.remove(id);
            debug!("Collected workflow {}", id);
        }
        stale.len()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.workflows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.workflows.is_empty()
    }
}
