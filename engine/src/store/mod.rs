//! Persistence
//!
//! An opaque key-value store consumed by the orchestrator for notes,
//! message history, and workflow snapshots. The trait offers
//! list-push/trim/expire and get/set-with-TTL semantics; the in-memory
//! implementation is the default backend and the reference for trait
//! behavior.
//!
//! Store failures never abort a workflow. Callers wrap accesses in
//! [`best_effort`], which logs the error and degrades to "no retrieval
//! context, no cross-restart memory".

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;

/// Persistence error
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store backend unavailable: {0}")]
    Unavailable(String),

    #[error("store operation failed: {0}")]
    Backend(String),
}

/// Opaque persistence consumed by the orchestrator.
///
/// Keys are namespaced by the caller (workflow id, pool id, user id);
/// the store itself is agnostic to key structure. Values are opaque
/// strings, typically serialized JSON.
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Append to a list, trimming it to the newest `limit` entries
    async fn push(&self, key: &str, value: &str, limit: usize) -> Result<(), StoreError>;

    /// Newest-last read of up to `limit` list entries
    async fn list(&self, key: &str, limit: usize) -> Result<Vec<String>, StoreError>;

    /// Set a value, optionally expiring after `ttl`
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Read a value; `None` for missing or expired keys
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Attach or refresh a TTL on an existing key; no-op when missing
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Remove a key
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Run a store operation, degrading to `None` on failure.
///
/// The single funnel for swallowed persistence errors: every degraded
/// access logs through here, so a dead backend is visible in the logs
/// without taking the workflow down.
pub async fn best_effort<T, F>(op: &str, fut: F) -> Option<T>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match fut.await {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Store {} failed, continuing without persistence: {}", op, e);
            None
        }
    }
}

enum Entry {
    Value(String),
    List(VecDeque<String>),
}

struct Slot {
    entry: Entry,
    expires_at: Option<Instant>,
}

impl Slot {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-memory store backend. Expiry is enforced lazily on access.
#[derive(Default)]
pub struct MemoryStore {
    slots: Mutex<HashMap<String, Slot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContextStore for MemoryStore {
    async fn push(&self, key: &str, value: &str, limit: usize) -> Result<(), StoreError> {
        let mut slots = self.slots.lock().await;
        let now = Instant::now();

        let slot = slots.entry(key.to_string()).or_insert_with(|| Slot {
            entry: Entry::List(VecDeque::new()),
            expires_at: None,
        });
        if slot.expired(now) {
            slot.entry = Entry::List(VecDeque::new());
            slot.expires_at = None;
        }

        match &mut slot.entry {
            Entry::List(items) => {
                items.push_back(value.to_string());
                while items.len() > limit {
                    items.pop_front();
                }
                Ok(())
            }
            Entry::Value(_) => Err(StoreError::Backend(format!(
                "key '{}' holds a value, not a list",
                key
            ))),
        }
    }

    async fn list(&self, key: &str, limit: usize) -> Result<Vec<String>, StoreError> {
        let slots = self.slots.lock().await;
        let now = Instant::now();

        match slots.get(key) {
            Some(slot) if !slot.expired(now) => match &slot.entry {
                Entry::List(items) => {
                    let skip = items.len().saturating_sub(limit);
                    Ok(items.iter().skip(skip).cloned().collect())
                }
                Entry::Value(_) => Err(StoreError::Backend(format!(
                    "key '{}' holds a value, not a list",
                    key
                ))),
            },
            _ => Ok(Vec::new()),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut slots = self.slots.lock().await;
        slots.insert(
            key.to_string(),
            Slot {
                entry: Entry::Value(value.to_string()),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut slots = self.slots.lock().await;
        let now = Instant::now();

        if let Some(slot) = slots.get(key) {
            if slot.expired(now) {
                slots.remove(key);
                return Ok(None);
            }
            if let Entry::Value(v) = &slot.entry {
                return Ok(Some(v.clone()));
            }
        }
        Ok(None)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get_mut(key) {
            slot.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut slots = self.slots.lock().await;
        slots.remove(key);
        Ok(())
    }
}
