//! Capability registry
//!
//! Holds the set of registered capabilities in registration order. The
//! parser folds matchers over text in this order; the executor looks up
//! handlers by name. The engine itself is agnostic to what a capability
//! does.

pub mod builtin;

use sdk::CapabilityDef;
use std::collections::HashMap;
use tracing::warn;

/// Registry of available capabilities
#[derive(Default)]
pub struct CapabilityRegistry {
    defs: Vec<CapabilityDef>,
    index: HashMap<String, usize>,
}

impl CapabilityRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability. Re-registering a name replaces the previous
    /// definition and logs a warning.
    pub fn register(&mut self, def: CapabilityDef) {
        if let Some(&pos) = self.index.get(&def.name) {
            warn!("Capability '{}' re-registered, replacing", def.name);
            self.defs[pos] = def;
            return;
        }
        self.index.insert(def.name.clone(), self.defs.len());
        self.defs.push(def);
    }

    /// Look up a capability by name
    pub fn get(&self, name: &str) -> Option<&CapabilityDef> {
        self.index.get(name).map(|&pos| &self.defs[pos])
    }

    /// Iterate capabilities in registration order
    pub fn iter(&self) -> impl Iterator<Item = &CapabilityDef> {
        self.defs.iter()
    }

    /// Number of registered capabilities
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// One-line-per-capability description block for prompts
    pub fn describe(&self) -> String {
        self.defs
            .iter()
            .map(|d| format!("- {}: {}", d.name, d.description))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk::{CapabilityHandler, FnHandler};
    use std::sync::Arc;

    fn noop() -> Arc<dyn CapabilityHandler> {
        Arc::new(FnHandler(|_p, _c| async { Ok(serde_json::json!({})) }))
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = CapabilityRegistry::new();
        registry.register(CapabilityDef::new("restart", "Restart a service", noop()));
        registry.register(CapabilityDef::new("health_check", "Probe a service", noop()));

        assert_eq!(registry.len(), 2);
        assert!(registry.get("restart").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_registration_order_preserved() {
        let mut registry = CapabilityRegistry::new();
        registry.register(CapabilityDef::new("b", "second", noop()));
        registry.register(CapabilityDef::new("a", "first", noop()));

        let names: Vec<_> = registry.iter().map(|d| d.name.clone()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn test_reregister_replaces() {
        let mut registry = CapabilityRegistry::new();
        registry.register(CapabilityDef::new("x", "old", noop()));
        registry.register(CapabilityDef::new("x", "new", noop()));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("x").unwrap().description, "new");
    }

    #[test]
    fn test_describe() {
        let mut registry = CapabilityRegistry::new();
        registry.register(CapabilityDef::new("restart", "Restart a service", noop()));
        let desc = registry.describe();
        assert!(desc.contains("- restart: Restart a service"));
    }
}
