//! Built-in capabilities
//!
//! A minimal capability set for the standalone binary: enough for the
//! model to publish values into the workflow context and to surface a
//! final answer. Hosts embedding the engine register their own set
//! instead.

use std::sync::Arc;

use sdk::{CapabilityDef, ExpectedShape, FnHandler, ParamSchema, ParamSpec, ParamType, SharedContext};

use super::CapabilityRegistry;

/// Registry containing the built-in capabilities
pub fn builtin_registry() -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new();
    registry.register(publish());
    registry.register(respond());
    registry
}

/// `[publish: {"key": ..., "value": ...}]` — store a value in the
/// workflow context for later prompts
fn publish() -> CapabilityDef {
    let schema = ParamSchema::new()
        .param("key", ParamSpec::required(ParamType::String))
        .param("value", ParamSpec::required(ParamType::String));

    CapabilityDef::new(
        "publish",
        "Save a named value for use in later steps",
        Arc::new(FnHandler(|params: serde_json::Value, context: SharedContext| async move {
            let key = params["key"].as_str().unwrap_or_default().to_string();
            let value = params["value"].clone();
            if let Ok(mut map) = context.lock() {
                map.insert(key.clone(), value);
            }
            Ok(serde_json::json!({ "published": key }))
        })),
    )
    .with_schema(schema)
    .with_expected(ExpectedShape::Object)
}

/// `[respond: {"message": ...}]` — surface a final answer to the caller
fn respond() -> CapabilityDef {
    let schema = ParamSchema::new().param("message", ParamSpec::required(ParamType::String));

    CapabilityDef::new(
        "respond",
        "Report a result or answer to the user",
        Arc::new(FnHandler(|params: serde_json::Value, context: SharedContext| async move {
            let message = params["message"].as_str().unwrap_or_default().to_string();
            if let Ok(mut map) = context.lock() {
                map.insert("last_response".to_string(), serde_json::json!(message));
            }
            Ok(serde_json::json!({ "message": message }))
        })),
    )
    .with_schema(schema)
    .with_expected(ExpectedShape::Object)
}
