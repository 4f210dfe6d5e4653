//! Directive executor
//!
//! Validates, corrects, and dispatches a single directive to its
//! registered capability handler. Execution is wrapped with a reasoning
//! trace, a multi-dimensional result quality score, and post-failure
//! analysis that derives at most one guided retry for transient causes.

use crate::capability::CapabilityRegistry;
use crate::directive::Directive;
use sdk::{ExecError, ExpectedShape, Role, SharedContext, StrandErrorExt};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Quality score below which a result is reported low-confidence
pub const LOW_CONFIDENCE: f64 = 0.5;

/// Outcome of executing one directive
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// Directive id this outcome belongs to
    pub directive_id: String,

    /// Capability that was invoked
    pub kind: String,

    /// Whether the handler completed without error
    pub success: bool,

    /// Handler result (JSON `null` on failure)
    pub result: Value,

    /// Error description, when `success` is false
    pub error: Option<String>,

    /// Result quality score in [0, 1]; below 0.5 is low-confidence but
    /// not a failure
    pub verified: f64,

    /// Whether a guided retry was attempted
    pub retried: bool,

    /// Step-by-step reasoning trace for the debug artifact
    pub trace: Vec<String>,
}

impl ExecutionOutcome {
    fn failure(directive: &Directive, error: String, trace: Vec<String>, retried: bool) -> Self {
        Self {
            directive_id: directive.id.clone(),
            kind: directive.kind.clone(),
            success: false,
            result: Value::Null,
            error: Some(error),
            verified: 0.0,
            retried,
            trace,
        }
    }
}

/// Executes single directives against the capability registry
pub struct Executor {
    registry: Arc<CapabilityRegistry>,
    role: Role,
}

impl Executor {
    pub fn new(registry: Arc<CapabilityRegistry>, role: Role) -> Self {
        Self { registry, role }
    }

    /// Execute one directive.
    ///
    /// Pipeline: parameter correction and validation → permission check →
    /// handler invocation → result verification. A handler failure is
    /// classified; only timeout/network causes get exactly one retry,
    /// optionally with corrected parameters.
    pub async fn execute(&self, directive: &Directive, context: SharedContext) -> ExecutionOutcome {
        let mut trace = Vec::new();

        let Some(def) = self.registry.get(&directive.kind) else {
            trace.push(format!("capability '{}' not found", directive.kind));
            return ExecutionOutcome::failure(directive, "not found".to_string(), trace, false);
        };

        // Validate and auto-correct parameters
        let mut params = directive.params.clone();
        if !params.is_object() {
            params = serde_json::json!({});
        }
        if let Some(schema) = &def.schema {
            schema.correct(&mut params);
            if let Err(e) = schema.validate(&def.name, &params) {
                trace.push(format!("validation failed: {}", e));
                return ExecutionOutcome::failure(directive, e.to_string(), trace, false);
            }
            trace.push("params validated".to_string());
        }

        // Permission gate; failures here are never retried
        if !self.role.satisfies(def.permission) {
            let err = ExecError::Permission {
                capability: def.name.clone(),
                required: format!("{:?}", def.permission).to_lowercase(),
            };
            trace.push("permission denied".to_string());
            return ExecutionOutcome::failure(directive, err.to_string(), trace, false);
        }

        // First attempt
        trace.push(format!("invoking '{}'", def.name));
        match def.handler.invoke(params.clone(), Arc::clone(&context)).await {
            Ok(result) => self.verified_outcome(directive, def.expected, result, false, trace),
            Err(e) => {
                let classified = match &e {
                    ExecError::Unknown(msg) => ExecError::classify(&def.name, msg),
                    _ => e,
                };
                trace.push(format!("handler error: {}", classified));

                let ExecError::Transient { kind, reason } = &classified else {
                    return ExecutionOutcome::failure(
                        directive,
                        classified.to_string(),
                        trace,
                        false,
                    );
                };

                // Reflexion: derive a corrected parameter set and retry once
                let corrected = correct_params(&params, reason);
                if corrected != params {
                    trace.push("retrying with corrected params".to_string());
                } else {
                    trace.push(format!("retrying after {} error", kind));
                }
                debug!(
                    "Directive {} ({}) retrying after {} error",
                    directive.id, def.name, kind
                );

                match def.handler.invoke(corrected, context).await {
                    Ok(result) => {
                        self.verified_outcome(directive, def.expected, result, true, trace)
                    }
                    Err(e2) => {
                        trace.push(format!("retry failed: {}", e2));
                        ExecutionOutcome::failure(directive, e2.to_string(), trace, true)
                    }
                }
            }
        }
    }

    fn verified_outcome(
        &self,
        directive: &Directive,
        expected: Option<ExpectedShape>,
        result: Value,
        retried: bool,
        mut trace: Vec<String>,
    ) -> ExecutionOutcome {
        let verified = verify_result(&result, expected);
        trace.push(format!("result quality {:.2}", verified));
        if verified < LOW_CONFIDENCE {
            warn!(
                "Directive {} ({}) produced a low-confidence result ({:.2})",
                directive.id, directive.kind, verified
            );
        }
        ExecutionOutcome {
            directive_id: directive.id.clone(),
            kind: directive.kind.clone(),
            success: true,
            result,
            error: None,
            verified,
            retried,
            trace,
        }
    }
}

/// Multi-dimensional result quality score in [0, 1].
///
/// Dimensions: non-empty structured payload, absence of embedded error
/// keywords (a null payload scores zero here too), and type match
/// against the optional expected shape. The score is the mean of the
/// dimensions.
pub fn verify_result(result: &Value, expected: Option<ExpectedShape>) -> f64 {
    let non_empty = match result {
        Value::Null => 0.0,
        Value::String(s) => {
            if s.trim().is_empty() {
                0.0
            } else {
                1.0
            }
        }
        Value::Array(a) => {
            if a.is_empty() {
                0.0
            } else {
                1.0
            }
        }
        Value::Object(o) => {
            if o.is_empty() {
                0.0
            } else {
                1.0
            }
        }
        _ => 1.0,
    };

    // A null payload has no content to vouch for
    let text = result.to_string().to_lowercase();
    let clean = if result.is_null()
        || ["\"error\"", "\"failed\"", "exception", "traceback"]
            .iter()
            .any(|kw| text.contains(kw))
    {
        0.0
    } else {
        1.0
    };

    let type_match = match expected {
        None => 1.0,
        Some(ExpectedShape::Object) => {
            if result.is_object() {
                1.0
            } else {
                0.0
            }
        }
        Some(ExpectedShape::Array) => {
            if result.is_array() {
                1.0
            } else {
                0.0
            }
        }
        Some(ExpectedShape::Text) => {
            if result.as_str().is_some_and(|s| !s.trim().is_empty()) {
                1.0
            } else {
                0.0
            }
        }
    };

    (non_empty + clean + type_match) / 3.0
}

/// Deterministic error-to-correction mapping for the guided retry.
///
/// Currently: a "not found" failure normalizes path-like string
/// parameters (collapses duplicate separators, strips a trailing one).
/// Unrecognized errors return the parameters unchanged.
pub fn correct_params(params: &Value, error: &str) -> Value {
    let lower = error.to_lowercase();
    let mut out = params.clone();

    if lower.contains("not found") || lower.contains("no such file") {
        if let Some(map) = out.as_object_mut() {
            for (key, value) in map.iter_mut() {
                if !key.to_lowercase().contains("path") {
                    continue;
                }
                if let Value::String(s) = value {
                    let mut fixed = s.trim().replace('\\', "/");
                    while fixed.contains("//") {
                        fixed = fixed.replace("//", "/");
                    }
                    if fixed.len() > 1 && fixed.ends_with('/') {
                        fixed.pop();
                    }
                    *value = Value::String(fixed);
                }
            }
        }
    }

    out
}

/// Whether the classified error is worth surfacing as recoverable in
/// notes (validation and parse failures the model can self-correct).
pub fn is_self_correctable(error: &ExecError) -> bool {
    error.is_recoverable() && !matches!(error, ExecError::Transient { .. })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk::{CapabilityDef, CapabilityHandler, FnHandler, ParamSchema, ParamSpec, ParamType,
        PermissionTier};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn shared_context() -> SharedContext {
        Arc::new(Mutex::new(HashMap::new()))
    }

    fn ok_handler(result: Value) -> Arc<dyn CapabilityHandler> {
        Arc::new(FnHandler(move |_p, _c| {
            let r = result.clone();
            async move { Ok(r) }
        }))
    }

    fn directive(kind: &str, params: Value) -> Directive {
        let mut d = Directive::new(kind, params);
        d.id = "d1".to_string();
        d
    }

    #[tokio::test]
    async fn test_unknown_capability_not_found() {
        let registry = Arc::new(CapabilityRegistry::new());
        let executor = Executor::new(registry, Role::Owner);
        let outcome = executor
            .execute(&directive("nope", serde_json::json!({})), shared_context())
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("not found"));
        assert!(!outcome.retried);
    }

    #[tokio::test]
    async fn test_successful_execution_verified() {
        let mut registry = CapabilityRegistry::new();
        registry.register(CapabilityDef::new(
            "status",
            "Report status",
            ok_handler(serde_json::json!({"state": "online"})),
        ));
        let executor = Executor::new(Arc::new(registry), Role::Guest);
        let outcome = executor
            .execute(&directive("status", serde_json::json!({})), shared_context())
            .await;
        assert!(outcome.success);
        assert!(outcome.verified >= LOW_CONFIDENCE);
        assert!(!outcome.retried);
    }

    #[tokio::test]
    async fn test_validation_failure_not_retried() {
        let mut registry = CapabilityRegistry::new();
        registry.register(
            CapabilityDef::new("read_file", "Read a file", ok_handler(serde_json::json!({})))
                .with_schema(
                    ParamSchema::new().param("path", ParamSpec::required(ParamType::Path)),
                ),
        );
        let executor = Executor::new(Arc::new(registry), Role::Owner);
        let outcome = executor
            .execute(
                &directive("read_file", serde_json::json!({})),
                shared_context(),
            )
            .await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("path"));
        assert!(!outcome.retried);
    }

    #[tokio::test]
    async fn test_permission_denied_short_circuits() {
        let called = Arc::new(AtomicU32::new(0));
        let called2 = Arc::clone(&called);
        let mut registry = CapabilityRegistry::new();
        registry.register(
            CapabilityDef::new(
                "wipe",
                "Dangerous",
                Arc::new(FnHandler(move |_p, _c| {
                    called2.fetch_add(1, Ordering::SeqCst);
                    async { Ok(serde_json::json!({})) }
                })),
            )
            .with_permission(PermissionTier::Owner),
        );
        let executor = Executor::new(Arc::new(registry), Role::Guest);
        let outcome = executor
            .execute(&directive("wipe", serde_json::json!({})), shared_context())
            .await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("Permission"));
        assert_eq!(called.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transient_error_retried_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = Arc::clone(&calls);
        let mut registry = CapabilityRegistry::new();
        registry.register(CapabilityDef::new(
            "fetch",
            "Fetch data",
            Arc::new(FnHandler(move |_p, _c| {
                let n = calls2.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(ExecError::Unknown("connection refused".to_string()))
                    } else {
                        Ok(serde_json::json!({"data": [1, 2, 3]}))
                    }
                }
            })),
        ));
        let executor = Executor::new(Arc::new(registry), Role::Guest);
        let outcome = executor
            .execute(&directive("fetch", serde_json::json!({})), shared_context())
            .await;
        assert!(outcome.success);
        assert!(outcome.retried);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_transient_error_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = Arc::clone(&calls);
        let mut registry = CapabilityRegistry::new();
        registry.register(CapabilityDef::new(
            "parse",
            "Parse input",
            Arc::new(FnHandler(move |_p, _c| {
                calls2.fetch_add(1, Ordering::SeqCst);
                async { Err(ExecError::Unknown("segfault".to_string())) }
            })),
        ));
        let executor = Executor::new(Arc::new(registry), Role::Guest);
        let outcome = executor
            .execute(&directive("parse", serde_json::json!({})), shared_context())
            .await;
        assert!(!outcome.success);
        assert!(!outcome.retried);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handler_publishes_context() {
        let mut registry = CapabilityRegistry::new();
        registry.register(CapabilityDef::new(
            "run_command",
            "Run a shell command",
            Arc::new(FnHandler(|_p, ctx: SharedContext| async move {
                ctx.lock()
                    .expect("lock poisoned")
                    .insert("last_command_output".into(), serde_json::json!("ok"));
                Ok(serde_json::json!({"exit": 0}))
            })),
        ));
        let executor = Executor::new(Arc::new(registry), Role::Guest);
        let ctx = shared_context();
        let outcome = executor
            .execute(
                &directive("run_command", serde_json::json!({})),
                Arc::clone(&ctx),
            )
            .await;
        assert!(outcome.success);
        assert_eq!(
            ctx.lock().expect("lock poisoned")["last_command_output"],
            "ok"
        );
    }

    #[test]
    fn test_verify_result_dimensions() {
        assert_eq!(verify_result(&Value::Null, None), 1.0 / 3.0);
        assert!(verify_result(&serde_json::json!({"ok": true}), None) > 0.9);
        assert!(
            verify_result(&serde_json::json!({"error": "boom"}), None) < verify_result(
                &serde_json::json!({"ok": true}),
                None
            )
        );
        // Expected shape mismatch drags the score down
        let arr_expected = verify_result(&serde_json::json!({"a": 1}), Some(ExpectedShape::Array));
        assert!(arr_expected < 1.0);
    }

    #[test]
    fn test_correct_params_normalizes_path_on_not_found() {
        let params = serde_json::json!({"path": "data//logs/", "count": 3});
        let fixed = correct_params(&params, "file not found");
        assert_eq!(fixed["path"], "data/logs");
        assert_eq!(fixed["count"], 3);
    }

    #[test]
    fn test_correct_params_noop_for_other_errors() {
        let params = serde_json::json!({"path": "data//logs/"});
        assert_eq!(correct_params(&params, "timeout"), params);
    }
}
