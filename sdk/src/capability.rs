//! Capability contract
//!
//! A capability is one named action the model can request: a descriptor
//! (name, description, optional parameter schema, permission tier, flags),
//! an optional free-text matcher, and an async handler. The engine is
//! agnostic to what a capability actually does.
//!
//! Descriptors are closed structs with an explicit optional-fields set
//! rather than open string-keyed property bags, so the compiler enforces
//! the capability surface.

use crate::errors::ExecError;
use crate::schema::ParamSchema;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Shared side-effect context threaded through directive execution.
///
/// Handlers publish outputs here (e.g. "last_command_output") for later
/// prompt construction. Locked briefly, never across an await point.
pub type SharedContext = Arc<Mutex<HashMap<String, serde_json::Value>>>;

/// Permission tier a capability declares for itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PermissionTier {
    /// Anyone may run this capability
    #[default]
    None,

    /// Requires an admin caller
    Admin,

    /// Requires the owner
    Owner,
}

/// Resolved role of the caller requesting execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Unprivileged caller
    #[default]
    Guest,

    /// Administrative caller
    Admin,

    /// Process owner
    Owner,
}

impl Role {
    /// Whether this role satisfies the given permission tier
    pub fn satisfies(&self, tier: PermissionTier) -> bool {
        match tier {
            PermissionTier::None => true,
            PermissionTier::Admin => matches!(self, Role::Admin | Role::Owner),
            PermissionTier::Owner => matches!(self, Role::Owner),
        }
    }
}

/// Shape hint for verifying a handler's result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpectedShape {
    /// A JSON object with at least one key
    Object,

    /// A JSON array with at least one element
    Array,

    /// Non-empty text
    Text,
}

/// One match produced by a capability's text matcher
#[derive(Debug, Clone)]
pub struct DirectiveMatch {
    /// Extracted parameters
    pub params: serde_json::Value,

    /// Character offset of the match in the original text, when known.
    /// Execution order is primarily by offset; offset-less matches sort
    /// after offset-bearing ones.
    pub offset: Option<usize>,
}

/// A pure matcher: scans text, extracts matches, returns the text with
/// its own markers consumed. Composed by the parser via a fold, so a
/// matcher must keep the text the same length — blank each consumed
/// span with U+001A bytes rather than removing it — or later matchers'
/// offsets drift out of the shared coordinate system. The parser strips
/// the padding from the final clean text.
pub type MatcherFn = Arc<dyn Fn(&str) -> (Vec<DirectiveMatch>, String) + Send + Sync>;

/// Async handler for a capability
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    /// Invoke the capability with validated, corrected parameters.
    ///
    /// Handlers may mutate `context` to publish side effects for later
    /// prompt construction. The returned value must be JSON-serializable.
    async fn invoke(
        &self,
        params: serde_json::Value,
        context: SharedContext,
    ) -> Result<serde_json::Value, ExecError>;
}

/// Blanket handler wrapper for plain async closures in tests and simple
/// capabilities.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> CapabilityHandler for FnHandler<F>
where
    F: Fn(serde_json::Value, SharedContext) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<serde_json::Value, ExecError>> + Send,
{
    async fn invoke(
        &self,
        params: serde_json::Value,
        context: SharedContext,
    ) -> Result<serde_json::Value, ExecError> {
        (self.0)(params, context).await
    }
}

/// Complete capability definition
#[derive(Clone)]
pub struct CapabilityDef {
    /// Unique capability name (e.g. "run_command")
    pub name: String,

    /// One-line description advertised to the model
    pub description: String,

    /// Optional parameter schema for validation and auto-correction
    pub schema: Option<ParamSchema>,

    /// Declared permission tier
    pub permission: PermissionTier,

    /// Capabilities flagged top-level only (e.g. starting a new workflow)
    /// are stripped rather than matched inside a running workflow.
    pub top_level_only: bool,

    /// Optional expected result shape for verification scoring
    pub expected: Option<ExpectedShape>,

    /// Optional custom matcher; capabilities without one use the engine's
    /// default bracket-marker matcher.
    pub matcher: Option<MatcherFn>,

    /// Execution handler
    pub handler: Arc<dyn CapabilityHandler>,
}

impl CapabilityDef {
    /// Create a capability with defaults: no schema, no permission
    /// requirement, not top-level-only, default matcher.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: Arc<dyn CapabilityHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema: None,
            permission: PermissionTier::None,
            top_level_only: false,
            expected: None,
            matcher: None,
            handler,
        }
    }

    /// Attach a parameter schema
    pub fn with_schema(mut self, schema: ParamSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Require a permission tier
    pub fn with_permission(mut self, tier: PermissionTier) -> Self {
        self.permission = tier;
        self
    }

    /// Mark this capability top-level only
    pub fn top_level_only(mut self) -> Self {
        self.top_level_only = true;
        self
    }

    /// Attach an expected result shape
    pub fn with_expected(mut self, shape: ExpectedShape) -> Self {
        self.expected = Some(shape);
        self
    }

    /// Attach a custom matcher
    pub fn with_matcher(mut self, matcher: MatcherFn) -> Self {
        self.matcher = Some(matcher);
        self
    }
}

impl std::fmt::Debug for CapabilityDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityDef")
            .field("name", &self.name)
            .field("permission", &self.permission)
            .field("top_level_only", &self.top_level_only)
            .field("has_schema", &self.schema.is_some())
            .field("has_matcher", &self.matcher.is_some())
            .finish()
    }
}
