//! Strand SDK
//!
//! Shared library providing the capability contract used by the Strand
//! engine and by out-of-tree capability crates: the capability descriptor,
//! permission tiers, parameter schemas, and the error taxonomy.

/// Capability descriptor, permission tiers, and the handler trait
pub mod capability;

/// Error types and handling
pub mod errors;

/// Parameter schema validation and auto-correction
pub mod schema;

// Re-export commonly used types
pub use capability::{
    CapabilityDef, CapabilityHandler, DirectiveMatch, ExpectedShape, FnHandler, MatcherFn,
    PermissionTier, Role, SharedContext,
};
pub use errors::{ExecError, StrandErrorExt, TransientKind};
pub use schema::{ParamSchema, ParamSpec, ParamType};
