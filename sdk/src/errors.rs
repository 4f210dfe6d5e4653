//! Error types and handling
//!
//! This module provides the error taxonomy used throughout the Strand
//! engine. All errors implement the `StrandErrorExt` trait which provides
//! user-friendly hints and indicates whether errors are recoverable.
//!
//! The taxonomy encodes the retry policy directly:
//!
//! - **Validation**: bad or missing directive parameters — never retried,
//!   surfaced as a note so the model can self-correct.
//! - **Permission**: insufficient caller role — never retried.
//! - **Transient**: timeout / network — eligible for exactly one executor
//!   retry, and for backoff retry at the model-call boundary.
//! - **ParseFailure**: model output contained no recognizable directive —
//!   recorded, never thrown across the workflow.
//! - **CeilingExceeded**: iteration or retry budget exhausted — terminal.

use thiserror::Error;

/// Trait for Strand error extensions
///
/// Provides additional context for errors: a hint safe to show to end
/// users and a flag indicating whether a retry can possibly succeed.
pub trait StrandErrorExt {
    /// Returns a user-friendly hint for the error
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried or worked around. Non-recoverable
    /// errors require either a corrected directive or operator attention.
    fn is_recoverable(&self) -> bool;
}

/// Classified cause of a transient failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    /// Operation exceeded its deadline
    Timeout,

    /// Connection-level failure (refused, reset, DNS)
    Network,
}

impl std::fmt::Display for TransientKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransientKind::Timeout => write!(f, "timeout"),
            TransientKind::Network => write!(f, "network"),
        }
    }
}

/// Main execution error type
///
/// Represents every failure class a directive or workflow can surface.
/// Variants carry enough context (capability name, parameter name) to
/// reconstruct the failure from the debug artifact.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Directive parameters failed validation
    #[error("Validation error for '{capability}': {reason}")]
    Validation { capability: String, reason: String },

    /// Caller role does not satisfy the capability's permission tier
    #[error("Permission denied for '{capability}': requires {required}")]
    Permission {
        capability: String,
        required: String,
    },

    /// Transient failure (timeout or network), eligible for one retry
    #[error("Transient {kind} error: {reason}")]
    Transient { kind: TransientKind, reason: String },

    /// Model output contained no recognizable directive
    #[error("Parse failure: {0}")]
    ParseFailure(String),

    /// Iteration or retry budget exhausted
    #[error("Ceiling exceeded: {0}")]
    CeilingExceeded(String),

    /// Referenced capability is not registered
    #[error("Capability not found: {0}")]
    NotFound(String),

    /// Unclassified handler failure
    #[error("Execution error: {0}")]
    Unknown(String),
}

impl StrandErrorExt for ExecError {
    fn user_hint(&self) -> &str {
        match self {
            ExecError::Validation { .. } => {
                "The action's parameters were invalid. Rephrase the action with the required arguments."
            }
            ExecError::Permission { .. } => {
                "You do not have permission to run this action."
            }
            ExecError::Transient { .. } => {
                "A temporary failure occurred. The action will be retried once."
            }
            ExecError::ParseFailure(_) => {
                "The reply contained no recognizable action. It was treated as plain text."
            }
            ExecError::CeilingExceeded(_) => {
                "The task hit its iteration limit before finishing."
            }
            ExecError::NotFound(_) => "The requested action does not exist.",
            ExecError::Unknown(_) => "The action failed for an unexpected reason.",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            ExecError::Transient { .. } => true,
            ExecError::Validation { .. } | ExecError::ParseFailure(_) => true,
            ExecError::Permission { .. }
            | ExecError::CeilingExceeded(_)
            | ExecError::NotFound(_)
            | ExecError::Unknown(_) => false,
        }
    }
}

impl ExecError {
    /// Classify a raw handler error message into a taxonomy variant.
    ///
    /// Heuristics over the message text, mirroring how transports tag
    /// their failures: deadline words map to `Timeout`, connection words
    /// to `Network`, argument words to `Validation`, and everything else
    /// to `Unknown`.
    pub fn classify(capability: &str, message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("timeout") || lower.contains("timed out") || lower.contains("deadline") {
            ExecError::Transient {
                kind: TransientKind::Timeout,
                reason: message.to_string(),
            }
        } else if lower.contains("connection")
            || lower.contains("network")
            || lower.contains("refused")
            || lower.contains("unreachable")
            || lower.contains("dns")
        {
            ExecError::Transient {
                kind: TransientKind::Network,
                reason: message.to_string(),
            }
        } else if lower.contains("permission") || lower.contains("forbidden") {
            ExecError::Permission {
                capability: capability.to_string(),
                required: "elevated role".to_string(),
            }
        } else if lower.contains("invalid") || lower.contains("missing") || lower.contains("argument")
        {
            ExecError::Validation {
                capability: capability.to_string(),
                reason: message.to_string(),
            }
        } else {
            ExecError::Unknown(message.to_string())
        }
    }
}
