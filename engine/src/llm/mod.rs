//! Model Transport Abstraction Layer
//!
//! This module provides the boundary to the language model: a `Message`
//! type, a classified `ChatError`, and the `ChatProvider` trait with a
//! blocking `chat` and a streaming `chat_stream` call. The orchestrator
//! only ever sees free text back; directive extraction happens in the
//! parser, not here.
//!
//! Also hosts the tolerant JSON-extraction helpers used on model output
//! (fenced blocks, prose-embedded objects, balanced-brace scanning).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod openai;
pub mod retry;

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, ChatError>;

/// Errors that can occur at the model boundary, classified by kind so the
/// retry layer can decide what is worth retrying.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Request timed out")]
    Timeout,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl ChatError {
    /// Whether the retry layer may attempt this call again.
    ///
    /// Auth and request-shape errors never succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChatError::Timeout
                | ChatError::Network(_)
                | ChatError::Server { .. }
                | ChatError::RateLimited
        )
    }
}

/// Message in a conversation history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Role of the message sender (system, user, assistant)
    pub role: MessageRole,

    /// Content of the message
    pub content: String,
}

impl Message {
    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System message
    System,

    /// User message
    User,

    /// Assistant message
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// Callback receiving streamed completion deltas
pub type DeltaFn<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// Chat provider trait that all transports must implement
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Returns the name of the provider (e.g. "openai-compat")
    fn name(&self) -> &str;

    /// Generate a completion for the given conversation.
    ///
    /// Returns the raw assistant text; directive extraction is the
    /// parser's job.
    async fn chat(&self, messages: &[Message]) -> Result<String>;

    /// Streaming variant: `on_delta` is called for each content fragment
    /// as it arrives; the full concatenated text is returned at the end.
    ///
    /// Default implementation falls back to a single `chat` call and
    /// emits the whole reply as one delta.
    async fn chat_stream(&self, messages: &[Message], on_delta: DeltaFn<'_>) -> Result<String> {
        let text = self.chat(messages).await?;
        on_delta(&text);
        Ok(text)
    }
}

/// Extract the body of the first markdown code fence in the text.
///
/// Works even when there is trailing prose after the closing ```.
/// Returns `None` if no fenced block is found.
pub fn extract_fenced_block(content: &str) -> Option<&str> {
    let fence_start = content.find("```")?;
    let after_opening = &content[fence_start + 3..];

    // Skip the language tag line (e.g. "json\n")
    let body_start_rel = after_opening.find('\n')? + 1;
    let body_start = fence_start + 3 + body_start_rel;

    let closing = content[body_start..].find("```")?;
    let body_end = body_start + closing;

    if body_start >= body_end {
        return None;
    }

    Some(&content[body_start..body_end])
}

/// Extract a balanced JSON object starting at position 0 of `s`.
///
/// Counts `{` / `}` depth, respecting string literals, to find the
/// matching close brace.
pub fn extract_balanced_json(s: &str) -> Option<&str> {
    if !s.starts_with('{') {
        return None;
    }
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Best-effort extraction of a JSON value from free-form model output.
///
/// Tries, in order: the whole trimmed text, the first fenced block,
/// then the first `[...]` span when an array opens before any object
/// (so an array of objects is not mistaken for its first element), the
/// first balanced object found anywhere, and finally the `[...]` span.
pub fn extract_json_value(content: &str) -> Option<serde_json::Value> {
    let trimmed = content.trim();

    if let Ok(v) = serde_json::from_str(trimmed) {
        return Some(v);
    }

    if let Some(inner) = extract_fenced_block(trimmed) {
        if let Ok(v) = serde_json::from_str(inner.trim()) {
            return Some(v);
        }
    }

    let obj_pos = trimmed.find('{');
    let arr_pos = trimmed.find('[');

    let array_first = match (arr_pos, obj_pos) {
        (Some(a), Some(o)) => a < o,
        (Some(_), None) => true,
        _ => false,
    };
    if array_first {
        if let Some(v) = extract_array_span(trimmed) {
            return Some(v);
        }
    }

    if let Some(pos) = obj_pos {
        if let Some(obj) = extract_balanced_json(&trimmed[pos..]) {
            if let Ok(v) = serde_json::from_str(obj) {
                return Some(v);
            }
        }
    }

    extract_array_span(trimmed)
}

/// Parse the widest `[...]` span in the text as a JSON array, if any.
fn extract_array_span(s: &str) -> Option<serde_json::Value> {
    let start = s.find('[')?;
    let end = s.rfind(']')?;
    if start < end {
        serde_json::from_str(&s[start..=end]).ok()
    } else {
        None
    }
}
