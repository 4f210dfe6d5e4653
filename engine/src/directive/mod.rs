//! Directive parsing
//!
//! Turns a block of free model text into an ordered list of typed
//! directives (tool-call intents) plus the residual clean text. Each
//! capability contributes a matcher — a pure `(text) -> (matches,
//! remaining_text)` function — and the parser folds the matchers in
//! registration order, passing the progressively-cleaned text along.
//! Matchers blank matched spans with [`STRIP_PAD`] instead of removing
//! them, so every offset stays in the original text's coordinate system
//! and cross-capability ordering is by true source position; the parser
//! strips the padding from the final clean text.
//!
//! The default text protocol is bracket-delimited:
//!
//! ```text
//! [restart: {"service": "gateway"}]
//! [health_check]
//! ```
//!
//! Unmatched bracket-like text is left in the clean text and treated as
//! prose, never as an error.

pub mod executor;
pub mod scheduler;

use crate::capability::CapabilityRegistry;
use crate::llm::extract_balanced_json;
use sdk::DirectiveMatch;

/// Byte filler matchers use in place of a consumed span (U+001A
/// SUBSTITUTE). One pad byte per consumed byte keeps later matchers'
/// offsets aligned with the original text.
pub const STRIP_PAD: char = '\u{1A}';

/// One parsed tool-call intent
#[derive(Debug, Clone)]
pub struct Directive {
    /// Stable id within one parse batch ("d1", "d2", ... unless the
    /// model supplied its own)
    pub id: String,

    /// Capability name
    pub kind: String,

    /// Extracted parameters (always a JSON object)
    pub params: serde_json::Value,

    /// Character offset where the directive appeared in its source text.
    /// Execution order is primarily by offset; offset-less directives
    /// sort after offset-bearing ones.
    pub order: Option<usize>,

    /// Ids of directives this one declares a dependency on
    pub depends_on: Vec<String>,
}

impl Directive {
    /// Build a directive directly (used by tests and by synthesized
    /// correction passes).
    pub fn new(kind: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            id: String::new(),
            kind: kind.into(),
            params,
            order: None,
            depends_on: Vec::new(),
        }
    }
}

/// Default bracket-marker matcher for a capability name.
///
/// Matches `[name]` and `[name: {json object}]`, tolerating nested braces
/// inside the parameter object. Returns the matches with their source
/// offsets and the text with each marker blanked to [`STRIP_PAD`] bytes
/// of the same length.
pub fn default_match(name: &str, text: &str) -> (Vec<DirectiveMatch>, String) {
    let mut matches = Vec::new();
    let mut cleaned = String::with_capacity(text.len());
    let marker = format!("[{}", name);
    let mut rest = text;
    let mut consumed = 0usize;

    while let Some(pos) = rest.find(&marker) {
        let after = &rest[pos + marker.len()..];

        // Marker must be terminated by ']' or ': {...}]'; anything else
        // (e.g. a prefix of a longer name) is prose.
        let parsed = if let Some(stripped) = after.strip_prefix(']') {
            Some((serde_json::json!({}), after.len() - stripped.len()))
        } else if let Some(stripped) = after.strip_prefix(':') {
            let body = stripped.trim_start();
            let skipped = stripped.len() - body.len();
            extract_balanced_json(body).and_then(|obj| {
                let json_len = obj.len();
                let tail = &body[json_len..];
                let tail_trim = tail.trim_start();
                if tail_trim.starts_with(']') {
                    let params: serde_json::Value = serde_json::from_str(obj).ok()?;
                    let end = 1 + skipped + json_len + (tail.len() - tail_trim.len()) + 1;
                    Some((params, end))
                } else {
                    None
                }
            })
        } else {
            None
        };

        match parsed {
            Some((params, after_len)) => {
                cleaned.push_str(&rest[..pos]);
                matches.push(DirectiveMatch {
                    params,
                    offset: Some(consumed + pos),
                });
                let span = marker.len() + after_len;
                cleaned.extend(std::iter::repeat(STRIP_PAD).take(span));
                let advance = pos + span;
                consumed += advance;
                rest = &rest[advance..];
            }
            None => {
                // Not a real marker; keep it as prose and move past it
                cleaned.push_str(&rest[..pos + marker.len()]);
                consumed += pos + marker.len();
                rest = &rest[pos + marker.len()..];
            }
        }
    }

    cleaned.push_str(rest);
    (matches, cleaned)
}

/// Parse model text into ordered directives plus the residual clean text.
///
/// `top_level` is false when parsing inside a running workflow; matches
/// for capabilities flagged top-level-only are then stripped silently
/// rather than returned (nested workflow starts are illegal).
pub fn parse(
    text: &str,
    registry: &CapabilityRegistry,
    top_level: bool,
) -> (Vec<Directive>, String) {
    // Pre-existing pad bytes would corrupt offset accounting
    let mut current: String = text.chars().filter(|c| *c != STRIP_PAD).collect();
    let mut raw: Vec<(String, DirectiveMatch)> = Vec::new();

    for def in registry.iter() {
        let (matches, cleaned) = match &def.matcher {
            Some(custom) => custom(&current),
            None => default_match(&def.name, &current),
        };
        current = cleaned;

        if def.top_level_only && !top_level {
            if !matches.is_empty() {
                tracing::debug!(
                    "Stripped {} nested '{}' directive(s)",
                    matches.len(),
                    def.name
                );
            }
            continue;
        }

        for m in matches {
            raw.push((def.name.clone(), m));
        }
    }

    // Primary order: source offset; offset-less matches sort after all
    // offset-bearing ones, preserving relative insertion order.
    raw.sort_by_key(|(_, m)| m.offset.unwrap_or(usize::MAX));

    let directives = raw
        .into_iter()
        .enumerate()
        .map(|(i, (kind, m))| {
            let id = m
                .params
                .get("id")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .unwrap_or_else(|| format!("d{}", i + 1));
            let depends_on = m
                .params
                .get("depends_on")
                .and_then(|v| v.as_array())
                .map(|deps| {
                    deps.iter()
                        .filter_map(|d| d.as_str().map(|s| s.to_string()))
                        .collect()
                })
                .unwrap_or_default();
            Directive {
                id,
                kind,
                params: m.params,
                order: m.offset,
                depends_on,
            }
        })
        .collect();

    let clean: String = current.chars().filter(|c| *c != STRIP_PAD).collect();
    (directives, clean)
}
