//! Threshold, dedup, and token-budget packing
//!
//! Post-scoring selection: an adaptive relevance cut, near-duplicate
//! collapse, and greedy packing of the survivors into a caller-supplied
//! token budget with sentence-boundary-aware compression of the final
//! overflowing candidate.

use std::collections::HashSet;

use super::scoring::tokenize;
use super::ContextCandidate;

/// Rough chars-per-token estimate for budget accounting
const CHARS_PER_TOKEN: usize = 4;

/// Adaptive relevance threshold over a score distribution.
///
/// The smaller of (mean − 0.5·stddev) and the 25th percentile, floored
/// at `floor`. Tight when scores cluster, lenient when they spread.
pub fn adaptive_threshold(scores: &[f64], floor: f64) -> f64 {
    if scores.is_empty() {
        return floor;
    }

    let n = scores.len() as f64;
    let mean = scores.iter().sum::<f64>() / n;
    let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
    let cut = (mean - 0.5 * variance.sqrt()).min(percentile(scores, 0.25));
    cut.max(floor)
}

fn percentile(scores: &[f64], p: f64) -> f64 {
    let mut sorted = scores.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let idx = ((sorted.len() - 1) as f64 * p).round() as usize;
    sorted[idx]
}

/// Plain Jaccard similarity over token sets
pub fn jaccard(a: &str, b: &str) -> f64 {
    let ta: HashSet<String> = tokenize(a).into_iter().collect();
    let tb: HashSet<String> = tokenize(b).into_iter().collect();
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let intersection = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    intersection / union
}

/// Collapse near-duplicates, keeping the higher-scoring item.
///
/// `candidates` must already be sorted by descending final score, so a
/// simple keep-first scan preserves the winners. Running the result
/// through `dedup` again is a no-op.
pub fn dedup(candidates: Vec<ContextCandidate>, cutoff: f64) -> Vec<ContextCandidate> {
    let mut kept: Vec<ContextCandidate> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let duplicate = kept
            .iter()
            .any(|existing| jaccard(&existing.text, &candidate.text) > cutoff);
        if !duplicate {
            kept.push(candidate);
        }
    }
    kept
}

/// Estimate the token cost of a snippet
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN).max(1)
}

/// Truncate text to roughly `max_tokens`, preferring sentence
/// boundaries. Falls back to a hard character cut when not even the
/// first sentence fits.
pub fn compress_to(text: &str, max_tokens: usize) -> String {
    let budget_chars = max_tokens * CHARS_PER_TOKEN;
    if text.chars().count() <= budget_chars {
        return text.to_string();
    }

    let mut out = String::new();
    let mut sentence = String::new();
    for ch in text.chars() {
        sentence.push(ch);
        if matches!(ch, '.' | '!' | '?' | '\n' | '。' | '！' | '？') {
            if out.chars().count() + sentence.chars().count() > budget_chars {
                break;
            }
            out.push_str(&sentence);
            sentence.clear();
        }
    }

    if out.is_empty() {
        // No sentence boundary fits; hard cut on a char boundary
        out = text.chars().take(budget_chars).collect();
    }
    out.trim_end().to_string()
}

/// Greedily pack ranked candidates into a token budget.
///
/// Candidates are taken in the given (priority) order — the ranker's
/// composite score, which already folds attention overlap in when
/// embeddings are present. The first one
/// that would overflow is compressed to the remaining budget and
/// included once, provided at least `min_pack_tokens` remain. Packing
/// stops at the first overflow either way.
pub fn pack_into_budget(
    candidates: &[ContextCandidate],
    budget_tokens: usize,
    min_pack_tokens: usize,
) -> Vec<String> {
    let mut packed = Vec::new();
    let mut used = 0usize;

    for candidate in candidates {
        let cost = estimate_tokens(&candidate.text);
        if used + cost <= budget_tokens {
            packed.push(candidate.text.clone());
            used += cost;
            continue;
        }

        let remaining = budget_tokens.saturating_sub(used);
        if remaining >= min_pack_tokens {
            let compressed = compress_to(&candidate.text, remaining);
            if !compressed.is_empty() {
                packed.push(compressed);
            }
        }
        break;
    }

    packed
}
