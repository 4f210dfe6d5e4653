//! Relevance scoring primitives
//!
//! Tokenization, BM25 with an IDF table, cosine similarity, attention
//! weighting, and the modifier terms (time decay, keyword boost, length
//! penalty) combined into the composite relevance score.

use std::collections::{HashMap, HashSet};

/// BM25 term-frequency saturation constant
pub const BM25_K1: f64 = 1.5;

/// BM25 length normalization constant
pub const BM25_B: f64 = 0.75;

/// Tokenize text into a language-agnostic unigram + bigram stream.
///
/// ASCII alphanumeric runs become whole-word tokens; non-ASCII runs
/// (logographic scripts have no word boundaries) emit each character and
/// each adjacent character bigram.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut ascii_word = String::new();
    let mut prev_wide: Option<char> = None;

    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            ascii_word.push(ch.to_ascii_lowercase());
            prev_wide = None;
        } else {
            if !ascii_word.is_empty() {
                tokens.push(std::mem::take(&mut ascii_word));
            }
            if ch.is_alphanumeric() {
                tokens.push(ch.to_string());
                if let Some(prev) = prev_wide {
                    tokens.push(format!("{}{}", prev, ch));
                }
                prev_wide = Some(ch);
            } else {
                prev_wide = None;
            }
        }
    }
    if !ascii_word.is_empty() {
        tokens.push(ascii_word);
    }
    tokens
}

/// Inverse document frequency table over a candidate pool
#[derive(Debug, Clone)]
pub struct IdfTable {
    doc_count: usize,
    doc_freq: HashMap<String, usize>,
    avg_len: f64,
}

impl IdfTable {
    /// Build the table from pre-tokenized documents
    pub fn build(docs: &[Vec<String>]) -> Self {
        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        let mut total_len = 0usize;

        for doc in docs {
            total_len += doc.len();
            let unique: HashSet<&String> = doc.iter().collect();
            for token in unique {
                *doc_freq.entry(token.clone()).or_insert(0) += 1;
            }
        }

        Self {
            doc_count: docs.len(),
            doc_freq,
            avg_len: if docs.is_empty() {
                0.0
            } else {
                total_len as f64 / docs.len() as f64
            },
        }
    }

    /// Smoothed IDF for a token
    pub fn idf(&self, token: &str) -> f64 {
        let df = self.doc_freq.get(token).copied().unwrap_or(0) as f64;
        let n = self.doc_count as f64;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }

    /// Raw BM25 score of a document against query tokens
    pub fn bm25(&self, query_tokens: &[String], doc_tokens: &[String]) -> f64 {
        if doc_tokens.is_empty() || self.avg_len == 0.0 {
            return 0.0;
        }

        let mut tf: HashMap<&String, f64> = HashMap::new();
        for token in doc_tokens {
            *tf.entry(token).or_insert(0.0) += 1.0;
        }

        let len_ratio = doc_tokens.len() as f64 / self.avg_len;
        let mut score = 0.0;
        for token in query_tokens {
            let Some(&freq) = tf.get(token) else {
                continue;
            };
            let idf = self.idf(token);
            score += idf * (freq * (BM25_K1 + 1.0))
                / (freq + BM25_K1 * (1.0 - BM25_B + BM25_B * len_ratio));
        }
        score
    }
}

/// Squash a non-negative raw BM25 score into [0, 1) through a logistic
/// function centered at zero.
pub fn logistic_squash(raw: f64) -> f64 {
    let sigmoid = 1.0 / (1.0 + (-0.5 * raw).exp());
    ((sigmoid - 0.5) * 2.0).clamp(0.0, 1.0)
}

/// Cosine similarity remapped from [-1, 1] into [0, 1].
///
/// Zero-magnitude vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let cos = dot / (norm_a.sqrt() * norm_b.sqrt());
    ((cos + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// Softmax-normalized TF-IDF attention weights for query tokens.
///
/// Higher-IDF (rarer) query tokens receive proportionally more weight;
/// the weights sum to 1.
pub fn attention_weights(query_tokens: &[String], idf: &IdfTable) -> HashMap<String, f64> {
    if query_tokens.is_empty() {
        return HashMap::new();
    }

    let raw: Vec<(String, f64)> = query_tokens
        .iter()
        .map(|t| (t.clone(), idf.idf(t)))
        .collect();
    let max = raw
        .iter()
        .map(|(_, w)| *w)
        .fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<(String, f64)> = raw
        .into_iter()
        .map(|(t, w)| (t, (w - max).exp()))
        .collect();
    let sum: f64 = exps.iter().map(|(_, e)| e).sum();

    exps.into_iter().map(|(t, e)| (t, e / sum)).collect()
}

/// Share of attention mass the candidate's tokens cover, in [0, 1].
pub fn attention_overlap(weights: &HashMap<String, f64>, doc_tokens: &[String]) -> f64 {
    if weights.is_empty() {
        return 0.0;
    }
    let doc: HashSet<&String> = doc_tokens.iter().collect();
    weights
        .iter()
        .filter(|(token, _)| doc.contains(token))
        .map(|(_, w)| w)
        .sum()
}

/// Exponential half-life decay: 1.0 at age zero, 0.5 at one half-life.
pub fn time_decay(age_days: f64, half_life_days: f64) -> f64 {
    if age_days <= 0.0 {
        return 1.0;
    }
    (-std::f64::consts::LN_2 * age_days / half_life_days).exp()
}

/// Sigmoid-smoothed Jaccard overlap between query and candidate tokens.
pub fn keyword_boost(query_tokens: &[String], doc_tokens: &[String]) -> f64 {
    let q: HashSet<&String> = query_tokens.iter().collect();
    let d: HashSet<&String> = doc_tokens.iter().collect();
    if q.is_empty() || d.is_empty() {
        return 0.0;
    }
    let intersection = q.intersection(&d).count() as f64;
    let union = q.union(&d).count() as f64;
    let jaccard = intersection / union;
    1.0 / (1.0 + (-(jaccard * 10.0 - 5.0)).exp())
}

/// Gaussian penalty on log(len/ideal): 1.0 at the ideal length, falling
/// off for both very short and very long candidates.
pub fn length_penalty(len: usize, ideal_len: usize) -> f64 {
    if len == 0 || ideal_len == 0 {
        return 0.0;
    }
    let x = (len as f64 / ideal_len as f64).ln();
    (-(x * x) / 2.0).exp()
}

/// Composite relevance score, clamped to [0, 1]:
/// `(base*0.6 + keyword*kw_weight) * decay * (0.5 + 0.5*len_penalty)`
pub fn composite_score(
    base_similarity: f64,
    keyword: f64,
    kw_weight: f64,
    decay: f64,
    len_penalty: f64,
) -> f64 {
    ((base_similarity * 0.6 + keyword * kw_weight) * decay * (0.5 + 0.5 * len_penalty))
        .clamp(0.0, 1.0)
}
