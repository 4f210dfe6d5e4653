//! Retrieval ranker
//!
//! Scores a bounded pool of historical snippets against a query and
//! returns the most relevant ones, either by lexical BM25 (local mode)
//! or by cosine similarity over caller-supplied embeddings (remote
//! mode). Both modes apply time decay, a keyword boost, and a length
//! penalty before an adaptive threshold, dedup, and top-k selection.
//!
//! Candidates are ephemeral: scores are recomputed on every query and
//! never persisted.

pub mod packing;
pub mod scoring;

use chrono::{DateTime, Utc};

use crate::config::RetrievalConfig;
use scoring::{
    attention_overlap, attention_weights, composite_score, cosine_similarity, keyword_boost,
    length_penalty, logistic_squash, time_decay, tokenize, IdfTable,
};

/// One scored snippet of historical context
#[derive(Debug, Clone)]
pub struct ContextCandidate {
    /// Snippet text
    pub text: String,

    /// When the snippet was produced
    pub time: DateTime<Utc>,

    /// Owning user, if scoped
    pub user_id: Option<String>,

    /// Precomputed embedding, present only in remote mode
    pub embedding: Option<Vec<f32>>,

    /// BM25 (squashed) or remapped cosine, in [0, 1]
    pub base_similarity: f64,

    /// Half-life decay factor, in (0, 1]
    pub time_decay: f64,

    /// Sigmoid-smoothed Jaccard overlap with the query, in [0, 1]
    pub keyword_boost: f64,

    /// Gaussian log-length penalty, in (0, 1]
    pub length_penalty: f64,

    /// Composite relevance, in [0, 1]
    pub final_score: f64,
}

impl ContextCandidate {
    /// Build an unscored candidate
    pub fn new(text: impl Into<String>, time: DateTime<Utc>) -> Self {
        Self {
            text: text.into(),
            time,
            user_id: None,
            embedding: None,
            base_similarity: 0.0,
            time_decay: 1.0,
            keyword_boost: 0.0,
            length_penalty: 1.0,
            final_score: 0.0,
        }
    }

    /// Attach an embedding for remote-mode scoring
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Scope the candidate to a user
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// Query against the candidate pool. An embedding switches the ranker
/// into remote mode when the candidates carry embeddings too.
#[derive(Debug, Clone)]
pub struct Query {
    /// Query text (always used for the keyword boost and attention)
    pub text: String,

    /// Precomputed query embedding for remote mode
    pub embedding: Option<Vec<f32>>,
}

impl Query {
    /// A text-only query (local lexical mode)
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            embedding: None,
        }
    }

    /// A query with a precomputed embedding (remote mode)
    pub fn with_embedding(text: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            text: text.into(),
            embedding: Some(embedding),
        }
    }
}

/// Relevance ranker over a candidate pool
#[derive(Debug, Clone, Default)]
pub struct Ranker {
    config: RetrievalConfig,
}

impl Ranker {
    pub fn new(config: RetrievalConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Score the pool against the query and return the top `k`
    /// candidates by final score, ties broken by recency.
    ///
    /// Scoring runs in remote (cosine) mode when both the query and a
    /// candidate carry embeddings, falling back to lexical BM25 per
    /// candidate otherwise. After scoring, candidates below the
    /// adaptive threshold are cut and near-duplicates collapse to the
    /// higher-scoring item.
    pub fn rank(&self, pool: &[ContextCandidate], query: &Query, k: usize) -> Vec<ContextCandidate> {
        self.rank_at(pool, query, k, Utc::now())
    }

    /// `rank` with an explicit "now" for deterministic decay
    pub fn rank_at(
        &self,
        pool: &[ContextCandidate],
        query: &Query,
        k: usize,
        now: DateTime<Utc>,
    ) -> Vec<ContextCandidate> {
        if pool.is_empty() || k == 0 {
            return Vec::new();
        }

        let query_tokens = tokenize(&query.text);
        let doc_tokens: Vec<Vec<String>> = pool.iter().map(|c| tokenize(&c.text)).collect();
        let idf = IdfTable::build(&doc_tokens);
        let attention = attention_weights(&query_tokens, &idf);

        let mut scored: Vec<ContextCandidate> = pool
            .iter()
            .zip(doc_tokens.iter())
            .map(|(candidate, tokens)| {
                let mut c = candidate.clone();

                c.base_similarity = match (&query.embedding, &c.embedding) {
                    (Some(q), Some(d)) => {
                        // Cosine reweighted by how much of the query's
                        // attention mass the candidate's tokens cover.
                        let cos = cosine_similarity(q, d);
                        let att = attention_overlap(&attention, tokens);
                        (cos * (0.85 + 0.15 * att)).clamp(0.0, 1.0)
                    }
                    _ => logistic_squash(idf.bm25(&query_tokens, tokens)),
                };

                let age_days = (now - c.time).num_seconds().max(0) as f64 / 86_400.0;
                c.time_decay = time_decay(age_days, self.config.half_life_days);
                c.keyword_boost = keyword_boost(&query_tokens, tokens);
                c.length_penalty = length_penalty(c.text.chars().count(), self.config.ideal_len);
                c.final_score = composite_score(
                    c.base_similarity,
                    c.keyword_boost,
                    self.config.keyword_weight,
                    c.time_decay,
                    c.length_penalty,
                );
                c
            })
            .collect();

        let threshold = packing::adaptive_threshold(
            &scored.iter().map(|c| c.final_score).collect::<Vec<_>>(),
            self.config.score_floor,
        );
        scored.retain(|c| c.final_score >= threshold);

        // Highest score first; ties go to the newer candidate
        scored.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.time.cmp(&a.time))
        });

        let deduped = packing::dedup(scored, self.config.dedup_cutoff);
        deduped.into_iter().take(k).collect()
    }
}
