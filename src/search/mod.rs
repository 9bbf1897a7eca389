//! Interchangeable retrieval backends and the fusion that merges them.

pub mod bm25;
pub mod corpus;
pub mod entities;
pub mod fulltext;
pub mod fusion;
pub mod hybrid;
pub mod learned;
pub mod proximity;
pub mod substring;
pub mod tfidf;
pub mod tokenize;
pub mod vector;

use async_trait::async_trait;
use std::sync::Arc;

use crate::models::{CorpusDocument, RetrievedDocument, SourceKind};

/// One retrieval strategy. Every implementation takes a batch of queries
/// and returns up to `limit_per_query` scored documents per query, in query
/// order. Backends never fail: connectivity or index errors are logged and
/// yield partial or empty results.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Retrieval family the results are tagged with.
    fn source(&self) -> SourceKind;

    async fn search(&self, queries: &[String], limit_per_query: usize) -> Vec<RetrievedDocument>;
}

/// Read-only access to the corpus for the in-process rankers.
pub trait CandidateStore: Send + Sync {
    /// Documents containing at least one word of `query` (case-insensitive
    /// substring), in corpus order.
    fn any_word(&self, query: &str) -> Vec<CorpusDocument>;

    /// Documents containing every word of `query`, in corpus order, at most
    /// `limit`.
    fn all_words(&self, query: &str, limit: usize) -> Vec<CorpusDocument>;
}

/// Scores a prefiltered candidate set against one query. `score` returns one
/// value per candidate, parallel to `candidates`.
pub trait CandidateScorer: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn score(&self, query: &str, candidates: &[CorpusDocument]) -> Vec<f64>;
}

/// Prefilter by substring, then rank with a [`CandidateScorer`]. Ties keep
/// candidate order.
pub struct RerankingBackend<S> {
    store: Arc<dyn CandidateStore>,
    scorer: Arc<S>,
}

impl<S: CandidateScorer> RerankingBackend<S> {
    pub fn new(store: Arc<dyn CandidateStore>, scorer: S) -> Self {
        Self {
            store,
            scorer: Arc::new(scorer),
        }
    }
}

/// Rank the candidates for a single query.
pub fn rank_query(
    store: &dyn CandidateStore,
    scorer: &dyn CandidateScorer,
    query: &str,
    limit: usize,
) -> Vec<RetrievedDocument> {
    let candidates = store.any_word(query);
    if candidates.is_empty() {
        return Vec::new();
    }

    let scores = scorer.score(query, &candidates);
    let mut ranked: Vec<(f64, CorpusDocument)> = scores.into_iter().zip(candidates).collect();
    ranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(limit);

    ranked
        .into_iter()
        .map(|(score, doc)| doc.into_retrieved(score as f32, SourceKind::Lexical))
        .collect()
}

/// Trimmed, non-empty queries.
pub fn clean_queries(queries: &[String]) -> Vec<String> {
    queries
        .iter()
        .map(|q| q.trim())
        .filter(|q| !q.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl<S: CandidateScorer> SearchBackend for RerankingBackend<S> {
    fn name(&self) -> &'static str {
        self.scorer.name()
    }

    fn source(&self) -> SourceKind {
        SourceKind::Lexical
    }

    async fn search(&self, queries: &[String], limit_per_query: usize) -> Vec<RetrievedDocument> {
        let queries = clean_queries(queries);
        if queries.is_empty() || limit_per_query == 0 {
            return Vec::new();
        }

        let store = self.store.clone();
        let scorer = self.scorer.clone();
        let result = tokio::task::spawn_blocking(move || {
            queries
                .iter()
                .flat_map(|q| rank_query(store.as_ref(), scorer.as_ref(), q, limit_per_query))
                .collect::<Vec<_>>()
        })
        .await;

        match result {
            Ok(docs) => docs,
            Err(e) => {
                tracing::warn!("{} search task failed: {e}", self.name());
                Vec::new()
            }
        }
    }
}
