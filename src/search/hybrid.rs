use futures_util::future::{join, join_all};
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{BackendKind, SearchConfig};
use crate::llm::embeddings::Embedder;
use crate::llm::LanguageModel;
use crate::models::{ExpandedQuerySet, RetrievedDocument, SourceKind};
use crate::search::bm25::Bm25Scorer;
use crate::search::corpus::InMemoryCorpus;
use crate::search::entities::EntityExpander;
use crate::search::fulltext::{FullTextBackend, FullTextIndex};
use crate::search::fusion::{fuse, FusionConfig};
use crate::search::learned::LearnedScorer;
use crate::search::proximity::ProximityScorer;
use crate::search::substring::SubstringBackend;
use crate::search::tfidf::TfidfScorer;
use crate::search::vector::{VectorBackend, VectorStore};
use crate::search::{RerankingBackend, SearchBackend};

/// Collaborators the configured backends are built from.
#[derive(Clone)]
pub struct BackendDeps {
    pub corpus: Arc<InMemoryCorpus>,
    pub fulltext: Arc<FullTextIndex>,
    pub vectors: Arc<VectorStore>,
    pub embedder: Arc<dyn Embedder>,
    /// Model for entity sub-queries when `entity_expansion = llm`
    pub entity_llm: Option<Arc<dyn LanguageModel>>,
}

/// Instantiate one backend by kind.
pub fn build_backend(kind: BackendKind, deps: &BackendDeps, config: &SearchConfig) -> Arc<dyn SearchBackend> {
    match kind {
        BackendKind::Substring => Arc::new(SubstringBackend::new(deps.corpus.clone())),
        BackendKind::Bm25 => Arc::new(RerankingBackend::new(deps.corpus.clone(), Bm25Scorer)),
        BackendKind::Bm25Proximity => Arc::new(RerankingBackend::new(deps.corpus.clone(), ProximityScorer)),
        BackendKind::Tfidf => Arc::new(RerankingBackend::new(deps.corpus.clone(), TfidfScorer)),
        BackendKind::Learned => Arc::new(RerankingBackend::new(
            deps.corpus.clone(),
            LearnedScorer::default(),
        )),
        BackendKind::Fulltext => Arc::new(FullTextBackend::new(
            deps.fulltext.clone(),
            EntityExpander::new(
                config.entity_expansion,
                deps.entity_llm.clone(),
                Duration::from_secs(config.entity_timeout_secs),
            ),
        )),
        BackendKind::Vector => Arc::new(VectorBackend::new(
            deps.vectors.clone(),
            deps.embedder.clone(),
            config.query_instruction.clone(),
        )),
    }
}

/// Fused documents plus raw per-family hit counts.
#[derive(Debug, Clone, Default)]
pub struct HybridResults {
    pub documents: Vec<RetrievedDocument>,
    pub vector_hits: usize,
    pub lexical_hits: usize,
}

/// Fans queries out to every configured backend concurrently and fuses the
/// results. Vector-family backends receive the vector queries, lexical ones
/// the lexical queries.
pub struct HybridSearcher {
    vector_backends: Vec<Arc<dyn SearchBackend>>,
    lexical_backends: Vec<Arc<dyn SearchBackend>>,
    fusion: FusionConfig,
    nodes_per_vector_query: usize,
    nodes_per_lexical_query: usize,
}

impl HybridSearcher {
    pub fn new(
        vector_backends: Vec<Arc<dyn SearchBackend>>,
        lexical_backends: Vec<Arc<dyn SearchBackend>>,
        config: &SearchConfig,
    ) -> Self {
        Self {
            vector_backends,
            lexical_backends,
            fusion: FusionConfig::from(config),
            nodes_per_vector_query: config.nodes_per_vector_query,
            nodes_per_lexical_query: config.nodes_per_lexical_query,
        }
    }

    /// Build the backends named in `config`.
    pub fn from_config(config: &SearchConfig, deps: &BackendDeps) -> Self {
        let vector = config
            .vector_backends
            .iter()
            .map(|kind| build_backend(*kind, deps, config))
            .collect();
        let lexical = config
            .lexical_backends
            .iter()
            .map(|kind| build_backend(*kind, deps, config))
            .collect();
        Self::new(vector, lexical, config)
    }

    pub fn backend_names(&self) -> Vec<&'static str> {
        self.vector_backends
            .iter()
            .chain(&self.lexical_backends)
            .map(|b| b.name())
            .collect()
    }

    /// Search an expanded query set with the per-query node limits.
    pub async fn search(&self, queries: &ExpandedQuerySet) -> HybridResults {
        self.run(
            &queries.vector_queries,
            &queries.lexical_queries,
            self.nodes_per_vector_query,
            self.nodes_per_lexical_query,
        )
        .await
    }

    /// Search one unexpanded query in both families, each filling its own cap.
    pub async fn search_raw(&self, query: &str) -> HybridResults {
        let queries = vec![query.to_string()];
        self.run(&queries, &queries, self.fusion.max_vector, self.fusion.max_lexical)
            .await
    }

    /// Same query list for both families with a caller-chosen limit.
    pub async fn search_queries(&self, queries: &[String], limit_per_query: usize) -> HybridResults {
        self.run(queries, queries, limit_per_query, limit_per_query).await
    }

    async fn run(
        &self,
        vector_queries: &[String],
        lexical_queries: &[String],
        vector_limit: usize,
        lexical_limit: usize,
    ) -> HybridResults {
        let vector_calls = self
            .vector_backends
            .iter()
            .map(|b| isolated(b.as_ref(), vector_queries, vector_limit));
        let lexical_calls = self
            .lexical_backends
            .iter()
            .map(|b| isolated(b.as_ref(), lexical_queries, lexical_limit));

        let (vector_sets, lexical_sets) = join(join_all(vector_calls), join_all(lexical_calls)).await;

        let count = |sets: &[Vec<RetrievedDocument>], kind: SourceKind| {
            sets.iter().flatten().filter(|d| d.source == kind).count()
        };
        let all_sets: Vec<Vec<RetrievedDocument>> = vector_sets.into_iter().chain(lexical_sets).collect();
        let vector_hits = count(&all_sets, SourceKind::Vector);
        let lexical_hits = count(&all_sets, SourceKind::Lexical);

        let documents = fuse(all_sets, &self.fusion);
        tracing::info!(
            vector_hits,
            lexical_hits,
            fused = documents.len(),
            "Hybrid search complete"
        );

        HybridResults {
            documents,
            vector_hits,
            lexical_hits,
        }
    }
}

/// One backend call. A panic inside the backend counts as no results so the
/// other backends still contribute.
async fn isolated(backend: &dyn SearchBackend, queries: &[String], limit: usize) -> Vec<RetrievedDocument> {
    match AssertUnwindSafe(backend.search(queries, limit)).catch_unwind().await {
        Ok(docs) => docs,
        Err(_) => {
            tracing::warn!(backend = backend.name(), "Search backend panicked, ignoring its results");
            Vec::new()
        }
    }
}
