use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::llm::embeddings::{Embedder, HttpEmbedder, SharedEmbedder};
use crate::llm::provider::HttpLanguageModel;
use crate::llm::LanguageModel;
use crate::pipeline::Pipeline;
use crate::search::corpus::InMemoryCorpus;
use crate::search::fulltext::FullTextIndex;
use crate::search::hybrid::{BackendDeps, HybridSearcher};
use crate::search::vector::VectorStore;
use crate::validation::identifiers::{FileIdentifiers, IdentifierRegistry, IdentifierSource};

/// Everything that talks to the outside world. Production wiring uses the
/// HTTP provider; tests pass fakes.
pub struct Collaborators {
    pub synthesis_llm: Arc<dyn LanguageModel>,
    pub expansion_llm: Arc<dyn LanguageModel>,
    pub embedder: Arc<dyn Embedder>,
    pub identifiers: Arc<dyn IdentifierSource>,
}

/// Indexes the backends read from.
pub struct Stores {
    pub corpus: Arc<InMemoryCorpus>,
    pub fulltext: Arc<FullTextIndex>,
    pub vectors: Arc<VectorStore>,
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub corpus: Arc<InMemoryCorpus>,
    pub fulltext: Arc<FullTextIndex>,
    pub vectors: Arc<VectorStore>,
    pub embedder: Arc<dyn Embedder>,
    pub searcher: Arc<HybridSearcher>,
    pub registry: Arc<IdentifierRegistry>,
    pub pipeline: Arc<Pipeline>,
    pub chat_semaphore: Arc<tokio::sync::Semaphore>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self> {
        std::fs::create_dir_all(config.index_dir())?;
        std::fs::create_dir_all(config.vector_dir())?;

        let corpus = Arc::new(InMemoryCorpus::load(&config.corpus_path)?);
        let fulltext = FullTextIndex::open_or_create(&config.index_dir()).context("Failed to open full-text index")?;
        let vectors = VectorStore::open_or_create(&config.vector_dir()).context("Failed to open vector store")?;

        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()?;

        let synthesis_llm: Arc<dyn LanguageModel> =
            Arc::new(HttpLanguageModel::new(http_client.clone(), config.llm.clone()));
        let expansion_llm: Arc<dyn LanguageModel> = Arc::new(
            HttpLanguageModel::new(http_client.clone(), config.llm.for_expansion()).with_temperature(0.0),
        );
        let embedder: Arc<dyn Embedder> = Arc::new(SharedEmbedder::from_embedder(Arc::new(HttpEmbedder::new(
            http_client,
            config.llm.clone(),
        ))));
        let identifiers: Arc<dyn IdentifierSource> = match &config.identifiers_path {
            Some(path) => Arc::new(FileIdentifiers::new(path)),
            None => corpus.clone(),
        };

        let stores = Stores {
            corpus,
            fulltext: Arc::new(fulltext),
            vectors: Arc::new(vectors),
        };
        let collaborators = Collaborators {
            synthesis_llm,
            expansion_llm,
            embedder,
            identifiers,
        };
        Ok(Self::assemble(config, stores, collaborators))
    }

    /// Wire the searcher, registry and pipeline from already built parts.
    pub fn assemble(config: Config, stores: Stores, collaborators: Collaborators) -> Self {
        let deps = BackendDeps {
            corpus: stores.corpus.clone(),
            fulltext: stores.fulltext.clone(),
            vectors: stores.vectors.clone(),
            embedder: collaborators.embedder.clone(),
            entity_llm: Some(collaborators.expansion_llm.clone()),
        };
        let searcher = Arc::new(HybridSearcher::from_config(&config.search, &deps));
        tracing::info!("Search backends: {}", searcher.backend_names().join(", "));

        let registry = Arc::new(IdentifierRegistry::new(collaborators.identifiers));
        let pipeline = Arc::new(Pipeline::new(
            collaborators.expansion_llm,
            collaborators.synthesis_llm,
            searcher.clone(),
            registry.clone(),
            &config,
        ));
        let max_concurrent_chats = config.max_concurrent_chats.max(1);

        Self {
            config: Arc::new(config),
            corpus: stores.corpus,
            fulltext: stores.fulltext,
            vectors: stores.vectors,
            embedder: collaborators.embedder,
            searcher,
            registry,
            pipeline,
            chat_semaphore: Arc::new(tokio::sync::Semaphore::new(max_concurrent_chats)),
        }
    }

    /// Rebuild the full-text index from the corpus. Blocking.
    pub fn rebuild_fulltext(&self) -> Result<usize> {
        self.fulltext.rebuild(self.corpus.documents())
    }

    /// Embed corpus documents the vector store does not hold yet.
    pub async fn index_vectors(&self) -> Result<usize> {
        self.vectors
            .index_missing(self.corpus.documents(), self.embedder.as_ref())
            .await
    }
}
