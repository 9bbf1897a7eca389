use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::llm::embeddings::{embed_query, Embedder};
use crate::models::{CorpusDocument, RetrievedDocument, SourceKind};
use crate::search::{clean_queries, SearchBackend};

/// Prefix for document texts with instruction-tuned embedding models.
pub const PASSAGE_PREFIX: &str = "passage: ";
const EMBED_BATCH: usize = 32;

/// A stored vector entry
#[derive(Debug, Clone, Serialize, Deserialize)]
struct VectorEntry {
    identifier: String,
    title: String,
    content: String,
    embedding: Vec<f32>,
}

/// In-memory store of precomputed document embeddings with disk persistence
/// and cosine-distance search.
pub struct VectorStore {
    entries: RwLock<Vec<VectorEntry>>,
    persist_path: Option<PathBuf>,
}

impl VectorStore {
    pub fn open_or_create(vector_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(vector_dir)?;
        let persist_path = vector_dir.join("vectors.json");

        let entries = if persist_path.exists() {
            let data = std::fs::read_to_string(&persist_path)
                .context("Failed to read vector store")?;
            serde_json::from_str(&data).unwrap_or_else(|e| {
                tracing::warn!("Vector store is corrupt, starting empty: {e}");
                Vec::new()
            })
        } else {
            Vec::new()
        };

        Ok(Self {
            entries: RwLock::new(entries),
            persist_path: Some(persist_path),
        })
    }

    /// Store that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            persist_path: None,
        }
    }

    /// Add or replace documents. `embeddings` must be parallel with `documents`.
    pub fn upsert(&self, documents: &[CorpusDocument], embeddings: Vec<Vec<f32>>) -> Result<()> {
        {
            let mut entries = self.entries.write();
            for (doc, embedding) in documents.iter().zip(embeddings) {
                let entry = VectorEntry {
                    identifier: doc.identifier.clone(),
                    title: doc.title.clone(),
                    content: doc.content.clone(),
                    embedding,
                };
                match entries.iter_mut().find(|e| e.identifier == doc.identifier) {
                    Some(existing) => *existing = entry,
                    None => entries.push(entry),
                }
            }
        }
        self.persist()
    }

    /// Write to a temp file and rename over the old one.
    fn persist(&self) -> Result<()> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        let data = serde_json::to_string(&*self.entries.read())?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, data).context("Failed to write vector store")?;
        std::fs::rename(&tmp_path, path).context("Failed to replace vector store")?;
        Ok(())
    }

    /// Embed every corpus document the store does not hold yet.
    pub async fn index_missing(&self, documents: &[CorpusDocument], embedder: &dyn Embedder) -> Result<usize> {
        let known: HashSet<String> = self
            .entries
            .read()
            .iter()
            .map(|e| e.identifier.clone())
            .collect();
        let missing: Vec<CorpusDocument> = documents
            .iter()
            .filter(|d| !known.contains(&d.identifier))
            .cloned()
            .collect();

        for batch in missing.chunks(EMBED_BATCH) {
            let texts: Vec<String> = batch
                .iter()
                .map(|d| format!("{PASSAGE_PREFIX}{}\n{}", d.title, d.content))
                .collect();
            let embeddings = embedder.embed(&texts).await?;
            anyhow::ensure!(
                embeddings.len() == batch.len(),
                "Embedder returned {} vectors for {} documents",
                embeddings.len(),
                batch.len()
            );
            self.upsert(batch, embeddings)?;
        }
        Ok(missing.len())
    }

    /// Nearest neighbours by cosine distance, closest first.
    pub fn nearest(&self, query_embedding: &[f32], limit: usize) -> Vec<(f32, CorpusDocument)> {
        let entries = self.entries.read();

        let mut scored: Vec<(f32, &VectorEntry)> = entries
            .iter()
            .map(|e| (cosine_distance(query_embedding, &e.embedding), e))
            .collect();

        scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);

        scored
            .into_iter()
            .map(|(distance, e)| {
                (
                    distance,
                    CorpusDocument {
                        identifier: e.identifier.clone(),
                        title: e.title.clone(),
                        content: e.content.clone(),
                    },
                )
            })
            .collect()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.read().len()
    }
}

/// `1 - cosine_similarity`; vectors that cannot be compared are maximally
/// distant.
fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 2.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        2.0
    } else {
        1.0 - dot / denom
    }
}

/// Relevance from a distance: `1 / (1 + d)`, or 1.0 for a non-positive
/// distance.
pub fn distance_to_score(distance: f32) -> f32 {
    if distance > 0.0 {
        1.0 / (1.0 + distance)
    } else {
        1.0
    }
}

/// Dense-vector backend: embeds each query with the retrieval instruction
/// and returns its nearest documents.
pub struct VectorBackend {
    store: Arc<VectorStore>,
    embedder: Arc<dyn Embedder>,
    instruction: String,
}

impl VectorBackend {
    pub fn new(store: Arc<VectorStore>, embedder: Arc<dyn Embedder>, instruction: impl Into<String>) -> Self {
        Self {
            store,
            embedder,
            instruction: instruction.into(),
        }
    }
}

#[async_trait]
impl SearchBackend for VectorBackend {
    fn name(&self) -> &'static str {
        "vector"
    }

    fn source(&self) -> SourceKind {
        SourceKind::Vector
    }

    async fn search(&self, queries: &[String], limit_per_query: usize) -> Vec<RetrievedDocument> {
        let mut results = Vec::new();
        for query in clean_queries(queries) {
            let embedding = match embed_query(self.embedder.as_ref(), &self.instruction, &query).await {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!("Vector search skipped for '{query}': {e:#}");
                    continue;
                }
            };
            results.extend(
                self.store
                    .nearest(&embedding, limit_per_query)
                    .into_iter()
                    .map(|(distance, doc)| {
                        doc.into_retrieved(distance_to_score(distance), SourceKind::Vector)
                    }),
            );
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Embeds by counting a few marker words.
    struct KeywordEmbedder;

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let t = t.to_lowercase();
                    vec![
                        t.matches("judeu").count() as f32,
                        t.matches("itali").count() as f32,
                        0.1,
                    ]
                })
                .collect())
        }
    }

    struct DownEmbedder;

    #[async_trait]
    impl Embedder for DownEmbedder {
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            anyhow::bail!("connection refused")
        }
    }

    fn docs() -> Vec<CorpusDocument> {
        vec![
            CorpusDocument {
                identifier: "judeus".into(),
                title: "Judeus".into(),
                content: "judeus no brasil".into(),
            },
            CorpusDocument {
                identifier: "italianos".into(),
                title: "Italianos".into(),
                content: "italianos em são paulo".into(),
            },
        ]
    }

    #[test]
    fn test_distance_to_score() {
        assert_eq!(distance_to_score(0.0), 1.0);
        assert_eq!(distance_to_score(-0.1), 1.0);
        assert!((distance_to_score(1.0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_distance() {
        assert!(cosine_distance(&[1.0, 0.0], &[1.0, 0.0]).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_distance(&[1.0], &[1.0, 2.0]), 2.0);
    }

    #[tokio::test]
    async fn test_index_and_search() {
        let store = Arc::new(VectorStore::in_memory());
        assert_eq!(store.index_missing(&docs(), &KeywordEmbedder).await.unwrap(), 2);
        assert_eq!(store.index_missing(&docs(), &KeywordEmbedder).await.unwrap(), 0);

        let backend = VectorBackend::new(store, Arc::new(KeywordEmbedder), "query: ");
        let hits = backend.search(&["judeus".to_string()], 1).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].identifier, "judeus");
        assert_eq!(hits[0].source, SourceKind::Vector);
        assert!(hits[0].relevance_score > 0.5);
    }

    #[tokio::test]
    async fn test_embedder_down_returns_empty() {
        let store = Arc::new(VectorStore::in_memory());
        store.upsert(&docs(), vec![vec![1.0, 0.0, 0.1], vec![0.0, 1.0, 0.1]]).unwrap();
        let backend = VectorBackend::new(store, Arc::new(DownEmbedder), "query: ");
        assert!(backend.search(&["judeus".to_string()], 3).await.is_empty());
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = VectorStore::open_or_create(dir.path()).unwrap();
            store.upsert(&docs(), vec![vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();
        }
        let reopened = VectorStore::open_or_create(dir.path()).unwrap();
        assert_eq!(reopened.entry_count(), 2);
        let nearest = reopened.nearest(&[0.0, 1.0], 1);
        assert_eq!(nearest[0].1.identifier, "italianos");
    }
}
