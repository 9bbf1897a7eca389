use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

use crate::config::LlmConfig;
use crate::llm::prompt::truncate_chars;

/// Maximum characters sent per text to the embedding API.
/// Multilingual sentence models top out at 512 tokens; 2 000 chars of
/// Portuguese prose stays under that.
const MAX_EMBED_CHARS: usize = 2_000;

/// Something that turns texts into dense vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed one query with the retrieval instruction prefix (e.g. "query: ").
pub async fn embed_query(embedder: &dyn Embedder, instruction: &str, query: &str) -> Result<Vec<f32>> {
    let text = format!("{instruction}{query}");
    embedder
        .embed(&[text])
        .await?
        .into_iter()
        .next()
        .context("No embedding returned")
}

// ─── HTTP provider ───────────────────────────────────────

/// Embeddings from Ollama or an OpenAI-compatible API.
#[derive(Clone)]
pub struct HttpEmbedder {
    client: reqwest::Client,
    config: LlmConfig,
}

impl HttpEmbedder {
    pub fn new(client: reqwest::Client, config: LlmConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        embed_batch(&self.client, &self.config, texts).await
    }
}

/// Generate embeddings for a batch of texts using the configured LLM provider.
pub async fn embed_batch(
    client: &reqwest::Client,
    config: &LlmConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let truncated: Vec<String> = texts
        .iter()
        .map(|t| truncate_chars(t, MAX_EMBED_CHARS).to_string())
        .collect();

    match config.provider.as_str() {
        "ollama" => embed_ollama(client, config, &truncated).await,
        "openai" => embed_openai(client, config, &truncated).await,
        other => anyhow::bail!("Unknown LLM provider: {other}"),
    }
}

#[derive(Serialize)]
struct OllamaEmbedRequest {
    model: String,
    input: Vec<String>,
    truncate: bool,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

async fn embed_ollama(
    client: &reqwest::Client,
    config: &LlmConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let url = format!("{}/api/embed", config.base_url);
    let mut all_embeddings = Vec::with_capacity(texts.len());

    for chunk in texts.chunks(32) {
        let req = OllamaEmbedRequest {
            model: config.embedding_model.clone(),
            input: chunk.to_vec(),
            truncate: true,
        };

        let resp = client
            .post(&url)
            .json(&req)
            .send()
            .await
            .context("Failed to call Ollama embed API")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Ollama embed API returned {status}: {body}");
        }

        let body: OllamaEmbedResponse = resp
            .json()
            .await
            .context("Failed to parse Ollama embed response")?;
        all_embeddings.extend(body.embeddings);
    }

    Ok(all_embeddings)
}

#[derive(Serialize)]
struct OpenAiEmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedData>,
}

#[derive(Deserialize)]
struct OpenAiEmbedData {
    embedding: Vec<f32>,
}

async fn embed_openai(
    client: &reqwest::Client,
    config: &LlmConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let url = format!("{}/v1/embeddings", config.base_url);
    let api_key = config.api_key.as_deref().unwrap_or_default();
    let mut all_embeddings = Vec::with_capacity(texts.len());

    for chunk in texts.chunks(64) {
        let req = OpenAiEmbedRequest {
            model: config.embedding_model.clone(),
            input: chunk.to_vec(),
        };

        let resp = client
            .post(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&req)
            .send()
            .await
            .context("Failed to call OpenAI embed API")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI embed API returned {status}: {body}");
        }

        let body: OpenAiEmbedResponse = resp
            .json()
            .await
            .context("Failed to parse OpenAI embed response")?;
        all_embeddings.extend(body.data.into_iter().map(|d| d.embedding));
    }

    Ok(all_embeddings)
}

// ─── Process-wide shared model ───────────────────────────

type EmbedderFactory = Box<dyn Fn() -> BoxFuture<'static, Result<Arc<dyn Embedder>>> + Send + Sync>;

/// Lazily initialised, process-wide embedder.
///
/// The underlying model is built on first use and reused for the process
/// lifetime. A failed initialisation is not cached, so the next call tries
/// again. Calls are serialised through one lock, which keeps models that are
/// not safe for concurrent use correct.
pub struct SharedEmbedder {
    factory: EmbedderFactory,
    model: OnceCell<Arc<dyn Embedder>>,
    gate: Mutex<()>,
}

impl SharedEmbedder {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, Result<Arc<dyn Embedder>>> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            model: OnceCell::new(),
            gate: Mutex::new(()),
        }
    }

    /// Wrap an already constructed embedder.
    pub fn from_embedder(embedder: Arc<dyn Embedder>) -> Self {
        Self::new(move || {
            let embedder = embedder.clone();
            Box::pin(async move { Ok(embedder) })
        })
    }

    pub fn is_loaded(&self) -> bool {
        self.model.initialized()
    }

    async fn model(&self) -> Result<&Arc<dyn Embedder>> {
        self.model
            .get_or_try_init(|| async {
                tracing::info!("Loading embedding model");
                (self.factory)().await
            })
            .await
    }
}

#[async_trait]
impl Embedder for SharedEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = self.model().await.context("Embedding model unavailable")?;
        let _guard = self.gate.lock().await;
        model.embed(texts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct LengthEmbedder;

    #[async_trait]
    impl Embedder for LengthEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    #[tokio::test]
    async fn test_shared_embedder_initialises_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = loads.clone();
        let shared = SharedEmbedder::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(Arc::new(LengthEmbedder) as Arc<dyn Embedder>) })
        });

        assert!(!shared.is_loaded());
        shared.embed(&["a".into()]).await.unwrap();
        shared.embed(&["bb".into()]).await.unwrap();
        assert!(shared.is_loaded());
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_initialisation_is_retried() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = loads.clone();
        let shared = SharedEmbedder::new(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if n == 0 {
                    anyhow::bail!("model download failed")
                }
                Ok(Arc::new(LengthEmbedder) as Arc<dyn Embedder>)
            })
        });

        assert!(shared.embed(&["a".into()]).await.is_err());
        assert!(shared.embed(&["a".into()]).await.is_ok());
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_embed_query_adds_instruction_prefix() {
        let v = embed_query(&LengthEmbedder, "query: ", "abc").await.unwrap();
        assert_eq!(v[0], "query: abc".len() as f32);
    }
}
