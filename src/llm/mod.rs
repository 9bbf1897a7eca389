//! Language-model collaborators and everything that prompts them.

pub mod chat_stream;
pub mod completion;
pub mod embeddings;
pub mod prompt;
pub mod provider;
pub mod query_expand;
pub mod retry;
pub mod synthesize;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::stream::Stream;
use std::pin::Pin;

/// Incremental text deltas from a streaming completion.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// A text-completion provider. Network, auth and model selection live
/// behind this trait; prompts are built by the caller.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Single-shot completion.
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Streaming completion; each item is one text delta.
    async fn stream_complete(&self, prompt: &str) -> Result<TextStream>;
}
