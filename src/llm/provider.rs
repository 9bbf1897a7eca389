use anyhow::Result;
use async_trait::async_trait;

use crate::config::LlmConfig;
use crate::llm::chat_stream::stream_chat;
use crate::llm::completion::complete_chat;
use crate::llm::{LanguageModel, TextStream};
use crate::models::ChatMessage;

/// `LanguageModel` backed by an HTTP chat API. Constructed once at startup
/// and shared by every pipeline run.
#[derive(Clone)]
pub struct HttpLanguageModel {
    client: reqwest::Client,
    config: LlmConfig,
    temperature: f32,
}

impl HttpLanguageModel {
    pub fn new(client: reqwest::Client, config: LlmConfig) -> Self {
        Self {
            client,
            config,
            temperature: 0.3,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model_name(&self) -> &str {
        &self.config.chat_model
    }

    fn user_message(prompt: &str) -> Vec<ChatMessage> {
        vec![ChatMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
        }]
    }
}

#[async_trait]
impl LanguageModel for HttpLanguageModel {
    async fn complete(&self, prompt: &str) -> Result<String> {
        complete_chat(
            &self.client,
            &self.config,
            Self::user_message(prompt),
            self.temperature,
        )
        .await
    }

    async fn stream_complete(&self, prompt: &str) -> Result<TextStream> {
        stream_chat(&self.client, &self.config, Self::user_message(prompt)).await
    }
}
