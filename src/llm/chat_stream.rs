use anyhow::{Context, Result};
use futures_util::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::LlmConfig;
use crate::llm::TextStream;
use crate::models::ChatMessage;

/// Upper bound on one streamed answer.
const STREAM_TIMEOUT_SECS: u64 = 300;

/// Wire format of the provider's streaming endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamFormat {
    /// Newline-delimited JSON objects.
    Ollama,
    /// Server-sent events with `data: ` lines.
    OpenAi,
}

/// Stream chat completions from Ollama or an OpenAI-compatible API.
/// Returns a stream of content deltas (one per token/chunk).
pub async fn stream_chat(
    client: &reqwest::Client,
    config: &LlmConfig,
    messages: Vec<ChatMessage>,
) -> Result<TextStream> {
    let (format, url) = match config.provider.as_str() {
        "ollama" => (StreamFormat::Ollama, format!("{}/api/chat", config.base_url)),
        "openai" => (
            StreamFormat::OpenAi,
            format!("{}/v1/chat/completions", config.base_url),
        ),
        other => anyhow::bail!("Unsupported LLM provider for streaming: {other}"),
    };

    let req = StreamRequest {
        model: config.chat_model.clone(),
        messages: messages
            .into_iter()
            .map(|m| StreamMessage {
                role: m.role,
                content: m.content,
            })
            .collect(),
        stream: true,
    };

    let mut builder = client
        .post(&url)
        .timeout(Duration::from_secs(STREAM_TIMEOUT_SECS))
        .json(&req);
    if format == StreamFormat::OpenAi {
        builder = builder.header(
            "Authorization",
            format!("Bearer {}", config.api_key.as_deref().unwrap_or("")),
        );
    }

    let resp = builder
        .send()
        .await
        .with_context(|| format!("Failed to connect to {} for streaming", config.provider))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("{} streaming API returned {status}: {body}", config.provider);
    }

    let stream = stream_lines(resp.bytes_stream()).filter_map(move |line_result| async move {
        match line_result {
            Ok(line) => match format {
                StreamFormat::Ollama => parse_ollama_line(&line),
                StreamFormat::OpenAi => parse_openai_line(&line),
            },
            Err(e) => Some(Err(e)),
        }
    });

    Ok(Box::pin(stream))
}

#[derive(Serialize)]
struct StreamRequest {
    model: String,
    messages: Vec<StreamMessage>,
    stream: bool,
}

#[derive(Serialize, Deserialize)]
struct StreamMessage {
    role: String,
    content: String,
}

// ─── Ollama ──────────────────────────────────────────────

#[derive(Deserialize)]
struct OllamaStreamChunk {
    message: StreamMessage,
    done: bool,
}

/// Parse a single Ollama streaming line. Returns:
/// - Some(Ok(content)) for content deltas
/// - Some(Err(e)) for parse errors
/// - None to skip (empty content or done signal)
fn parse_ollama_line(line: &str) -> Option<Result<String>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    match serde_json::from_str::<OllamaStreamChunk>(line) {
        Ok(chunk) if chunk.done || chunk.message.content.is_empty() => None,
        Ok(chunk) => Some(Ok(chunk.message.content)),
        Err(e) => Some(Err(anyhow::anyhow!("Failed to parse Ollama chunk: {e}"))),
    }
}

// ─── OpenAI-compatible ───────────────────────────────────

#[derive(Deserialize)]
struct OpenAiStreamChunk {
    choices: Vec<OpenAiStreamChoice>,
}

#[derive(Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiStreamDelta,
}

#[derive(Deserialize)]
struct OpenAiStreamDelta {
    content: Option<String>,
}

/// Parse a single OpenAI SSE line; `None` for blank lines, `[DONE]`, other
/// SSE fields and role-only chunks.
fn parse_openai_line(line: &str) -> Option<Result<String>> {
    let data = line.trim().strip_prefix("data: ")?.trim();
    if data == "[DONE]" {
        return None;
    }

    match serde_json::from_str::<OpenAiStreamChunk>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|c| !c.is_empty())
            .map(Ok),
        Err(e) => Some(Err(anyhow::anyhow!("Failed to parse OpenAI chunk: {e}"))),
    }
}

// ─── Line buffering ──────────────────────────────────────

/// Convert a byte stream into a stream of complete, non-blank lines.
/// Bytes are buffered until a newline so multi-byte characters split across
/// network chunks are decoded intact.
fn stream_lines(
    byte_stream: impl Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
) -> impl Stream<Item = Result<String>> + Send {
    futures_util::stream::unfold(
        (Box::pin(byte_stream), Vec::<u8>::new()),
        |(mut stream, mut buffer)| async move {
            loop {
                if let Some(newline_pos) = buffer.iter().position(|b| *b == b'\n') {
                    let rest = buffer.split_off(newline_pos + 1);
                    let line = String::from_utf8_lossy(&buffer).trim_end().to_string();
                    buffer = rest;
                    if !line.trim().is_empty() {
                        return Some((Ok(line), (stream, buffer)));
                    }
                    continue;
                }

                match stream.next().await {
                    Some(Ok(bytes)) => buffer.extend_from_slice(&bytes),
                    Some(Err(e)) => {
                        return Some((
                            Err(anyhow::anyhow!("Stream read error: {e}")),
                            (stream, buffer),
                        ));
                    }
                    None => {
                        if buffer.iter().all(u8::is_ascii_whitespace) {
                            return None;
                        }
                        let remaining = String::from_utf8_lossy(&buffer).trim().to_string();
                        buffer.clear();
                        return Some((Ok(remaining), (stream, buffer)));
                    }
                }
            }
        },
    )
}
