use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where the full-text index and vector store live
    pub data_dir: PathBuf,
    /// Server bind address
    pub bind_addr: String,
    /// Corpus documents (JSON array or JSON lines)
    pub corpus_path: PathBuf,
    /// Authoritative identifier list; the corpus is used when absent
    pub identifiers_path: Option<PathBuf>,
    /// LLM provider configuration
    pub llm: LlmConfig,
    pub pipeline: PipelineConfig,
    pub search: SearchConfig,
    pub validation: ValidationConfig,
    pub retry: RetryConfig,
    /// Maximum concurrent pipeline runs
    pub max_concurrent_chats: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "ollama" or "openai"
    pub provider: String,
    /// Base URL for the LLM API
    pub base_url: String,
    /// Model name for answer synthesis
    pub chat_model: String,
    /// Lighter model used for query expansion; falls back to `chat_model`
    pub expansion_model: Option<String>,
    /// Model name for embeddings
    pub embedding_model: String,
    /// API key (only needed for cloud providers)
    pub api_key: Option<String>,
    /// Embedding vector dimension
    pub embedding_dim: usize,
}

impl LlmConfig {
    /// Same provider settings, with the expansion model promoted to chat model.
    pub fn for_expansion(&self) -> Self {
        let mut config = self.clone();
        if let Some(model) = &self.expansion_model {
            config.chat_model = model.clone();
        }
        config
    }
}

/// How the answer is produced and validated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PromptStrategy {
    /// JSON page list, validated against the identifier registry, then
    /// rendered to prose by a formatting call.
    Structured,
    /// Streamed markdown prose whose inline links are corrected afterwards.
    FreeText,
}

impl FromStr for PromptStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "structured" | "json" | "thinking" => Ok(Self::Structured),
            "free_text" | "freetext" | "markdown" | "flash" => Ok(Self::FreeText),
            other => anyhow::bail!("Unknown prompt strategy: {other}"),
        }
    }
}

/// What happens when every expansion attempt fails.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExpansionExhaustion {
    /// Emit the apology as an `error` terminal event.
    Abort,
    /// Continue with heuristic key-phrase expansion.
    Heuristic,
}

impl FromStr for ExpansionExhaustion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" | "error" => Ok(Self::Abort),
            "heuristic" | "fallback" => Ok(Self::Heuristic),
            other => anyhow::bail!("Unknown expansion exhaustion mode: {other}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub strategy: PromptStrategy,
    pub vector_queries: usize,
    pub lexical_queries: usize,
    /// Paraphrases requested when an attachment is present
    pub multimodal_queries: usize,
    pub max_query_chars: usize,
    /// History shorter than this budget is dropped entirely
    pub min_history_chars: usize,
    pub max_chars_per_node: usize,
    /// Retry success threshold on stripped answer length
    pub min_answer_chars: usize,
    pub expansion_timeout_secs: u64,
    pub on_expansion_exhausted: ExpansionExhaustion,
    /// Bounded capacity of the per-request event channel
    pub event_buffer: usize,
}

impl PipelineConfig {
    pub fn expansion_timeout(&self) -> Duration {
        Duration::from_secs(self.expansion_timeout_secs)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            strategy: PromptStrategy::Structured,
            vector_queries: 5,
            lexical_queries: 20,
            multimodal_queries: 5,
            max_query_chars: 1000,
            min_history_chars: 100,
            max_chars_per_node: 2500,
            min_answer_chars: 10,
            expansion_timeout_secs: 60,
            on_expansion_exhausted: ExpansionExhaustion::Abort,
            event_buffer: 32,
        }
    }
}

/// Search backends that can be switched on by name.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Substring,
    Bm25,
    Bm25Proximity,
    Tfidf,
    Learned,
    Fulltext,
    Vector,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "substring" | "like" | "simple" => Ok(Self::Substring),
            "bm25" => Ok(Self::Bm25),
            "bm25p" | "bm25_proximity" => Ok(Self::Bm25Proximity),
            "tfidf" => Ok(Self::Tfidf),
            "learned" | "lambdamart" => Ok(Self::Learned),
            "fulltext" | "tantivy" => Ok(Self::Fulltext),
            "vector" => Ok(Self::Vector),
            other => anyhow::bail!("Unknown search backend: {other}"),
        }
    }
}

/// Sub-query extraction used by the full-text backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntityExpansion {
    Off,
    Heuristic,
    Llm,
}

impl FromStr for EntityExpansion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" | "false" => Ok(Self::Off),
            "heuristic" | "nlp" => Ok(Self::Heuristic),
            "llm" => Ok(Self::Llm),
            other => anyhow::bail!("Unknown entity expansion mode: {other}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub lexical_backends: Vec<BackendKind>,
    pub vector_backends: Vec<BackendKind>,
    pub nodes_per_vector_query: usize,
    pub nodes_per_lexical_query: usize,
    pub max_vector_nodes: usize,
    pub max_lexical_nodes: usize,
    pub max_total_nodes: usize,
    /// Multi-match boost factor applied by fusion (0 disables it)
    pub repeat_boost: f32,
    pub entity_expansion: EntityExpansion,
    pub entity_timeout_secs: u64,
    /// Prefix prepended to queries before embedding
    pub query_instruction: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            lexical_backends: vec![BackendKind::Bm25, BackendKind::Fulltext],
            vector_backends: vec![BackendKind::Vector],
            nodes_per_vector_query: 3,
            nodes_per_lexical_query: 3,
            max_vector_nodes: 15,
            max_lexical_nodes: 30,
            max_total_nodes: 45,
            repeat_boost: 0.0,
            entity_expansion: EntityExpansion::Heuristic,
            entity_timeout_secs: 10,
            query_instruction: "query: ".to_string(),
        }
    }
}

/// String similarity used for identifier correction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    JaroWinkler,
    Levenshtein,
}

impl FromStr for SimilarityMetric {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jaro_winkler" | "jarowinkler" => Ok(Self::JaroWinkler),
            "levenshtein" => Ok(Self::Levenshtein),
            other => anyhow::bail!("Unknown similarity metric: {other}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Cutoff for correcting identifiers in structured output
    pub identifier_cutoff: f64,
    pub identifier_metric: SimilarityMetric,
    /// Cutoff for correcting URLs found in free text
    pub link_cutoff: f64,
    pub link_metric: SimilarityMetric,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            identifier_cutoff: 0.90,
            identifier_metric: SimilarityMetric::Levenshtein,
            link_cutoff: 0.60,
            link_metric: SimilarityMetric::Levenshtein,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Sleep before attempt 2, 3, ... ; attempts = delays + 1
    pub delays_secs: Vec<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            delays_secs: vec![1, 3, 5, 7, 9, 11, 13, 15, 17],
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            bind_addr: "127.0.0.1:9000".to_string(),
            corpus_path: PathBuf::from("./data/corpus.json"),
            identifiers_path: None,
            llm: LlmConfig::default(),
            pipeline: PipelineConfig::default(),
            search: SearchConfig::default(),
            validation: ValidationConfig::default(),
            retry: RetryConfig::default(),
            max_concurrent_chats: 8,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            base_url: "http://localhost:11434".to_string(),
            chat_model: "llama3.2".to_string(),
            expansion_model: None,
            embedding_model: "nomic-embed-text".to_string(),
            api_key: None,
            embedding_dim: 768,
        }
    }
}

/// Parse `key` from the environment into `target`, keeping the default on
/// a missing or malformed value.
fn env_parse<T: FromStr>(key: &str, target: &mut T) {
    if let Ok(val) = std::env::var(key) {
        match val.parse() {
            Ok(v) => *target = v,
            Err(_) => tracing::warn!("Ignoring malformed {key}={val}"),
        }
    }
}

fn env_list<T: FromStr>(key: &str, target: &mut Vec<T>) {
    if let Ok(val) = std::env::var(key) {
        let parsed: Result<Vec<T>, _> = val
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.trim().parse())
            .collect();
        match parsed {
            Ok(v) => *target = v,
            Err(_) => tracing::warn!("Ignoring malformed {key}={val}"),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("RAG_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
            config.corpus_path = config.data_dir.join("corpus.json");
        }
        if let Ok(addr) = std::env::var("RAG_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Ok(path) = std::env::var("RAG_CORPUS_PATH") {
            config.corpus_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("RAG_IDENTIFIERS_PATH") {
            config.identifiers_path = Some(PathBuf::from(path));
        }
        env_parse("RAG_MAX_CONCURRENT_CHATS", &mut config.max_concurrent_chats);

        // LLM
        if let Ok(provider) = std::env::var("LLM_PROVIDER") {
            config.llm.provider = provider;
        }
        if let Ok(url) = std::env::var("LLM_BASE_URL") {
            config.llm.base_url = url;
        }
        if let Ok(model) = std::env::var("LLM_CHAT_MODEL") {
            config.llm.chat_model = model;
        }
        if let Ok(model) = std::env::var("LLM_EXPANSION_MODEL") {
            config.llm.expansion_model = Some(model);
        }
        if let Ok(model) = std::env::var("LLM_EMBEDDING_MODEL") {
            config.llm.embedding_model = model;
        }
        if let Ok(key) = std::env::var("LLM_API_KEY") {
            config.llm.api_key = Some(key);
        }
        env_parse("LLM_EMBEDDING_DIM", &mut config.llm.embedding_dim);

        // Pipeline
        let pipeline = &mut config.pipeline;
        env_parse("RAG_PROMPT_STRATEGY", &mut pipeline.strategy);
        env_parse("RAG_VECTOR_QUERIES", &mut pipeline.vector_queries);
        env_parse("RAG_LEXICAL_QUERIES", &mut pipeline.lexical_queries);
        env_parse("RAG_MULTIMODAL_QUERIES", &mut pipeline.multimodal_queries);
        env_parse("RAG_MAX_QUERY_CHARS", &mut pipeline.max_query_chars);
        env_parse("RAG_MIN_HISTORY_CHARS", &mut pipeline.min_history_chars);
        env_parse("RAG_MAX_CHARS_PER_NODE", &mut pipeline.max_chars_per_node);
        env_parse("RAG_MIN_ANSWER_CHARS", &mut pipeline.min_answer_chars);
        env_parse("RAG_EXPANSION_TIMEOUT_SECS", &mut pipeline.expansion_timeout_secs);
        env_parse("RAG_EXPANSION_EXHAUSTED", &mut pipeline.on_expansion_exhausted);

        // Search
        let search = &mut config.search;
        env_list("RAG_LEXICAL_BACKENDS", &mut search.lexical_backends);
        env_list("RAG_VECTOR_BACKENDS", &mut search.vector_backends);
        env_parse("RAG_NODES_PER_VECTOR_QUERY", &mut search.nodes_per_vector_query);
        env_parse("RAG_NODES_PER_LEXICAL_QUERY", &mut search.nodes_per_lexical_query);
        env_parse("RAG_MAX_VECTOR_NODES", &mut search.max_vector_nodes);
        env_parse("RAG_MAX_LEXICAL_NODES", &mut search.max_lexical_nodes);
        env_parse("RAG_MAX_TOTAL_NODES", &mut search.max_total_nodes);
        env_parse("RAG_REPEAT_BOOST", &mut search.repeat_boost);
        env_parse("RAG_FULLTEXT_ENTITY_EXPANSION", &mut search.entity_expansion);
        env_parse("RAG_ENTITY_TIMEOUT_SECS", &mut search.entity_timeout_secs);
        if let Ok(prefix) = std::env::var("RAG_QUERY_INSTRUCTION") {
            search.query_instruction = prefix;
        }

        // Validation
        let validation = &mut config.validation;
        env_parse("RAG_IDENTIFIER_CUTOFF", &mut validation.identifier_cutoff);
        env_parse("RAG_IDENTIFIER_METRIC", &mut validation.identifier_metric);
        env_parse("RAG_LINK_CUTOFF", &mut validation.link_cutoff);
        env_parse("RAG_LINK_METRIC", &mut validation.link_metric);

        env_list("RAG_RETRY_DELAYS_SECS", &mut config.retry.delays_secs);

        config
    }

    pub fn index_dir(&self) -> PathBuf {
        self.data_dir.join("index")
    }

    pub fn vector_dir(&self) -> PathBuf {
        self.data_dir.join("vectors")
    }
}
