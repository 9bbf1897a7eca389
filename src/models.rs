use serde::{Deserialize, Serialize};

/// Which retrieval family produced a document.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Vector,
    Lexical,
    /// Found by both families; only produced by fusion.
    Hybrid,
}

/// A scored candidate returned by a search backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedDocument {
    /// URL or slug. Unique within one fused result set.
    pub identifier: String,
    pub title: String,
    pub content: String,
    pub relevance_score: f32,
    pub source: SourceKind,
}

/// A document as stored in the corpus, before any query touches it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorpusDocument {
    #[serde(alias = "url", alias = "slug")]
    pub identifier: String,
    #[serde(default)]
    pub title: String,
    #[serde(alias = "text")]
    pub content: String,
}

impl CorpusDocument {
    pub fn into_retrieved(self, relevance_score: f32, source: SourceKind) -> RetrievedDocument {
        RetrievedDocument {
            identifier: self.identifier,
            title: self.title,
            content: self.content,
            relevance_score,
            source,
        }
    }
}

/// Output of query expansion for one pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExpandedQuerySet {
    pub lexical_queries: Vec<String>,
    pub vector_queries: Vec<String>,
    pub file_context_summary: Option<String>,
}

impl ExpandedQuerySet {
    /// Every term in the order it was requested: vector first, then lexical.
    pub fn all_terms(&self) -> Vec<String> {
        self.vector_queries
            .iter()
            .chain(self.lexical_queries.iter())
            .cloned()
            .collect()
    }
}

/// Metadata about an attached file, produced by an external file processor.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AttachmentContext {
    #[serde(default, alias = "assunto_principal")]
    pub subject: String,
    #[serde(default, alias = "termos_chave")]
    pub keywords: Vec<String>,
    #[serde(default, alias = "resumo")]
    pub summary: String,
    /// File type label ("pdf", "audio", ...), used only in prompts.
    #[serde(default)]
    pub file_type: Option<String>,
}

/// Input to one pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineRequest {
    pub query: String,
    /// Pre-formatted prior turns.
    pub history: Option<String>,
    pub attachment_context: Option<AttachmentContext>,
}

/// A validated page recommendation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecommendedPage {
    pub identifier: String,
    pub title: String,
    pub description: Option<String>,
    pub justification: Option<String>,
}

/// Terminal payload of a pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PipelineResult {
    pub answer_text: String,
    pub recommended_links: Vec<RecommendedPage>,
    pub search_terms_used: Vec<String>,
    pub all_candidate_identifiers: Vec<String>,
}

/// A single chat turn sent to the LLM provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// One previous exchange as sent by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryTurn {
    #[serde(alias = "usuario")]
    pub user: String,
    pub bot: String,
}

/// Chat request
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    #[serde(alias = "consulta")]
    pub query: String,
    #[serde(default, alias = "historico")]
    pub history: Option<Vec<HistoryTurn>>,
    #[serde(default, alias = "metadata")]
    pub attachment: Option<AttachmentContext>,
}

/// Search request for the retrieval-only endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub queries: Vec<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    5
}

/// Search response
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<RetrievedDocument>,
    pub total_vector_hits: usize,
    pub total_lexical_hits: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_kind_serializes_to_snake_case() {
        let json = serde_json::to_value(SourceKind::Hybrid).unwrap();
        assert_eq!(json, "hybrid");
    }

    #[test]
    fn test_corpus_document_accepts_url_and_text_aliases() {
        let raw = r#"{"url": "https://acervo/x", "title": "X", "text": "corpo"}"#;
        let doc: CorpusDocument = serde_json::from_str(raw).unwrap();
        assert_eq!(doc.identifier, "https://acervo/x");
        assert_eq!(doc.content, "corpo");
    }

    #[test]
    fn test_chat_request_accepts_portuguese_field_names() {
        let raw = r#"{"consulta": "judeus no brasil", "historico": [{"usuario": "oi", "bot": "olá"}]}"#;
        let req: ChatRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(req.query, "judeus no brasil");
        assert_eq!(req.history.unwrap()[0].user, "oi");
    }

    #[test]
    fn test_all_terms_lists_vector_before_lexical() {
        let set = ExpandedQuerySet {
            lexical_queries: vec!["b".into()],
            vector_queries: vec!["a".into()],
            file_context_summary: None,
        };
        assert_eq!(set.all_terms(), vec!["a", "b"]);
    }
}
