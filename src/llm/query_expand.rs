use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::llm::prompt::{sanitize_for_prompt, truncate_chars};
use crate::llm::retry::{Attempt, RetryOutcome, RetryPolicy};
use crate::llm::LanguageModel;
use crate::models::{AttachmentContext, ExpandedQuerySet};
use crate::search::entities::extract_key_phrases;

/// Characters of attachment summary quoted in the multimodal prompt.
const MAX_ATTACHMENT_CHARS: usize = 2_500;

/// Turns one user query into vector and lexical search terms using an
/// auxiliary (usually lighter) model.
pub struct QueryExpander {
    llm: Arc<dyn LanguageModel>,
    policy: RetryPolicy,
}

impl QueryExpander {
    pub fn new(llm: Arc<dyn LanguageModel>, policy: RetryPolicy) -> Self {
        Self { llm, policy }
    }

    /// Ask for `vector_count + lexical_count` comma-separated terms, retrying
    /// empty or failed responses on the policy's schedule.
    pub async fn expand(
        &self,
        query: &str,
        history: Option<&str>,
        vector_count: usize,
        lexical_count: usize,
        cancel: &CancellationToken,
    ) -> RetryOutcome<ExpandedQuerySet> {
        let prompt = build_expansion_prompt(query, history, vector_count, lexical_count);
        self.policy
            .run("query expansion", cancel, |_| {
                let prompt = prompt.as_str();
                async move {
                    match self.llm.complete(prompt).await {
                        Ok(raw) => {
                            tracing::debug!("Expansion output: {raw}");
                            let terms = parse_terms(&raw);
                            if terms.is_empty() {
                                Attempt::Retry("expansion returned no terms".into())
                            } else {
                                Attempt::Success(allocate(terms, vector_count, lexical_count))
                            }
                        }
                        Err(e) => Attempt::Retry(format!("{e:#}")),
                    }
                }
            })
            .await
    }

    /// File-aware variant: `count` paraphrases plus a short summary of the
    /// attachment, in one call. The paraphrases feed both retrieval families.
    pub async fn expand_multimodal(
        &self,
        query: &str,
        attachment: &AttachmentContext,
        count: usize,
        cancel: &CancellationToken,
    ) -> RetryOutcome<ExpandedQuerySet> {
        let prompt = build_multimodal_prompt(query, attachment, count);
        self.policy
            .run("multimodal expansion", cancel, |_| {
                let prompt = prompt.as_str();
                async move {
                    match self.llm.complete(prompt).await {
                        Ok(raw) => {
                            let (queries, summary) = parse_multimodal(&raw, count);
                            if queries.is_empty() {
                                return Attempt::Retry("multimodal expansion returned no queries".into());
                            }
                            Attempt::Success(ExpandedQuerySet {
                                lexical_queries: queries.clone(),
                                vector_queries: queries,
                                file_context_summary: summary,
                            })
                        }
                        Err(e) => Attempt::Retry(format!("{e:#}")),
                    }
                }
            })
            .await
    }
}

/// Expansion without an LLM: the raw query for vector search, the raw query
/// plus its key phrases for lexical search.
pub fn heuristic_expansion(query: &str, vector_count: usize, lexical_count: usize) -> ExpandedQuerySet {
    let query = query.trim().to_string();
    let vector_queries = if vector_count > 0 && !query.is_empty() {
        vec![query.clone()]
    } else {
        Vec::new()
    };

    let mut lexical_queries = Vec::new();
    if lexical_count > 0 && !query.is_empty() {
        lexical_queries.push(query.clone());
        for phrase in extract_key_phrases(&query, lexical_count) {
            if lexical_queries.len() >= lexical_count {
                break;
            }
            if !lexical_queries.iter().any(|q| q.eq_ignore_ascii_case(&phrase)) {
                lexical_queries.push(phrase);
            }
        }
    }

    ExpandedQuerySet {
        lexical_queries,
        vector_queries,
        file_context_summary: None,
    }
}

pub fn build_expansion_prompt(
    query: &str,
    history: Option<&str>,
    vector_count: usize,
    lexical_count: usize,
) -> String {
    let total = vector_count + lexical_count;
    let history_block = match history.filter(|h| !h.trim().is_empty()) {
        Some(h) => format!("Histórico da conversa:\n{}\n\n", sanitize_for_prompt(h)),
        None => String::new(),
    };

    format!(
        "Gere termos de busca para encontrar documentos que respondam à consulta do usuário.\n\n\
         Para a busca vetorial, produza exatamente {vector_count} consultas:\n\
         - cada uma com 4 a 15 palavras em português, sem vírgulas internas;\n\
         - em linguagem natural, de preferência no imperativo;\n\
         - cobrindo o tema principal, sinônimos, entidades, datas, locais e subtemas;\n\
         - cada consulta deve focar em um aspecto diferente, sem redundância.\n\n\
         Para a busca lexical, produza exatamente {lexical_count} expressões curtas:\n\
         - de 3 a 8 palavras em português;\n\
         - com variações de grafia, gênero e número dos termos principais;\n\
         - incluindo formas alternativas e erros comuns de escrita.\n\n\
         Separe cada item por vírgula. Gere {total} itens no total: os {vector_count} primeiros \
         para busca vetorial e os {lexical_count} últimos para busca lexical.\n\n\
         {history_block}Consulta: {query}\n\n\
         Resultado (apenas termos e expressões separados por vírgula):",
        query = sanitize_for_prompt(query),
    )
}

pub fn build_multimodal_prompt(query: &str, attachment: &AttachmentContext, count: usize) -> String {
    let file_type = attachment.file_type.as_deref().unwrap_or("arquivo");
    let keywords = attachment.keywords.join(", ");
    let summary = sanitize_for_prompt(&attachment.summary);

    format!(
        "Baseado na consulta e no arquivo anexado, faça duas tarefas:\n\n\
         1. Gere {count} consultas de busca equivalentes em português que incorporem o contexto do arquivo\n\
         2. Crie um resumo conciso de 2 a 3 frases sobre o conteúdo do arquivo\n\n\
         Consulta original: \"{query}\"\n\
         Tipo de arquivo: {file_type}\n\
         Assunto principal: {subject}\n\
         Termos-chave: {keywords}\n\
         Conteúdo: {summary}\n\n\
         Responda exatamente no formato abaixo, sem markdown, uma consulta por linha:\n\n\
         QUERIES:\n\
         <consulta 1>\n\
         <consulta 2>\n\n\
         SUMMARY:\n\
         <resumo>",
        query = sanitize_for_prompt(query),
        subject = sanitize_for_prompt(&attachment.subject),
        summary = truncate_chars(&summary, MAX_ATTACHMENT_CHARS),
    )
}

/// Split a comma-separated LLM response into trimmed, unquoted, non-empty
/// terms.
pub fn parse_terms(raw: &str) -> Vec<String> {
    let body = raw
        .trim()
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    body.split(',')
        .map(|t| {
            t.trim()
                .trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c == '“' || c == '”')
                .trim()
                .to_string()
        })
        .filter(|t| !t.is_empty())
        .collect()
}

/// Split `terms` into vector and lexical queries. With enough terms the first
/// `vector_count` go to vector search and the next `lexical_count` to lexical
/// search. With fewer, the available terms are shared proportionally and each
/// side with a non-zero quota gets at least one term.
pub fn allocate(terms: Vec<String>, vector_count: usize, lexical_count: usize) -> ExpandedQuerySet {
    let requested = vector_count + lexical_count;
    let n = terms.len();

    if n >= requested {
        let mut iter = terms.into_iter();
        let vector_queries: Vec<String> = iter.by_ref().take(vector_count).collect();
        let lexical_queries: Vec<String> = iter.take(lexical_count).collect();
        return ExpandedQuerySet {
            lexical_queries,
            vector_queries,
            file_context_summary: None,
        };
    }

    tracing::warn!("Expansion returned {n} of {requested} terms, sharing proportionally");

    if n == 1 {
        let term = terms.into_iter().next().unwrap_or_default();
        return ExpandedQuerySet {
            vector_queries: if vector_count > 0 { vec![term.clone()] } else { Vec::new() },
            lexical_queries: if lexical_count > 0 { vec![term] } else { Vec::new() },
            file_context_summary: None,
        };
    }

    let mut vector_n = ((n * vector_count) as f64 / requested.max(1) as f64).round() as usize;
    if vector_count > 0 && vector_n == 0 && n > 0 {
        vector_n = 1;
    }
    if lexical_count > 0 && vector_n >= n && n > 0 {
        vector_n = n - 1;
    }
    vector_n = vector_n.min(vector_count);

    let mut terms = terms;
    let lexical_queries: Vec<String> = terms.split_off(vector_n).into_iter().take(lexical_count).collect();
    ExpandedQuerySet {
        lexical_queries,
        vector_queries: terms,
        file_context_summary: None,
    }
}

/// Parse a `QUERIES:` / `SUMMARY:` response. Lines shorter than four
/// characters and code fences are skipped.
pub fn parse_multimodal(raw: &str, count: usize) -> (Vec<String>, Option<String>) {
    let text = raw.trim();
    let (queries_part, summary_part) = match text.split_once("SUMMARY:") {
        Some((q, s)) => (q, Some(s)),
        None => (text, None),
    };

    let queries = queries_part
        .replace("QUERIES:", "")
        .lines()
        .map(|l| l.trim().trim_start_matches(['-', '*']).trim().to_string())
        .filter(|l| !l.starts_with("```") && l.chars().count() > 3)
        .take(count)
        .collect();

    let summary = summary_part
        .map(|s| s.trim().trim_end_matches("```").trim().to_string())
        .filter(|s| !s.is_empty());

    (queries, summary)
}
