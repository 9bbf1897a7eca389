use anyhow::Result;
use std::sync::Arc;

use crate::llm::prompt::{sanitize_for_prompt, truncate_chars};
use crate::llm::{LanguageModel, TextStream};
use crate::models::{RecommendedPage, RetrievedDocument};

/// Everything an answer prompt is built from.
#[derive(Debug, Clone, Copy)]
pub struct SynthesisContext<'a> {
    pub query: &'a str,
    pub history: Option<&'a str>,
    pub documents: &'a [RetrievedDocument],
    /// Summary of an attached file, from multimodal expansion
    pub file_context: Option<&'a str>,
}

/// Copy of `documents` with each `content` cut to `max_chars` characters.
pub fn clip_documents(documents: &[RetrievedDocument], max_chars: usize) -> Vec<RetrievedDocument> {
    documents
        .iter()
        .map(|d| RetrievedDocument {
            content: truncate_chars(&d.content, max_chars).to_string(),
            ..d.clone()
        })
        .collect()
}

/// Serialize documents as delimited blocks that carry the identifier
/// verbatim in the opening tag.
pub fn render_documents(documents: &[RetrievedDocument], max_chars: usize) -> String {
    documents
        .iter()
        .map(|d| {
            format!(
                "[DOCUMENT identifier=\"{}\"]\ntitle: {}\ncontent: {}\n[/DOCUMENT]",
                d.identifier,
                d.title,
                truncate_chars(&d.content, max_chars)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn history_block(history: Option<&str>) -> String {
    match history.filter(|h| !h.trim().is_empty()) {
        Some(h) => format!(
            "Atenção às mensagens anteriores do usuário para entender o contexto da conversa. \
             Histórico da conversa:\n{}\n\n",
            sanitize_for_prompt(h)
        ),
        None => String::new(),
    }
}

fn file_block(file_context: Option<&str>) -> String {
    match file_context.filter(|f| !f.trim().is_empty()) {
        Some(f) => format!(
            "O usuário anexou um arquivo. Resumo do arquivo:\n{}\n\n",
            sanitize_for_prompt(f)
        ),
        None => String::new(),
    }
}

const COPY_IDENTIFIERS_RULE: &str = "Os identificadores são chaves técnicas e devem ser copiados \
     exatamente como aparecem no atributo identifier, sem alterar hífens, acentos ou letras.";

const MARKDOWN_EXAMPLE: &str = "*   **Título da página.**\n    \
     Comentário explicando a utilidade da página para a pesquisa.\n    \
     [Texto do link](identificador copiado exatamente)\n\n";

/// Prompt for the single JSON object listing recommended pages.
pub fn build_structured_prompt(ctx: &SynthesisContext<'_>, max_chars_per_node: usize) -> String {
    format!(
        "Documentos recuperados:\n---------------------\n{documents}\n---------------------\n\
         Com base nos documentos acima e não em conhecimento prévio, responda à consulta. \
         Responda em português e somente com um objeto JSON no formato:\n\
         {{\"data\": {{\"paginas\": [{{\"url\": \"identificador do documento\", \
         \"titulo\": \"título do documento\", \
         \"descricao\": \"descrição resumida do conteúdo\", \
         \"justificativa\": \"por que esta página ajuda na pesquisa\"}}]}}}}\n\
         Se não houver informação sobre o tema específico, recomende os documentos mais \
         relacionados. Recomende o máximo possível de documentos relevantes, idealmente pelo menos cinco. \
         Só recomende documentos listados acima. {COPY_IDENTIFIERS_RULE}\n\n\
         {file}{history}Consulta: {query}\nResposta:",
        documents = render_documents(ctx.documents, max_chars_per_node),
        file = file_block(ctx.file_context),
        history = history_block(ctx.history),
        query = sanitize_for_prompt(ctx.query),
    )
}

/// Prompt for streamed markdown prose with inline links.
pub fn build_free_text_prompt(ctx: &SynthesisContext<'_>, max_chars_per_node: usize) -> String {
    format!(
        "Você é um assistente que recomenda páginas para ajudar na pesquisa.\n\n\
         {file}{history}Consulta: \"{query}\"\n\n\
         Documentos disponíveis:\n{documents}\n\n\
         Recomende os documentos mais relevantes para a consulta, em ordem de relevância, \
         explique por que são úteis e forneça o link em markdown. Tente recomendar pelo menos \
         cinco páginas; se uma página for apenas tangencialmente relacionada, diga isso. \
         {COPY_IDENTIFIERS_RULE}\n\
         Responda em português, de forma clara e objetiva, sem mencionar que recebeu uma lista \
         de documentos.\n\n\
         Exemplo de formatação:\n{MARKDOWN_EXAMPLE}",
        file = file_block(ctx.file_context),
        history = history_block(ctx.history),
        query = sanitize_for_prompt(ctx.query),
        documents = render_documents(ctx.documents, max_chars_per_node),
    )
}

/// Prompt that renders validated pages as markdown prose, keeping their
/// order and identifiers.
pub fn build_formatting_prompt(query: &str, history: Option<&str>, pages: &[RecommendedPage]) -> String {
    let pages_json = serde_json::to_string_pretty(pages).unwrap_or_else(|_| "[]".to_string());
    format!(
        "Você é um assistente que recomenda páginas para ajudar na pesquisa.\n\n\
         {history}Consulta: \"{query}\"\n\n\
         Páginas selecionadas:\n{pages_json}\n\n\
         Recomende todas as páginas acima, na ordem em que aparecem, explique por que são úteis \
         e forneça o link em markdown usando o campo identifier exatamente como está. \
         Responda em português, de forma clara e objetiva. Se a lista estiver vazia, informe \
         que não foram encontradas páginas relevantes. Não mencione que recebeu uma lista.\n\n\
         Exemplo de formatação:\n{MARKDOWN_EXAMPLE}",
        history = history_block(history),
        query = sanitize_for_prompt(query),
    )
}

/// Builds answer prompts and sends them to the synthesis model. Failures are
/// returned as-is; retrying is the caller's decision.
pub struct AnswerSynthesizer {
    llm: Arc<dyn LanguageModel>,
    max_chars_per_node: usize,
}

impl AnswerSynthesizer {
    pub fn new(llm: Arc<dyn LanguageModel>, max_chars_per_node: usize) -> Self {
        Self {
            llm,
            max_chars_per_node,
        }
    }

    pub fn max_chars_per_node(&self) -> usize {
        self.max_chars_per_node
    }

    pub fn structured_prompt(&self, ctx: &SynthesisContext<'_>) -> String {
        build_structured_prompt(ctx, self.max_chars_per_node)
    }

    pub fn free_text_prompt(&self, ctx: &SynthesisContext<'_>) -> String {
        build_free_text_prompt(ctx, self.max_chars_per_node)
    }

    /// Batch completion.
    pub async fn complete(&self, prompt: &str) -> Result<String> {
        let text = self.llm.complete(prompt).await?;
        tracing::debug!("Synthesis output: {text}");
        Ok(text)
    }

    /// Streaming completion, one item per delta.
    pub async fn stream(&self, prompt: &str) -> Result<TextStream> {
        self.llm.stream_complete(prompt).await
    }
}
