//! Entity / key-phrase sub-queries for the full-text backend.

use std::sync::Arc;
use std::time::Duration;

use crate::config::EntityExpansion;
use crate::llm::query_expand::parse_terms;
use crate::llm::LanguageModel;
use crate::search::tokenize::is_stopword;

/// Key phrases of `text`: maximal runs of non-stopword words, in order of
/// appearance, deduplicated case-insensitively. A rough stand-in for
/// noun-phrase chunking that needs no language model.
pub fn extract_key_phrases(text: &str, max: usize) -> Vec<String> {
    let mut phrases: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for raw in text.split_whitespace() {
        let word = raw.trim_matches(|c: char| !c.is_alphanumeric() && c != '-');
        let ends_clause = raw.ends_with([',', ';', ':', '.', '?', '!']);

        if word.is_empty() || is_stopword(&word.to_lowercase()) {
            flush(&mut current, &mut phrases);
        } else {
            current.push(word);
            if ends_clause {
                flush(&mut current, &mut phrases);
            }
        }
    }
    flush(&mut current, &mut phrases);

    phrases.truncate(max);
    phrases
}

fn flush(current: &mut Vec<&str>, phrases: &mut Vec<String>) {
    if current.is_empty() {
        return;
    }
    let phrase = current.join(" ");
    current.clear();
    if phrase.chars().count() >= 3
        && !phrases.iter().any(|p| p.to_lowercase() == phrase.to_lowercase())
    {
        phrases.push(phrase);
    }
}

/// Produces entity-derived sub-queries for one lexical query.
pub struct EntityExpander {
    mode: EntityExpansion,
    llm: Option<Arc<dyn LanguageModel>>,
    timeout: Duration,
    max_entities: usize,
}

impl EntityExpander {
    pub fn new(mode: EntityExpansion, llm: Option<Arc<dyn LanguageModel>>, timeout: Duration) -> Self {
        Self {
            mode,
            llm,
            timeout,
            max_entities: 5,
        }
    }

    pub fn disabled() -> Self {
        Self::new(EntityExpansion::Off, None, Duration::from_secs(0))
    }

    /// Sub-queries for `query`, never including `query` itself. The LLM mode
    /// falls back to heuristic extraction on error or timeout.
    pub async fn sub_queries(&self, query: &str) -> Vec<String> {
        let entities = match (self.mode, &self.llm) {
            (EntityExpansion::Off, _) => return Vec::new(),
            (EntityExpansion::Llm, Some(llm)) => {
                match tokio::time::timeout(self.timeout, llm.complete(&entity_prompt(query))).await {
                    Ok(Ok(raw)) => parse_terms(&raw),
                    Ok(Err(e)) => {
                        tracing::warn!("Entity extraction failed: {e}");
                        extract_key_phrases(query, self.max_entities)
                    }
                    Err(_) => {
                        tracing::warn!(
                            "Entity extraction timed out after {}s",
                            self.timeout.as_secs()
                        );
                        extract_key_phrases(query, self.max_entities)
                    }
                }
            }
            _ => extract_key_phrases(query, self.max_entities),
        };

        let query_lower = query.trim().to_lowercase();
        entities
            .into_iter()
            .filter(|e| e.to_lowercase() != query_lower)
            .take(self.max_entities)
            .collect()
    }
}

fn entity_prompt(query: &str) -> String {
    format!(
        "Liste as entidades nomeadas e expressões nominais mais importantes da consulta abaixo \
         (pessoas, lugares, instituições, eventos, temas). Responda apenas com os itens \
         separados por vírgula.\n\nConsulta: {query}"
    )
}
