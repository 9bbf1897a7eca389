use anyhow::{Context, Result};
use std::path::Path;

use crate::models::CorpusDocument;
use crate::search::tokenize::words;
use crate::search::CandidateStore;

/// The whole corpus held in memory, with a lowercased haystack per document
/// for substring matching.
pub struct InMemoryCorpus {
    documents: Vec<CorpusDocument>,
    haystacks: Vec<String>,
}

impl InMemoryCorpus {
    pub fn new(documents: Vec<CorpusDocument>) -> Self {
        let haystacks = documents
            .iter()
            .map(|d| format!("{}\n{}", d.title, d.content).to_lowercase())
            .collect();
        Self {
            documents,
            haystacks,
        }
    }

    /// Load a JSON array of documents or JSON Lines (one document per line).
    /// A missing file yields an empty corpus.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!("Corpus file {} not found, starting empty", path.display());
            return Ok(Self::new(Vec::new()));
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read corpus {}", path.display()))?;
        let documents = parse_documents(&data)
            .with_context(|| format!("Failed to parse corpus {}", path.display()))?;

        tracing::info!("Loaded {} documents from {}", documents.len(), path.display());
        Ok(Self::new(documents))
    }

    pub fn documents(&self) -> &[CorpusDocument] {
        &self.documents
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn identifiers(&self) -> Vec<String> {
        self.documents.iter().map(|d| d.identifier.clone()).collect()
    }
}

fn parse_documents(data: &str) -> Result<Vec<CorpusDocument>> {
    let trimmed = data.trim_start();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).context("Invalid JSON array");
    }

    let mut documents = Vec::new();
    for (line_no, line) in data.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let doc: CorpusDocument = serde_json::from_str(line)
            .with_context(|| format!("Invalid JSON on line {}", line_no + 1))?;
        documents.push(doc);
    }
    Ok(documents)
}

impl CandidateStore for InMemoryCorpus {
    fn any_word(&self, query: &str) -> Vec<CorpusDocument> {
        let needles = words(query);
        if needles.is_empty() {
            return Vec::new();
        }
        self.haystacks
            .iter()
            .zip(&self.documents)
            .filter(|(hay, _)| needles.iter().any(|n| hay.contains(n.as_str())))
            .map(|(_, doc)| doc.clone())
            .collect()
    }

    fn all_words(&self, query: &str, limit: usize) -> Vec<CorpusDocument> {
        let needles = words(query);
        if needles.is_empty() {
            return Vec::new();
        }
        self.haystacks
            .iter()
            .zip(&self.documents)
            .filter(|(hay, _)| needles.iter().all(|n| hay.contains(n.as_str())))
            .map(|(_, doc)| doc.clone())
            .take(limit)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, title: &str, content: &str) -> CorpusDocument {
        CorpusDocument {
            identifier: id.into(),
            title: title.into(),
            content: content.into(),
        }
    }

    #[test]
    fn test_parse_json_array_with_aliases() {
        let data = r#"[{"url": "a", "title": "A", "text": "alfa"}, {"slug": "b", "content": "beta"}]"#;
        let docs = parse_documents(data).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].identifier, "a");
        assert_eq!(docs[1].identifier, "b");
        assert_eq!(docs[1].title, "");
    }

    #[test]
    fn test_parse_json_lines() {
        let data = "{\"url\": \"a\", \"text\": \"x\"}\n\n{\"url\": \"b\", \"text\": \"y\"}\n";
        let docs = parse_documents(data).unwrap();
        assert_eq!(docs.iter().map(|d| d.identifier.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_parse_json_lines_reports_line() {
        let err = parse_documents("{\"url\": \"a\", \"text\": \"x\"}\nnot json").unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let corpus = InMemoryCorpus::load(Path::new("/nonexistent/corpus.json")).unwrap();
        assert!(corpus.is_empty());
    }

    #[test]
    fn test_any_word_and_all_words() {
        let corpus = InMemoryCorpus::new(vec![
            doc("1", "Judeus no Brasil", "história da imigração"),
            doc("2", "Imigração italiana", "colonos em São Paulo"),
            doc("3", "Culinária", "receitas"),
        ]);

        let any: Vec<String> = corpus
            .any_word("JUDEUS imigração")
            .into_iter()
            .map(|d| d.identifier)
            .collect();
        assert_eq!(any, vec!["1", "2"]);

        let all: Vec<String> = corpus
            .all_words("imigração judeus", 10)
            .into_iter()
            .map(|d| d.identifier)
            .collect();
        assert_eq!(all, vec!["1"]);

        assert!(corpus.any_word("   ").is_empty());
    }
}
