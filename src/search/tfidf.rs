use std::collections::HashMap;

use crate::models::CorpusDocument;
use crate::search::tokenize::tokenize;
use crate::search::CandidateScorer;

/// Tokens of at least two characters, the granularity the vectorizer uses.
fn vectorizer_tokens(text: &str) -> Vec<String> {
    tokenize(text)
        .into_iter()
        .filter(|t| t.chars().count() >= 2)
        .collect()
}

/// Cosine similarity between `query` and each document under a TF-IDF model
/// fitted on the documents plus the query. Uses smoothed IDF
/// `ln((1 + n) / (1 + df)) + 1` and L2-normalised rows.
///
/// Returns `None` when the fitted vocabulary is empty.
pub fn tfidf_cosine(query: &str, documents: &[String]) -> Option<Vec<f64>> {
    let mut rows: Vec<HashMap<String, f64>> = documents
        .iter()
        .map(|d| term_counts(&vectorizer_tokens(d)))
        .collect();
    rows.push(term_counts(&vectorizer_tokens(query)));

    let mut df: HashMap<&str, usize> = HashMap::new();
    for row in &rows {
        for term in row.keys() {
            *df.entry(term.as_str()).or_insert(0) += 1;
        }
    }
    if df.is_empty() {
        return None;
    }

    let n = rows.len() as f64;
    let idf: HashMap<String, f64> = df
        .into_iter()
        .map(|(term, count)| (term.to_string(), ((1.0 + n) / (1.0 + count as f64)).ln() + 1.0))
        .collect();

    for row in rows.iter_mut() {
        for (term, value) in row.iter_mut() {
            *value *= idf[term];
        }
        let norm = row.values().map(|v| v * v).sum::<f64>().sqrt();
        if norm > 0.0 {
            row.values_mut().for_each(|v| *v /= norm);
        }
    }

    let query_row = rows.pop()?;
    Some(
        rows.iter()
            .map(|row| {
                query_row
                    .iter()
                    .filter_map(|(term, q)| row.get(term).map(|d| q * d))
                    .sum()
            })
            .collect(),
    )
}

fn term_counts(tokens: &[String]) -> HashMap<String, f64> {
    let mut counts = HashMap::new();
    for t in tokens {
        *counts.entry(t.clone()).or_insert(0.0) += 1.0;
    }
    counts
}

pub fn candidate_texts(candidates: &[CorpusDocument]) -> Vec<String> {
    candidates
        .iter()
        .map(|d| format!("{} {}", d.title, d.content))
        .collect()
}

/// TF-IDF cosine ranking; a uniform 1.0 when nothing can be vectorised.
pub struct TfidfScorer;

impl CandidateScorer for TfidfScorer {
    fn name(&self) -> &'static str {
        "tfidf"
    }

    fn score(&self, query: &str, candidates: &[CorpusDocument]) -> Vec<f64> {
        tfidf_cosine(query, &candidate_texts(candidates)).unwrap_or_else(|| {
            tracing::debug!("TF-IDF vocabulary empty, using uniform scores");
            vec![1.0; candidates.len()]
        })
    }
}
