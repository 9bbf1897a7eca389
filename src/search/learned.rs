use crate::models::CorpusDocument;
use crate::search::bm25::{tokenize_candidates, Bm25Okapi};
use crate::search::tfidf::{candidate_texts, tfidf_cosine};
use crate::search::tokenize::tokenize;
use crate::search::CandidateScorer;

/// Per-candidate relevance features.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Features {
    pub bm25: f64,
    pub tfidf: f64,
    /// Token count divided by the longest candidate's token count.
    pub normalized_length: f64,
    /// Occurrences of query tokens divided by the document's token count.
    pub query_term_frequency: f64,
}

pub fn extract_features(query: &str, candidates: &[CorpusDocument]) -> Vec<Features> {
    let corpus = tokenize_candidates(candidates);
    let query_tokens = tokenize(query);

    let bm25 = Bm25Okapi::fit(&corpus).get_scores(&query_tokens);
    let tfidf = tfidf_cosine(query, &candidate_texts(candidates))
        .unwrap_or_else(|| vec![1.0; candidates.len()]);
    let max_len = corpus.iter().map(Vec::len).max().unwrap_or(0);

    corpus
        .iter()
        .enumerate()
        .map(|(i, doc)| {
            let occurrences = doc.iter().filter(|t| query_tokens.contains(t)).count();
            Features {
                bm25: bm25[i],
                tfidf: tfidf[i],
                normalized_length: if max_len > 0 {
                    doc.len() as f64 / max_len as f64
                } else {
                    0.0
                },
                query_term_frequency: if doc.is_empty() {
                    0.0
                } else {
                    occurrences as f64 / doc.len() as f64
                },
            }
        })
        .collect()
}

/// Maps a feature vector to a relevance score. A trained model can replace
/// [`LinearRanker`] behind this trait.
pub trait Ranker: Send + Sync + 'static {
    fn predict(&self, features: &Features) -> f64;
}

/// Fixed-weight linear combination of the features.
#[derive(Debug, Clone, Copy)]
pub struct LinearRanker {
    pub bm25: f64,
    pub tfidf: f64,
    pub length: f64,
    pub term_frequency: f64,
}

impl Default for LinearRanker {
    fn default() -> Self {
        Self {
            bm25: 0.4,
            tfidf: 0.3,
            length: 0.1,
            term_frequency: 0.2,
        }
    }
}

impl Ranker for LinearRanker {
    fn predict(&self, f: &Features) -> f64 {
        self.bm25 * f.bm25
            + self.tfidf * f.tfidf
            + self.length * f.normalized_length
            + self.term_frequency * f.query_term_frequency
    }
}

pub struct LearnedScorer<R> {
    ranker: R,
}

impl<R: Ranker> LearnedScorer<R> {
    pub fn new(ranker: R) -> Self {
        Self { ranker }
    }
}

impl Default for LearnedScorer<LinearRanker> {
    fn default() -> Self {
        Self::new(LinearRanker::default())
    }
}

impl<R: Ranker> CandidateScorer for LearnedScorer<R> {
    fn name(&self) -> &'static str {
        "learned"
    }

    fn score(&self, query: &str, candidates: &[CorpusDocument]) -> Vec<f64> {
        extract_features(query, candidates)
            .iter()
            .map(|f| self.ranker.predict(f))
            .collect()
    }
}
