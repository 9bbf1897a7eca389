use std::collections::HashMap;

use crate::models::CorpusDocument;
use crate::search::tokenize::tokenize;
use crate::search::CandidateScorer;

/// Okapi BM25 fitted over a small candidate set.
///
/// Negative IDF values (terms in more than half the documents) are replaced
/// by `epsilon * average_idf` so very common terms still score slightly
/// above zero.
pub struct Bm25Okapi {
    k1: f64,
    b: f64,
    avgdl: f64,
    doc_len: Vec<usize>,
    doc_freqs: Vec<HashMap<String, usize>>,
    idf: HashMap<String, f64>,
}

impl Bm25Okapi {
    pub const K1: f64 = 1.5;
    pub const B: f64 = 0.75;
    pub const EPSILON: f64 = 0.25;

    pub fn fit(corpus: &[Vec<String>]) -> Self {
        Self::with_params(corpus, Self::K1, Self::B, Self::EPSILON)
    }

    pub fn with_params(corpus: &[Vec<String>], k1: f64, b: f64, epsilon: f64) -> Self {
        let n = corpus.len();
        let mut doc_len = Vec::with_capacity(n);
        let mut doc_freqs = Vec::with_capacity(n);
        let mut containing: HashMap<String, usize> = HashMap::new();

        for doc in corpus {
            doc_len.push(doc.len());
            let mut freqs: HashMap<String, usize> = HashMap::new();
            for token in doc {
                *freqs.entry(token.clone()).or_insert(0) += 1;
            }
            for token in freqs.keys() {
                *containing.entry(token.clone()).or_insert(0) += 1;
            }
            doc_freqs.push(freqs);
        }

        let total_len: usize = doc_len.iter().sum();
        let avgdl = if n > 0 { total_len as f64 / n as f64 } else { 0.0 };

        let mut idf = HashMap::with_capacity(containing.len());
        let mut idf_sum = 0.0;
        let mut negative = Vec::new();
        for (token, df) in containing {
            let value = (n as f64 - df as f64 + 0.5).ln() - (df as f64 + 0.5).ln();
            idf_sum += value;
            if value < 0.0 {
                negative.push(token.clone());
            }
            idf.insert(token, value);
        }
        if !idf.is_empty() {
            let eps = epsilon * idf_sum / idf.len() as f64;
            for token in negative {
                idf.insert(token, eps);
            }
        }

        Self {
            k1,
            b,
            avgdl,
            doc_len,
            doc_freqs,
            idf,
        }
    }

    /// One score per fitted document.
    pub fn get_scores(&self, query: &[String]) -> Vec<f64> {
        let mut scores = vec![0.0; self.doc_len.len()];
        if self.avgdl == 0.0 {
            return scores;
        }

        for term in query {
            let Some(idf) = self.idf.get(term) else {
                continue;
            };
            for (i, freqs) in self.doc_freqs.iter().enumerate() {
                let tf = freqs.get(term).copied().unwrap_or(0) as f64;
                if tf == 0.0 {
                    continue;
                }
                let norm = 1.0 - self.b + self.b * self.doc_len[i] as f64 / self.avgdl;
                scores[i] += idf * (tf * (self.k1 + 1.0) / (tf + self.k1 * norm));
            }
        }
        scores
    }
}

/// Tokens for every candidate: title then content.
pub fn tokenize_candidates(candidates: &[CorpusDocument]) -> Vec<Vec<String>> {
    candidates
        .iter()
        .map(|d| tokenize(&format!("{} {}", d.title, d.content)))
        .collect()
}

/// Plain BM25 ranking.
pub struct Bm25Scorer;

impl CandidateScorer for Bm25Scorer {
    fn name(&self) -> &'static str {
        "bm25"
    }

    fn score(&self, query: &str, candidates: &[CorpusDocument]) -> Vec<f64> {
        let corpus = tokenize_candidates(candidates);
        Bm25Okapi::fit(&corpus).get_scores(&tokenize(query))
    }
}
