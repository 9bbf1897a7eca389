use std::collections::HashMap;

use crate::models::CorpusDocument;
use crate::search::bm25::{tokenize_candidates, Bm25Okapi};
use crate::search::tokenize::tokenize;
use crate::search::CandidateScorer;

/// Maximum token distance that still earns a proximity bonus.
pub const PROXIMITY_WINDOW: usize = 10;
const BM25_WEIGHT: f64 = 0.7;
const PROXIMITY_WEIGHT: f64 = 0.3;

/// Mean over co-occurring query-term pairs of `1 / (1 + min_distance)`,
/// counting only pairs within `window`. Pairs where either term is missing
/// are ignored. Queries with fewer than two tokens score 1.0.
pub fn proximity_score(query: &[String], doc: &[String], window: usize) -> f64 {
    if query.len() < 2 {
        return 1.0;
    }

    let mut positions: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, token) in doc.iter().enumerate() {
        positions.entry(token.as_str()).or_default().push(i);
    }

    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..query.len() {
        for j in (i + 1)..query.len() {
            let (Some(a), Some(b)) = (
                positions.get(query[i].as_str()),
                positions.get(query[j].as_str()),
            ) else {
                continue;
            };
            let min_distance = a
                .iter()
                .flat_map(|p| b.iter().map(move |q| p.abs_diff(*q)))
                .min()
                .unwrap_or(usize::MAX);
            if min_distance <= window {
                total += 1.0 / (1.0 + min_distance as f64);
            }
            pairs += 1;
        }
    }

    total / pairs.max(1) as f64
}

/// BM25 blended 70/30 with the proximity bonus. The bonus is scaled by the
/// best BM25 score in the candidate set so both terms share units.
pub struct ProximityScorer;

impl CandidateScorer for ProximityScorer {
    fn name(&self) -> &'static str {
        "bm25_proximity"
    }

    fn score(&self, query: &str, candidates: &[CorpusDocument]) -> Vec<f64> {
        let corpus = tokenize_candidates(candidates);
        let query_tokens = tokenize(query);
        let bm25 = Bm25Okapi::fit(&corpus).get_scores(&query_tokens);
        let max_bm25 = bm25.iter().copied().fold(f64::MIN, f64::max);

        bm25.iter()
            .zip(&corpus)
            .map(|(score, doc)| {
                let prox = proximity_score(&query_tokens, doc, PROXIMITY_WINDOW);
                BM25_WEIGHT * score + PROXIMITY_WEIGHT * prox * max_bm25
            })
            .collect()
    }
}
