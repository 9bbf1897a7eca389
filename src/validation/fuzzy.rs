use crate::config::SimilarityMetric;

/// Similarity in `[0, 1]` under `metric`.
pub fn similarity(metric: SimilarityMetric, a: &str, b: &str) -> f64 {
    match metric {
        SimilarityMetric::JaroWinkler => strsim::jaro_winkler(a, b),
        SimilarityMetric::Levenshtein => strsim::normalized_levenshtein(a, b),
    }
}

/// Nearest-string lookup with a minimum similarity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FuzzyMatcher {
    pub metric: SimilarityMetric,
    pub cutoff: f64,
}

impl FuzzyMatcher {
    pub fn new(metric: SimilarityMetric, cutoff: f64) -> Self {
        Self { metric, cutoff }
    }

    /// The most similar entry of `pool` scoring at least the cutoff. Ties go
    /// to the entry seen first.
    pub fn best_match<'a>(&self, needle: &str, pool: impl IntoIterator<Item = &'a str>) -> Option<(&'a str, f64)> {
        let mut best: Option<(&'a str, f64)> = None;
        for candidate in pool {
            let score = similarity(self.metric, needle, candidate);
            if score < self.cutoff {
                continue;
            }
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((candidate, score));
            }
        }
        best
    }
}
