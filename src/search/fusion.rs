use std::collections::HashMap;

use crate::config::SearchConfig;
use crate::models::{RetrievedDocument, SourceKind};

/// Caps and boost applied when merging backend results.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionConfig {
    pub max_vector: usize,
    pub max_lexical: usize,
    pub max_total: usize,
    /// Final score is multiplied by `1 + repeat_boost * (matches - 1)`.
    pub repeat_boost: f32,
}

impl From<&SearchConfig> for FusionConfig {
    fn from(config: &SearchConfig) -> Self {
        Self {
            max_vector: config.max_vector_nodes,
            max_lexical: config.max_lexical_nodes,
            max_total: config.max_total_nodes,
            repeat_boost: config.repeat_boost,
        }
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self::from(&SearchConfig::default())
    }
}

struct Merged {
    doc: RetrievedDocument,
    matches: usize,
}

/// Merge records sharing an identifier, keeping first-seen order. Title and
/// content come from the first occurrence; the score is the maximum. A record
/// seen from both retrieval families becomes [`SourceKind::Hybrid`].
fn merge_by_identifier(docs: impl IntoIterator<Item = Merged>) -> Vec<Merged> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<Merged> = Vec::new();

    for incoming in docs {
        match index.get(&incoming.doc.identifier) {
            Some(&i) => {
                let existing = &mut out[i];
                existing.doc.relevance_score =
                    existing.doc.relevance_score.max(incoming.doc.relevance_score);
                existing.matches += incoming.matches;
                if existing.doc.source != incoming.doc.source {
                    existing.doc.source = SourceKind::Hybrid;
                }
            }
            None => {
                index.insert(incoming.doc.identifier.clone(), out.len());
                out.push(incoming);
            }
        }
    }
    out
}

/// Stable descending sort by score; ties keep first-seen order.
fn sort_by_score(merged: &mut [Merged]) {
    merged.sort_by(|a, b| {
        b.doc
            .relevance_score
            .partial_cmp(&a.doc.relevance_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// What every input set says about one identifier, gathered before any cap
/// drops records.
struct Totals {
    best: f32,
    matches: usize,
    source: SourceKind,
}

fn totals_by_identifier(docs: &[RetrievedDocument]) -> HashMap<&str, Totals> {
    let mut totals: HashMap<&str, Totals> = HashMap::new();
    for doc in docs {
        totals
            .entry(doc.identifier.as_str())
            .and_modify(|t| {
                t.best = t.best.max(doc.relevance_score);
                t.matches += 1;
                if t.source != doc.source {
                    t.source = SourceKind::Hybrid;
                }
            })
            .or_insert(Totals {
                best: doc.relevance_score,
                matches: 1,
                source: doc.source,
            });
    }
    totals
}

/// Merge result sets from any number of backends into one ranked list.
///
/// 1. The best score, match count and families of each identifier are
///    collected over every input set.
/// 2. Each retrieval family is deduplicated, sorted by score and capped
///    (`max_vector`, `max_lexical`; already-hybrid input shares `max_total`)
///    to choose which records survive.
/// 3. Survivors are concatenated (vector, lexical, hybrid), deduplicated
///    across families and given the totals from step 1.
/// 4. Scores get the repeat boost, then the list is re-sorted descending
///    (stable by first occurrence) and cut to `max_total`.
///
/// No two output records share an identifier, and each kept score is the
/// maximum over all inputs for that identifier before boosting, even when a
/// family cap dropped the record that carried it. Scores are not normalized
/// across families, so unbounded lexical scores usually sort above vector
/// scores in `(0, 1]`.
pub fn fuse(result_sets: Vec<Vec<RetrievedDocument>>, config: &FusionConfig) -> Vec<RetrievedDocument> {
    let all: Vec<RetrievedDocument> = result_sets.into_iter().flatten().collect();
    let totals = totals_by_identifier(&all);

    let mut vector = Vec::new();
    let mut lexical = Vec::new();
    let mut hybrid = Vec::new();

    for doc in &all {
        let merged = Merged {
            doc: doc.clone(),
            matches: 1,
        };
        match merged.doc.source {
            SourceKind::Vector => vector.push(merged),
            SourceKind::Lexical => lexical.push(merged),
            SourceKind::Hybrid => hybrid.push(merged),
        }
    }

    let capped = |docs: Vec<Merged>, cap: usize| {
        let mut merged = merge_by_identifier(docs);
        sort_by_score(&mut merged);
        merged.truncate(cap);
        merged
    };

    let vector = capped(vector, config.max_vector);
    let lexical = capped(lexical, config.max_lexical);
    let hybrid = capped(hybrid, config.max_total);

    let mut fused = merge_by_identifier(vector.into_iter().chain(lexical).chain(hybrid));
    for m in &mut fused {
        if let Some(t) = totals.get(m.doc.identifier.as_str()) {
            m.doc.relevance_score = t.best;
            m.doc.source = t.source;
            m.matches = t.matches;
        }
    }
    if config.repeat_boost > 0.0 {
        for m in &mut fused {
            m.doc.relevance_score *= 1.0 + config.repeat_boost * (m.matches as f32 - 1.0);
        }
    }
    sort_by_score(&mut fused);
    fused.truncate(config.max_total);

    fused.into_iter().map(|m| m.doc).collect()
}
