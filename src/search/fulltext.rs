use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, BoostQuery, FuzzyTermQuery, Occur, PhraseQuery, Query, QueryParser, TermQuery};
use tantivy::schema::*;
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, Term};

use crate::models::{CorpusDocument, RetrievedDocument, SourceKind};
use crate::search::entities::EntityExpander;
use crate::search::tokenize::tokenize;
use crate::search::{clean_queries, SearchBackend};

const TITLE_BOOST: f32 = 3.0;
const BODY_BOOST: f32 = 2.0;
const PHRASE_BOOST: f32 = 2.0;
const PHRASE_SLOP: u32 = 3;
/// Weight of a fuzzy (edit-distance) match relative to an exact one.
const FUZZY_WEIGHT: f32 = 0.5;
/// Score multiplier per extra sub-query that found the same document.
const MULTI_HIT_BOOST: f32 = 0.3;

/// Edit distance allowed for a term of `len` characters.
pub fn fuzzy_distance(len: usize) -> u8 {
    match len {
        0..=2 => 0,
        3..=5 => 1,
        _ => 2,
    }
}

/// Full-text index over the corpus built on tantivy.
pub struct FullTextIndex {
    index: Index,
    reader: IndexReader,
    f_identifier: Field,
    f_title: Field,
    f_body: Field,
}

fn build_schema() -> Schema {
    let mut schema_builder = Schema::builder();
    schema_builder.add_text_field("identifier", STRING | STORED);
    schema_builder.add_text_field("title", TEXT | STORED);
    schema_builder.add_text_field("body", TEXT | STORED);
    schema_builder.build()
}

impl FullTextIndex {
    /// Create or open the index at the given directory.
    pub fn open_or_create(index_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(index_dir)?;

        let index = if index_dir.join("meta.json").exists() {
            Index::open_in_dir(index_dir).context("Failed to open existing tantivy index")?
        } else {
            Index::create_in_dir(index_dir, build_schema())
                .context("Failed to create tantivy index")?
        };
        Self::from_index(index)
    }

    /// Index held entirely in memory.
    pub fn in_memory() -> Result<Self> {
        Self::from_index(Index::create_in_ram(build_schema()))
    }

    fn from_index(index: Index) -> Result<Self> {
        let schema = index.schema();
        let f_identifier = schema
            .get_field("identifier")
            .context("Index schema has no identifier field")?;
        let f_title = schema
            .get_field("title")
            .context("Index schema has no title field")?;
        let f_body = schema
            .get_field("body")
            .context("Index schema has no body field")?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .context("Failed to create reader")?;

        Ok(Self {
            index,
            reader,
            f_identifier,
            f_title,
            f_body,
        })
    }

    /// Replace the index contents with `documents`.
    pub fn rebuild(&self, documents: &[CorpusDocument]) -> Result<usize> {
        let mut writer: IndexWriter = self
            .index
            .writer(50_000_000)
            .context("Failed to create index writer")?;

        writer
            .delete_all_documents()
            .context("Failed to clear index")?;
        for d in documents {
            writer.add_document(doc!(
                self.f_identifier => d.identifier.clone(),
                self.f_title => d.title.clone(),
                self.f_body => d.content.clone(),
            ))?;
        }

        writer.commit().context("Failed to commit index")?;
        self.reader.reload().context("Failed to reload index reader")?;
        Ok(documents.len())
    }

    pub fn doc_count(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    /// Fielded query: every term matches title (x3) or body (x2), exactly or
    /// within an edit distance that grows with term length; multi-term queries
    /// add a sloppy phrase clause.
    fn build_query(&self, query_str: &str) -> Option<Box<dyn Query>> {
        let terms = tokenize(query_str);
        if terms.is_empty() {
            return None;
        }

        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        for (field, boost) in [(self.f_title, TITLE_BOOST), (self.f_body, BODY_BOOST)] {
            for text in &terms {
                let term = Term::from_field_text(field, text);
                clauses.push((
                    Occur::Should,
                    Box::new(BoostQuery::new(
                        Box::new(TermQuery::new(term.clone(), IndexRecordOption::WithFreqs)),
                        boost,
                    )),
                ));

                let distance = fuzzy_distance(text.chars().count());
                if distance > 0 {
                    clauses.push((
                        Occur::Should,
                        Box::new(BoostQuery::new(
                            Box::new(FuzzyTermQuery::new(term, distance, true)),
                            boost * FUZZY_WEIGHT,
                        )),
                    ));
                }
            }

            if terms.len() >= 2 {
                let mut phrase = PhraseQuery::new(
                    terms
                        .iter()
                        .map(|t| Term::from_field_text(field, t))
                        .collect(),
                );
                phrase.set_slop(PHRASE_SLOP);
                clauses.push((
                    Occur::Should,
                    Box::new(BoostQuery::new(Box::new(phrase), boost * PHRASE_BOOST)),
                ));
            }
        }

        Some(Box::new(BooleanQuery::new(clauses)))
    }

    /// Search the index and return scored hits.
    pub fn search(&self, query_str: &str, limit: usize) -> Result<Vec<RetrievedDocument>> {
        let Some(query) = self.build_query(query_str) else {
            return Ok(Vec::new());
        };
        let searcher = self.reader.searcher();

        let top_docs = match searcher.search(&query, &TopDocs::with_limit(limit)) {
            Ok(top) => top,
            Err(e) => {
                tracing::warn!("Fielded search failed, falling back to body match: {e}");
                let parser = QueryParser::for_index(&self.index, vec![self.f_body]);
                let (fallback, _) = parser.parse_query_lenient(&query_str.to_lowercase());
                searcher
                    .search(&fallback, &TopDocs::with_limit(limit))
                    .context("Search failed")?
            }
        };

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(doc_address)
                .context("Failed to retrieve document")?;

            let text = |field: Field| {
                doc.get_first(field)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string()
            };

            hits.push(RetrievedDocument {
                identifier: text(self.f_identifier),
                title: text(self.f_title),
                content: text(self.f_body),
                relevance_score: score,
                source: SourceKind::Lexical,
            });
        }

        Ok(hits)
    }
}

/// Merge hits from one query and its entity sub-queries: the best score per
/// document, boosted by `1 + 0.3 * (hits - 1)`.
pub fn merge_sub_query_hits(hit_lists: Vec<Vec<RetrievedDocument>>, limit: usize) -> Vec<RetrievedDocument> {
    let mut order: Vec<String> = Vec::new();
    let mut merged: HashMap<String, (RetrievedDocument, usize)> = HashMap::new();

    for hit in hit_lists.into_iter().flatten() {
        match merged.get_mut(&hit.identifier) {
            Some((existing, count)) => {
                existing.relevance_score = existing.relevance_score.max(hit.relevance_score);
                *count += 1;
            }
            None => {
                order.push(hit.identifier.clone());
                merged.insert(hit.identifier.clone(), (hit, 1));
            }
        }
    }

    let mut out: Vec<RetrievedDocument> = order
        .into_iter()
        .filter_map(|id| merged.remove(&id))
        .map(|(mut doc, count)| {
            doc.relevance_score *= 1.0 + MULTI_HIT_BOOST * (count as f32 - 1.0);
            doc
        })
        .collect();
    out.sort_by(|a, b| {
        b.relevance_score
            .partial_cmp(&a.relevance_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    out.truncate(limit);
    out
}

/// Lexical backend over [`FullTextIndex`], optionally widening each query
/// with entity sub-queries.
pub struct FullTextBackend {
    index: Arc<FullTextIndex>,
    entities: EntityExpander,
}

impl FullTextBackend {
    pub fn new(index: Arc<FullTextIndex>, entities: EntityExpander) -> Self {
        Self { index, entities }
    }

    async fn run_query(&self, query: String, limit: usize) -> Vec<RetrievedDocument> {
        let index = self.index.clone();
        let label = query.clone();
        match tokio::task::spawn_blocking(move || index.search(&query, limit)).await {
            Ok(Ok(hits)) => hits,
            Ok(Err(e)) => {
                tracing::warn!("Full-text search failed for '{label}': {e:#}");
                Vec::new()
            }
            Err(e) => {
                tracing::warn!("Full-text search task failed: {e}");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl SearchBackend for FullTextBackend {
    fn name(&self) -> &'static str {
        "fulltext"
    }

    fn source(&self) -> SourceKind {
        SourceKind::Lexical
    }

    async fn search(&self, queries: &[String], limit_per_query: usize) -> Vec<RetrievedDocument> {
        let mut results = Vec::new();
        if limit_per_query == 0 {
            return results;
        }

        for query in clean_queries(queries) {
            let sub_queries = self.entities.sub_queries(&query).await;
            if sub_queries.is_empty() {
                results.extend(self.run_query(query, limit_per_query).await);
                continue;
            }

            let mut hit_lists = vec![self.run_query(query, limit_per_query).await];
            for sub in sub_queries {
                hit_lists.push(self.run_query(sub, limit_per_query).await);
            }
            results.extend(merge_sub_query_hits(hit_lists, limit_per_query));
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn docs() -> Vec<CorpusDocument> {
        vec![
            CorpusDocument {
                identifier: "judeus-no-brasil".into(),
                title: "Judeus no Brasil".into(),
                content: "A presença judaica no Brasil colonial e a inquisição.".into(),
            },
            CorpusDocument {
                identifier: "imigracao-italiana".into(),
                title: "Imigração italiana".into(),
                content: "Colonos italianos no interior de São Paulo.".into(),
            },
            CorpusDocument {
                identifier: "culinaria".into(),
                title: "Culinária mineira".into(),
                content: "Pão de queijo e doce de leite, receitas do Brasil.".into(),
            },
        ]
    }

    fn index() -> FullTextIndex {
        let index = FullTextIndex::in_memory().unwrap();
        index.rebuild(&docs()).unwrap();
        index
    }

    fn hit(id: &str, score: f32) -> RetrievedDocument {
        RetrievedDocument {
            identifier: id.into(),
            title: String::new(),
            content: String::new(),
            relevance_score: score,
            source: SourceKind::Lexical,
        }
    }

    #[test]
    fn test_fuzzy_distance_by_length() {
        assert_eq!(fuzzy_distance(2), 0);
        assert_eq!(fuzzy_distance(4), 1);
        assert_eq!(fuzzy_distance(9), 2);
    }

    #[test]
    fn test_title_match_ranks_first() {
        let hits = index().search("judeus brasil", 3).unwrap();
        assert_eq!(hits[0].identifier, "judeus-no-brasil");
        assert_eq!(hits[0].title, "Judeus no Brasil");
    }

    #[test]
    fn test_fuzzy_match_tolerates_typos() {
        let hits = index().search("imigrasão italianna", 3).unwrap();
        assert_eq!(hits.first().map(|h| h.identifier.as_str()), Some("imigracao-italiana"));
    }

    #[test]
    fn test_rebuild_replaces_contents() {
        let index = index();
        assert_eq!(index.doc_count(), 3);
        index.rebuild(&docs()[..1]).unwrap();
        assert_eq!(index.doc_count(), 1);
    }

    #[test]
    fn test_empty_query() {
        assert!(index().search("  !! ", 3).unwrap().is_empty());
    }

    #[test]
    fn test_merge_sub_query_hits_boosts_repeats() {
        let merged = merge_sub_query_hits(
            vec![vec![hit("a", 2.0), hit("b", 3.0)], vec![hit("a", 1.0)], vec![hit("a", 1.5)]],
            10,
        );
        assert_eq!(merged[0].identifier, "a");
        assert!((merged[0].relevance_score - 2.0 * 1.6).abs() < 1e-6);
        assert_eq!(merged[1].relevance_score, 3.0);
    }

    #[tokio::test]
    async fn test_backend_with_entity_sub_queries() {
        let backend = FullTextBackend::new(
            Arc::new(index()),
            EntityExpander::new(
                crate::config::EntityExpansion::Heuristic,
                None,
                std::time::Duration::from_secs(1),
            ),
        );
        let hits = backend
            .search(&["presença judaica no Brasil colonial".to_string()], 2)
            .await;
        assert!(hits.len() <= 2);
        assert_eq!(hits[0].identifier, "judeus-no-brasil");
        assert!(backend.search(&[], 2).await.is_empty());
    }
}
