use async_trait::async_trait;
use std::sync::Arc;

use crate::models::{RetrievedDocument, SourceKind};
use crate::search::{clean_queries, CandidateStore, SearchBackend};

/// Boolean containment search: a document matches when it contains every
/// word of the query. Results keep corpus order and all score 1.0.
pub struct SubstringBackend {
    store: Arc<dyn CandidateStore>,
}

impl SubstringBackend {
    pub fn new(store: Arc<dyn CandidateStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SearchBackend for SubstringBackend {
    fn name(&self) -> &'static str {
        "substring"
    }

    fn source(&self) -> SourceKind {
        SourceKind::Lexical
    }

    async fn search(&self, queries: &[String], limit_per_query: usize) -> Vec<RetrievedDocument> {
        clean_queries(queries)
            .iter()
            .flat_map(|q| self.store.all_words(q, limit_per_query))
            .map(|doc| doc.into_retrieved(1.0, SourceKind::Lexical))
            .collect()
    }
}
