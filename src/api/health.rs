use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub identifiers_loaded: bool,
    pub identifier_count: usize,
    pub loaded_at: Option<DateTime<Utc>>,
    pub corpus_documents: usize,
    pub fulltext_documents: u64,
    pub vector_entries: usize,
    pub backends: Vec<&'static str>,
}

/// GET /api/health: readiness. Answers 503 until the authoritative
/// identifier list has loaded; each call retries a failed load.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let identifiers = state.registry.ensure_loaded().await;
    let ready = identifiers.is_some();

    let response = HealthResponse {
        status: if ready { "ok" } else { "unavailable" },
        identifiers_loaded: ready,
        identifier_count: identifiers.map(|set| set.len()).unwrap_or(0),
        loaded_at: state.registry.loaded_at(),
        corpus_documents: state.corpus.len(),
        fulltext_documents: state.fulltext.doc_count(),
        vector_entries: state.vectors.entry_count(),
        backends: state.searcher.backend_names(),
    };

    let code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(response))
}
