use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::models::{SearchRequest, SearchResponse};
use crate::state::AppState;

const MAX_LIMIT: usize = 50;

/// POST /api/search - Retrieval only, no expansion and no LLM:
///   1. Every query goes to every configured backend (`limit` hits each)
///   2. Per-family merge and caps, then cross-family fusion
pub async fn search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, (StatusCode, String)> {
    let queries: Vec<String> = req
        .queries
        .iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .collect();
    if queries.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "At least one query is required".to_string(),
        ));
    }

    let limit = req.limit.clamp(1, MAX_LIMIT);
    let results = state.searcher.search_queries(&queries, limit).await;

    Ok(Json(SearchResponse {
        results: results.documents,
        total_vector_hits: results.vector_hits,
        total_lexical_hits: results.lexical_hits,
    }))
}
