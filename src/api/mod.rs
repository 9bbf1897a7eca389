//! Axum handlers. Thin: request validation and transport only; the work
//! happens in [`crate::pipeline`] and [`crate::search`].

pub mod chat;
pub mod health;
pub mod search;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// All HTTP routes, with state attached.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(chat::chat))
        .route("/api/search", post(search::search))
        .route("/api/health", get(health::health))
        .with_state(state)
}
