use std::convert::Infallible;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures_util::stream::{self, Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::models::{ChatRequest, HistoryTurn, PipelineRequest};
use crate::pipeline::events::{EventKind, PipelineEvent};
use crate::pipeline::history::format_history;
use crate::state::AppState;

const MAX_HISTORY_TURNS: usize = 10;

/// POST /api/chat: runs the pipeline and streams its events as SSE.
///
/// Event names are the pipeline event kinds. `progress` and `partial` carry
/// `{"content": ...}`; `done` and `error` carry the JSON result. Closing the
/// connection cancels the run.
pub async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, String)> {
    let query = req.query.trim().to_string();
    if query.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Query is required".to_string()));
    }

    let permit = state
        .chat_semaphore
        .clone()
        .try_acquire_owned()
        .map_err(|_| {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Chat service at capacity".to_string(),
            )
        })?;

    let request = PipelineRequest {
        query,
        history: history_block(req.history.as_deref()),
        attachment_context: req.attachment,
    };

    let cancel = CancellationToken::new();
    let rx = state.pipeline.spawn(request, cancel.clone());
    let cancel_on_drop = cancel.drop_guard();

    let events = stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        Some((Ok(to_sse(event)), rx))
    });

    // The permit and the guard live as long as the response stream.
    let events = events.map(move |event| {
        let _held = (&permit, &cancel_on_drop);
        event
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// The most recent turns rendered for the prompt, or `None` without any.
fn history_block(turns: Option<&[HistoryTurn]>) -> Option<String> {
    let turns = turns.filter(|t| !t.is_empty())?;
    let recent = &turns[turns.len().saturating_sub(MAX_HISTORY_TURNS)..];
    Some(format_history(recent))
}

fn to_sse(event: PipelineEvent) -> Event {
    let name = event.kind.as_str();
    match event.kind {
        EventKind::Done | EventKind::Error => Event::default().event(name).data(event.payload),
        EventKind::Progress | EventKind::Partial => Event::default()
            .event(name)
            .json_data(serde_json::json!({ "content": event.payload }))
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to encode {name} event: {e}");
                Event::default().event(name).data("")
            }),
    }
}
