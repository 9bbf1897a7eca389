use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::models::PipelineResult;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Stage advancement message
    Progress,
    /// One streamed answer delta
    Partial,
    /// Terminal: `payload` is the JSON `PipelineResult`
    Done,
    /// Terminal: `payload` is the JSON apology `PipelineResult`
    Error,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Progress => "progress",
            EventKind::Partial => "partial",
            EventKind::Done => "done",
            EventKind::Error => "error",
        }
    }
}

/// One tagged message on a run's output stream.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PipelineEvent {
    pub kind: EventKind,
    pub payload: String,
}

impl PipelineEvent {
    pub fn progress(message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Progress,
            payload: message.into(),
        }
    }

    pub fn partial(delta: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Partial,
            payload: delta.into(),
        }
    }

    pub fn done(result: &PipelineResult) -> Self {
        Self {
            kind: EventKind::Done,
            payload: result_json(result),
        }
    }

    pub fn error(result: &PipelineResult) -> Self {
        Self {
            kind: EventKind::Error,
            payload: result_json(result),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, EventKind::Done | EventKind::Error)
    }

    /// Decode the result carried by a terminal event.
    pub fn result(&self) -> Option<PipelineResult> {
        if !self.is_terminal() {
            return None;
        }
        serde_json::from_str(&self.payload).ok()
    }
}

fn result_json(result: &PipelineResult) -> String {
    serde_json::to_string(result).unwrap_or_else(|e| {
        tracing::error!("Failed to serialize pipeline result: {e}");
        "{}".to_string()
    })
}

/// Sending half of a run's event stream. Once the run is cancelled or the
/// receiver is gone, nothing more is delivered.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<PipelineEvent>,
    cancel: CancellationToken,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<PipelineEvent>, cancel: CancellationToken) -> Self {
        Self { tx, cancel }
    }

    /// Bounded channel plus its sink.
    pub fn channel(buffer: usize, cancel: CancellationToken) -> (Self, mpsc::Receiver<PipelineEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(tx, cancel), rx)
    }

    /// Deliver `event`, waiting for buffer space. Returns `false` when the
    /// caller has gone away; a closed receiver also cancels the run.
    pub async fn emit(&self, event: PipelineEvent) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        let delivered = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(event) => sent.is_ok(),
        };
        if !delivered && !self.cancel.is_cancelled() {
            tracing::info!("Event receiver closed, cancelling run");
            self.cancel.cancel();
        }
        delivered
    }

    /// Emit a progress message unless it is empty. Empty messages count as
    /// delivered.
    pub async fn progress(&self, message: &str) -> bool {
        if message.is_empty() {
            return !self.is_cancelled();
        }
        self.emit(PipelineEvent::progress(message)).await
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}
