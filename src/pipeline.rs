//! Streaming pipeline. Drains a backend stream on a worker task and forwards
//! every piece to the UI loop as a `UiEvent`.
//!
//! The worker owns nothing but the stream and a `UiHandle`. All session
//! mutation happens on the UI loop when it applies the events, so the
//! transcript never needs a lock.

use std::panic::AssertUnwindSafe;

use futures_util::{FutureExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::backend::{BackendError, ResponseStream, StreamItem};
use crate::session::Slot;

// ── Events ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    /// Append a text fragment to the request's placeholder
    Chunk { slot: Slot, text: String },
    /// Terminal update, posted exactly once per request
    Finished { slot: Slot, outcome: Outcome },
    Redraw,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The stream ended normally (with or without a final record)
    Completed {
        total_tokens: u64,
        error: Option<String>,
    },
    /// The stream broke off; counters stay as they were
    Failed { annotation: String },
}

impl Outcome {
    fn from_error(err: &BackendError) -> Self {
        let annotation = match err {
            BackendError::Connection(detail) => format!("ConnectionError: {detail}"),
            other => format!("Stream processing error: {} - {other}", other.kind()),
        };
        Outcome::Failed { annotation }
    }
}

// ── Hand-off to the UI loop ───────────────────────────────────────────────────

/// Cloneable sender side of the UI event channel.
#[derive(Clone)]
pub struct UiHandle {
    tx: mpsc::UnboundedSender<UiEvent>,
}

impl UiHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<UiEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue an event. Returns false once the UI loop has gone away.
    pub fn post(&self, ev: UiEvent) -> bool {
        self.tx.send(ev).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ── Worker ────────────────────────────────────────────────────────────────────

/// Start draining `source` into `slot` on its own task.
pub fn spawn(source: ResponseStream, slot: Slot, ui: UiHandle) -> JoinHandle<()> {
    tokio::spawn(run(source, slot, ui))
}

/// Drain `source`, posting one `Chunk` per text fragment, then exactly one
/// `Finished` and a `Redraw`. Never panics and never returns an error.
pub async fn run(mut source: ResponseStream, slot: Slot, ui: UiHandle) {
    // Nobody left to show the reply to; don't start the request.
    if ui.is_closed() {
        tracing::debug!(?slot, "ui closed before start");
        return;
    }

    let outcome = loop {
        let next = match AssertUnwindSafe(source.next()).catch_unwind().await {
            Ok(next) => next,
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                tracing::error!(?slot, "backend stream panicked: {msg}");
                break Outcome::Failed {
                    annotation: format!("Stream processing error: panic - {msg}"),
                };
            }
        };

        match next {
            Some(Ok(StreamItem::Text(text))) => {
                if !ui.post(UiEvent::Chunk { slot, text }) {
                    tracing::debug!(?slot, "ui closed, abandoning stream");
                    return;
                }
            }
            Some(Ok(StreamItem::Final(meta))) => {
                tracing::debug!(
                    ?slot,
                    prompt_tokens = meta.prompt_tokens,
                    completion_tokens = meta.completion_tokens,
                    total_tokens = meta.total_tokens,
                    "stream finished"
                );
                break Outcome::Completed {
                    total_tokens: meta.total_tokens,
                    error: meta.error,
                };
            }
            Some(Err(err)) => {
                tracing::warn!(?slot, kind = err.kind(), "stream failed: {err}");
                break Outcome::from_error(&err);
            }
            None => {
                tracing::debug!(?slot, "stream ended without a final record");
                break Outcome::Completed {
                    total_tokens: 0,
                    error: None,
                };
            }
        }
    };

    // The source may hold a live connection; release it before signalling.
    drop(source);
    ui.post(UiEvent::Finished { slot, outcome });
    ui.post(UiEvent::Redraw);
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
