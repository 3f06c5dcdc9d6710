//! Conversation state: transcript, backend selection, usage counters.
//!
//! Only the UI loop holds `&mut Session`. Stream workers never touch it; they
//! post `UiEvent`s that the loop feeds to `Session::apply`.

use std::sync::Arc;

use chrono::{DateTime, Local};

use crate::backend::{Backend, BackendMap};
use crate::pipeline::{Outcome, UiEvent};

pub const WELCOME: &str =
    "Welcome to Interactive Mode! Type /help for commands or your prompt to chat.";
pub const CLEARED: &str = "Conversation cleared.";

// ── Transcript types ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Role::User => "You",
            Role::Assistant => "LLM",
            Role::System => "System",
        }
    }
}

/// Identifies one streaming request for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

/// The transcript position a streaming request writes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub index: usize,
    pub request: RequestId,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub text: String,
    pub created_at: DateTime<Local>,
    /// Set on assistant placeholders: the request allowed to write here
    request: Option<RequestId>,
}

impl Message {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            created_at: Local::now(),
            request: None,
        }
    }
}

/// Append an inline error marker to a message body.
pub fn annotate(text: &mut String, note: &str) {
    text.push_str("\n[SYSTEM_ERROR: ");
    text.push_str(note);
    text.push(']');
}

// ── Session ───────────────────────────────────────────────────────────────────

pub struct Session {
    messages: Vec<Message>,
    backends: BackendMap,
    active: Option<String>,
    /// Completed requests
    pub message_count: u64,
    /// Tokens reported by completed requests
    pub token_count: u64,
    next_request: u64,
    running: bool,
}

impl Session {
    pub fn new(backends: BackendMap, active: Option<String>) -> Self {
        let active = active.filter(|name| backends.contains_key(name));
        Self {
            messages: Vec::new(),
            backends,
            active,
            message_count: 0,
            token_count: 0,
            next_request: 0,
            running: true,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn push(&mut self, role: Role, text: impl Into<String>) {
        self.messages.push(Message::new(role, text));
    }

    pub fn push_system(&mut self, text: impl Into<String>) {
        self.push(Role::System, text);
    }

    /// Append an empty assistant message owned by a fresh request.
    pub fn insert_placeholder(&mut self) -> Slot {
        let request = RequestId(self.next_request);
        self.next_request += 1;
        let index = self.messages.len();
        self.messages.push(Message {
            request: Some(request),
            ..Message::new(Role::Assistant, "")
        });
        Slot { index, request }
    }

    /// Replace the whole transcript with a single notice.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.push_system(CLEARED);
    }

    // ── Backend selection ─────────────────────────────────────────────────────

    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.keys().map(String::as_str).collect()
    }

    /// Make `name` active. Returns false (and changes nothing) if it is unknown.
    pub fn set_active(&mut self, name: &str) -> bool {
        if self.backends.contains_key(name) {
            self.active = Some(name.to_string());
            true
        } else {
            false
        }
    }

    pub fn active_backend(&self) -> Option<&Arc<dyn Backend>> {
        self.active.as_ref().and_then(|name| self.backends.get(name))
    }

    pub fn active_name(&self) -> &str {
        match (&self.active, self.active_backend()) {
            (Some(name), Some(_)) => name.as_str(),
            _ => "None",
        }
    }

    pub fn active_endpoint(&self) -> &str {
        self.active_backend().map(|b| b.endpoint()).unwrap_or("N/A")
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Stop accepting updates; anything still arriving from workers is dropped.
    pub fn shutdown(&mut self) {
        self.running = false;
    }

    // ── Updates posted by stream workers ──────────────────────────────────────

    /// Apply one event on the UI loop. Returns true when a redraw is wanted.
    pub fn apply(&mut self, ev: UiEvent) -> bool {
        if !self.is_running() {
            return false;
        }
        match ev {
            UiEvent::Chunk { slot, text } => match self.slot_mut(slot) {
                Some(msg) => {
                    msg.text.push_str(&text);
                    true
                }
                None => false,
            },
            UiEvent::Finished { slot, outcome } => {
                self.finish(slot, outcome);
                true
            }
            UiEvent::Redraw => true,
        }
    }

    /// Record a completed non-streaming request.
    pub fn record_completion(&mut self, total_tokens: u64) {
        self.message_count += 1;
        self.token_count += total_tokens;
    }

    fn finish(&mut self, slot: Slot, outcome: Outcome) {
        match outcome {
            Outcome::Completed { total_tokens, error } => {
                // Counters belong to the session, so they move even if the slot was cleared.
                self.record_completion(total_tokens);
                if let (Some(err), Some(msg)) = (error, self.slot_mut(slot)) {
                    if !msg.text.contains(err.as_str()) {
                        annotate(&mut msg.text, &err);
                    }
                }
            }
            Outcome::Failed { annotation } => {
                if let Some(msg) = self.slot_mut(slot) {
                    annotate(&mut msg.text, &annotation);
                }
            }
        }
        if let Some(msg) = self.messages.get_mut(slot.index) {
            if msg.request == Some(slot.request) {
                msg.request = None;
            }
        }
    }

    /// The placeholder for `slot`, unless the transcript was replaced since.
    fn slot_mut(&mut self, slot: Slot) -> Option<&mut Message> {
        self.messages
            .get_mut(slot.index)
            .filter(|m| m.request == Some(slot.request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedBackend, backends};

    fn session() -> Session {
        Session::new(
            backends(vec![
                ("ollama", ScriptedBackend::new(vec![])),
                ("openai", ScriptedBackend::new(vec![])),
            ]),
            Some("ollama".to_string()),
        )
    }

    fn completed(total_tokens: u64, error: Option<&str>) -> Outcome {
        Outcome::Completed {
            total_tokens,
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn test_new_ignores_unknown_active() {
        let s = Session::new(
            backends(vec![("ollama", ScriptedBackend::new(vec![]))]),
            Some("x".into()),
        );
        assert_eq!(s.active_name(), "None");
        assert_eq!(s.active_endpoint(), "N/A");
    }

    #[test]
    fn test_placeholder_slots_are_distinct() {
        let mut s = session();
        s.push(Role::User, "q");
        let a = s.insert_placeholder();
        let b = s.insert_placeholder();
        assert_eq!(a.index, 1);
        assert_eq!(b.index, 2);
        assert_ne!(a.request, b.request);
        assert_eq!(s.messages()[1].role, Role::Assistant);
        assert!(s.messages()[1].text.is_empty());
    }

    #[test]
    fn test_chunks_append_in_order() {
        let mut s = session();
        let slot = s.insert_placeholder();
        for t in ["A", "B", "C"] {
            assert!(s.apply(UiEvent::Chunk { slot, text: t.into() }));
        }
        s.apply(UiEvent::Finished { slot, outcome: completed(7, None) });
        assert_eq!(s.messages()[0].text, "ABC");
        assert_eq!(s.message_count, 1);
        assert_eq!(s.token_count, 7);
    }

    #[test]
    fn test_completed_error_annotated_once() {
        let mut s = session();
        let slot = s.insert_placeholder();
        s.apply(UiEvent::Finished { slot, outcome: completed(0, Some("Error: boom")) });
        assert_eq!(s.messages()[0].text, "\n[SYSTEM_ERROR: Error: boom]");
        assert_eq!(s.message_count, 1);
    }

    #[test]
    fn test_completed_error_already_in_text_not_repeated() {
        let mut s = session();
        let slot = s.insert_placeholder();
        s.apply(UiEvent::Chunk { slot, text: "Error: boom".into() });
        s.apply(UiEvent::Finished { slot, outcome: completed(0, Some("Error: boom")) });
        assert_eq!(s.messages()[0].text, "Error: boom");
    }

    #[test]
    fn test_failed_leaves_counters() {
        let mut s = session();
        let slot = s.insert_placeholder();
        s.apply(UiEvent::Chunk { slot, text: "par".into() });
        s.apply(UiEvent::Finished {
            slot,
            outcome: Outcome::Failed { annotation: "ConnectionError: reset".into() },
        });
        assert_eq!(s.messages()[0].text, "par\n[SYSTEM_ERROR: ConnectionError: reset]");
        assert_eq!(s.message_count, 0);
        assert_eq!(s.token_count, 0);
    }

    #[test]
    fn test_events_after_clear_are_dropped() {
        let mut s = session();
        s.push(Role::User, "q");
        let slot = s.insert_placeholder();
        s.clear();
        s.push(Role::User, "again");
        assert!(!s.apply(UiEvent::Chunk { slot, text: "late".into() }));
        s.apply(UiEvent::Finished { slot, outcome: completed(5, Some("Error: x")) });
        assert_eq!(s.messages().len(), 2);
        assert_eq!(s.messages()[0].text, CLEARED);
        assert_eq!(s.messages()[1].text, "again");
        // usage is still accounted for
        assert_eq!(s.token_count, 5);
    }

    #[test]
    fn test_slot_closed_after_terminal_update() {
        let mut s = session();
        let slot = s.insert_placeholder();
        s.apply(UiEvent::Finished { slot, outcome: completed(1, None) });
        assert!(!s.apply(UiEvent::Chunk { slot, text: "stray".into() }));
        assert_eq!(s.messages()[0].text, "");
    }

    #[test]
    fn test_clear_twice() {
        let mut s = session();
        s.push(Role::User, "hi");
        for _ in 0..2 {
            s.clear();
            assert_eq!(s.messages().len(), 1);
            assert_eq!(s.messages()[0].role, Role::System);
            assert_eq!(s.messages()[0].text, CLEARED);
        }
    }

    #[test]
    fn test_set_active() {
        let mut s = session();
        assert!(s.set_active("openai"));
        assert_eq!(s.active_name(), "openai");
        assert!(!s.set_active("nonexistent"));
        assert_eq!(s.active_name(), "openai");
        assert_eq!(s.backend_names(), vec!["ollama", "openai"]);
    }

    #[test]
    fn test_shutdown_drops_updates() {
        let mut s = session();
        let slot = s.insert_placeholder();
        s.shutdown();
        assert!(!s.is_running());
        assert!(!s.apply(UiEvent::Chunk { slot, text: "x".into() }));
        assert!(!s.apply(UiEvent::Finished { slot, outcome: completed(3, None) }));
        assert_eq!(s.messages()[0].text, "");
        assert_eq!(s.token_count, 0);
    }
}
