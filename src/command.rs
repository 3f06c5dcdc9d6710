use crate::pipeline::{self, UiHandle};
use crate::session::{Role, Session};

pub const HELP: &str = "Available commands:
  /api <name>  - Switch to API (e.g., /api ollama, /api openai)
  /clear       - Clear conversation history
  /help        - Show this help message
  /exit        - Exit the application
  PageUp/PageDown or Ctrl+Up/Ctrl+Down - Scroll response panel";

pub const NO_ACTIVE_BACKEND: &str =
    "Error: No active LLM API. Please select one using /api <name>.";

// ── Parsing ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Submit(String),
    Clear,
    Help,
    Exit,
    SwitchBackend(String),
}

impl Command {
    /// Parse one input line. Blank input yields `None`.
    ///
    /// Anything that is not exactly one of the known commands, including
    /// `/api` without exactly one argument, is sent to the model verbatim.
    pub fn parse(line: &str) -> Option<Command> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let cmd = match line {
            "/clear" => Command::Clear,
            "/help" => Command::Help,
            "/exit" => Command::Exit,
            _ => match line.split_whitespace().collect::<Vec<_>>().as_slice() {
                ["/api", name] => Command::SwitchBackend(name.to_lowercase()),
                _ => Command::Submit(line.to_string()),
            },
        };
        Some(cmd)
    }
}

// ── Dispatch ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub fn dispatch(cmd: Command, session: &mut Session, ui: &UiHandle) -> Flow {
    match cmd {
        Command::Submit(text) => submit(&text, session, ui),
        Command::Clear => session.clear(),
        Command::Help => session.push_system(HELP),
        Command::Exit => return Flow::Exit,
        Command::SwitchBackend(name) => switch_backend(&name, session),
    }
    Flow::Continue
}

fn submit(text: &str, session: &mut Session, ui: &UiHandle) {
    let text = text.trim();
    if text.is_empty() {
        return;
    }
    session.push(Role::User, text);

    let Some(backend) = session.active_backend().cloned() else {
        session.push_system(NO_ACTIVE_BACKEND);
        return;
    };

    // The slot must exist before the worker can post into it.
    let slot = session.insert_placeholder();
    tracing::debug!(
        backend = session.active_name(),
        model = backend.model(),
        ?slot,
        "dispatching prompt"
    );
    pipeline::spawn(backend.generate_stream(text), slot, ui.clone());
}

fn switch_backend(name: &str, session: &mut Session) {
    let name = name.to_lowercase();
    if session.set_active(&name) {
        tracing::debug!(backend = %name, "switched backend");
        session.push_system(format!("Successfully switched to API: {name}"));
    } else {
        let available = session.backend_names().join(", ");
        session.push_system(format!("Error: Unknown API '{name}'. Available: {available}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendMap, FinalMetadata, StreamItem};
    use crate::pipeline::UiEvent;
    use crate::testing::{ScriptedBackend, backends};
    use std::sync::Arc;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn hi_there() -> Arc<ScriptedBackend> {
        ScriptedBackend::new(vec![
            StreamItem::Text("Hi ".into()),
            StreamItem::Text("there".into()),
            StreamItem::Final(FinalMetadata {
                completion_text: "Hi there".into(),
                prompt_tokens: 2,
                completion_tokens: 1,
                total_tokens: 3,
                error: None,
            }),
        ])
    }

    fn session_with(backend: Arc<ScriptedBackend>) -> Session {
        Session::new(
            backends(vec![("ollama", backend), ("openai", ScriptedBackend::new(vec![]))]),
            Some("ollama".into()),
        )
    }

    /// Apply everything the worker posts until its Redraw arrives.
    async fn settle(session: &mut Session, rx: &mut UnboundedReceiver<UiEvent>) {
        while let Some(ev) = rx.recv().await {
            let done = ev == UiEvent::Redraw;
            session.apply(ev);
            if done {
                break;
            }
        }
    }

    fn transcript(session: &Session) -> Vec<(Role, String)> {
        session
            .messages()
            .iter()
            .map(|m| (m.role, m.text.clone()))
            .collect()
    }

    #[test]
    fn test_parse() {
        assert_eq!(Command::parse("  "), None);
        assert_eq!(Command::parse("/clear"), Some(Command::Clear));
        assert_eq!(Command::parse(" /help "), Some(Command::Help));
        assert_eq!(Command::parse("/exit"), Some(Command::Exit));
        assert_eq!(
            Command::parse("/api OpenAI"),
            Some(Command::SwitchBackend("openai".into()))
        );
        assert_eq!(Command::parse("hello"), Some(Command::Submit("hello".into())));
    }

    #[test]
    fn test_parse_unknown_slash_is_prompt() {
        assert_eq!(
            Command::parse("/foo bar"),
            Some(Command::Submit("/foo bar".into()))
        );
        assert_eq!(Command::parse("/api"), Some(Command::Submit("/api".into())));
        assert_eq!(
            Command::parse("/api a b"),
            Some(Command::Submit("/api a b".into()))
        );
        assert_eq!(
            Command::parse("/clear now"),
            Some(Command::Submit("/clear now".into()))
        );
    }

    #[tokio::test]
    async fn test_placeholder_exists_before_worker_runs() {
        let backend = hi_there();
        let mut s = session_with(backend.clone());
        let (ui, _rx) = UiHandle::channel();
        dispatch(Command::Submit("Hello".into()), &mut s, &ui);

        // Current-thread runtime: the worker has not been polled yet.
        assert_eq!(
            transcript(&s),
            vec![(Role::User, "Hello".into()), (Role::Assistant, String::new())]
        );
        assert_eq!(backend.prompts(), vec!["Hello"]);
    }

    #[tokio::test]
    async fn test_submit_streams_into_placeholder() {
        let mut s = session_with(hi_there());
        let (ui, mut rx) = UiHandle::channel();
        assert_eq!(dispatch(Command::Submit("Hello".into()), &mut s, &ui), Flow::Continue);
        settle(&mut s, &mut rx).await;

        assert_eq!(
            transcript(&s),
            vec![(Role::User, "Hello".into()), (Role::Assistant, "Hi there".into())]
        );
        assert_eq!(s.message_count, 1);
        assert_eq!(s.token_count, 3);
    }

    #[tokio::test]
    async fn test_submit_connection_failure() {
        let backend = ScriptedBackend::failing(vec![], "connection refused");
        let mut s = session_with(backend);
        let (ui, mut rx) = UiHandle::channel();
        dispatch(Command::Submit("Hello".into()), &mut s, &ui);
        settle(&mut s, &mut rx).await;

        let last = s.messages().last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert!(last.text.contains("[SYSTEM_ERROR: ConnectionError: connection refused]"));
        assert_eq!(s.message_count, 0);
        assert_eq!(s.token_count, 0);
    }

    #[tokio::test]
    async fn test_switch_to_unknown_backend() {
        let mut s = session_with(hi_there());
        let (ui, _rx) = UiHandle::channel();
        dispatch(Command::SwitchBackend("nonexistent".into()), &mut s, &ui);

        assert_eq!(s.active_name(), "ollama");
        assert_eq!(
            s.messages().last().unwrap().text,
            "Error: Unknown API 'nonexistent'. Available: ollama, openai"
        );
        assert_eq!(s.message_count, 0);
    }

    #[tokio::test]
    async fn test_switch_backend() {
        let mut s = session_with(hi_there());
        let (ui, _rx) = UiHandle::channel();
        dispatch(Command::SwitchBackend("OpenAI".into()), &mut s, &ui);
        assert_eq!(s.active_name(), "openai");
        assert_eq!(
            s.messages().last().unwrap().text,
            "Successfully switched to API: openai"
        );
    }

    #[tokio::test]
    async fn test_empty_submit_is_noop() {
        let backend = hi_there();
        let mut s = session_with(backend.clone());
        let (ui, _rx) = UiHandle::channel();
        dispatch(Command::Submit("   ".into()), &mut s, &ui);
        assert!(s.messages().is_empty());
        assert!(backend.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_submit_without_active_backend() {
        let mut s = Session::new(BackendMap::new(), None);
        let (ui, mut rx) = UiHandle::channel();
        dispatch(Command::Submit("Hello".into()), &mut s, &ui);
        assert_eq!(
            transcript(&s),
            vec![
                (Role::User, "Hello".into()),
                (Role::System, NO_ACTIVE_BACKEND.into()),
            ]
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_literal_slash_prompt_reaches_backend() {
        let backend = hi_there();
        let mut s = session_with(backend.clone());
        let (ui, mut rx) = UiHandle::channel();
        let cmd = Command::parse("/api a b").unwrap();
        dispatch(cmd, &mut s, &ui);
        settle(&mut s, &mut rx).await;
        assert_eq!(backend.prompts(), vec!["/api a b"]);
        assert_eq!(s.active_name(), "ollama");
    }

    #[tokio::test]
    async fn test_help_clear_exit() {
        let mut s = session_with(hi_there());
        let (ui, _rx) = UiHandle::channel();
        dispatch(Command::Help, &mut s, &ui);
        assert!(s.messages()[0].text.contains("/api <name>"));

        dispatch(Command::Clear, &mut s, &ui);
        dispatch(Command::Clear, &mut s, &ui);
        assert_eq!(transcript(&s), vec![(Role::System, "Conversation cleared.".into())]);

        assert_eq!(dispatch(Command::Exit, &mut s, &ui), Flow::Exit);
    }
}
