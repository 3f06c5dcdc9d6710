/// Ratatui-based interactive shell.
///
/// Architecture:
///   main task:     event loop, crossterm key events + mpsc UiEvent drain
///   stream tasks:  tokio::spawn per prompt, send UiEvents via UiHandle
///
/// Only the main task touches `Session`; see `pipeline` for the worker side.
pub mod chat;
pub mod render;

use std::io;

use anyhow::{Context, Result};
use crossterm::{
    event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use futures_util::StreamExt;
use ratatui::{Terminal, backend::CrosstermBackend, layout::Rect};

use crate::command::{self, Command, Flow};
use crate::pipeline::UiHandle;
use crate::session::{self, Session};

// ── App state ─────────────────────────────────────────────────────────────────

pub struct AppState {
    pub session: Session,
    pub input: String,
    /// Byte offset of the edit cursor in `input`
    pub cursor: usize,
    /// Lines scrolled up from the bottom of the transcript
    pub scroll: usize,
    pub show_timestamps: bool,
    /// Width and height of the transcript pane at the last draw
    pub viewport: (u16, u16),
}

impl AppState {
    pub fn new(session: Session, show_timestamps: bool) -> Self {
        Self {
            session,
            input: String::new(),
            cursor: 0,
            scroll: 0,
            show_timestamps,
            viewport: (80, 20),
        }
    }

    fn scroll_up(&mut self, lines: usize) {
        self.scroll = self.scroll.saturating_add(lines).min(chat::max_scroll(self));
    }

    fn scroll_down(&mut self, lines: usize) {
        self.scroll = self.scroll.saturating_sub(lines);
    }

    fn page(&self) -> usize {
        (self.viewport.1 as usize).max(1)
    }
}

// ── Terminal setup / teardown ─────────────────────────────────────────────────

type Term = Terminal<CrosstermBackend<io::Stdout>>;

fn setup_terminal() -> Result<Term> {
    enable_raw_mode().context("Failed to enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    Ok(Terminal::new(backend)?)
}

fn restore_terminal(terminal: &mut Term) {
    let _ = disable_raw_mode();
    let _ = execute!(terminal.backend_mut(), LeaveAlternateScreen);
    let _ = terminal.show_cursor();
}

// ── Main TUI run loop ─────────────────────────────────────────────────────────

pub async fn run(session: Session, show_timestamps: bool) -> Result<()> {
    let mut terminal = setup_terminal()?;

    // Panic hook: restore terminal before printing the panic
    let orig_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        orig_hook(info);
    }));

    let mut state = AppState::new(session, show_timestamps);
    state.session.push_system(session::WELCOME);

    let result = event_loop(&mut terminal, &mut state).await;

    // Late worker events are dropped from here on.
    state.session.shutdown();
    restore_terminal(&mut terminal);
    tracing::debug!(
        messages = state.session.message_count,
        tokens = state.session.token_count,
        "session ended:\n{}",
        chat::render_transcript(state.session.messages())
    );
    result
}

fn redraw(terminal: &mut Term, state: &mut AppState) -> Result<()> {
    let size = terminal.size()?;
    let pane = render::transcript_area(Rect::new(0, 0, size.width, size.height));
    state.viewport = (pane.width, pane.height);
    state.scroll = state.scroll.min(chat::max_scroll(state));
    terminal.draw(|f| render::draw(f, state))?;
    Ok(())
}

async fn event_loop(terminal: &mut Term, state: &mut AppState) -> Result<()> {
    let (ui, mut ui_rx) = UiHandle::channel();
    let mut crossterm_events = EventStream::new();

    redraw(terminal, state)?;

    loop {
        tokio::select! {
            // ── Drain UI events from stream workers ───────────────────────────
            Some(ev) = ui_rx.recv() => {
                let mut dirty = state.session.apply(ev);
                while let Ok(ev) = ui_rx.try_recv() {
                    dirty |= state.session.apply(ev);
                }
                if dirty {
                    redraw(terminal, state)?;
                }
            }

            // ── Keyboard/resize events ────────────────────────────────────────
            maybe = crossterm_events.next() => {
                match maybe {
                    Some(Ok(Event::Key(key))) => {
                        if handle_key(key, state, &ui) == Flow::Exit {
                            break;
                        }
                        redraw(terminal, state)?;
                    }
                    Some(Ok(Event::Resize(_, _))) => redraw(terminal, state)?,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e).context("Failed to read terminal event"),
                    None => break,
                }
            }
        }
    }

    Ok(())
}

// ── Key handler ───────────────────────────────────────────────────────────────

fn handle_key(key: KeyEvent, state: &mut AppState, ui: &UiHandle) -> Flow {
    // Windows reports releases too.
    if key.kind != KeyEventKind::Press {
        return Flow::Continue;
    }

    match (key.modifiers, key.code) {
        (KeyModifiers::CONTROL, KeyCode::Char('c')) | (_, KeyCode::Esc) => return Flow::Exit,

        // Enter: parse and dispatch the line
        (_, KeyCode::Enter) => {
            let line = std::mem::take(&mut state.input);
            state.cursor = 0;
            if let Some(cmd) = Command::parse(&line) {
                if matches!(cmd, Command::Submit(_)) {
                    state.scroll = 0;
                }
                tracing::debug!(?cmd, "input");
                return command::dispatch(cmd, &mut state.session, ui);
            }
        }

        // Scrolling
        (KeyModifiers::NONE, KeyCode::PageUp) => {
            let page = state.page();
            state.scroll_up(page);
        }
        (KeyModifiers::NONE, KeyCode::PageDown) => {
            let page = state.page();
            state.scroll_down(page);
        }
        (KeyModifiers::CONTROL, KeyCode::Up) => state.scroll_up(1),
        (KeyModifiers::CONTROL, KeyCode::Down) => state.scroll_down(1),

        // Line editing
        (KeyModifiers::NONE, KeyCode::Backspace) => input_backspace(&mut state.input, &mut state.cursor),
        (KeyModifiers::NONE, KeyCode::Delete) => input_delete_forward(&mut state.input, &mut state.cursor),
        (KeyModifiers::CONTROL, KeyCode::Backspace) | (KeyModifiers::CONTROL, KeyCode::Char('w')) => {
            input_delete_word(&mut state.input, &mut state.cursor);
        }
        (KeyModifiers::NONE, KeyCode::Left) => {
            state.cursor = prev_char_boundary(&state.input, state.cursor);
        }
        (KeyModifiers::NONE, KeyCode::Right) => {
            state.cursor = next_char_boundary(&state.input, state.cursor);
        }
        (KeyModifiers::CONTROL, KeyCode::Left) => {
            state.cursor = word_left(&state.input, state.cursor);
        }
        (KeyModifiers::CONTROL, KeyCode::Right) => {
            state.cursor = word_right(&state.input, state.cursor);
        }
        (KeyModifiers::NONE, KeyCode::Home) | (KeyModifiers::CONTROL, KeyCode::Char('a')) => {
            state.cursor = 0;
        }
        (KeyModifiers::NONE, KeyCode::End) | (KeyModifiers::CONTROL, KeyCode::Char('e')) => {
            state.cursor = state.input.len();
        }
        (KeyModifiers::CONTROL, KeyCode::Char('u')) => {
            state.input.drain(..state.cursor);
            state.cursor = 0;
        }
        (KeyModifiers::CONTROL, KeyCode::Char('k')) => state.input.truncate(state.cursor),

        (KeyModifiers::NONE | KeyModifiers::SHIFT, KeyCode::Char(c)) => {
            state.input.insert(state.cursor, c);
            state.cursor += c.len_utf8();
        }
        _ => {}
    }
    Flow::Continue
}

// ── Input editing helpers ─────────────────────────────────────────────────────

/// Remove the character immediately before the cursor (UTF-8 safe).
fn input_backspace(input: &mut String, cursor: &mut usize) {
    if *cursor == 0 {
        return;
    }
    let prev = prev_char_boundary(input, *cursor);
    input.drain(prev..*cursor);
    *cursor = prev;
}

fn input_delete_forward(input: &mut String, cursor: &mut usize) {
    if *cursor >= input.len() {
        return;
    }
    let next = next_char_boundary(input, *cursor);
    input.drain(*cursor..next);
}

/// Delete the word before the cursor, along with any spaces after it.
fn input_delete_word(input: &mut String, cursor: &mut usize) {
    let start = word_left(input, *cursor);
    input.drain(start..*cursor);
    *cursor = start;
}

fn prev_char_boundary(s: &str, pos: usize) -> usize {
    s[..pos.min(s.len())]
        .char_indices()
        .next_back()
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn next_char_boundary(s: &str, pos: usize) -> usize {
    s[pos.min(s.len())..]
        .chars()
        .next()
        .map(|c| pos + c.len_utf8())
        .unwrap_or(s.len())
}

fn word_left(s: &str, mut pos: usize) -> usize {
    let bytes = s.as_bytes();
    while pos > 0 && bytes[pos - 1].is_ascii_whitespace() {
        pos -= 1;
    }
    while pos > 0 && !bytes[pos - 1].is_ascii_whitespace() {
        pos -= 1;
    }
    pos
}

fn word_right(s: &str, mut pos: usize) -> usize {
    let bytes = s.as_bytes();
    while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    while pos < bytes.len() && !bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    pos
}
