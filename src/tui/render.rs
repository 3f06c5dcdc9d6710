/// Ratatui draw entry-point.
///
/// Layout:
///   ┌────────────────────────────────────────────────┐
///   │  status line (1 line)                          │
///   ├────────────────────────────────────────────────┤
///   │  transcript (scrollable, Min(0))               │
///   ├────────────────────────────────────────────────┤
///   │  input line                                    │
///   └────────────────────────────────────────────────┘
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
};
use unicode_width::UnicodeWidthStr;

use super::AppState;

const PROMPT: &str = ">>> ";

/// Status line text for the active backend and session counters.
pub fn render_status(name: &str, endpoint: &str, message_count: u64, token_count: u64) -> String {
    format!("API: {name} | Endpoint: {endpoint} | Msgs: {message_count} | Tokens: {token_count}")
}

fn split(area: Rect) -> [Rect; 4] {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // status
            Constraint::Length(1), // separator
            Constraint::Min(0),    // transcript
            Constraint::Length(2), // separator + input
        ])
        .split(area);
    [chunks[0], chunks[1], chunks[2], chunks[3]]
}

/// Where the transcript lands for a frame of the given size.
pub fn transcript_area(area: Rect) -> Rect {
    split(area)[2]
}

pub fn draw(f: &mut Frame, state: &AppState) {
    let [status, separator, transcript, input] = split(f.area());
    draw_status_bar(f, state, status);
    f.render_widget(
        Block::default()
            .borders(Borders::TOP)
            .border_style(Style::default().fg(Color::Rgb(60, 60, 80))),
        separator,
    );
    super::chat::draw_history(f, state, transcript);
    draw_input(f, state, input);
}

fn draw_status_bar(f: &mut Frame, state: &AppState, area: Rect) {
    let s = &state.session;
    let text = render_status(s.active_name(), s.active_endpoint(), s.message_count, s.token_count);
    let bar = Paragraph::new(Line::from(Span::styled(
        format!(" {text}"),
        Style::default().fg(Color::White),
    )))
    .style(Style::default().bg(Color::Rgb(68, 68, 68)));
    f.render_widget(bar, area);
}

fn draw_input(f: &mut Frame, state: &AppState, area: Rect) {
    let prompt_span = Span::styled(
        PROMPT,
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
    );
    let content_span = if state.input.is_empty() {
        Span::styled(
            "message · /help for commands",
            Style::default().fg(Color::Rgb(70, 70, 90)),
        )
    } else {
        Span::styled(state.input.clone(), Style::default().fg(Color::White))
    };

    let block = Block::default()
        .borders(Borders::TOP)
        .border_style(Style::default().fg(Color::Rgb(60, 60, 80)))
        .style(Style::default().bg(Color::Rgb(8, 8, 14)));

    // Keep the cursor on screen when the line is wider than the terminal.
    let before_cursor = state.input[..state.cursor.min(state.input.len())].width() as u16;
    let prompt_width = PROMPT.width() as u16;
    let room = area.width.saturating_sub(prompt_width + 1);
    let hscroll = before_cursor.saturating_sub(room);

    let paragraph = Paragraph::new(Line::from(vec![prompt_span, content_span]))
        .block(block)
        .scroll((0, hscroll));
    f.render_widget(paragraph, area);

    let cursor_x = area.x + prompt_width + before_cursor - hscroll;
    let cursor_y = area.y + 1; // +1 for top border
    if cursor_x < area.x + area.width && cursor_y < area.y + area.height {
        f.set_cursor_position((cursor_x, cursor_y));
    }
}
