/// Transcript pane: plain-text rendering, styled wrapped lines, and the draw routine.
use ratatui::{
    Frame,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, List, ListItem},
};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use super::AppState;
use crate::session::{Message, Role};

/// Transcript as plain text: one `"<Label>: <text>"` block per message.
pub fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role.label(), m.text))
        .collect::<Vec<_>>()
        .join("\n")
}

fn label_style(role: Role) -> Style {
    let fg = match role {
        Role::User => Color::Rgb(160, 140, 255),
        Role::Assistant => Color::Rgb(0, 210, 210),
        Role::System => Color::Rgb(200, 160, 60),
    };
    Style::default().fg(fg).add_modifier(Modifier::BOLD)
}

fn body_style(role: Role, line: &str) -> Style {
    if line.starts_with("[SYSTEM_ERROR:") {
        return Style::default().fg(Color::Rgb(230, 90, 90));
    }
    match role {
        Role::System => Style::default().fg(Color::Rgb(150, 150, 170)),
        _ => Style::default().fg(Color::Rgb(220, 225, 240)),
    }
}

/// Wrapped, styled transcript lines for a pane `width` columns wide.
///
/// The label sits on the first line of each message; continuation and
/// wrapped lines are indented to line up under the text.
pub fn transcript_lines(messages: &[Message], width: u16, show_timestamps: bool) -> Vec<Line<'static>> {
    let mut out = Vec::new();
    for msg in messages {
        let stamp = if show_timestamps {
            format!("[{}] ", msg.created_at.format("%H:%M:%S"))
        } else {
            String::new()
        };
        let label = format!("{}: ", msg.role.label());
        let indent = stamp.width() + label.width();
        let wrap_width = (width as usize).saturating_sub(indent).max(10);

        let mut first = true;
        for src_line in msg.text.split('\n') {
            let style = body_style(msg.role, src_line);
            for piece in wrap_text(src_line, wrap_width) {
                let mut spans = Vec::with_capacity(3);
                if first {
                    if !stamp.is_empty() {
                        spans.push(Span::styled(stamp.clone(), Style::default().fg(Color::DarkGray)));
                    }
                    spans.push(Span::styled(label.clone(), label_style(msg.role)));
                    first = false;
                } else {
                    spans.push(Span::raw(" ".repeat(indent)));
                }
                spans.push(Span::styled(piece, style));
                out.push(Line::from(spans));
            }
        }
    }
    out
}

/// Number of lines the transcript can scroll up by at the current size.
pub fn max_scroll(state: &AppState) -> usize {
    let (width, height) = state.viewport;
    transcript_lines(state.session.messages(), width, state.show_timestamps)
        .len()
        .saturating_sub(height as usize)
}

pub fn draw_history(f: &mut Frame, state: &AppState, area: Rect) {
    let lines = transcript_lines(state.session.messages(), area.width, state.show_timestamps);
    let total = lines.len();
    let visible = area.height as usize;

    // `scroll` counts lines up from the bottom.
    let skip = if total > visible {
        (total - visible).saturating_sub(state.scroll)
    } else {
        0
    };

    let items: Vec<ListItem<'static>> = lines.into_iter().skip(skip).map(ListItem::new).collect();
    let list = List::new(items).block(Block::default().style(Style::default().bg(Color::Rgb(8, 8, 14))));
    f.render_widget(list, area);
}

// ── Utilities ──────────────────────────────────────────────────────────────────

/// Word-wrap a single line to `max_width` display columns.
/// Breaks on whitespace; a word wider than the line is split across lines.
pub fn wrap_text(text: &str, max_width: usize) -> Vec<String> {
    let max_width = max_width.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_width = 0usize;

    for word in text.split_whitespace() {
        let word_width = word.width();
        if current_width > 0 && current_width + 1 + word_width <= max_width {
            current.push(' ');
            current.push_str(word);
            current_width += 1 + word_width;
            continue;
        }
        if current_width > 0 {
            lines.push(std::mem::take(&mut current));
            current_width = 0;
        }
        if word_width <= max_width {
            current.push_str(word);
            current_width = word_width;
            continue;
        }
        for c in word.chars() {
            let cw = c.width().unwrap_or(0);
            if current_width + cw > max_width && current_width > 0 {
                lines.push(std::mem::take(&mut current));
                current_width = 0;
            }
            current.push(c);
            current_width += cw;
        }
    }
    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_text(line: &Line) -> String {
        line.spans.iter().map(|s| s.content.as_ref()).collect()
    }

    #[test]
    fn test_render_transcript_prefixes() {
        let msgs = vec![
            Message::new(Role::System, "Welcome"),
            Message::new(Role::User, "Hello"),
            Message::new(Role::Assistant, "Hi there"),
        ];
        assert_eq!(render_transcript(&msgs), "System: Welcome\nYou: Hello\nLLM: Hi there");
        assert_eq!(render_transcript(&[]), "");
    }

    #[test]
    fn test_transcript_lines_indent_continuations() {
        let msgs = vec![Message::new(Role::Assistant, "one\ntwo")];
        let lines = transcript_lines(&msgs, 80, false);
        assert_eq!(lines.len(), 2);
        assert_eq!(line_text(&lines[0]), "LLM: one");
        assert_eq!(line_text(&lines[1]), "     two");
    }

    #[test]
    fn test_transcript_lines_empty_placeholder_still_shows_label() {
        let msgs = vec![Message::new(Role::Assistant, "")];
        let lines = transcript_lines(&msgs, 80, false);
        assert_eq!(lines.len(), 1);
        assert_eq!(line_text(&lines[0]), "LLM: ");
    }

    #[test]
    fn test_transcript_lines_timestamps() {
        let msgs = vec![Message::new(Role::User, "hi")];
        let text = line_text(&transcript_lines(&msgs, 80, true)[0]);
        assert!(text.starts_with('['));
        assert!(text.ends_with("] You: hi"));
    }

    #[test]
    fn test_wrap_text() {
        assert_eq!(wrap_text("", 10), vec![""]);
        assert_eq!(wrap_text("hello world", 20), vec!["hello world"]);
        assert_eq!(wrap_text("hello world foo", 11), vec!["hello world", "foo"]);
        assert_eq!(wrap_text("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn test_wrap_text_counts_display_width() {
        // Each CJK character takes two columns.
        assert_eq!(wrap_text("日本語です", 4), vec!["日本", "語で", "す"]);
    }
}
