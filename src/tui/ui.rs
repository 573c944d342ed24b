// src/tui/ui.rs
//
// Rendering of the console state. No I/O.

use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
    Frame,
};

use super::app::{ConsoleApp, EntryKind};

const INPUT_HEIGHT: u16 = 3;
const STATUS_HEIGHT: u16 = 1;
const BORDER_SIZE: u16 = 2;
const PROMPT_WIDTH: u16 = 3; // "> " plus left border

pub fn render(frame: &mut Frame, app: &ConsoleApp) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(3),
            Constraint::Length(INPUT_HEIGHT),
            Constraint::Length(STATUS_HEIGHT),
        ])
        .split(frame.area());

    let [log_area, input_area, status_area] = chunks.as_ref() else {
        return;
    };

    render_log(frame, app, *log_area);
    render_input(frame, app, *input_area);
    render_status(frame, app, *status_area);
}

fn render_log(frame: &mut Frame, app: &ConsoleApp, area: Rect) {
    let block = Block::default().borders(Borders::ALL).title(" Output ");

    let visible_height = area.height.saturating_sub(BORDER_SIZE) as usize;
    let skip = app.log_len().saturating_sub(visible_height);

    let items: Vec<ListItem> = app
        .log()
        .skip(skip)
        .map(|entry| {
            let line = match entry.kind {
                EntryKind::Output => Line::from(entry.text.as_str()),
                EntryKind::Command => Line::from(vec![
                    Span::styled("> ", Style::default().fg(Color::DarkGray)),
                    Span::styled(entry.text.as_str(), Style::default().fg(Color::Cyan)),
                ]),
                EntryKind::Error => Line::from(Span::styled(
                    entry.text.as_str(),
                    Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
                )),
                EntryKind::Info => Line::from(Span::styled(
                    entry.text.as_str(),
                    Style::default().fg(Color::Yellow),
                )),
            };
            ListItem::new(line)
        })
        .collect();

    frame.render_widget(List::new(items).block(block), area);
}

fn render_input(frame: &mut Frame, app: &ConsoleApp, area: Rect) {
    let block = Block::default().borders(Borders::ALL);
    let paragraph = Paragraph::new(format!("> {}", app.input()))
        .style(Style::default().fg(Color::White))
        .block(block);
    frame.render_widget(paragraph, area);

    let available_width = area.width.saturating_sub(PROMPT_WIDTH + 1);
    let cursor_offset = (app.cursor().min(u16::MAX as usize) as u16).min(available_width);
    let cursor_x = area.x.saturating_add(PROMPT_WIDTH).saturating_add(cursor_offset);
    let cursor_y = area.y.saturating_add(1);
    frame.set_cursor_position((cursor_x, cursor_y));
}

fn render_status(frame: &mut Frame, app: &ConsoleApp, area: Rect) {
    let connection = if app.is_connected() {
        Span::styled(
            format!("Connected {}", app.port()),
            Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
        )
    } else {
        Span::styled(
            format!("Disconnected ({})", app.port()),
            Style::default().fg(Color::Red),
        )
    };

    let archive = app
        .archive()
        .map_or_else(|| "archive off".to_string(), |name| format!("archive: {}", name));
    let info = format!(
        " | Lines: {} | {} | Ctrl-O connect  Esc quit",
        app.received_lines(),
        archive
    );

    let status_line = Line::from(vec![Span::raw(" "), connection, Span::raw(info)]);
    let paragraph =
        Paragraph::new(status_line).style(Style::default().bg(Color::DarkGray).fg(Color::White));
    frame.render_widget(paragraph, area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repl::ReplOutput;
    use crate::tui::app::KeyInput;
    use ratatui::{backend::TestBackend, Terminal};

    fn screen_text(app: &ConsoleApp) -> String {
        let mut terminal = Terminal::new(TestBackend::new(60, 10)).unwrap();
        terminal.draw(|frame| render(frame, app)).unwrap();
        let buffer = terminal.backend().buffer().clone();
        buffer
            .content
            .chunks(buffer.area.width as usize)
            .map(|row| row.iter().map(|cell| cell.symbol()).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_render_shows_log_input_and_status() {
        let mut app = ConsoleApp::new("/dev/ttyACM0", 100);
        app.push_command("2 2 + .");
        app.push_output(ReplOutput::Line("2 2 + . 4 ok".to_string()));
        app.handle_key(KeyInput::Char('w'));
        app.set_connected(true);

        let text = screen_text(&app);
        assert!(text.contains("> 2 2 + ."));
        assert!(text.contains("2 2 + . 4 ok"));
        assert!(text.contains("> w"));
        assert!(text.contains("Connected /dev/ttyACM0"));
        assert!(text.contains("Lines: 1"));
    }

    #[test]
    fn test_render_keeps_newest_lines_visible() {
        let mut app = ConsoleApp::new("p", 100);
        for i in 0..50 {
            app.push_output(ReplOutput::Line(format!("line {}", i)));
        }
        let text = screen_text(&app);
        assert!(text.contains("line 49"));
        assert!(!text.contains("line 10 "));
        assert!(text.contains("Disconnected (p)"));
    }
}
