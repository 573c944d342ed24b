// src/tui/app.rs
//
// Console state: output log, input line with history, connection summary.
// Pure state machine; the runtime turns the returned actions into engine calls.

use std::collections::VecDeque;

use crate::repl::ReplOutput;

/// Oldest entries are dropped beyond this
pub const DEFAULT_SCROLLBACK: usize = 5000;

/// Key input events from the terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyInput {
    Char(char),
    Enter,
    Backspace,
    Delete,
    Left,
    Right,
    Up,
    Down,
    Home,
    End,
    Esc,
    /// Ctrl-O
    ToggleConnection,
    /// Ctrl-C
    Interrupt,
}

/// Work for the runtime produced by a key press
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleAction {
    Render,
    Quit,
    Send(String),
    ToggleConnection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Line received from the device
    Output,
    /// Command typed by the operator
    Command,
    Error,
    /// Console's own notices
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub kind: EntryKind,
    pub text: String,
}

pub struct ConsoleApp {
    log: VecDeque<LogEntry>,
    scrollback: usize,
    received_lines: usize,

    input: String,
    /// Cursor position in characters
    cursor: usize,

    history: Vec<String>,
    /// Index into `history` while browsing, `None` when editing a fresh line
    history_pos: Option<usize>,
    /// Line being edited before browsing started
    draft: String,

    connected: bool,
    port: String,
    archive: Option<String>,
}

impl ConsoleApp {
    pub fn new(port: impl Into<String>, scrollback: usize) -> Self {
        Self {
            log: VecDeque::new(),
            scrollback: scrollback.max(1),
            received_lines: 0,
            input: String::new(),
            cursor: 0,
            history: Vec::new(),
            history_pos: None,
            draft: String::new(),
            connected: false,
            port: port.into(),
            archive: None,
        }
    }

    pub fn log(&self) -> impl Iterator<Item = &LogEntry> {
        self.log.iter()
    }

    pub fn log_len(&self) -> usize {
        self.log.len()
    }

    pub fn received_lines(&self) -> usize {
        self.received_lines
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn archive(&self) -> Option<&str> {
        self.archive.as_deref()
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    pub fn set_archive(&mut self, name: Option<String>) {
        self.archive = name;
    }

    /// Seed the recall list, oldest first.
    pub fn load_history(&mut self, commands: impl IntoIterator<Item = String>) {
        for command in commands {
            self.remember(command);
        }
    }

    pub fn push_output(&mut self, output: ReplOutput) {
        match output {
            ReplOutput::Line(line) => {
                self.received_lines += 1;
                self.push(EntryKind::Output, sanitize_line(&line));
            }
            ReplOutput::Error(message) => self.push(EntryKind::Error, sanitize_line(&message)),
        }
    }

    pub fn push_command(&mut self, command: &str) {
        self.push(EntryKind::Command, sanitize_line(command));
    }

    pub fn push_error(&mut self, message: impl Into<String>) {
        self.push(EntryKind::Error, message.into());
    }

    pub fn push_info(&mut self, message: impl Into<String>) {
        self.push(EntryKind::Info, message.into());
    }

    fn push(&mut self, kind: EntryKind, text: String) {
        if self.log.len() == self.scrollback {
            self.log.pop_front();
        }
        self.log.push_back(LogEntry { kind, text });
    }

    fn remember(&mut self, command: String) {
        if command.trim().is_empty() || self.history.last() == Some(&command) {
            return;
        }
        self.history.push(command);
    }

    pub fn handle_key(&mut self, key: KeyInput) -> Vec<ConsoleAction> {
        match key {
            KeyInput::Char(c) => {
                let at = self.byte_index(self.cursor);
                self.input.insert(at, c);
                self.cursor += 1;
                vec![ConsoleAction::Render]
            }
            KeyInput::Backspace => {
                if self.cursor > 0 {
                    self.cursor -= 1;
                    let at = self.byte_index(self.cursor);
                    self.input.remove(at);
                }
                vec![ConsoleAction::Render]
            }
            KeyInput::Delete => {
                if self.cursor < self.input_chars() {
                    let at = self.byte_index(self.cursor);
                    self.input.remove(at);
                }
                vec![ConsoleAction::Render]
            }
            KeyInput::Left => {
                self.cursor = self.cursor.saturating_sub(1);
                vec![ConsoleAction::Render]
            }
            KeyInput::Right => {
                self.cursor = (self.cursor + 1).min(self.input_chars());
                vec![ConsoleAction::Render]
            }
            KeyInput::Home => {
                self.cursor = 0;
                vec![ConsoleAction::Render]
            }
            KeyInput::End => {
                self.cursor = self.input_chars();
                vec![ConsoleAction::Render]
            }
            KeyInput::Up => {
                self.history_prev();
                vec![ConsoleAction::Render]
            }
            KeyInput::Down => {
                self.history_next();
                vec![ConsoleAction::Render]
            }
            KeyInput::Enter => self.handle_enter(),
            KeyInput::ToggleConnection => vec![ConsoleAction::ToggleConnection],
            KeyInput::Esc | KeyInput::Interrupt => vec![ConsoleAction::Quit],
        }
    }

    // An empty line is still sent: FORTH answers it with a bare prompt.
    fn handle_enter(&mut self) -> Vec<ConsoleAction> {
        let text = std::mem::take(&mut self.input);
        self.cursor = 0;
        self.history_pos = None;
        self.draft.clear();

        self.remember(text.clone());
        vec![ConsoleAction::Send(text), ConsoleAction::Render]
    }

    fn history_prev(&mut self) {
        if self.history.is_empty() {
            return;
        }
        let pos = match self.history_pos {
            None => {
                self.draft = self.input.clone();
                self.history.len() - 1
            }
            Some(0) => 0,
            Some(p) => p - 1,
        };
        self.history_pos = Some(pos);
        self.set_input(self.history[pos].clone());
    }

    fn history_next(&mut self) {
        let Some(pos) = self.history_pos else {
            return;
        };
        if pos + 1 < self.history.len() {
            self.history_pos = Some(pos + 1);
            self.set_input(self.history[pos + 1].clone());
        } else {
            self.history_pos = None;
            let draft = std::mem::take(&mut self.draft);
            self.set_input(draft);
        }
    }

    fn set_input(&mut self, text: String) {
        self.input = text;
        self.cursor = self.input_chars();
    }

    fn input_chars(&self) -> usize {
        self.input.chars().count()
    }

    fn byte_index(&self, char_pos: usize) -> usize {
        self.input
            .char_indices()
            .nth(char_pos)
            .map(|(i, _)| i)
            .unwrap_or(self.input.len())
    }
}

/// Make device text safe to draw: ANSI escape sequences are removed, tabs
/// become spaces, other control characters are dropped.
pub fn sanitize_line(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\u{1b}' => match chars.peek() {
                // CSI: parameters and intermediates up to a final byte in @..~
                Some('[') => {
                    chars.next();
                    for c in chars.by_ref() {
                        if ('@'..='~').contains(&c) {
                            break;
                        }
                    }
                }
                // OSC: up to BEL or ESC \
                Some(']') => {
                    chars.next();
                    while let Some(c) = chars.next() {
                        if c == '\u{7}' {
                            break;
                        }
                        if c == '\u{1b}' && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                // Two-character escape
                Some(_) => {
                    chars.next();
                }
                None => {}
            },
            '\t' => out.push_str("    "),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}
