// src/tui/mod.rs
//
// Terminal console. Owns the screen, turns key presses into engine calls, and
// drains the engine's output queue on a fixed tick.

use std::io::{self, stdout, Stdout};
use std::time::{Duration, Instant};

use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::{backend::CrosstermBackend, Terminal};
use thiserror::Error;

use crate::repl::ReplEngine;

pub mod app;
mod ui;

pub use app::{ConsoleAction, ConsoleApp, KeyInput};

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("terminal I/O error: {0}")]
    Io(#[from] io::Error),
}

/// How the console reaches the device and paces its polling
#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    pub port: String,
    pub baud_rate: u32,
    pub poll_interval: Duration,
    pub scrollback: usize,
    /// Archive backend name for the status bar
    pub archive: Option<String>,
    /// Previous commands, oldest first
    pub history: Vec<String>,
    pub connect_on_start: bool,
}

/// Restores the terminal however the loop exits.
struct TerminalGuard {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl TerminalGuard {
    fn enter() -> Result<Self, ConsoleError> {
        enable_raw_mode()?;
        if let Err(e) = stdout().execute(EnterAlternateScreen) {
            let _ = disable_raw_mode();
            return Err(e.into());
        }
        let terminal = Terminal::new(CrosstermBackend::new(stdout()))?;
        Ok(Self { terminal })
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = stdout().execute(LeaveAlternateScreen);
        let _ = self.terminal.show_cursor();
    }
}

pub struct Console {
    engine: ReplEngine,
    app: ConsoleApp,
    config: ConsoleConfig,
}

impl Console {
    pub fn new(engine: ReplEngine, config: ConsoleConfig) -> Self {
        let mut app = ConsoleApp::new(config.port.clone(), config.scrollback);
        app.set_archive(config.archive.clone());
        app.load_history(config.history.iter().cloned());
        Self { engine, app, config }
    }

    pub fn app(&self) -> &ConsoleApp {
        &self.app
    }

    /// Run until the operator quits. The engine is disconnected on return.
    pub fn run(mut self) -> Result<ReplEngine, ConsoleError> {
        let mut guard = TerminalGuard::enter()?;
        crate::logging::set_stderr_echo(false);

        if self.config.connect_on_start {
            self.toggle_connection();
        } else {
            let hint = format!("Press Ctrl-O to connect to {}", self.config.port);
            self.app.push_info(hint);
        }

        let result = self.event_loop(&mut guard.terminal);

        self.engine.disconnect();
        drop(guard);
        crate::logging::set_stderr_echo(true);
        result.map(|()| self.engine)
    }

    fn event_loop(
        &mut self,
        terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    ) -> Result<(), ConsoleError> {
        let tick = self.config.poll_interval;
        let mut next_tick = Instant::now() + tick;
        let mut dirty = true;

        loop {
            if dirty {
                terminal.draw(|frame| ui::render(frame, &self.app))?;
                dirty = false;
            }

            let timeout = next_tick.saturating_duration_since(Instant::now());
            if event::poll(timeout)? {
                match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        if let Some(input) = convert_key(key) {
                            for action in self.app.handle_key(input) {
                                match action {
                                    ConsoleAction::Quit => return Ok(()),
                                    ConsoleAction::Render => dirty = true,
                                    ConsoleAction::Send(text) => self.send(&text),
                                    ConsoleAction::ToggleConnection => self.toggle_connection(),
                                }
                            }
                        }
                    }
                    Event::Resize(_, _) => dirty = true,
                    _ => {}
                }
            }

            if Instant::now() >= next_tick {
                next_tick = Instant::now() + tick;
                dirty |= self.tick();
            }
        }
    }

    /// Drain engine output into the log. Returns true when anything changed.
    pub fn tick(&mut self) -> bool {
        let outputs = self.engine.poll();
        let mut changed = !outputs.is_empty();
        for output in outputs {
            self.app.push_output(output);
        }

        if self.engine.link_lost() {
            self.engine.disconnect();
            self.app.set_connected(false);
            self.app.push_info("Disconnected. Press Ctrl-O to reconnect.");
            changed = true;
        }
        changed
    }

    pub fn send(&mut self, text: &str) {
        match self.engine.send(text) {
            Ok(()) => self.app.push_command(text.trim_end_matches(['\r', '\n'])),
            Err(e) => self.app.push_error(e.to_string()),
        }
    }

    pub fn toggle_connection(&mut self) {
        if self.engine.is_connected() || self.engine.link_lost() {
            self.engine.disconnect();
            self.app.set_connected(false);
            self.app.push_info(format!("Disconnected from {}", self.config.port));
            return;
        }

        match self.engine.connect(&self.config.port, self.config.baud_rate) {
            Ok(()) => {
                self.app.set_connected(true);
                self.app.push_info(format!(
                    "Connected to {} at {} baud",
                    self.config.port, self.config.baud_rate
                ));
            }
            Err(e) => self.app.push_error(e.to_string()),
        }
    }
}

fn convert_key(key: KeyEvent) -> Option<KeyInput> {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return match key.code {
            KeyCode::Char('o') => Some(KeyInput::ToggleConnection),
            KeyCode::Char('c') => Some(KeyInput::Interrupt),
            _ => None,
        };
    }
    match key.code {
        KeyCode::Char(c) => Some(KeyInput::Char(c)),
        KeyCode::Enter => Some(KeyInput::Enter),
        KeyCode::Backspace => Some(KeyInput::Backspace),
        KeyCode::Delete => Some(KeyInput::Delete),
        KeyCode::Left => Some(KeyInput::Left),
        KeyCode::Right => Some(KeyInput::Right),
        KeyCode::Up => Some(KeyInput::Up),
        KeyCode::Down => Some(KeyInput::Down),
        KeyCode::Home => Some(KeyInput::Home),
        KeyCode::End => Some(KeyInput::End),
        KeyCode::Esc => Some(KeyInput::Esc),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repl::ReplOptions;
    use crate::testing::MockTransport;
    use crate::tui::app::EntryKind;

    fn console() -> (Console, crate::testing::MockControls) {
        let (transport, controls) = MockTransport::new();
        let engine = ReplEngine::new(Box::new(transport), ReplOptions::default());
        let config = ConsoleConfig {
            port: "mock0".to_string(),
            baud_rate: 115200,
            poll_interval: Duration::from_millis(50),
            scrollback: 100,
            archive: None,
            history: vec!["words".to_string()],
            connect_on_start: false,
        };
        (Console::new(engine, config), controls)
    }

    fn kinds(console: &Console) -> Vec<EntryKind> {
        console.app().log().map(|e| e.kind).collect()
    }

    #[test]
    fn test_ctrl_keys_map() {
        let ctrl = |c| KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL);
        assert_eq!(convert_key(ctrl('o')), Some(KeyInput::ToggleConnection));
        assert_eq!(convert_key(ctrl('c')), Some(KeyInput::Interrupt));
        assert_eq!(convert_key(ctrl('x')), None);
        assert_eq!(
            convert_key(KeyEvent::new(KeyCode::Char('o'), KeyModifiers::NONE)),
            Some(KeyInput::Char('o'))
        );
    }

    #[test]
    fn test_toggle_send_and_tick() {
        let (mut console, controls) = console();
        assert_eq!(console.app().history(), &["words".to_string()]);

        console.toggle_connection();
        assert!(console.app().is_connected());

        console.send("2 2 + .");
        assert_eq!(controls.writes(), vec![b"2 2 + .\n".to_vec()]);

        controls.feed(b"2 2 + . 4 ok\r\n");
        assert!(console.tick());
        assert!(!console.tick());
        assert_eq!(console.app().received_lines(), 1);

        console.toggle_connection();
        assert!(!console.app().is_connected());
        assert_eq!(
            kinds(&console),
            vec![EntryKind::Info, EntryKind::Command, EntryKind::Output, EntryKind::Info]
        );
    }

    #[test]
    fn test_send_while_disconnected_logs_error() {
        let (mut console, controls) = console();
        console.send("1 .");
        assert!(controls.writes().is_empty());
        let last = console.app().log().last().cloned().unwrap();
        assert_eq!(last.kind, EntryKind::Error);
        assert_eq!(last.text, "not connected");
    }

    #[test]
    fn test_lost_link_cleaned_up_on_tick() {
        let (mut console, controls) = console();
        console.toggle_connection();
        controls.drop_link("EOF");

        assert!(console.tick());
        assert!(!console.app().is_connected());
        assert_eq!(controls.closes.load(std::sync::atomic::Ordering::SeqCst), 1);
        let texts: Vec<_> = console.app().log().map(|e| e.text.clone()).collect();
        assert!(texts.contains(&"connection lost: EOF".to_string()));
    }
}
