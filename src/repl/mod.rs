// src/repl/mod.rs
//
// Character-streaming REPL engine.
//
// The engine sits between the operator and a Transport. Commands go out as
// whole lines; the transport's reader thread feeds received bytes back one at
// a time through the engine's CharacterSink, where they are assembled into
// lines and queued. The presentation surface drains the queue with `poll()`
// on its own schedule.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::archive::{ArchiveEvent, Archivist, EventKind};
use crate::io::{CharacterSink, Transport, TransportError};

pub mod line;
pub mod queue;

pub use line::{LineAssembler, LineEnding, DEFAULT_MAX_LINE_LENGTH};
pub use queue::{OutputQueue, ReplOutput};

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ReplError {
    #[error("not connected")]
    NotConnected,

    #[error("transport write failed: {0}")]
    TransportWrite(#[source] TransportError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Disconnected,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplOptions {
    /// Terminator of lines coming from the device
    pub line_ending: LineEnding,
    /// Appended to every outgoing command
    pub command_terminator: String,
    pub max_line_length: usize,
}

impl Default for ReplOptions {
    fn default() -> Self {
        Self {
            line_ending: LineEnding::Lf,
            command_terminator: "\n".to_string(),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

// ============================================================================
// Receive Path
// ============================================================================

/// State shared with the transport's reader thread.
struct ReplCore {
    assembler: Mutex<LineAssembler>,
    output: OutputQueue,
    archivists: RwLock<Vec<Arc<dyn Archivist>>>,
    link_up: AtomicBool,
}

impl ReplCore {
    fn new(options: &ReplOptions) -> Self {
        Self {
            assembler: Mutex::new(LineAssembler::new(
                options.line_ending,
                options.max_line_length,
            )),
            output: OutputQueue::new(),
            archivists: RwLock::new(Vec::new()),
            link_up: AtomicBool::new(false),
        }
    }

    fn record(&self, kind: EventKind, payload: &str) {
        let archivists = match self.archivists.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if archivists.is_empty() {
            return;
        }
        let event = ArchiveEvent::new(kind, payload);
        for archivist in archivists.iter() {
            archivist.record_event(event.clone());
        }
    }

    fn reset_line(&self) {
        match self.assembler.lock() {
            Ok(mut assembler) => assembler.reset(),
            Err(poisoned) => poisoned.into_inner().reset(),
        }
    }
}

impl CharacterSink for ReplCore {
    fn handle_character(&self, byte: u8) {
        let completed = match self.assembler.lock() {
            Ok(mut assembler) => assembler.push(byte),
            Err(poisoned) => poisoned.into_inner().push(byte),
        };

        if let Some(line) = completed {
            self.record(EventKind::SystemResponse, &line);
            self.output.push(ReplOutput::Line(line));
        }
    }

    fn connection_lost(&self, reason: &str) {
        self.reset_line();
        self.link_up.store(false, Ordering::SeqCst);

        let message = format!("connection lost: {}", reason);
        tlog!("[repl] {}", message);
        self.record(EventKind::SystemError, &message);
        self.output.push(ReplOutput::Error(message));
    }
}

// ============================================================================
// Engine
// ============================================================================

pub struct ReplEngine {
    core: Arc<ReplCore>,
    transport: Box<dyn Transport>,
    options: ReplOptions,
    /// True between a successful connect and the matching disconnect
    session_active: bool,
    port: Option<String>,
}

impl ReplEngine {
    pub fn new(transport: Box<dyn Transport>, options: ReplOptions) -> Self {
        Self {
            core: Arc::new(ReplCore::new(&options)),
            transport,
            options,
            session_active: false,
            port: None,
        }
    }

    /// Port of the current (or last dropped) session
    pub fn port(&self) -> Option<&str> {
        self.port.as_deref()
    }

    pub fn state(&self) -> SessionState {
        if self.is_connected() {
            SessionState::Connected
        } else {
            SessionState::Disconnected
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session_active && self.core.link_up.load(Ordering::SeqCst)
    }

    /// True when the transport dropped the link and `disconnect` has not run yet.
    pub fn link_lost(&self) -> bool {
        self.session_active && !self.core.link_up.load(Ordering::SeqCst)
    }

    /// The capability handed to transports
    pub fn sink(&self) -> Arc<dyn CharacterSink> {
        self.core.clone()
    }

    pub fn add_archivist(&self, archivist: Arc<dyn Archivist>) {
        match self.core.archivists.write() {
            Ok(mut list) => list.push(archivist),
            Err(poisoned) => poisoned.into_inner().push(archivist),
        }
    }

    pub fn remove_archivist(&self, archivist: &Arc<dyn Archivist>) {
        let mut list = match self.core.archivists.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        list.retain(|a| !Arc::ptr_eq(a, archivist));
    }

    /// Open a session on `port`.
    pub fn connect(&mut self, port: &str, baud_rate: u32) -> Result<(), ReplError> {
        if self.is_connected() {
            return Err(ReplError::Transport(TransportError::AlreadyOpen(
                self.port.clone().unwrap_or_else(|| port.to_string()),
            )));
        }
        if self.session_active {
            // Previous session died under us; release it first
            self.disconnect();
        }

        self.on_connect();
        // Raised before open so a loss reported during open is not overwritten
        self.core.link_up.store(true, Ordering::SeqCst);
        if let Err(e) = self.transport.open(port, baud_rate, self.sink()) {
            self.core.link_up.store(false, Ordering::SeqCst);
            tlog!("[repl] Failed to connect to {}: {}", port, e);
            return Err(e.into());
        }

        self.session_active = true;
        self.port = Some(port.to_string());
        tlog!(
            "[repl] Connected to {} at {} baud ({})",
            port,
            baud_rate,
            self.transport.kind()
        );
        self.core.record(EventKind::ConnectionOpened, "");
        Ok(())
    }

    /// Close the session. Safe to call when already disconnected.
    pub fn disconnect(&mut self) {
        // Joins the reader, so no byte arrives after this
        self.transport.close();
        self.on_disconnect();

        if std::mem::take(&mut self.session_active) {
            tlog!(
                "[repl] Disconnected from {}",
                self.port.as_deref().unwrap_or("?")
            );
            self.core.record(EventKind::ConnectionClosed, "");
        }
    }

    /// Start of a session: the line buffer begins empty.
    pub fn on_connect(&self) {
        self.core.reset_line();
    }

    /// End of a session: an unterminated partial line is discarded.
    pub fn on_disconnect(&self) {
        self.core.reset_line();
        self.core.link_up.store(false, Ordering::SeqCst);
    }

    /// Send one command line to the device.
    pub fn send(&mut self, command: &str) -> Result<(), ReplError> {
        if !self.is_connected() {
            return Err(ReplError::NotConnected);
        }

        let command = command.trim_end_matches(['\r', '\n']);
        let mut wire = Vec::with_capacity(command.len() + self.options.command_terminator.len());
        wire.extend_from_slice(command.as_bytes());
        wire.extend_from_slice(self.options.command_terminator.as_bytes());

        self.core.record(EventKind::UserCommand, command);

        if let Err(e) = self.transport.write(&wire) {
            let message = format!("write failed: {}", e);
            tlog!("[repl] {}", message);
            self.core.record(EventKind::SystemError, &message);
            return Err(ReplError::TransportWrite(e));
        }
        Ok(())
    }

    /// Feed one received byte, as a transport's reader would.
    pub fn handle_character(&self, byte: u8) {
        self.core.handle_character(byte);
    }

    /// Drain every completed line and error marker queued so far. Never blocks.
    pub fn poll(&self) -> Vec<ReplOutput> {
        self.core.output.drain()
    }
}

impl Drop for ReplEngine {
    fn drop(&mut self) {
        self.transport.close();
    }
}
