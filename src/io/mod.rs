// src/io/mod.rs
//
// Transport boundary used by the REPL engine.
// A transport owns one physical or simulated link, writes outgoing bytes, and
// feeds every received byte to a CharacterSink from its own background thread.

use std::sync::Arc;

use thiserror::Error;

pub mod serial;
pub mod sim;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open {port}: {reason}")]
    Open { port: String, reason: String },

    #[error("write failed: {0}")]
    Write(#[from] std::io::Error),

    #[error("transport is not open")]
    NotOpen,

    #[error("transport is already open on {0}")]
    AlreadyOpen(String),

    #[error("failed to enumerate ports: {0}")]
    Enumerate(String),
}

// ============================================================================
// Traits
// ============================================================================

/// Receives the incoming byte stream of one connection session.
///
/// `handle_character` is called once per received byte, in arrival order, from
/// a single background thread. It must not block.
pub trait CharacterSink: Send + Sync {
    fn handle_character(&self, byte: u8);

    /// The background reader found the link gone (EOF or read error). Not
    /// called for a cancellation requested through `Transport::close`.
    fn connection_lost(&self, reason: &str);
}

/// A byte link to the device.
pub trait Transport: Send {
    /// Open the link and start delivering received bytes to `sink`.
    fn open(
        &mut self,
        port: &str,
        baud_rate: u32,
        sink: Arc<dyn CharacterSink>,
    ) -> Result<(), TransportError>;

    /// Stop the background reader and release the link. Once this returns the
    /// sink receives no further calls.
    fn close(&mut self);

    /// Write all bytes and flush.
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// True while the link is open and its reader is alive.
    fn is_open(&self) -> bool;

    /// Short identifier for logs, e.g. "serial" or "sim".
    fn kind(&self) -> &'static str {
        "unknown"
    }
}
