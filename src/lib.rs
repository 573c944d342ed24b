// src/lib.rs

// Logging must come first so the tlog! macro is available to every module
#[macro_use]
pub mod logging;

pub mod archive;
pub mod io;
pub mod repl;
pub mod settings;
pub mod tui;

#[cfg(test)]
mod testing;

pub use repl::{ReplEngine, ReplError, ReplOptions, ReplOutput, SessionState};
