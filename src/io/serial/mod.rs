// src/io/serial/mod.rs
//
// Serial port transport for FORTH targets.
// Provides cross-platform serial communication via the serialport crate.

pub mod reader;
pub(crate) mod utils;

pub use reader::{list_ports, SerialPortInfo, SerialTransport};
pub use utils::{Parity, SerialOptions};
