// src/io/serial/reader.rs
//
// Serial port transport.
// Opens the port with the serialport crate and runs a blocking reader thread
// that feeds every received byte to the session's CharacterSink.

use serde::Serialize;
use std::io::{Read, Write};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::thread::JoinHandle;

use serialport::SerialPort;

use super::utils::SerialOptions;
use crate::io::{CharacterSink, Transport, TransportError};

type SharedPort = Arc<Mutex<Box<dyn SerialPort>>>;

// ============================================================================
// Types
// ============================================================================

/// Information about an available serial port
#[derive(Clone, Debug, Serialize)]
pub struct SerialPortInfo {
    pub port_name: String,
    pub port_type: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
}

/// State of one open port
struct OpenPort {
    name: String,
    port: SharedPort,
    cancel_flag: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

// ============================================================================
// Serial Transport
// ============================================================================

/// Serial port transport implementing the Transport trait
pub struct SerialTransport {
    options: SerialOptions,
    open: Option<OpenPort>,
}

impl SerialTransport {
    pub fn new(options: SerialOptions) -> Self {
        Self { options, open: None }
    }

    /// Name of the open port, if any
    pub fn port_name(&self) -> Option<&str> {
        self.open.as_ref().map(|p| p.name.as_str())
    }
}

impl Transport for SerialTransport {
    fn open(
        &mut self,
        port_name: &str,
        baud_rate: u32,
        sink: Arc<dyn CharacterSink>,
    ) -> Result<(), TransportError> {
        if let Some(open) = &self.open {
            if open.alive.load(Ordering::SeqCst) {
                return Err(TransportError::AlreadyOpen(open.name.clone()));
            }
        }
        // Reap a reader that ended on its own
        self.close();

        let port = serialport::new(port_name, baud_rate)
            .data_bits(super::utils::to_serialport_data_bits(self.options.data_bits))
            .stop_bits(super::utils::to_serialport_stop_bits(self.options.stop_bits))
            .parity(super::utils::to_serialport_parity(&self.options.parity))
            .timeout(self.options.read_timeout)
            .open()
            .map_err(|e| TransportError::Open {
                port: port_name.to_string(),
                reason: e.to_string(),
            })?;

        // Shared between the reader thread and write()
        let port: SharedPort = Arc::new(Mutex::new(port));
        let cancel_flag = Arc::new(AtomicBool::new(false));
        let alive = Arc::new(AtomicBool::new(true));

        tlog!(
            "[serial] Opened {} at {} baud ({})",
            port_name,
            baud_rate,
            self.options.summary()
        );

        let reader = {
            let port = port.clone();
            let cancel_flag = cancel_flag.clone();
            let alive = alive.clone();
            let name = port_name.to_string();
            std::thread::Builder::new()
                .name(format!("serial-reader {}", port_name))
                .spawn(move || run_reader_blocking(name, port, sink, cancel_flag, alive))
                .map_err(|e| TransportError::Open {
                    port: port_name.to_string(),
                    reason: format!("failed to spawn reader: {}", e),
                })?
        };

        self.open = Some(OpenPort {
            name: port_name.to_string(),
            port,
            cancel_flag,
            alive,
            reader: Some(reader),
        });
        Ok(())
    }

    fn close(&mut self) {
        let Some(mut open) = self.open.take() else {
            return;
        };

        open.cancel_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = open.reader.take() {
            if handle.join().is_err() {
                tlog!("[serial] Reader thread for {} panicked", open.name);
            }
        }
        open.alive.store(false, Ordering::SeqCst);
        tlog!("[serial] Closed {}", open.name);
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let open = self.open.as_ref().ok_or(TransportError::NotOpen)?;
        if !open.alive.load(Ordering::SeqCst) {
            return Err(TransportError::NotOpen);
        }

        let mut port = open.port.lock().map_err(|e| {
            TransportError::Write(std::io::Error::other(format!("port mutex poisoned: {}", e)))
        })?;
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
            .as_ref()
            .map(|p| p.alive.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    fn kind(&self) -> &'static str {
        "serial"
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Blocking read loop. Runs until cancelled, EOF, or a read error.
fn run_reader_blocking(
    port_name: String,
    port: SharedPort,
    sink: Arc<dyn CharacterSink>,
    cancel_flag: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
) {
    let mut buf = [0u8; 256];
    let mut total_bytes_read: u64 = 0;

    let lost_reason: Option<String> = loop {
        if cancel_flag.load(Ordering::SeqCst) {
            break None;
        }

        // Lock is released before bytes go to the sink so writes are not held up
        let read_result = match port.lock() {
            Ok(mut port_guard) => port_guard.read(&mut buf),
            Err(e) => break Some(format!("port mutex poisoned: {}", e)),
        };

        match read_result {
            Ok(0) => break Some("device disconnected".to_string()),
            Ok(n) => {
                total_bytes_read += n as u64;
                for &byte in &buf[..n] {
                    sink.handle_character(byte);
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {
                // Timeout is expected for serial reads
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => break Some(format!("read error: {}", e)),
        }
    };

    alive.store(false, Ordering::SeqCst);

    match lost_reason {
        Some(reason) => {
            tlog!(
                "[serial] {} ended after {} bytes: {}",
                port_name,
                total_bytes_read,
                reason
            );
            sink.connection_lost(&reason);
        }
        None => {
            tlog!("[serial] {} reader stopped after {} bytes", port_name, total_bytes_read);
        }
    }
}

// ============================================================================
// Port Enumeration
// ============================================================================

/// List available serial ports
///
/// On macOS, filters out /dev/tty.* devices and only shows /dev/cu.* devices.
/// The tty (terminal) devices block on open waiting for carrier detect.
pub fn list_ports() -> Result<Vec<SerialPortInfo>, TransportError> {
    let ports =
        serialport::available_ports().map_err(|e| TransportError::Enumerate(e.to_string()))?;

    Ok(ports
        .into_iter()
        .filter(|_p| {
            #[cfg(target_os = "macos")]
            {
                !_p.port_name.starts_with("/dev/tty.")
            }
            #[cfg(not(target_os = "macos"))]
            {
                true
            }
        })
        .map(|p| {
            let (port_type, manufacturer, product, serial_number, vid, pid) = match p.port_type {
                serialport::SerialPortType::UsbPort(info) => (
                    "USB".to_string(),
                    info.manufacturer,
                    info.product,
                    info.serial_number,
                    Some(info.vid),
                    Some(info.pid),
                ),
                serialport::SerialPortType::BluetoothPort => {
                    ("Bluetooth".to_string(), None, None, None, None, None)
                }
                serialport::SerialPortType::PciPort => {
                    ("PCI".to_string(), None, None, None, None, None)
                }
                serialport::SerialPortType::Unknown => {
                    ("Unknown".to_string(), None, None, None, None, None)
                }
            };
            SerialPortInfo {
                port_name: p.port_name,
                port_type,
                manufacturer,
                product,
                serial_number,
                vid,
                pid,
            }
        })
        .collect())
}
