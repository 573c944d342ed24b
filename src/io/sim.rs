// src/io/sim.rs
//
// In-process stand-in for a FORTH target.
// Echoes every byte written to it and answers each completed input line with
// " ok", from its own background thread, the way a board's prompt would.

use std::sync::mpsc as std_mpsc;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::Duration;

use super::{CharacterSink, Transport, TransportError};

const PROMPT_REPLY: &[u8] = b" ok\r\n";

struct Running {
    port: String,
    to_device: std_mpsc::Sender<Vec<u8>>,
    cancel_flag: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

/// Simulated device transport
pub struct SimulatedDevice {
    banner: Option<String>,
    unplugged: Arc<AtomicBool>,
    running: Option<Running>,
}

impl SimulatedDevice {
    pub fn new() -> Self {
        Self {
            banner: None,
            unplugged: Arc::new(AtomicBool::new(false)),
            running: None,
        }
    }

    /// Line sent by the device as soon as the link opens.
    pub fn with_banner(mut self, banner: impl Into<String>) -> Self {
        self.banner = Some(banner.into());
        self
    }

    /// Setting the returned flag drops the link as if the cable was pulled.
    pub fn unplug_switch(&self) -> Arc<AtomicBool> {
        self.unplugged.clone()
    }
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SimulatedDevice {
    fn open(
        &mut self,
        port: &str,
        _baud_rate: u32,
        sink: Arc<dyn CharacterSink>,
    ) -> Result<(), TransportError> {
        if self.is_open() {
            return Err(TransportError::AlreadyOpen(port.to_string()));
        }
        self.close();
        if self.unplugged.load(Ordering::SeqCst) {
            return Err(TransportError::Open {
                port: port.to_string(),
                reason: "device unplugged".to_string(),
            });
        }

        let (to_device, from_host) = std_mpsc::channel::<Vec<u8>>();
        let cancel_flag = Arc::new(AtomicBool::new(false));
        let alive = Arc::new(AtomicBool::new(true));

        let handle = {
            let cancel_flag = cancel_flag.clone();
            let alive = alive.clone();
            let unplugged = self.unplugged.clone();
            let banner = self.banner.clone();
            std::thread::Builder::new()
                .name("sim-device".to_string())
                .spawn(move || run_device(from_host, sink, banner, cancel_flag, unplugged, alive))
                .map_err(|e| TransportError::Open {
                    port: port.to_string(),
                    reason: e.to_string(),
                })?
        };

        tlog!("[sim] Device attached as {}", port);
        self.running = Some(Running {
            port: port.to_string(),
            to_device,
            cancel_flag,
            alive,
            handle: Some(handle),
        });
        Ok(())
    }

    fn close(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };
        running.cancel_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = running.handle.take() {
            let _ = handle.join();
        }
        tlog!("[sim] Device {} detached", running.port);
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let running = self.running.as_ref().ok_or(TransportError::NotOpen)?;
        if !running.alive.load(Ordering::SeqCst) {
            return Err(TransportError::NotOpen);
        }
        running.to_device.send(bytes.to_vec()).map_err(|_| {
            TransportError::Write(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "simulated device is gone",
            ))
        })
    }

    fn is_open(&self) -> bool {
        self.running
            .as_ref()
            .map(|r| r.alive.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    fn kind(&self) -> &'static str {
        "sim"
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_device(
    from_host: std_mpsc::Receiver<Vec<u8>>,
    sink: Arc<dyn CharacterSink>,
    banner: Option<String>,
    cancel_flag: Arc<AtomicBool>,
    unplugged: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
) {
    if let Some(banner) = banner {
        for &byte in banner.as_bytes().iter().chain(b"\r\n") {
            sink.handle_character(byte);
        }
    }

    let mut after_cr = false;
    loop {
        if cancel_flag.load(Ordering::SeqCst) {
            break;
        }
        if unplugged.load(Ordering::SeqCst) {
            alive.store(false, Ordering::SeqCst);
            sink.connection_lost("device unplugged");
            return;
        }

        let chunk = match from_host.recv_timeout(Duration::from_millis(5)) {
            Ok(chunk) => chunk,
            Err(std_mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
        };

        for byte in chunk {
            match byte {
                b'\n' if after_cr => {}
                b'\r' | b'\n' => {
                    for &reply in PROMPT_REPLY {
                        sink.handle_character(reply);
                    }
                }
                _ => sink.handle_character(byte),
            }
            after_cr = byte == b'\r';
        }
    }

    alive.store(false, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::CollectingSink;

    #[test]
    fn test_echo_and_prompt() {
        let sink = Arc::new(CollectingSink::default());
        let mut device = SimulatedDevice::new();
        device.open("sim0", 115200, sink.clone()).unwrap();
        device.write(b"2 2 + .\r\n").unwrap();

        assert!(sink.wait_for_bytes(b"2 2 + . ok\r\n".len(), Duration::from_secs(2)));
        device.close();
        assert_eq!(sink.bytes(), b"2 2 + . ok\r\n".to_vec());
        assert!(!device.is_open());
    }

    #[test]
    fn test_banner_sent_on_open() {
        let sink = Arc::new(CollectingSink::default());
        let mut device = SimulatedDevice::new().with_banner("Mecrisp-Stellaris");
        device.open("sim0", 115200, sink.clone()).unwrap();
        assert!(sink.wait_for_bytes(19, Duration::from_secs(2)));
        device.close();
        assert_eq!(sink.bytes(), b"Mecrisp-Stellaris\r\n".to_vec());
    }

    #[test]
    fn test_unplug_reports_lost_link() {
        let sink = Arc::new(CollectingSink::default());
        let mut device = SimulatedDevice::new();
        let unplug = device.unplug_switch();
        device.open("sim0", 115200, sink.clone()).unwrap();

        unplug.store(true, Ordering::SeqCst);
        assert!(sink.wait_for_lost(Duration::from_secs(2)));
        assert!(!device.is_open());
        assert!(matches!(device.write(b"x"), Err(TransportError::NotOpen)));
        assert_eq!(sink.lost_reasons(), vec!["device unplugged".to_string()]);
    }

    #[test]
    fn test_double_open_rejected() {
        let sink = Arc::new(CollectingSink::default());
        let mut device = SimulatedDevice::new();
        device.open("sim0", 115200, sink.clone()).unwrap();
        assert!(matches!(
            device.open("sim0", 115200, sink),
            Err(TransportError::AlreadyOpen(_))
        ));
    }
}
