// src/testing.rs
//
// Shared test doubles: a byte-collecting sink, a scripted transport, and
// in-memory archive targets.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::archive::{ArchiveBackend, ArchiveError, ArchiveEvent, Archivist, EventKind};
use crate::io::{CharacterSink, Transport, TransportError};

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if done() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}

// ============================================================================
// Sink
// ============================================================================

#[derive(Default)]
pub struct CollectingSink {
    bytes: Mutex<Vec<u8>>,
    lost: Mutex<Vec<String>>,
}

impl CollectingSink {
    pub fn bytes(&self) -> Vec<u8> {
        self.bytes.lock().unwrap().clone()
    }

    pub fn lost_reasons(&self) -> Vec<String> {
        self.lost.lock().unwrap().clone()
    }

    pub fn wait_for_bytes(&self, count: usize, timeout: Duration) -> bool {
        wait_until(timeout, || self.bytes.lock().unwrap().len() >= count)
    }

    pub fn wait_for_lost(&self, timeout: Duration) -> bool {
        wait_until(timeout, || !self.lost.lock().unwrap().is_empty())
    }
}

impl CharacterSink for CollectingSink {
    fn handle_character(&self, byte: u8) {
        self.bytes.lock().unwrap().push(byte);
    }

    fn connection_lost(&self, reason: &str) {
        self.lost.lock().unwrap().push(reason.to_string());
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Handles kept by a test after the transport moves into an engine
#[derive(Clone, Default)]
pub struct MockControls {
    pub writes: Arc<Mutex<Vec<Vec<u8>>>>,
    pub fail_writes: Arc<AtomicBool>,
    pub fail_open: Arc<AtomicBool>,
    pub sink: Arc<Mutex<Option<Arc<dyn CharacterSink>>>>,
    pub opens: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
}

impl MockControls {
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().unwrap().clone()
    }

    /// Deliver bytes through the sink handed to the last `open`.
    pub fn feed(&self, bytes: &[u8]) {
        let sink = self.sink.lock().unwrap().clone();
        if let Some(sink) = sink {
            for &b in bytes {
                sink.handle_character(b);
            }
        }
    }

    pub fn drop_link(&self, reason: &str) {
        let sink = self.sink.lock().unwrap().clone();
        if let Some(sink) = sink {
            sink.connection_lost(reason);
        }
    }
}

#[derive(Default)]
pub struct MockTransport {
    controls: MockControls,
    open_port: Option<String>,
}

impl MockTransport {
    pub fn new() -> (Self, MockControls) {
        let transport = Self::default();
        let controls = transport.controls.clone();
        (transport, controls)
    }
}

impl Transport for MockTransport {
    fn open(
        &mut self,
        port: &str,
        _baud_rate: u32,
        sink: Arc<dyn CharacterSink>,
    ) -> Result<(), TransportError> {
        if self.open_port.is_some() {
            return Err(TransportError::AlreadyOpen(port.to_string()));
        }
        if self.controls.fail_open.load(Ordering::SeqCst) {
            return Err(TransportError::Open {
                port: port.to_string(),
                reason: "no such device".to_string(),
            });
        }
        *self.controls.sink.lock().unwrap() = Some(sink);
        self.controls.opens.fetch_add(1, Ordering::SeqCst);
        self.open_port = Some(port.to_string());
        Ok(())
    }

    fn close(&mut self) {
        if self.open_port.take().is_some() {
            *self.controls.sink.lock().unwrap() = None;
            self.controls.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.open_port.is_none() {
            return Err(TransportError::NotOpen);
        }
        if self.controls.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::Write(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "cable pulled",
            )));
        }
        self.controls.writes.lock().unwrap().push(bytes.to_vec());
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open_port.is_some()
    }

    fn kind(&self) -> &'static str {
        "mock"
    }
}

// ============================================================================
// Archive
// ============================================================================

#[derive(Default)]
pub struct MemoryArchivist {
    events: Mutex<Vec<ArchiveEvent>>,
}

impl MemoryArchivist {
    pub fn events(&self) -> Vec<ArchiveEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().unwrap().iter().map(|e| e.kind).collect()
    }

    pub fn of_kind(&self, kind: EventKind) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.payload.clone())
            .collect()
    }
}

impl Archivist for MemoryArchivist {
    fn record_event(&self, event: ArchiveEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Backend that keeps appended events and batch sizes in memory
#[derive(Default)]
pub struct MemoryBackend {
    events: Arc<Mutex<Vec<ArchiveEvent>>>,
    batches: Arc<Mutex<Vec<usize>>>,
}

impl MemoryBackend {
    pub fn events_handle(&self) -> Arc<Mutex<Vec<ArchiveEvent>>> {
        self.events.clone()
    }

    pub fn batches_handle(&self) -> Arc<Mutex<Vec<usize>>> {
        self.batches.clone()
    }
}

#[async_trait]
impl ArchiveBackend for MemoryBackend {
    async fn append(&mut self, events: &[ArchiveEvent]) -> Result<(), ArchiveError> {
        self.batches.lock().unwrap().push(events.len());
        self.events.lock().unwrap().extend_from_slice(events);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
