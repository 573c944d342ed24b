// src/archive/writer.rs
//
// Buffered archivist. `record` only pushes onto an unbounded channel, so it is
// safe to call from the serial reader thread. A dedicated worker thread owns
// the backend, batches events, and flushes them in order.

use std::sync::mpsc as std_mpsc;
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::mpsc;

use super::{ArchiveBackend, ArchiveError, ArchiveEvent, Archivist};

/// Batching policy of the worker
#[derive(Clone, Debug, PartialEq)]
pub struct WriterSettings {
    /// Flush as soon as this many events are pending
    pub batch_size: usize,
    /// Flush pending events at least this often
    pub flush_interval: Duration,
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self {
            batch_size: 64,
            flush_interval: Duration::from_millis(250),
        }
    }
}

enum WriterMessage {
    Event(ArchiveEvent),
    /// Flush, then ack on the given channel
    Flush(std_mpsc::SyncSender<()>),
    /// Flush and exit
    Shutdown,
}

pub struct ArchiveWriter {
    tx: mpsc::UnboundedSender<WriterMessage>,
    handle: Mutex<Option<JoinHandle<()>>>,
    backend_name: &'static str,
}

impl ArchiveWriter {
    /// Start a worker around an already opened backend.
    pub fn spawn(
        backend: Box<dyn ArchiveBackend>,
        settings: WriterSettings,
    ) -> Result<Self, ArchiveError> {
        Self::spawn_with(settings, move |_rt| Ok(backend))
    }

    /// Start a worker whose backend is opened on the worker's own runtime.
    /// Returns once the backend is open, or with the error that prevented it.
    pub fn spawn_with<F>(settings: WriterSettings, open: F) -> Result<Self, ArchiveError>
    where
        F: FnOnce(&tokio::runtime::Runtime) -> Result<Box<dyn ArchiveBackend>, ArchiveError>
            + Send
            + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel::<WriterMessage>();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<&'static str, ArchiveError>>(1);

        let handle = std::thread::Builder::new()
            .name("archive-writer".to_string())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = ready_tx.send(Err(ArchiveError::Worker(format!(
                            "Failed to build runtime: {}",
                            e
                        ))));
                        return;
                    }
                };

                let backend = match open(&rt) {
                    Ok(backend) => backend,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(backend.name()));

                rt.block_on(run_worker(backend, rx, settings));
            })
            .map_err(|e| ArchiveError::Worker(format!("Failed to spawn writer: {}", e)))?;

        let backend_name = match ready_rx.recv() {
            Ok(Ok(name)) => name,
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(ArchiveError::Worker("writer exited during startup".to_string()));
            }
        };

        tlog!("[archive] Writer started ({})", backend_name);
        Ok(Self {
            tx,
            handle: Mutex::new(Some(handle)),
            backend_name,
        })
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend_name
    }

    /// Block until every event recorded so far has been handed to the backend.
    pub fn flush(&self) -> Result<(), ArchiveError> {
        let (ack_tx, ack_rx) = std_mpsc::sync_channel(1);
        self.tx
            .send(WriterMessage::Flush(ack_tx))
            .map_err(|_| ArchiveError::Worker("writer is closed".to_string()))?;
        ack_rx
            .recv()
            .map_err(|_| ArchiveError::Worker("writer exited before flushing".to_string()))
    }

    /// Flush pending events and stop the worker. Events recorded afterwards are dropped.
    pub fn close(&self) {
        let handle = match self.handle.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            let _ = self.tx.send(WriterMessage::Shutdown);
            if handle.join().is_err() {
                tlog!("[archive] Writer thread panicked");
            }
            tlog!("[archive] Writer stopped ({})", self.backend_name);
        }
    }
}

impl Archivist for ArchiveWriter {
    fn record_event(&self, event: ArchiveEvent) {
        // Fails only after close()
        let _ = self.tx.send(WriterMessage::Event(event));
    }
}

impl Drop for ArchiveWriter {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_worker(
    mut backend: Box<dyn ArchiveBackend>,
    mut rx: mpsc::UnboundedReceiver<WriterMessage>,
    settings: WriterSettings,
) {
    let batch_size = settings.batch_size.max(1);
    let mut pending: Vec<ArchiveEvent> = Vec::with_capacity(batch_size);
    // First tick one period out; a plain interval fires immediately
    let mut ticker = tokio::time::interval_at(
        tokio::time::Instant::now() + settings.flush_interval,
        settings.flush_interval,
    );
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Some(WriterMessage::Event(event)) => {
                        pending.push(event);
                        if pending.len() >= batch_size {
                            flush_pending(backend.as_mut(), &mut pending).await;
                        }
                    }
                    Some(WriterMessage::Flush(ack)) => {
                        flush_pending(backend.as_mut(), &mut pending).await;
                        let _ = ack.send(());
                    }
                    Some(WriterMessage::Shutdown) | None => break,
                }
            }
            _ = ticker.tick(), if !pending.is_empty() => {
                flush_pending(backend.as_mut(), &mut pending).await;
            }
        }
    }

    flush_pending(backend.as_mut(), &mut pending).await;
}

/// Hand the batch to the backend. A failed batch is logged and dropped so a
/// broken store cannot grow memory without bound.
async fn flush_pending(backend: &mut dyn ArchiveBackend, pending: &mut Vec<ArchiveEvent>) {
    if pending.is_empty() {
        return;
    }
    let batch = std::mem::take(pending);
    if let Err(e) = backend.append(&batch).await {
        tlog!(
            "[archive] Failed to write {} events to {}: {}",
            batch.len(),
            backend.name(),
            e
        );
    }
}
