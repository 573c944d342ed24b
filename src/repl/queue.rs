// src/repl/queue.rs
//
// Hand-off queue between the background receive path (single producer) and
// the presentation surface's polling loop (single consumer).

use std::collections::VecDeque;
use std::sync::Mutex;

/// One item of completed output awaiting display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplOutput {
    /// A complete line from the device, terminator removed
    Line(String),
    /// Out-of-band marker (link dropped, write failed)
    Error(String),
}

impl ReplOutput {
    pub fn text(&self) -> &str {
        match self {
            ReplOutput::Line(s) | ReplOutput::Error(s) => s,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ReplOutput::Error(_))
    }
}

/// FIFO of completed output. Push and drain each hold the lock only long
/// enough to append or swap out the backing deque.
#[derive(Debug, Default)]
pub struct OutputQueue {
    items: Mutex<VecDeque<ReplOutput>>,
}

impl OutputQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, item: ReplOutput) {
        match self.items.lock() {
            Ok(mut guard) => guard.push_back(item),
            // A panicking holder cannot leave the deque half-updated
            Err(poisoned) => poisoned.into_inner().push_back(item),
        }
    }

    /// Remove and return everything queued, oldest first. Never blocks on an
    /// empty queue.
    pub fn drain(&self) -> Vec<ReplOutput> {
        let taken = match self.items.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        taken.into()
    }

    pub fn len(&self) -> usize {
        match self.items.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
