//! Ingestion buffer for chat lines.
//!
//! Lines are appended in arrival order by the chat task and drained in one
//! piece by the batch scheduler.

use std::sync::{Mutex, PoisonError};

#[derive(Debug, Default)]
pub struct ChatBuffer {
    lines: Mutex<Vec<String>>,
}

impl ChatBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, text: impl Into<String>) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(text.into());
    }

    /// Take everything buffered so far and leave the buffer empty.
    ///
    /// The swap happens under the lock, so a concurrent `append` lands
    /// either in this batch or the next one, never both.
    pub fn drain_all(&self) -> Vec<String> {
        std::mem::take(&mut *self.lines.lock().unwrap_or_else(PoisonError::into_inner))
    }
}
