//! Log buffer service
//!
//! Collects the user-facing log of one build. Entries are written as the
//! pipeline advances and rendered into `BuildResult::logs` when it finishes.

use kiln_core::domain::log::{LogEntry, LogLevel, render_lines};
use std::sync::{Arc, Mutex};

/// Service for managing build log buffers
pub trait LogBufferService: Send + Sync {
    /// Adds a log entry to the buffer
    fn add_entry(&self, entry: LogEntry);

    /// Drains all log entries from the buffer
    ///
    /// This returns all buffered entries and clears the buffer.
    fn drain(&self) -> Vec<LogEntry>;

    /// Records a message stamped with the current time
    fn record(&self, level: LogLevel, message: String) {
        self.add_entry(LogEntry::now(level, message));
    }

    /// Drains the buffer and renders it as text, one entry per line
    fn render(&self) -> String {
        render_lines(&self.drain())
    }
}

/// In-memory implementation of LogBufferService
///
/// Uses Arc<Mutex<Vec<LogEntry>>> for thread-safe access across tasks.
#[derive(Clone)]
pub struct InMemoryLogBuffer {
    buffer: Arc<Mutex<Vec<LogEntry>>>,
}

impl InMemoryLogBuffer {
    /// Creates a new in-memory log buffer
    pub fn new() -> Self {
        Self {
            buffer: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Default for InMemoryLogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LogBufferService for InMemoryLogBuffer {
    fn add_entry(&self, entry: LogEntry) {
        let mut buffer = self.buffer.lock().unwrap();
        buffer.push(entry);
    }

    fn drain(&self) -> Vec<LogEntry> {
        let mut buffer = self.buffer.lock().unwrap();
        buffer.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_render() {
        let buffer = InMemoryLogBuffer::new();
        buffer.record(LogLevel::Info, "Provisioning target".to_string());
        buffer.record(LogLevel::Error, "Step 'install' failed".to_string());

        let text = buffer.render();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("INFO Provisioning target"));
        assert!(lines[1].ends_with("ERROR Step 'install' failed"));

        // Rendering drains
        assert!(buffer.drain().is_empty());
    }

    #[test]
    fn test_clones_share_buffer() {
        let buffer = InMemoryLogBuffer::new();
        let clone = buffer.clone();
        clone.record(LogLevel::Debug, "from clone".to_string());
        assert_eq!(buffer.drain().len(), 1);
    }
}
