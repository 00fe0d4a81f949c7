//! Captured-message data model shared across the pipeline.
//!
//! One `CapturedMessage` is created per debug-output broadcast, immutable
//! after creation, and owned by the queue until the owning thread drains
//! it. Delivery is fire-and-forget: once published to subscribers the
//! message is discarded.

use std::borrow::Cow;

use chrono::{DateTime, Local};

/// Identity of the process that emitted a message.
///
/// Resolved exactly once, at capture time. An empty `process_name` means
/// "identity unknown" and is never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub process_id: u32,
    pub process_name: String,
}

/// One message lifted off the system-wide debug-output broadcast.
///
/// `text` is the raw single-byte (ANSI) payload exactly as the broadcaster
/// wrote it, terminator excluded. It is deliberately not re-encoded: a
/// broadcaster emitting some other encoding is captured as the raw byte
/// sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedMessage {
    /// Strictly increasing across every receiver instance in the process.
    pub sequence_id: u64,
    pub timestamp: DateTime<Local>,
    pub text: Vec<u8>,
    pub process: ProcessInfo,
}

impl CapturedMessage {
    /// Text payload for display; bytes outside UTF-8 are replaced.
    pub fn text_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_lossy_keeps_ascii_and_replaces_the_rest() {
        let msg = CapturedMessage {
            sequence_id: 1,
            timestamp: Local::now(),
            text: vec![b'o', b'k', 0xFF],
            process: ProcessInfo { process_id: 7, process_name: String::new() },
        };
        assert!(msg.text_lossy().starts_with("ok"));
    }
}
