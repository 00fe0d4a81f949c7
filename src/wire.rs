//! Wire encoder for published messages.
//!
//! One captured message becomes one self-contained little-endian buffer:
//!
//!   ┌────────┬──────────────┬──────────┬───────────┬────────┐
//!   │ i32    │ f64          │ i32      │ bytes     │ i32    │
//!   │ type   │ timestamp    │ text len │ text      │ 0      │
//!   └────────┴──────────────┴──────────┴───────────┴────────┘
//!
//! The timestamp is the OLE automation date (days since 1899-12-30, local
//! time), the numeric date form the downstream viewer consumes. The buffer
//! is rebuilt from offset 0 on every call and sized to exactly fit the
//! fields written; nothing is retained between calls.
//!
//! This layout is the byte-stable contract with the viewer. Process
//! identity is resolved upstream and held on `CapturedMessage`, but it is
//! not part of the current layout; adding it means a new versioned type
//! tag, not a change to this one.

use chrono::{DateTime, NaiveDate, TimeZone};

use crate::events::CapturedMessage;

/// Type tag for log-text messages, the only type this channel emits.
pub const MESSAGE_TYPE_LOG_TEXT: i32 = 1;

/// Bytes around the text payload: type + timestamp + length + reserved.
pub const FIXED_OVERHEAD: usize = 4 + 8 + 4 + 4;

/// Serialize one captured message into a fresh wire buffer.
pub fn encode(message: &CapturedMessage) -> Vec<u8> {
    let mut buf = Vec::with_capacity(FIXED_OVERHEAD + message.text.len());
    buf.extend_from_slice(&MESSAGE_TYPE_LOG_TEXT.to_le_bytes());
    buf.extend_from_slice(&ole_automation_date(&message.timestamp).to_le_bytes());
    buf.extend_from_slice(&(message.text.len() as i32).to_le_bytes());
    buf.extend_from_slice(&message.text);
    buf.extend_from_slice(&0i32.to_le_bytes());
    buf
}

/// Days since the OLE automation epoch (1899-12-30 00:00 local), day
/// fraction included. Millisecond resolution.
fn ole_automation_date<Tz: TimeZone>(ts: &DateTime<Tz>) -> f64 {
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)
        .expect("OLE epoch is a valid date")
        .and_hms_opt(0, 0, 0)
        .expect("midnight is a valid time");
    let delta = ts.naive_local() - epoch;
    delta.num_milliseconds() as f64 / 86_400_000.0
}
