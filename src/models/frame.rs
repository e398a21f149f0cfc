//! Captured and dispatched screencast frames.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use super::event::ServerEvent;

/// Raw frame handed back by a capture source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFrame {
    /// Source-assigned identifier echoed back in the acknowledgment.
    pub ack_id: u64,
    /// Encoded image bytes (JPEG).
    pub data: Bytes,
    /// Page URL at capture time, when the source knows it.
    pub url: Option<String>,
}

/// A frame selected for delivery to viewers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Session the frame belongs to.
    pub session_id: String,
    /// Monotonic per-session sequence number of emitted frames.
    pub sequence: u64,
    /// Encoded image bytes (JPEG).
    pub data: Bytes,
    /// Capture timestamp.
    pub captured_at: DateTime<Utc>,
    /// Page URL at capture time.
    pub url: String,
}

impl Frame {
    /// Wire event for this frame with base64 image data.
    #[must_use]
    pub fn to_event(&self) -> ServerEvent {
        ServerEvent::Frame {
            data: STANDARD.encode(&self.data),
            url: self.url.clone(),
            timestamp: self.captured_at,
            sequence: self.sequence,
        }
    }
}
