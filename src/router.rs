//! Frame classification.
//!
//! Only text frames carry application payloads. Everything else is consumed
//! here so processors never see control traffic.

use std::borrow::Cow;

use tracing::trace;

use crate::channel::Frame;

/// Prefix the backend bridge puts on text frames that report a broken
/// upstream channel rather than carrying data.
pub const TRANSPORT_ERROR_MARKER: &str = "Websocket error";

/// Result of routing one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// A text payload for the stream's processor.
    Payload(String),
    /// The backend signalled a transport fault; the text is its message.
    Fault(String),
}

/// Splits inbound frames into payloads, faults and ignorable control frames.
#[derive(Debug, Clone)]
pub struct FrameRouter {
    marker: Cow<'static, str>,
}

impl Default for FrameRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameRouter {
    pub fn new() -> Self {
        Self {
            marker: Cow::Borrowed(TRANSPORT_ERROR_MARKER),
        }
    }

    /// Use a different transport-error marker.
    pub fn with_marker(marker: impl Into<String>) -> Self {
        Self {
            marker: Cow::Owned(marker.into()),
        }
    }

    pub fn route(&self, frame: Frame) -> Option<Routed> {
        match frame {
            Frame::Text(text) if text.starts_with(self.marker.as_ref()) => Some(Routed::Fault(text)),
            Frame::Text(text) => Some(Routed::Payload(text)),
            Frame::Binary(data) => {
                trace!(len = data.len(), "Dropping binary frame");
                None
            }
            Frame::Ping(_) | Frame::Pong(_) => None,
            Frame::Close(reason) => {
                trace!(reason = ?reason, "Dropping close frame");
                None
            }
        }
    }
}
