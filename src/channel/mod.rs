//! Push channels to the backend.
//!
//! A [`Connector`] opens one [`Channel`] per stream. A channel is
//! receive-only: the backend pushes [`Frame`]s and the subscriber never
//! writes application data back. Closing is idempotent and can be done from
//! any holder of the channel's [`CloseHandle`].
//!
//! Two connectors are provided:
//!
//! - [`WebSocketConnector`]: the production transport
//! - [`MemoryConnector`]: in-process channels fed by the caller, for tests and
//!   for embedding a backend in the same process

mod memory;
mod websocket;

pub use memory::{MemoryConnector, MemoryLink};
pub use websocket::WebSocketConnector;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{mpsc, watch};

use crate::error::{Error, Result};

/// The four streams the backend exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Traffic,
    Memory,
    Connections,
    Logs,
}

impl StreamKind {
    pub const ALL: [StreamKind; 4] = [
        StreamKind::Traffic,
        StreamKind::Memory,
        StreamKind::Connections,
        StreamKind::Logs,
    ];

    /// Path of the stream's endpoint, relative to the controller URL.
    pub fn path(&self) -> &'static str {
        match self {
            StreamKind::Traffic => "traffic",
            StreamKind::Memory => "memory",
            StreamKind::Connections => "connections",
            StreamKind::Logs => "logs",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

impl FromStr for StreamKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        StreamKind::ALL
            .into_iter()
            .find(|kind| kind.path().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::Config(format!("unknown stream: {}", s)))
    }
}

/// Query parameters sent when opening a channel (e.g. the log `level`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelParams(BTreeMap<String, String>);

impl ChannelParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

/// One inbound frame, as tagged by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    /// Close frame with the peer's reason, if any.
    Close(Option<String>),
}

/// What a channel yields: a frame, or the transport error that ended it.
pub type ChannelEvent = Result<Frame>;

/// Shared, idempotent close switch for a channel.
///
/// Cloning yields another handle to the same switch. The first call to
/// [`close`](Self::close) flips it; later calls do nothing.
#[derive(Debug, Clone)]
pub struct CloseHandle {
    closed: Arc<watch::Sender<bool>>,
}

impl CloseHandle {
    pub fn new() -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            closed: Arc::new(closed),
        }
    }

    /// Close the channel. Returns `true` if this call performed the close.
    pub fn close(&self) -> bool {
        !self.closed.send_replace(true)
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the channel has been closed.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl Default for CloseHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// A live push channel for one stream.
///
/// Dropping the channel closes it.
#[derive(Debug)]
pub struct Channel {
    kind: StreamKind,
    events: mpsc::Receiver<ChannelEvent>,
    closer: CloseHandle,
}

impl Channel {
    /// Wrap the receiving end of a transport pump.
    ///
    /// The pump should stop once `closer` is closed.
    pub fn new(kind: StreamKind, events: mpsc::Receiver<ChannelEvent>, closer: CloseHandle) -> Self {
        Self {
            kind,
            events,
            closer,
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Receive the next event, in arrival order.
    ///
    /// Returns `None` once the channel is closed or the transport is gone.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        if self.closer.is_closed() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.closer.closed() => None,
            event = self.events.recv() => event,
        }
    }

    /// Close the channel. Safe to call more than once.
    pub fn close(&self) {
        self.closer.close();
    }

    pub fn is_closed(&self) -> bool {
        self.closer.is_closed()
    }

    pub fn close_handle(&self) -> CloseHandle {
        self.closer.clone()
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.closer.close();
    }
}

/// Opens push channels to the backend.
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    /// Open a channel for `kind`.
    ///
    /// Failure is returned as [`Error::Connect`]; it never panics.
    async fn open(&self, kind: StreamKind, params: &ChannelParams) -> Result<Channel>;

    /// Human-readable description of where channels go.
    fn description(&self) -> &str;
}
