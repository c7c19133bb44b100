//! In-process channels.
//!
//! [`MemoryConnector`] hands out channels whose sending side is kept as a
//! [`MemoryLink`], so the caller plays the backend: it pushes frames, injects
//! transport faults and observes which channels are still open.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{Channel, ChannelEvent, ChannelParams, CloseHandle, Connector, Frame, StreamKind};
use crate::error::{Error, Result};

const CHANNEL_CAPACITY: usize = 64;

/// A connector whose channels are fed from the same process.
///
/// # Example
///
/// ```
/// use streamwatch::channel::{ChannelParams, Connector, Frame, MemoryConnector, StreamKind};
///
/// # tokio_test::block_on(async {
/// let connector = MemoryConnector::new();
/// let mut channel = connector.open(StreamKind::Traffic, &ChannelParams::new()).await.unwrap();
///
/// let link = connector.latest(StreamKind::Traffic).unwrap();
/// link.send_text(r#"{"up":1,"down":2}"#).await;
///
/// let frame = channel.recv().await.unwrap().unwrap();
/// assert_eq!(frame, Frame::Text(r#"{"up":1,"down":2}"#.to_string()));
/// # });
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    links: Vec<MemoryLink>,
    attempts: Vec<StreamKind>,
    failures: usize,
    open_delay: Duration,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every open by `delay` before it settles.
    pub fn with_open_delay(self, delay: Duration) -> Self {
        self.state.lock().open_delay = delay;
        self
    }

    /// Make the next `count` opens fail with a connect error.
    pub fn fail_next(&self, count: usize) {
        self.state.lock().failures = count;
    }

    /// Number of open attempts for `kind`, successful or not.
    pub fn attempts(&self, kind: StreamKind) -> usize {
        self.state.lock().attempts.iter().filter(|k| **k == kind).count()
    }

    /// Every channel opened for `kind`, oldest first.
    pub fn links(&self, kind: StreamKind) -> Vec<MemoryLink> {
        self.state
            .lock()
            .links
            .iter()
            .filter(|link| link.kind == kind)
            .cloned()
            .collect()
    }

    /// The most recently opened channel for `kind`.
    pub fn latest(&self, kind: StreamKind) -> Option<MemoryLink> {
        self.links(kind).pop()
    }

    /// Number of channels for `kind` that are still open.
    pub fn live(&self, kind: StreamKind) -> usize {
        self.links(kind).iter().filter(|link| !link.is_closed()).count()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, kind: StreamKind, params: &ChannelParams) -> Result<Channel> {
        let delay = {
            let mut state = self.state.lock();
            state.attempts.push(kind);
            state.open_delay
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if state.failures > 0 {
            state.failures -= 1;
            return Err(Error::Connect {
                stream: kind,
                reason: "backend unavailable".to_string(),
            });
        }

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let closer = CloseHandle::new();
        state.links.push(MemoryLink {
            kind,
            params: params.clone(),
            sender: tx,
            closer: closer.clone(),
        });

        Ok(Channel::new(kind, rx, closer))
    }

    fn description(&self) -> &str {
        "memory"
    }
}

/// The backend side of an in-process channel.
#[derive(Debug, Clone)]
pub struct MemoryLink {
    kind: StreamKind,
    params: ChannelParams,
    sender: mpsc::Sender<ChannelEvent>,
    closer: CloseHandle,
}

impl MemoryLink {
    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Parameters the channel was opened with.
    pub fn params(&self) -> &ChannelParams {
        &self.params
    }

    pub fn is_closed(&self) -> bool {
        self.closer.is_closed()
    }

    /// Push a frame. Returns `false` if the channel is closed.
    pub async fn send(&self, frame: Frame) -> bool {
        if self.is_closed() {
            return false;
        }
        self.sender.send(Ok(frame)).await.is_ok()
    }

    pub async fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(Frame::Text(text.into())).await
    }

    /// Break the channel with a transport error.
    pub async fn fail(&self, reason: impl Into<String>) -> bool {
        if self.is_closed() {
            return false;
        }
        self.sender
            .send(Err(Error::Transport(reason.into())))
            .await
            .is_ok()
    }
}
