//! Consumer-visible stream state.

use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::watch;

use crate::error::Error;
use crate::supervisor::Lifeline;

/// Epoch of one logical subscription.
///
/// Stamps are wall-clock milliseconds, bumped when needed so that every new
/// generation compares strictly greater than the one it replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct Generation(u64);

impl Generation {
    /// The first stamp strictly after `previous`.
    pub fn after(previous: Generation) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Generation(now.max(previous.0.saturating_add(1)))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of the channel behind a stream.
///
/// `Erroring` is held for the reconnect delay after a fault, `Reconnecting`
/// while the replacement channel is being opened. `Closed` only follows an
/// explicit teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Erroring,
    Reconnecting,
    Closed,
}

impl ChannelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelState::Idle => "idle",
            ChannelState::Connecting => "connecting",
            ChannelState::Connected => "connected",
            ChannelState::Erroring => "erroring",
            ChannelState::Reconnecting => "reconnecting",
            ChannelState::Closed => "closed",
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What consumers of a stream see.
///
/// `data` is always the last successfully processed value; a fault sets
/// `error` without touching it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamView<S> {
    pub generation: Generation,
    pub state: ChannelState,
    pub data: S,
    pub error: Option<Error>,
}

impl<S: Default> StreamView<S> {
    pub(crate) fn fresh(generation: Generation) -> Self {
        Self {
            generation,
            state: ChannelState::Idle,
            data: S::default(),
            error: None,
        }
    }
}

/// Write access to a stream's view for one generation.
///
/// Every write is checked against the generation's [`Lifeline`] under its
/// lock, so once the generation is torn down nothing it still holds can
/// change what consumers see.
pub struct Publisher<S> {
    view: Arc<watch::Sender<StreamView<S>>>,
    lifeline: Arc<Lifeline>,
}

impl<S> Clone for Publisher<S> {
    fn clone(&self) -> Self {
        Self {
            view: self.view.clone(),
            lifeline: self.lifeline.clone(),
        }
    }
}

impl<S> fmt::Debug for Publisher<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("generation", &self.lifeline.generation())
            .finish()
    }
}

impl<S: Clone> Publisher<S> {
    pub(crate) fn new(view: Arc<watch::Sender<StreamView<S>>>, lifeline: Arc<Lifeline>) -> Self {
        Self { view, lifeline }
    }

    pub fn generation(&self) -> Generation {
        self.lifeline.generation()
    }

    /// Mutate the data in place. Clears any pending error.
    ///
    /// Returns `false` (and does nothing) if the generation is gone.
    pub fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut S),
    {
        self.write(|view| {
            f(&mut view.data);
            view.error = None;
        })
    }

    /// Replace the data entirely. Clears any pending error.
    pub fn replace(&self, data: S) -> bool {
        self.update(move |current| *current = data)
    }

    /// Record a fault next to the last good data.
    pub fn fault(&self, error: Error) -> bool {
        self.write(|view| view.error = Some(error))
    }

    pub fn set_state(&self, state: ChannelState) -> bool {
        self.write(|view| view.state = state)
    }

    /// Move to `state` and record `error` in one update.
    pub fn set_state_with_error(&self, state: ChannelState, error: Error) -> bool {
        self.write(|view| {
            view.state = state;
            view.error = Some(error);
        })
    }

    /// Copy of the data consumers currently see.
    pub fn data(&self) -> S {
        self.view.borrow().data.clone()
    }

    fn write<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut StreamView<S>),
    {
        let generation = self.lifeline.generation();
        self.lifeline
            .while_alive(|| {
                self.view.send_if_modified(|view| {
                    if view.generation != generation {
                        return false;
                    }
                    f(view);
                    true
                })
            })
            .unwrap_or(false)
    }
}

/// A publisher for a live generation, with a receiver to observe it.
#[cfg(test)]
pub(crate) fn test_publisher<S: Clone + Default>() -> (Publisher<S>, watch::Receiver<StreamView<S>>) {
    let generation = Generation::default();
    let (tx, rx) = watch::channel(StreamView::fresh(generation));
    let lifeline = Arc::new(Lifeline::new(generation));
    (Publisher::new(Arc::new(tx), lifeline), rx)
}
