//! Channel lifecycle and reconnection for one stream generation.
//!
//! A [`ReconnectSupervisor`] runs as a single task per (stream, generation).
//! It opens a channel, routes frames into the stream's processor and, on any
//! transport fault, waits a fixed delay and opens a fresh channel. Because
//! everything for a generation happens on that one task there is never more
//! than one channel, one connect attempt or one reconnect timer in flight.
//!
//! ```text
//!   Idle ──▶ Connecting ──ok──▶ Connected ──fault──▶ Erroring
//!               │                                      │ delay
//!               └──fail──▶ Erroring ──delay──▶ Reconnecting ──ok──▶ Connected
//!
//!   any ──teardown──▶ Closed
//! ```
//!
//! A failed open is published as `Erroring` too, and held there for the
//! same reconnect delay as a fault on a live channel.
//!
//! Teardown goes through the generation's [`Lifeline`], which is checked
//! after every suspension point.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::{Channel, CloseHandle, Connector, StreamKind};
use crate::error::Error;
use crate::processor::Processor;
use crate::router::{FrameRouter, Routed};
use crate::state::{ChannelState, Generation, Publisher};
use crate::timer::ScheduledTask;

/// Liveness of one generation.
///
/// Holds the generation's current channel so teardown can close it
/// synchronously, and a stop signal the supervisor task selects on.
#[derive(Debug)]
pub struct Lifeline {
    generation: Generation,
    inner: Mutex<LifelineState>,
    stop: watch::Sender<bool>,
}

#[derive(Debug)]
struct LifelineState {
    alive: bool,
    channel: Option<CloseHandle>,
}

impl Lifeline {
    pub fn new(generation: Generation) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            generation,
            inner: Mutex::new(LifelineState {
                alive: true,
                channel: None,
            }),
            stop,
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn is_alive(&self) -> bool {
        self.inner.lock().alive
    }

    /// Register the generation's live channel.
    ///
    /// Any previously registered channel is closed. If the generation is
    /// already gone the new channel is closed instead and `false` returned.
    pub fn hold(&self, channel: CloseHandle) -> bool {
        let mut inner = self.inner.lock();
        if !inner.alive {
            drop(inner);
            channel.close();
            return false;
        }
        if let Some(previous) = inner.channel.replace(channel) {
            previous.close();
        }
        true
    }

    /// Close and forget the registered channel.
    pub fn release(&self) {
        if let Some(channel) = self.inner.lock().channel.take() {
            channel.close();
        }
    }

    /// End the generation: close its channel and signal its task to stop.
    ///
    /// Returns `true` on the first call only.
    pub fn teardown(&self) -> bool {
        let channel = {
            let mut inner = self.inner.lock();
            if !inner.alive {
                return false;
            }
            inner.alive = false;
            inner.channel.take()
        };
        if let Some(channel) = channel {
            channel.close();
        }
        self.stop.send_replace(true);
        true
    }

    /// Resolves once [`teardown`](Self::teardown) has been called.
    pub async fn stopped(&self) {
        let mut rx = self.stop.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Run `f` only while the generation is alive, holding off teardown
    /// until it returns.
    pub(crate) fn while_alive<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let inner = self.inner.lock();
        if !inner.alive {
            return None;
        }
        let result = f();
        drop(inner);
        Some(result)
    }
}

/// How a connected session ended.
enum Session {
    Stopped,
    Fault(Error),
}

/// Drives one generation of one stream.
pub struct ReconnectSupervisor<P: Processor> {
    kind: StreamKind,
    connector: Arc<dyn Connector>,
    router: FrameRouter,
    processor: P,
    publisher: Publisher<P::State>,
    lifeline: Arc<Lifeline>,
    reconnect_delay: Duration,
    reconnect: ScheduledTask,
    decode_errors: Arc<AtomicU64>,
}

impl<P: Processor> ReconnectSupervisor<P> {
    pub fn new(
        connector: Arc<dyn Connector>,
        processor: P,
        publisher: Publisher<P::State>,
        lifeline: Arc<Lifeline>,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            kind: processor.kind(),
            connector,
            router: FrameRouter::new(),
            processor,
            publisher,
            lifeline,
            reconnect_delay,
            reconnect: ScheduledTask::new(),
            decode_errors: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_router(mut self, router: FrameRouter) -> Self {
        self.router = router;
        self
    }

    /// Count decode faults into a shared counter.
    pub fn with_decode_counter(mut self, counter: Arc<AtomicU64>) -> Self {
        self.decode_errors = counter;
        self
    }

    /// Run on a new task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        let kind = self.kind;
        let generation = self.lifeline.generation();
        let params = self.processor.params();
        let mut first_attempt = true;

        while self.lifeline.is_alive() {
            self.publisher.set_state(if first_attempt {
                ChannelState::Connecting
            } else {
                ChannelState::Reconnecting
            });
            first_attempt = false;

            let opened = tokio::select! {
                biased;
                _ = self.lifeline.stopped() => break,
                opened = self.connector.open(kind, &params) => opened,
            };

            if !self.lifeline.is_alive() {
                if let Ok(channel) = opened {
                    channel.close();
                }
                break;
            }

            let mut channel = match opened {
                Ok(channel) => channel,
                Err(err) => {
                    warn!(stream = %kind, generation = %generation, error = %err, "Connect failed");
                    self.publisher.set_state_with_error(ChannelState::Erroring, err);
                    if !self.wait_to_reconnect().await {
                        break;
                    }
                    continue;
                }
            };

            if !self.lifeline.hold(channel.close_handle()) {
                break;
            }
            self.publisher.set_state(ChannelState::Connected);
            info!(stream = %kind, generation = %generation, "Channel connected");

            let connected = tokio::select! {
                biased;
                _ = self.lifeline.stopped() => break,
                connected = self.processor.on_connected(&self.publisher) => connected,
            };
            if let Err(err) = connected {
                warn!(stream = %kind, generation = %generation, error = %err, "Connect hook failed");
                self.publisher.fault(err);
            }

            match self.session(&mut channel).await {
                Session::Stopped => {
                    channel.close();
                    break;
                }
                Session::Fault(err) => {
                    warn!(stream = %kind, generation = %generation, error = %err, "Channel fault, reconnecting");
                    self.lifeline.release();
                    drop(channel);
                    self.processor.on_disconnected(&self.publisher);
                    self.publisher.set_state_with_error(ChannelState::Erroring, err);
                    if !self.wait_to_reconnect().await {
                        break;
                    }
                }
            }
        }

        self.reconnect.cancel();
        self.processor.on_teardown();
        debug!(stream = %kind, generation = %generation, "Supervisor stopped");
    }

    /// Route frames until the channel faults or the generation ends.
    async fn session(&mut self, channel: &mut Channel) -> Session {
        loop {
            tokio::select! {
                biased;
                _ = self.lifeline.stopped() => return Session::Stopped,
                event = channel.recv() => {
                    if !self.lifeline.is_alive() {
                        return Session::Stopped;
                    }
                    let frame = match event {
                        Some(Ok(frame)) => frame,
                        Some(Err(err)) => return Session::Fault(err),
                        None => return Session::Fault(Error::Transport("channel ended".to_string())),
                    };
                    match self.router.route(frame) {
                        Some(Routed::Payload(text)) => self.handle_payload(&text),
                        Some(Routed::Fault(text)) => return Session::Fault(Error::Transport(text)),
                        None => {}
                    }
                }
                _ = self.processor.due() => {
                    if !self.lifeline.is_alive() {
                        return Session::Stopped;
                    }
                    self.processor.on_due(&self.publisher);
                }
            }
        }
    }

    fn handle_payload(&mut self, text: &str) {
        if let Err(err) = self.processor.on_payload(text, &self.publisher) {
            let count = self.decode_errors.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(stream = %self.kind, error = %err, decode_errors = count, "Dropping malformed frame");
            self.publisher.fault(err);
        }
    }

    /// Wait out the reconnect delay. Returns `false` if torn down meanwhile.
    async fn wait_to_reconnect(&mut self) -> bool {
        self.reconnect.schedule(self.reconnect_delay);
        debug!(stream = %self.kind, delay = ?self.reconnect_delay, "Reconnect scheduled");
        tokio::select! {
            biased;
            _ = self.lifeline.stopped() => {
                self.reconnect.cancel();
                false
            }
            _ = self.reconnect.fired() => self.lifeline.is_alive(),
        }
    }
}
