//! Shared subscriptions, keyed by generation.
//!
//! Each stream has one [`StreamHub`]. The hub owns the stream's current
//! generation: the consumer count, the generation's [`Lifeline`] and the
//! watch channel consumers read from. All consumers of a generation share
//! its single supervisor task and therefore its single channel.
//!
//! ```text
//!   subscribe ─┐                     ┌─▶ Subscription ─▶ consumer
//!   subscribe ─┼─▶ StreamHub ─watch──┼─▶ Subscription ─▶ consumer
//!   refresh   ─┘      │              └─▶ ...
//!                     ▼
//!           ReconnectSupervisor (one per generation)
//! ```
//!
//! The hub state is only touched under the hub's lock, and tearing down a
//! generation is synchronous: when `refresh`, or the last `unsubscribe`,
//! returns, the old channel is closed and the old generation can no longer
//! change what consumers see.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use streamwatch_types::{MemorySample, Severity, TrafficSample};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::backlog::{BacklogSource, HttpBacklog, NoBacklog};
use crate::channel::{Connector, StreamKind, WebSocketConnector};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::processor::{ConnectionDeltaProcessor, LogBufferProcessor, PassthroughProcessor, Processor};
use crate::router::FrameRouter;
use crate::state::{ChannelState, Generation, Publisher, StreamView};
use crate::supervisor::{Lifeline, ReconnectSupervisor};

/// Builds a fresh processor for each generation.
type Factory<P> = Box<dyn Fn() -> P + Send + Sync>;

struct Slot {
    generation: Generation,
    consumers: usize,
    lifeline: Option<Arc<Lifeline>>,
}

struct HubInner<P: Processor> {
    kind: StreamKind,
    connector: Arc<dyn Connector>,
    factory: Factory<P>,
    router: FrameRouter,
    reconnect_delay: Duration,
    view: Arc<watch::Sender<StreamView<P::State>>>,
    slot: Mutex<Slot>,
    decode_errors: Arc<AtomicU64>,
}

impl<P: Processor> HubInner<P> {
    /// Tear down the current generation, if any, and start the next one.
    fn start(&self, slot: &mut Slot) -> Generation {
        if let Some(previous) = slot.lifeline.take() {
            previous.teardown();
        }

        let generation = Generation::after(slot.generation);
        slot.generation = generation;
        self.view.send_replace(StreamView::fresh(generation));

        let lifeline = Arc::new(Lifeline::new(generation));
        let publisher = Publisher::new(self.view.clone(), lifeline.clone());
        ReconnectSupervisor::new(
            self.connector.clone(),
            (self.factory)(),
            publisher,
            lifeline.clone(),
            self.reconnect_delay,
        )
        .with_router(self.router.clone())
        .with_decode_counter(self.decode_errors.clone())
        .spawn();

        slot.lifeline = Some(lifeline);
        debug!(stream = %self.kind, generation = %generation, "Generation started");
        generation
    }
}

/// Releases one consumer's hold on a hub.
trait Detach: Send + Sync {
    fn detach(&self);
}

impl<P: Processor> Detach for HubInner<P> {
    fn detach(&self) {
        let mut slot = self.slot.lock();
        slot.consumers = slot.consumers.saturating_sub(1);
        if slot.consumers > 0 {
            return;
        }
        if let Some(lifeline) = slot.lifeline.take() {
            lifeline.teardown();
            self.view.send_modify(|view| view.state = ChannelState::Closed);
            info!(stream = %self.kind, generation = %slot.generation, "Last consumer left, stream closed");
        }
    }
}

/// The shared subscription point for one stream.
///
/// Cloning yields another handle to the same hub.
pub struct StreamHub<P: Processor> {
    inner: Arc<HubInner<P>>,
}

impl<P: Processor> Clone for StreamHub<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: Processor> fmt::Debug for StreamHub<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.inner.slot.lock();
        f.debug_struct("StreamHub")
            .field("kind", &self.inner.kind)
            .field("generation", &slot.generation)
            .field("consumers", &slot.consumers)
            .finish()
    }
}

impl<P: Processor> StreamHub<P> {
    pub fn new<F>(
        kind: StreamKind,
        connector: Arc<dyn Connector>,
        router: FrameRouter,
        reconnect_delay: Duration,
        factory: F,
    ) -> Self
    where
        F: Fn() -> P + Send + Sync + 'static,
    {
        let (view, _) = watch::channel(StreamView::default());
        Self {
            inner: Arc::new(HubInner {
                kind,
                connector,
                factory: Box::new(factory),
                router,
                reconnect_delay,
                view: Arc::new(view),
                slot: Mutex::new(Slot {
                    generation: Generation::default(),
                    consumers: 0,
                    lifeline: None,
                }),
                decode_errors: Arc::new(AtomicU64::new(0)),
            }),
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.inner.kind
    }

    /// Join the stream, starting a generation if nobody is subscribed.
    ///
    /// # Panics
    ///
    /// Starting a generation spawns its supervisor, so this must be called
    /// from within a Tokio runtime.
    pub fn subscribe(&self) -> Subscription<P::State> {
        let mut slot = self.inner.slot.lock();
        slot.consumers += 1;
        if slot.lifeline.is_none() {
            self.inner.start(&mut slot);
        }
        let view = self.inner.view.subscribe();
        drop(slot);

        let hub: Arc<dyn Detach> = self.inner.clone();
        Subscription {
            kind: self.inner.kind,
            view,
            hub: Some(hub),
        }
    }

    /// Start a new generation, closing the current channel.
    ///
    /// Returns the new generation, or `None` when nobody is subscribed.
    pub fn refresh(&self) -> Option<Generation> {
        let mut slot = self.inner.slot.lock();
        if slot.consumers == 0 {
            return None;
        }
        let generation = self.inner.start(&mut slot);
        info!(stream = %self.inner.kind, generation = %generation, "Stream refreshed");
        Some(generation)
    }

    /// Reset the visible data to empty. The channel stays up.
    pub fn clear(&self) {
        self.inner.view.send_modify(|view| {
            view.data = Default::default();
            view.error = None;
        });
        debug!(stream = %self.inner.kind, "Stream cleared");
    }

    /// The view consumers currently see.
    pub fn current(&self) -> StreamView<P::State> {
        self.inner.view.borrow().clone()
    }

    pub fn generation(&self) -> Generation {
        self.inner.slot.lock().generation
    }

    pub fn consumers(&self) -> usize {
        self.inner.slot.lock().consumers
    }

    pub fn is_active(&self) -> bool {
        self.inner.slot.lock().lifeline.is_some()
    }

    /// Malformed payloads dropped on this stream so far.
    pub fn decode_errors(&self) -> u64 {
        self.inner.decode_errors.load(Ordering::Relaxed)
    }
}

/// One consumer's handle on a stream.
///
/// Dropping it unsubscribes.
pub struct Subscription<S> {
    kind: StreamKind,
    view: watch::Receiver<StreamView<S>>,
    hub: Option<Arc<dyn Detach>>,
}

impl<S> fmt::Debug for Subscription<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind)
            .field("attached", &self.hub.is_some())
            .finish()
    }
}

impl<S: Clone> Subscription<S> {
    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn current(&self) -> StreamView<S> {
        self.view.borrow().clone()
    }

    /// The last good value.
    pub fn data(&self) -> S {
        self.view.borrow().data.clone()
    }

    /// The most recent fault, cleared by the next good value.
    pub fn error(&self) -> Option<Error> {
        self.view.borrow().error.clone()
    }

    pub fn state(&self) -> ChannelState {
        self.view.borrow().state
    }

    /// Wait for the next published view.
    pub async fn changed(&mut self) -> Result<StreamView<S>> {
        self.view.changed().await.map_err(|_| Error::Closed)?;
        Ok(self.view.borrow_and_update().clone())
    }

    /// Wait until the view satisfies `condition`, checking the current one
    /// first.
    pub async fn wait_for<F>(&mut self, condition: F) -> Result<StreamView<S>>
    where
        F: FnMut(&StreamView<S>) -> bool,
    {
        let view = self.view.wait_for(condition).await.map_err(|_| Error::Closed)?;
        Ok(view.clone())
    }

    /// Leave the stream. The last consumer out closes its channel.
    pub fn unsubscribe(self) {}
}

impl<S> Drop for Subscription<S> {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.take() {
            hub.detach();
        }
    }
}

/// The four streams behind one control surface.
#[derive(Debug)]
pub struct SubscriptionRegistry {
    traffic: StreamHub<PassthroughProcessor<TrafficSample>>,
    memory: StreamHub<PassthroughProcessor<MemorySample>>,
    connections: StreamHub<ConnectionDeltaProcessor>,
    logs: StreamHub<LogBufferProcessor>,
    severity: Arc<RwLock<Severity>>,
    transport: String,
}

impl SubscriptionRegistry {
    pub fn new(settings: &Settings, connector: Arc<dyn Connector>, backlog: Arc<dyn BacklogSource>) -> Self {
        let delay = settings.reconnect_delay;
        let router = FrameRouter::with_marker(settings.transport_error_marker.clone());
        let severity = Arc::new(RwLock::new(settings.log_level));
        let transport = connector.description().to_string();

        let logs = {
            let severity = severity.clone();
            let flush_interval = settings.flush_interval;
            let max_lines = settings.max_log_lines;
            let backlog_timeout = settings.backlog_timeout;
            StreamHub::new(StreamKind::Logs, connector.clone(), router.clone(), delay, move || {
                LogBufferProcessor::new(*severity.read(), backlog.clone())
                    .with_flush_interval(flush_interval)
                    .with_max_lines(max_lines)
                    .with_backlog_timeout(backlog_timeout)
            })
        };

        debug!(transport = %transport, "Registry configured");
        Self {
            traffic: StreamHub::new(StreamKind::Traffic, connector.clone(), router.clone(), delay, || {
                PassthroughProcessor::new(StreamKind::Traffic)
            }),
            memory: StreamHub::new(StreamKind::Memory, connector.clone(), router.clone(), delay, || {
                PassthroughProcessor::new(StreamKind::Memory)
            }),
            connections: StreamHub::new(
                StreamKind::Connections,
                connector,
                router,
                delay,
                ConnectionDeltaProcessor::new,
            ),
            logs,
            severity,
            transport,
        }
    }

    /// A registry talking to the controller named in `settings`.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let connector = Arc::new(WebSocketConnector::from_settings(settings)?);
        let backlog: Arc<dyn BacklogSource> = match &settings.backlog_url {
            Some(url) => Arc::new(HttpBacklog::new(url, settings.backlog_timeout)?.with_secret(settings.secret.clone())),
            None => Arc::new(NoBacklog),
        };
        Ok(Self::new(settings, connector, backlog))
    }

    /// Where this registry's channels go, as described by its connector.
    pub fn transport(&self) -> &str {
        &self.transport
    }

    pub fn traffic(&self) -> &StreamHub<PassthroughProcessor<TrafficSample>> {
        &self.traffic
    }

    pub fn memory(&self) -> &StreamHub<PassthroughProcessor<MemorySample>> {
        &self.memory
    }

    pub fn connections(&self) -> &StreamHub<ConnectionDeltaProcessor> {
        &self.connections
    }

    pub fn logs(&self) -> &StreamHub<LogBufferProcessor> {
        &self.logs
    }

    pub fn refresh(&self, kind: StreamKind) -> Option<Generation> {
        match kind {
            StreamKind::Traffic => self.traffic.refresh(),
            StreamKind::Memory => self.memory.refresh(),
            StreamKind::Connections => self.connections.refresh(),
            StreamKind::Logs => self.logs.refresh(),
        }
    }

    pub fn clear(&self, kind: StreamKind) {
        match kind {
            StreamKind::Traffic => self.traffic.clear(),
            StreamKind::Memory => self.memory.clear(),
            StreamKind::Connections => self.connections.clear(),
            StreamKind::Logs => self.logs.clear(),
        }
    }

    pub fn generation(&self, kind: StreamKind) -> Generation {
        match kind {
            StreamKind::Traffic => self.traffic.generation(),
            StreamKind::Memory => self.memory.generation(),
            StreamKind::Connections => self.connections.generation(),
            StreamKind::Logs => self.logs.generation(),
        }
    }

    /// Change the minimum log severity.
    ///
    /// The backend filters by level when the channel is opened, so this
    /// starts a new log generation rather than filtering what is cached.
    pub fn set_severity(&self, severity: Severity) {
        let previous = std::mem::replace(&mut *self.severity.write(), severity);
        if previous != severity {
            info!(from = %previous, to = %severity, "Log severity changed");
        }
        self.logs.refresh();
    }

    pub fn severity(&self) -> Severity {
        *self.severity.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backlog::{FailingBacklog, StaticBacklog, StuckBacklog};
    use crate::channel::MemoryConnector;
    use crate::processor::LogList;
    use streamwatch_types::{LogLevel, LogRecord};
    use tokio::time::Instant;

    const DELAY: Duration = Duration::from_millis(500);

    fn traffic_hub(connector: &MemoryConnector) -> StreamHub<PassthroughProcessor<TrafficSample>> {
        StreamHub::new(StreamKind::Traffic, Arc::new(connector.clone()), FrameRouter::new(), DELAY, || {
            PassthroughProcessor::new(StreamKind::Traffic)
        })
    }

    fn registry(connector: &MemoryConnector, settings: Settings, backlog: Vec<LogRecord>) -> SubscriptionRegistry {
        SubscriptionRegistry::new(&settings, Arc::new(connector.clone()), Arc::new(StaticBacklog(backlog)))
    }

    fn payloads(list: &LogList) -> Vec<&str> {
        list.iter().map(|r| r.payload.as_str()).collect()
    }

    async fn until(mut condition: impl FnMut() -> bool) {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    fn levels(list: &LogList) -> Vec<LogLevel> {
        list.iter().map(|r| r.level).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_share_one_channel() {
        let connector = MemoryConnector::new();
        let hub = traffic_hub(&connector);

        let mut first = hub.subscribe();
        let mut second = hub.subscribe();
        until(|| connector.live(StreamKind::Traffic) == 1).await;
        assert_eq!(connector.attempts(StreamKind::Traffic), 1);
        assert_eq!(hub.consumers(), 2);

        let link = connector.latest(StreamKind::Traffic).unwrap();
        link.send_text(r#"{"up":7,"down":8}"#).await;

        let a = first.wait_for(|v| v.data.up == 7).await.unwrap();
        let b = second.wait_for(|v| v.data.up == 7).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.generation, hub.generation());
    }

    #[tokio::test(start_paused = true)]
    async fn last_unsubscribe_closes_the_channel() {
        let connector = MemoryConnector::new();
        let hub = traffic_hub(&connector);

        let first = hub.subscribe();
        let second = hub.subscribe();
        until(|| connector.live(StreamKind::Traffic) == 1).await;
        let link = connector.latest(StreamKind::Traffic).unwrap();
        link.send_text(r#"{"up":1,"down":1}"#).await;
        until(|| hub.current().data.up == 1).await;

        drop(first);
        assert!(!link.is_closed());

        second.unsubscribe();
        assert!(link.is_closed());
        assert_eq!(hub.consumers(), 0);
        assert!(!hub.is_active());
        assert_eq!(hub.current().state, ChannelState::Closed);

        let old = hub.generation();
        let again = hub.subscribe();
        assert!(hub.generation() > old);
        assert_eq!(again.data(), TrafficSample::default());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_replaces_the_channel() {
        let connector = MemoryConnector::new();
        let hub = traffic_hub(&connector);
        let mut sub = hub.subscribe();
        until(|| connector.live(StreamKind::Traffic) == 1).await;

        let old_link = connector.latest(StreamKind::Traffic).unwrap();
        let old_generation = hub.generation();

        let new_generation = hub.refresh().unwrap();
        assert!(new_generation > old_generation);
        assert!(old_link.is_closed());

        old_link.send_text(r#"{"up":666,"down":0}"#).await;
        until(|| connector.attempts(StreamKind::Traffic) == 2 && connector.live(StreamKind::Traffic) == 1).await;

        let new_link = connector.latest(StreamKind::Traffic).unwrap();
        new_link.send_text(r#"{"up":2,"down":3}"#).await;
        let view = sub.wait_for(|v| v.data.up != 0).await.unwrap();
        assert_eq!(view.data, TrafficSample::new(2, 3));
        assert_eq!(view.generation, new_generation);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_during_open_leaves_one_channel() {
        let connector = MemoryConnector::new().with_open_delay(Duration::from_millis(100));
        let hub = traffic_hub(&connector);
        let _sub = hub.subscribe();
        until(|| connector.attempts(StreamKind::Traffic) == 1).await;

        hub.refresh();
        hub.refresh();
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(connector.live(StreamKind::Traffic), 1);
        assert!(connector.attempts(StreamKind::Traffic) <= 3);
        let view = hub.current();
        assert_eq!(view.generation, hub.generation());
        assert_eq!(view.state, ChannelState::Connected);
    }

    #[tokio::test]
    async fn refresh_without_consumers_does_nothing() {
        let connector = MemoryConnector::new();
        let hub = traffic_hub(&connector);
        assert_eq!(hub.refresh(), None);
        assert_eq!(connector.attempts(StreamKind::Traffic), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_keeps_the_channel() {
        let connector = MemoryConnector::new();
        let hub = traffic_hub(&connector);
        let mut sub = hub.subscribe();
        until(|| connector.live(StreamKind::Traffic) == 1).await;
        let link = connector.latest(StreamKind::Traffic).unwrap();

        link.send_text(r#"{"up":5,"down":5}"#).await;
        sub.wait_for(|v| v.data.up == 5).await.unwrap();

        hub.clear();
        assert_eq!(sub.data(), TrafficSample::default());
        assert!(!link.is_closed());

        link.send_text(r#"{"up":6,"down":6}"#).await;
        sub.wait_for(|v| v.data.up == 6).await.unwrap();
        assert_eq!(connector.attempts(StreamKind::Traffic), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn decode_errors_are_counted_per_hub() {
        let connector = MemoryConnector::new();
        let hub = traffic_hub(&connector);
        let mut sub = hub.subscribe();
        until(|| connector.live(StreamKind::Traffic) == 1).await;

        connector.latest(StreamKind::Traffic).unwrap().send_text("[]").await;
        let view = sub.wait_for(|v| v.error.is_some()).await.unwrap();
        assert!(view.error.unwrap().is_decode());
        assert_eq!(hub.decode_errors(), 1);
        assert_eq!(sub.state(), ChannelState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn changed_sees_state_transitions() {
        let connector = MemoryConnector::new().with_open_delay(Duration::from_millis(10));
        let hub = traffic_hub(&connector);
        let mut sub = hub.subscribe();

        let view = sub.wait_for(|v| v.state == ChannelState::Connected).await.unwrap();
        assert!(view.error.is_none());

        connector.latest(StreamKind::Traffic).unwrap().fail("gone").await;
        let mut seen = Vec::new();
        while seen.last() != Some(&ChannelState::Connected) {
            seen.push(sub.changed().await.unwrap().state);
        }
        assert_eq!(
            seen,
            vec![ChannelState::Erroring, ChannelState::Reconnecting, ChannelState::Connected]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn set_severity_reopens_logs_with_new_level() {
        let connector = MemoryConnector::new();
        let registry = registry(&connector, Settings::default(), vec![]);
        let _logs = registry.logs().subscribe();
        until(|| connector.live(StreamKind::Logs) == 1).await;
        assert_eq!(
            connector.latest(StreamKind::Logs).unwrap().params().get("level"),
            Some("info")
        );

        registry.set_severity(Severity::Error);
        assert_eq!(registry.severity(), Severity::Error);
        until(|| connector.attempts(StreamKind::Logs) == 2 && connector.live(StreamKind::Logs) == 1).await;
        assert_eq!(
            connector.latest(StreamKind::Logs).unwrap().params().get("level"),
            Some("error")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn logs_backlog_then_live_tail() {
        let connector = MemoryConnector::new();
        let settings = Settings {
            log_level: Severity::Warning,
            ..Settings::default()
        };
        let registry = registry(
            &connector,
            settings,
            vec![
                LogRecord::new("", LogLevel::Info, "started"),
                LogRecord::new("", LogLevel::Warning, "slow upstream"),
                LogRecord::new("", LogLevel::Error, "dial failed"),
            ],
        );

        let mut logs = registry.logs().subscribe();
        let view = logs.wait_for(|v| !v.data.is_empty()).await.unwrap();
        assert_eq!(levels(&view.data), vec![LogLevel::Warning, LogLevel::Error]);

        let link = connector.latest(StreamKind::Logs).unwrap();
        link.send_text(r#"{"type":"info","payload":"chatter"}"#).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(levels(&logs.data()), vec![LogLevel::Warning, LogLevel::Error]);

        link.send_text(r#"{"type":"error","payload":"rule miss"}"#).await;
        let view = logs.wait_for(|v| v.data.len() == 3).await.unwrap();
        assert_eq!(view.data.back().unwrap().payload, "rule miss");

        registry.clear(StreamKind::Logs);
        assert!(logs.data().is_empty());
        assert_eq!(connector.live(StreamKind::Logs), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn streams_are_independent() {
        let connector = MemoryConnector::new();
        let registry = registry(&connector, Settings::default(), vec![]);
        let _traffic = registry.traffic().subscribe();
        let _memory = registry.memory().subscribe();
        until(|| connector.live(StreamKind::Traffic) == 1 && connector.live(StreamKind::Memory) == 1).await;

        let memory_generation = registry.generation(StreamKind::Memory);
        registry.refresh(StreamKind::Traffic);
        assert_eq!(registry.generation(StreamKind::Memory), memory_generation);
        assert_eq!(connector.live(StreamKind::Memory), 1);
        assert_eq!(registry.refresh(StreamKind::Connections), None);
    }

    #[tokio::test(start_paused = true)]
    async fn logs_survive_a_reconnect() {
        let connector = MemoryConnector::new();
        let registry = SubscriptionRegistry::new(&Settings::default(), Arc::new(connector.clone()), Arc::new(NoBacklog));
        let mut logs = registry.logs().subscribe();
        until(|| connector.live(StreamKind::Logs) == 1).await;

        let first = connector.latest(StreamKind::Logs).unwrap();
        first.send_text(r#"{"type":"error","payload":"dial failed"}"#).await;
        logs.wait_for(|v| v.data.len() == 1).await.unwrap();

        first.fail("reset").await;
        until(|| connector.attempts(StreamKind::Logs) == 2 && connector.live(StreamKind::Logs) == 1).await;

        let second = connector.latest(StreamKind::Logs).unwrap();
        second.send_text(r#"{"type":"error","payload":"dial failed again"}"#).await;
        let view = logs.wait_for(|v| v.data.len() == 2).await.unwrap();
        assert_eq!(payloads(&view.data), vec!["dial failed", "dial failed again"]);
        assert_eq!(view.state, ChannelState::Connected);
        assert_eq!(view.generation, registry.generation(StreamKind::Logs));
    }

    #[tokio::test(start_paused = true)]
    async fn backlog_failure_is_shown_while_tailing_continues() {
        let connector = MemoryConnector::new();
        let registry =
            SubscriptionRegistry::new(&Settings::default(), Arc::new(connector.clone()), Arc::new(FailingBacklog));
        let mut logs = registry.logs().subscribe();

        let view = logs.wait_for(|v| v.error.is_some()).await.unwrap();
        assert!(matches!(view.error, Some(Error::Backlog(_))));
        assert_eq!(view.state, ChannelState::Connected);
        assert!(view.data.is_empty());

        let link = connector.latest(StreamKind::Logs).unwrap();
        link.send_text(r#"{"type":"warning","payload":"still tailing"}"#).await;
        let view = logs.wait_for(|v| !v.data.is_empty()).await.unwrap();
        assert_eq!(payloads(&view.data), vec!["still tailing"]);
        assert!(view.error.is_none());
        assert_eq!(connector.attempts(StreamKind::Logs), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_backlog_does_not_stall_the_tail() {
        let connector = MemoryConnector::new();
        let settings = Settings {
            backlog_timeout: Duration::from_secs(1),
            ..Settings::default()
        };
        let registry = SubscriptionRegistry::new(&settings, Arc::new(connector.clone()), Arc::new(StuckBacklog));
        let start = Instant::now();
        let mut logs = registry.logs().subscribe();
        until(|| connector.live(StreamKind::Logs) == 1).await;

        let link = connector.latest(StreamKind::Logs).unwrap();
        link.send_text(r#"{"type":"error","payload":"queued"}"#).await;

        let view = logs.wait_for(|v| v.error.is_some()).await.unwrap();
        assert!(matches!(view.error, Some(Error::Backlog(_))));
        assert!(start.elapsed() >= Duration::from_secs(1));

        let view = logs.wait_for(|v| !v.data.is_empty()).await.unwrap();
        assert_eq!(payloads(&view.data), vec!["queued"]);
        assert_eq!(view.state, ChannelState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_marker_comes_from_settings() {
        let connector = MemoryConnector::new();
        let settings = Settings {
            transport_error_marker: "upstream error".to_string(),
            ..Settings::default()
        };
        let registry = registry(&connector, settings, vec![]);
        assert_eq!(registry.transport(), "memory");

        let mut traffic = registry.traffic().subscribe();
        until(|| connector.live(StreamKind::Traffic) == 1).await;
        let link = connector.latest(StreamKind::Traffic).unwrap();

        link.send_text("Websocket error: not special here").await;
        let view = traffic.wait_for(|v| v.error.is_some()).await.unwrap();
        assert!(view.error.unwrap().is_decode());
        assert_eq!(view.state, ChannelState::Connected);

        link.send_text("upstream error: reset by peer").await;
        let view = traffic.wait_for(|v| v.state == ChannelState::Erroring).await.unwrap();
        assert!(view.error.unwrap().is_transport());
        until(|| connector.attempts(StreamKind::Traffic) == 2).await;
        assert!(link.is_closed());
    }
}
