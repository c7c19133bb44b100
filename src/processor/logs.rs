//! Log tailing with backlog seeding and coalesced flushes.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use streamwatch_types::{LogRecord, Severity};
use tracing::{debug, trace};

use super::passthrough::decode;
use super::Processor;
use crate::backlog::{BacklogSource, DEFAULT_BACKLOG_TIMEOUT};
use crate::channel::{ChannelParams, StreamKind};
use crate::error::{Error, Result};
use crate::state::Publisher;
use crate::timer::ScheduledTask;

/// The consumer-visible log list, oldest first.
pub type LogList = VecDeque<LogRecord>;

/// Default coalescing window for live lines.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(50);

/// Default retention cap.
pub const DEFAULT_MAX_LINES: usize = 1000;

const TIME_FORMAT: &str = "%m-%d %H:%M:%S";

/// Seeds the log list from a backlog on connect, then tails live lines.
///
/// The backlog is queried once per generation, on its first connect, and
/// for at most `backlog_timeout`. Reconnects within the generation keep the
/// lines already shown.
///
/// Live lines are stamped with the local receipt time and buffered. The
/// first line into an empty buffer arms a flush `flush_interval` out; the
/// flush appends the whole buffer in arrival order and drops the oldest
/// entries beyond `max_lines`.
///
/// The severity is sent to the backend as the channel's `level` parameter
/// and also applied locally, to the backlog and to every live line.
#[derive(Debug)]
pub struct LogBufferProcessor {
    severity: Severity,
    backlog: Arc<dyn BacklogSource>,
    flush_interval: Duration,
    max_lines: usize,
    backlog_timeout: Duration,
    seeded: bool,
    buffer: Vec<LogRecord>,
    flush: ScheduledTask,
}

impl LogBufferProcessor {
    pub fn new(severity: Severity, backlog: Arc<dyn BacklogSource>) -> Self {
        Self {
            severity,
            backlog,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_lines: DEFAULT_MAX_LINES,
            backlog_timeout: DEFAULT_BACKLOG_TIMEOUT,
            seeded: false,
            buffer: Vec::new(),
            flush: ScheduledTask::new(),
        }
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_max_lines(mut self, max_lines: usize) -> Self {
        self.max_lines = max_lines;
        self
    }

    pub fn with_backlog_timeout(mut self, timeout: Duration) -> Self {
        self.backlog_timeout = timeout;
        self
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    /// Lines received but not yet flushed.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn flush_into(&mut self, out: &Publisher<LogList>) {
        if self.buffer.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.buffer);
        let max_lines = self.max_lines;
        trace!(lines = batch.len(), "Flushing log buffer");
        out.update(move |list| {
            list.extend(batch);
            while list.len() > max_lines {
                list.pop_front();
            }
        });
    }
}

fn stamp() -> String {
    chrono::Local::now().format(TIME_FORMAT).to_string()
}

#[async_trait]
impl Processor for LogBufferProcessor {
    type State = LogList;

    fn kind(&self) -> StreamKind {
        StreamKind::Logs
    }

    fn params(&self) -> ChannelParams {
        ChannelParams::new().with("level", self.severity.as_param())
    }

    async fn on_connected(&mut self, out: &Publisher<LogList>) -> Result<()> {
        if self.seeded {
            return Ok(());
        }
        self.seeded = true;

        let records = tokio::time::timeout(self.backlog_timeout, self.backlog.fetch_backlog(StreamKind::Logs))
            .await
            .map_err(|_| Error::Backlog(format!("no answer within {:?}", self.backlog_timeout)))??;
        let total = records.len();

        let mut seeded: LogList = records
            .into_iter()
            .filter(|record| self.severity.accepts(record.level))
            .collect();
        while seeded.len() > self.max_lines {
            seeded.pop_front();
        }

        debug!(fetched = total, kept = seeded.len(), severity = %self.severity, "Log backlog seeded");
        out.replace(seeded);
        Ok(())
    }

    fn on_payload(&mut self, text: &str, _out: &Publisher<LogList>) -> Result<()> {
        let mut record: LogRecord = decode(StreamKind::Logs, text)?;
        if !self.severity.accepts(record.level) {
            return Ok(());
        }
        record.time = stamp();
        self.buffer.push(record);
        self.flush.schedule_if_idle(self.flush_interval);
        Ok(())
    }

    async fn due(&mut self) {
        self.flush.fired().await
    }

    fn on_due(&mut self, out: &Publisher<LogList>) {
        self.flush_into(out);
    }

    fn on_disconnected(&mut self, out: &Publisher<LogList>) {
        self.flush.cancel();
        self.flush_into(out);
    }

    fn on_teardown(&mut self) {
        if self.flush.cancel() {
            debug!(dropped = self.buffer.len(), "Flush cancelled on teardown");
        }
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backlog::{NoBacklog, StaticBacklog, StuckBacklog};
    use crate::state::test_publisher;
    use streamwatch_types::LogLevel;
    use tokio::time::Instant;

    fn line(level: &str, payload: &str) -> String {
        format!(r#"{{"type":"{}","payload":"{}"}}"#, level, payload)
    }

    fn levels(list: &LogList) -> Vec<LogLevel> {
        list.iter().map(|r| r.level).collect()
    }

    fn processor(severity: Severity, backlog: Vec<LogRecord>) -> LogBufferProcessor {
        LogBufferProcessor::new(severity, Arc::new(StaticBacklog(backlog)))
    }

    #[test]
    fn level_param_follows_severity() {
        let p = processor(Severity::Warning, vec![]);
        assert_eq!(p.params().get("level"), Some("warning"));
        let p = processor(Severity::All, vec![]);
        assert_eq!(p.params().get("level"), Some("debug"));
    }

    #[tokio::test(start_paused = true)]
    async fn backlog_is_filtered_and_live_below_level_is_dropped() {
        let (out, rx) = test_publisher::<LogList>();
        let mut p = processor(
            Severity::Warning,
            vec![
                LogRecord::new("10:00", LogLevel::Info, "a"),
                LogRecord::new("10:01", LogLevel::Warning, "b"),
                LogRecord::new("10:02", LogLevel::Error, "c"),
            ],
        );

        p.on_connected(&out).await.unwrap();
        assert_eq!(levels(&rx.borrow().data), vec![LogLevel::Warning, LogLevel::Error]);

        p.on_payload(&line("info", "chatter"), &out).unwrap();
        assert_eq!(p.pending(), 0);
        assert!(!p.flush.is_pending());
        assert_eq!(levels(&rx.borrow().data), vec![LogLevel::Warning, LogLevel::Error]);
    }

    #[tokio::test(start_paused = true)]
    async fn live_lines_coalesce_into_one_flush() {
        let (out, rx) = test_publisher::<LogList>();
        let mut p = LogBufferProcessor::new(Severity::Info, Arc::new(NoBacklog));
        let start = Instant::now();

        for n in 0..3 {
            p.on_payload(&line("info", &format!("line {}", n)), &out).unwrap();
        }
        assert_eq!(p.pending(), 3);
        assert!(rx.borrow().data.is_empty());

        p.due().await;
        p.on_due(&out);

        assert!(start.elapsed() >= DEFAULT_FLUSH_INTERVAL);
        assert!(start.elapsed() < DEFAULT_FLUSH_INTERVAL * 2);
        let payloads: Vec<_> = rx.borrow().data.iter().map(|r| r.payload.clone()).collect();
        assert_eq!(payloads, vec!["line 0", "line 1", "line 2"]);
        assert!(rx.borrow().data.iter().all(|r| !r.time.is_empty()));
        assert_eq!(p.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn later_lines_do_not_push_the_flush_out() {
        let (out, _rx) = test_publisher::<LogList>();
        let mut p = LogBufferProcessor::new(Severity::Info, Arc::new(NoBacklog));

        p.on_payload(&line("info", "a"), &out).unwrap();
        let deadline = p.flush.deadline().unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        p.on_payload(&line("info", "b"), &out).unwrap();
        assert_eq!(p.flush.deadline(), Some(deadline));
    }

    #[tokio::test(start_paused = true)]
    async fn retention_drops_oldest() {
        let (out, rx) = test_publisher::<LogList>();
        let backlog = (0..4)
            .map(|n| LogRecord::new("", LogLevel::Info, format!("old {}", n)))
            .collect();
        let mut p = processor(Severity::Info, backlog).with_max_lines(5);

        p.on_connected(&out).await.unwrap();
        for n in 0..3 {
            p.on_payload(&line("info", &format!("new {}", n)), &out).unwrap();
        }
        p.due().await;
        p.on_due(&out);

        let payloads: Vec<_> = rx.borrow().data.iter().map(|r| r.payload.clone()).collect();
        assert_eq!(payloads, vec!["old 2", "old 3", "new 0", "new 1", "new 2"]);
    }

    #[tokio::test]
    async fn oversized_backlog_is_capped() {
        let (out, rx) = test_publisher::<LogList>();
        let backlog = (0..10)
            .map(|n| LogRecord::new("", LogLevel::Error, n.to_string()))
            .collect();
        let mut p = processor(Severity::Info, backlog).with_max_lines(3);

        p.on_connected(&out).await.unwrap();
        let payloads: Vec<_> = rx.borrow().data.iter().map(|r| r.payload.clone()).collect();
        assert_eq!(payloads, vec!["7", "8", "9"]);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_does_not_reseed() {
        let (out, rx) = test_publisher::<LogList>();
        let mut p = processor(Severity::Info, vec![LogRecord::new("", LogLevel::Info, "history")]);

        p.on_connected(&out).await.unwrap();
        p.on_payload(&line("error", "live"), &out).unwrap();
        p.on_disconnected(&out);
        p.on_connected(&out).await.unwrap();

        let payloads: Vec<_> = rx.borrow().data.iter().map(|r| r.payload.clone()).collect();
        assert_eq!(payloads, vec!["history", "live"]);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_backlog_gives_up_after_timeout() {
        let (out, rx) = test_publisher::<LogList>();
        let mut p = LogBufferProcessor::new(Severity::Info, Arc::new(StuckBacklog))
            .with_backlog_timeout(Duration::from_secs(2));
        let start = Instant::now();

        let err = p.on_connected(&out).await.unwrap_err();
        assert!(matches!(err, Error::Backlog(_)));
        assert_eq!(start.elapsed(), Duration::from_secs(2));
        assert!(rx.borrow().data.is_empty());

        // a later connect in the same generation does not wait again
        let start = Instant::now();
        p.on_connected(&out).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn silent_accepts_nothing() {
        let (out, rx) = test_publisher::<LogList>();
        let mut p = processor(Severity::Silent, vec![LogRecord::new("", LogLevel::Error, "boom")]);

        p.on_connected(&out).await.unwrap();
        p.on_payload(&line("error", "boom"), &out).unwrap();
        assert!(rx.borrow().data.is_empty());
        assert_eq!(p.pending(), 0);
    }

    #[test]
    fn disconnect_flushes_and_teardown_discards() {
        let (out, rx) = test_publisher::<LogList>();
        let mut p = LogBufferProcessor::new(Severity::Info, Arc::new(NoBacklog));

        p.buffer.push(LogRecord::new("", LogLevel::Info, "kept"));
        p.on_disconnected(&out);
        assert_eq!(rx.borrow().data.len(), 1);

        p.buffer.push(LogRecord::new("", LogLevel::Info, "dropped"));
        p.on_teardown();
        assert_eq!(p.pending(), 0);
        assert_eq!(rx.borrow().data.len(), 1);
    }

    #[test]
    fn malformed_line_is_decode_error() {
        let (out, _rx) = test_publisher::<LogList>();
        let mut p = LogBufferProcessor::new(Severity::Info, Arc::new(NoBacklog));
        assert!(p.on_payload("{\"payload\":1}", &out).unwrap_err().is_decode());
    }
}
