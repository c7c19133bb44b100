use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use streamwatch::duration::parse_duration;
use streamwatch::{ChannelState, Settings, Severity, StreamKind, StreamView, Subscription, SubscriptionRegistry};

#[derive(Parser, Debug)]
#[command(name = "streamwatch")]
#[command(about = "Print live traffic, memory, connection and log streams as JSON lines")]
struct Args {
    /// Config file (TOML, JSON or YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Controller base URL, e.g. http://127.0.0.1:9090
    #[arg(long)]
    controller: Option<String>,

    /// Bearer token for the controller
    #[arg(long)]
    secret: Option<String>,

    /// Minimum log severity (all, debug, info, warning, error, silent)
    #[arg(short, long)]
    level: Option<Severity>,

    /// Delay before reopening a broken channel (e.g. "500ms", "1s")
    #[arg(long, value_parser = parse_duration)]
    reconnect_delay: Option<Duration>,

    /// Coalescing window for live log lines (e.g. "50ms")
    #[arg(long, value_parser = parse_duration)]
    flush_interval: Option<Duration>,

    /// Maximum log lines retained
    #[arg(long)]
    max_log_lines: Option<usize>,

    /// Longest wait for the log backlog (e.g. "5s")
    #[arg(long, value_parser = parse_duration)]
    backlog_timeout: Option<Duration>,

    /// Streams to follow; repeat for several
    #[arg(short, long = "stream", default_value = "traffic")]
    streams: Vec<StreamKind>,
}

impl Args {
    fn apply(&self, settings: &mut Settings) {
        if let Some(controller) = &self.controller {
            settings.controller = controller.clone();
        }
        if let Some(secret) = &self.secret {
            settings.secret = Some(secret.clone());
        }
        if let Some(level) = self.level {
            settings.log_level = level;
        }
        if let Some(delay) = self.reconnect_delay {
            settings.reconnect_delay = delay;
        }
        if let Some(interval) = self.flush_interval {
            settings.flush_interval = interval;
        }
        if let Some(max) = self.max_log_lines {
            settings.max_log_lines = max;
        }
        if let Some(timeout) = self.backlog_timeout {
            settings.backlog_timeout = timeout;
        }
    }
}

/// One published view, as printed.
#[derive(Serialize)]
struct Line<'a, S> {
    stream: StreamKind,
    generation: u64,
    state: ChannelState,
    error: Option<String>,
    data: &'a S,
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // stdout carries the data stream
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(env_filter),
        )
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();

    let mut settings = Settings::load(args.config.as_deref()).context("Failed to load settings")?;
    args.apply(&mut settings);
    settings.validate()?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(settings, args.streams))
}

async fn run(settings: Settings, mut streams: Vec<StreamKind>) -> Result<()> {
    streams.sort();
    streams.dedup();

    let registry = SubscriptionRegistry::from_settings(&settings)?;
    info!(transport = registry.transport(), streams = ?streams, "Subscribing");

    let (shutdown_tx, shutdown) = watch::channel(false);
    let mut printers = Vec::with_capacity(streams.len());
    for kind in streams {
        let printer = match kind {
            StreamKind::Traffic => print_views(registry.traffic().subscribe(), shutdown.clone()),
            StreamKind::Memory => print_views(registry.memory().subscribe(), shutdown.clone()),
            StreamKind::Connections => print_views(registry.connections().subscribe(), shutdown.clone()),
            StreamKind::Logs => print_views(registry.logs().subscribe(), shutdown.clone()),
        };
        printers.push(printer);
    }

    tokio::signal::ctrl_c().await?;
    info!("Interrupted, closing streams");
    shutdown_tx.send_replace(true);

    for printer in printers {
        if let Err(e) = printer.await {
            warn!(error = %e, "Printer task failed");
        }
    }
    Ok(())
}

/// Print every view of `subscription` until shutdown. Dropping the
/// subscription on return closes the stream.
fn print_views<S>(mut subscription: Subscription<S>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()>
where
    S: Serialize + Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let kind = subscription.kind();
        let mut view = subscription.current();
        loop {
            if let Err(e) = print_line(kind, &view) {
                warn!(stream = %kind, error = %e, "Failed to write view");
                return;
            }
            tokio::select! {
                biased;
                _ = shutdown.changed() => return,
                next = subscription.changed() => match next {
                    Ok(next) => view = next,
                    Err(_) => return,
                },
            }
        }
    })
}

fn print_line<S: Serialize>(kind: StreamKind, view: &StreamView<S>) -> Result<()> {
    let line = Line {
        stream: kind,
        generation: view.generation.as_u64(),
        state: view.state,
        error: view.error.as_ref().map(ToString::to_string),
        data: &view.data,
    };
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer(&mut stdout, &line)?;
    writeln!(stdout)?;
    Ok(())
}
