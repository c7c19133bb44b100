//! # streamwatch
//!
//! Live push subscriptions to a proxy core's metrics: traffic throughput,
//! memory usage, active connections and log lines.
//!
//! Each stream is fed by a push channel to the backend. The crate keeps that
//! channel alive across transport faults, shares it between every consumer
//! of the stream, and turns raw frames into consumable state that carries
//! the last good value, the latest fault and the channel's lifecycle.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  SubscriptionRegistry                                            │
//! │  ┌─────────────┐   ┌────────────────────┐   ┌─────────────────┐  │
//! │  │  StreamHub  │──▶│ ReconnectSupervisor│──▶│    Connector    │  │
//! │  │ (generation)│   │  (one per gen)     │   │ WebSocket|Memory│  │
//! │  └──────▲──────┘   └─────────┬──────────┘   └────────┬────────┘  │
//! │         │ watch              │ frames                │           │
//! │  ┌──────┴──────┐   ┌─────────▼──────────┐            │           │
//! │  │ Subscription│◀──│ FrameRouter ──▶    │◀───────────┘           │
//! │  │  (consumer) │   │   Processor        │                        │
//! │  └─────────────┘   └────────────────────┘                        │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! - **[`channel`]**: the [`Connector`] trait, channels and frames
//! - **[`router`]**: splits inbound frames into payloads and fault signals
//! - **[`supervisor`]**: connect, route and reconnect for one generation
//! - **[`processor`]**: per-stream decoding, rate derivation and log
//!   buffering
//! - **[`registry`]**: shared subscriptions, refresh, clear and severity
//!
//! ## Usage
//!
//! ```no_run
//! use streamwatch::{Settings, SubscriptionRegistry};
//!
//! # tokio_test::block_on(async {
//! let settings = Settings::load(None)?;
//! let registry = SubscriptionRegistry::from_settings(&settings)?;
//!
//! let mut traffic = registry.traffic().subscribe();
//! while let Ok(view) = traffic.changed().await {
//!     println!("{:?} up={} down={}", view.state, view.data.up, view.data.down);
//! }
//! # Ok::<_, streamwatch::Error>(())
//! # });
//! ```
//!
//! ### Driving streams in process
//!
//! ```
//! use std::sync::Arc;
//! use streamwatch::channel::{MemoryConnector, StreamKind};
//! use streamwatch::{NoBacklog, Settings, SubscriptionRegistry};
//!
//! # tokio_test::block_on(async {
//! let connector = MemoryConnector::new();
//! let registry = SubscriptionRegistry::new(
//!     &Settings::default(),
//!     Arc::new(connector.clone()),
//!     Arc::new(NoBacklog),
//! );
//!
//! let mut memory = registry.memory().subscribe();
//! let view = memory.wait_for(|v| v.state.as_str() == "connected").await.unwrap();
//! assert_eq!(view.data.inuse, 0);
//!
//! let link = connector.latest(StreamKind::Memory).unwrap();
//! link.send_text(r#"{"inuse":4096}"#).await;
//! let view = memory.wait_for(|v| v.data.inuse != 0).await.unwrap();
//! assert_eq!(view.data.inuse, 4096);
//! # });
//! ```

pub mod backlog;
pub mod channel;
pub mod config;
pub mod duration;
pub mod error;
pub mod processor;
pub mod registry;
pub mod router;
pub mod state;
pub mod supervisor;
pub mod timer;

// Re-export main types for convenience
pub use backlog::{BacklogSource, HttpBacklog, NoBacklog, StaticBacklog};
pub use channel::{Connector, StreamKind, WebSocketConnector};
pub use config::Settings;
pub use error::{Error, Result};
pub use processor::{ConnectionDeltaProcessor, LogBufferProcessor, LogList, PassthroughProcessor, Processor};
pub use registry::{StreamHub, Subscription, SubscriptionRegistry};
pub use state::{ChannelState, Generation, StreamView};
pub use streamwatch_types as types;
pub use streamwatch_types::{
    ConnectionMetadata, ConnectionRecord, ConnectionsSnapshot, LogLevel, LogRecord, MemorySample,
    Severity, TrafficSample,
};
