//! Stream processors.
//!
//! A processor turns the text payloads of one stream into the state its
//! consumers see. One processor instance lives for one generation and is
//! driven by that generation's supervisor, so it needs no locking of its
//! own.
//!
//! - [`PassthroughProcessor`]: decode and replace (traffic, memory)
//! - [`ConnectionDeltaProcessor`]: decode a full snapshot and derive
//!   per-connection rates from the previous one
//! - [`LogBufferProcessor`]: seed from a backlog, then buffer live lines and
//!   flush them in coalesced batches

mod connections;
mod logs;
mod passthrough;

pub use connections::ConnectionDeltaProcessor;
pub use logs::{LogBufferProcessor, LogList};
pub use passthrough::PassthroughProcessor;

use std::fmt::Debug;

use async_trait::async_trait;

use crate::channel::{ChannelParams, StreamKind};
use crate::error::Result;
use crate::state::Publisher;

/// Per-stream payload handling, driven by a
/// [`ReconnectSupervisor`](crate::supervisor::ReconnectSupervisor).
#[async_trait]
pub trait Processor: Send + 'static {
    /// The consumer-visible state. `Default` is the empty value a new
    /// generation (or a `clear`) starts from.
    type State: Clone + Default + Debug + Send + Sync + 'static;

    fn kind(&self) -> StreamKind;

    /// Parameters to open the channel with.
    fn params(&self) -> ChannelParams {
        ChannelParams::new()
    }

    /// Runs after every successful open, before any frame is routed.
    ///
    /// An error here is surfaced to consumers but does not drop the channel.
    async fn on_connected(&mut self, _out: &Publisher<Self::State>) -> Result<()> {
        Ok(())
    }

    /// Handle one text payload. A returned error is a decode fault: the
    /// frame is dropped and the stream carries on.
    fn on_payload(&mut self, text: &str, out: &Publisher<Self::State>) -> Result<()>;

    /// Resolves when scheduled work is due. Never resolves by default.
    async fn due(&mut self) {
        std::future::pending::<()>().await
    }

    /// Run the work [`due`](Self::due) signalled.
    fn on_due(&mut self, _out: &Publisher<Self::State>) {}

    /// The channel broke and a reconnect is about to be scheduled.
    fn on_disconnected(&mut self, _out: &Publisher<Self::State>) {}

    /// The generation is over. Cancel scheduled work and drop buffers.
    fn on_teardown(&mut self) {}
}
