//! Per-connection rate derivation.

use std::collections::HashMap;

use async_trait::async_trait;
use streamwatch_types::ConnectionsSnapshot;
use tracing::debug;

use super::passthrough::decode;
use super::Processor;
use crate::channel::StreamKind;
use crate::error::Result;
use crate::state::Publisher;

/// Cumulative counters seen for one connection in the previous snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Counters {
    upload: u64,
    download: u64,
}

/// Annotates each connection snapshot with per-connection rates.
///
/// Connections are correlated with the previous snapshot by id. A matched
/// connection gets `cur_upload = upload - previous.upload` (likewise for
/// download); a connection seen for the first time gets zero. A counter
/// that went backwards (the backend restarted) yields zero and becomes the
/// new baseline.
#[derive(Debug, Default)]
pub struct ConnectionDeltaProcessor {
    previous: HashMap<String, Counters>,
}

impl ConnectionDeltaProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill in `cur_upload`/`cur_download` and remember the counters for the
    /// next snapshot. Order and totals are kept as received.
    pub fn annotate(&mut self, mut snapshot: ConnectionsSnapshot) -> ConnectionsSnapshot {
        let mut current = HashMap::with_capacity(snapshot.connections.len());

        for connection in &mut snapshot.connections {
            let (cur_upload, cur_download) = match self.previous.get(&connection.id) {
                Some(previous) => {
                    if connection.upload < previous.upload || connection.download < previous.download {
                        debug!(id = %connection.id, "Connection counters went backwards, resetting baseline");
                    }
                    (
                        connection.upload.saturating_sub(previous.upload),
                        connection.download.saturating_sub(previous.download),
                    )
                }
                None => (0, 0),
            };
            connection.cur_upload = cur_upload;
            connection.cur_download = cur_download;

            current.insert(
                connection.id.clone(),
                Counters {
                    upload: connection.upload,
                    download: connection.download,
                },
            );
        }

        self.previous = current;
        snapshot
    }

    /// Number of connections remembered from the last snapshot.
    pub fn tracked(&self) -> usize {
        self.previous.len()
    }
}

#[async_trait]
impl Processor for ConnectionDeltaProcessor {
    type State = ConnectionsSnapshot;

    fn kind(&self) -> StreamKind {
        StreamKind::Connections
    }

    fn on_payload(&mut self, text: &str, out: &Publisher<ConnectionsSnapshot>) -> Result<()> {
        let snapshot: ConnectionsSnapshot = decode(StreamKind::Connections, text)?;
        out.replace(self.annotate(snapshot));
        Ok(())
    }
}
