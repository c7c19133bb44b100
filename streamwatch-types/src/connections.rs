//! Connection snapshots.

/// The full set of connections the backend currently tracks.
///
/// Every frame on the connections stream carries a complete snapshot, not a
/// diff. `upload`/`download` on each record are cumulative for the lifetime
/// of that connection; `cur_upload`/`cur_download` are never sent by the
/// backend and are filled in by the subscriber from two consecutive
/// snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase", default))]
pub struct ConnectionsSnapshot {
    /// Bytes uploaded across all connections since the backend started.
    pub upload_total: u64,

    /// Bytes downloaded across all connections since the backend started.
    pub download_total: u64,

    /// Open connections, in the order the backend listed them.
    #[cfg_attr(feature = "serde", serde(deserialize_with = "null_as_empty"))]
    pub connections: Vec<ConnectionRecord>,
}

impl ConnectionsSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for constructing snapshots.
    pub fn builder() -> ConnectionsSnapshotBuilder {
        ConnectionsSnapshotBuilder::new()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Find a connection by id.
    pub fn get(&self, id: &str) -> Option<&ConnectionRecord> {
        self.connections.iter().find(|c| c.id == id)
    }
}

// The backend sends `"connections": null` when nothing is open.
#[cfg(feature = "serde")]
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<ConnectionRecord>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;
    Ok(Option::<Vec<ConnectionRecord>>::deserialize(deserializer)?.unwrap_or_default())
}

/// A single proxied connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase", default))]
pub struct ConnectionRecord {
    /// Backend-assigned identifier, stable for the connection's lifetime.
    pub id: String,

    /// Cumulative bytes uploaded.
    pub upload: u64,

    /// Cumulative bytes downloaded.
    pub download: u64,

    /// Bytes uploaded since the previous snapshot.
    pub cur_upload: u64,

    /// Bytes downloaded since the previous snapshot.
    pub cur_download: u64,

    pub metadata: ConnectionMetadata,

    /// Proxy chain, outermost first.
    pub chains: Vec<String>,

    pub rule: String,

    pub rule_payload: String,

    /// Start time as reported by the backend (RFC 3339).
    pub start: String,
}

impl ConnectionRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

/// Descriptive fields of a connection. Only used for display.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase", default))]
pub struct ConnectionMetadata {
    pub network: String,

    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub kind: String,

    #[cfg_attr(feature = "serde", serde(rename = "sourceIP"))]
    pub source_ip: String,

    #[cfg_attr(feature = "serde", serde(rename = "destinationIP"))]
    pub destination_ip: String,

    pub source_port: String,

    pub destination_port: String,

    pub host: String,

    pub process: String,

    pub process_path: String,
}

/// Builder for [`ConnectionsSnapshot`].
///
/// Totals are the sum of the cumulative counters of the added connections
/// unless set explicitly.
#[derive(Debug, Default)]
pub struct ConnectionsSnapshotBuilder {
    upload_total: Option<u64>,
    download_total: Option<u64>,
    connections: Vec<ConnectionRecord>,
}

impl ConnectionsSnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upload_total(mut self, total: u64) -> Self {
        self.upload_total = Some(total);
        self
    }

    pub fn download_total(mut self, total: u64) -> Self {
        self.download_total = Some(total);
        self
    }

    /// Append a connection, configured by the closure.
    pub fn connection<F>(mut self, id: &str, f: F) -> Self
    where
        F: FnOnce(ConnectionRecordBuilder) -> ConnectionRecordBuilder,
    {
        let record = f(ConnectionRecordBuilder::new(id)).build();
        self.connections.push(record);
        self
    }

    pub fn build(self) -> ConnectionsSnapshot {
        let upload_total = self
            .upload_total
            .unwrap_or_else(|| self.connections.iter().map(|c| c.upload).sum());
        let download_total = self
            .download_total
            .unwrap_or_else(|| self.connections.iter().map(|c| c.download).sum());
        ConnectionsSnapshot {
            upload_total,
            download_total,
            connections: self.connections,
        }
    }
}

/// Builder for a single [`ConnectionRecord`].
#[derive(Debug)]
pub struct ConnectionRecordBuilder {
    record: ConnectionRecord,
}

impl ConnectionRecordBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            record: ConnectionRecord::new(id),
        }
    }

    pub fn upload(mut self, bytes: u64) -> Self {
        self.record.upload = bytes;
        self
    }

    pub fn download(mut self, bytes: u64) -> Self {
        self.record.download = bytes;
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.record.metadata.host = host.into();
        self
    }

    pub fn network(mut self, network: impl Into<String>) -> Self {
        self.record.metadata.network = network.into();
        self
    }

    pub fn chain(mut self, proxy: impl Into<String>) -> Self {
        self.record.chains.push(proxy.into());
        self
    }

    pub fn rule(mut self, rule: impl Into<String>, payload: impl Into<String>) -> Self {
        self.record.rule = rule.into();
        self.record.rule_payload = payload.into();
        self
    }

    pub fn build(self) -> ConnectionRecord {
        self.record
    }
}
