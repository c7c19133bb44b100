//! WebSocket transport.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream};
use tracing::{debug, warn};
use url::Url;

use super::{Channel, ChannelEvent, ChannelParams, CloseHandle, Connector, Frame, StreamKind};
use crate::config::Settings;
use crate::error::{Error, Result};

type WebSocketStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Default bound of the inbound frame queue per channel.
const DEFAULT_CAPACITY: usize = 256;

/// Opens one WebSocket per stream against the backend's controller API.
///
/// `http://host:port` controllers are reached on `ws://host:port/<stream>`,
/// `https` on `wss`.
///
/// # Example
///
/// ```
/// use streamwatch::channel::{ChannelParams, StreamKind, WebSocketConnector};
///
/// let connector = WebSocketConnector::new("http://127.0.0.1:9090").unwrap();
/// let url = connector.channel_url(StreamKind::Logs, &ChannelParams::new().with("level", "info"));
/// assert_eq!(url.as_str(), "ws://127.0.0.1:9090/logs?level=info");
/// ```
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    base: Url,
    secret: Option<String>,
    capacity: usize,
    description: String,
}

impl WebSocketConnector {
    /// Create a connector for the given controller URL.
    pub fn new(controller: &str) -> Result<Self> {
        let base = websocket_base(controller)?;
        let description = format!("websocket: {}", base);
        Ok(Self {
            base,
            secret: None,
            capacity: DEFAULT_CAPACITY,
            description,
        })
    }

    /// Build a connector from loaded settings.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self::new(&settings.controller)?
            .with_secret(settings.secret.clone())
            .with_capacity(settings.channel_capacity))
    }

    /// Bearer token sent with every channel request.
    pub fn with_secret(mut self, secret: Option<String>) -> Self {
        self.secret = secret.filter(|s| !s.is_empty());
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Full URL of a stream's channel.
    pub fn channel_url(&self, kind: StreamKind, params: &ChannelParams) -> Url {
        let mut url = self.base.clone();
        let path = format!("{}/{}", self.base.path().trim_end_matches('/'), kind.path());
        url.set_path(&path);
        url.set_query(None);
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params.iter());
        }
        url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, kind: StreamKind, params: &ChannelParams) -> Result<Channel> {
        let url = self.channel_url(kind, params);
        let connect_err = |reason: String| Error::Connect {
            stream: kind,
            reason,
        };

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| connect_err(e.to_string()))?;
        if let Some(secret) = &self.secret {
            let value = HeaderValue::from_str(&format!("Bearer {}", secret))
                .map_err(|e| connect_err(format!("invalid secret: {}", e)))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        debug!(stream = %kind, url = %url, "Opening websocket");
        let (ws, _response) = connect_async(request)
            .await
            .map_err(|e| connect_err(e.to_string()))?;

        let (tx, rx) = mpsc::channel(self.capacity);
        let closer = CloseHandle::new();
        tokio::spawn(pump(ws, tx, closer.clone(), kind));

        Ok(Channel::new(kind, rx, closer))
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Forward frames from the socket until it ends or the channel is closed.
async fn pump(
    ws: WebSocketStream,
    tx: mpsc::Sender<ChannelEvent>,
    closer: CloseHandle,
    kind: StreamKind,
) {
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            biased;
            _ = closer.closed() => {
                let _ = sink.send(Message::Close(None)).await;
                debug!(stream = %kind, "Websocket closed locally");
                break;
            }
            message = stream.next() => match message {
                Some(Ok(message)) => {
                    let Some(frame) = into_frame(message) else {
                        continue;
                    };
                    if tx.send(Ok(frame)).await.is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!(stream = %kind, error = %e, "Websocket read failed");
                    let _ = tx.send(Err(Error::Transport(e.to_string()))).await;
                    break;
                }
                None => {
                    let _ = tx
                        .send(Err(Error::Transport("connection closed by backend".to_string())))
                        .await;
                    break;
                }
            }
        }
    }
}

fn into_frame(message: Message) -> Option<Frame> {
    match message {
        Message::Text(text) => Some(Frame::Text(text)),
        Message::Binary(data) => Some(Frame::Binary(data)),
        Message::Ping(data) => Some(Frame::Ping(data)),
        Message::Pong(data) => Some(Frame::Pong(data)),
        Message::Close(frame) => Some(Frame::Close(frame.map(|f| f.reason.to_string()))),
        // Raw frames only surface when writing; never on read.
        Message::Frame(_) => None,
    }
}

fn websocket_base(controller: &str) -> Result<Url> {
    let mut url = Url::parse(controller.trim())
        .map_err(|e| Error::Config(format!("invalid controller '{}': {}", controller, e)))?;

    if url.host_str().is_none() {
        return Err(Error::Config(format!("controller '{}' has no host", controller)));
    }

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(Error::Config(format!(
                "unsupported controller scheme '{}'; expected http(s) or ws(s)",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| Error::Config("failed to set websocket scheme".to_string()))?;
    url.set_fragment(None);
    url.set_query(None);

    Ok(url)
}
