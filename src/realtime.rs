use crate::error::ChannelError;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

/// Entries kept in the diagnostic message log
pub const MESSAGE_LOG_CAPACITY: usize = 10;

const HANDSHAKE: &str = r#"{"action":"ping"}"#;

/// Connection status, shown as a badge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// What the channel task reports back
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    State(ChannelState),
    Message(InboundMessage),
    SendFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundKind {
    ImageComplete { download_url: String },
    /// Valid JSON with no recognized `type`
    Other,
    NotJson,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub raw: String,
    pub connection_id: Option<String>,
    pub kind: InboundKind,
}

impl InboundMessage {
    /// Each field is read on its own, so a mistyped field never hides the others
    pub fn parse(raw: impl Into<String>) -> Self {
        let raw = raw.into();

        let Ok(value) = serde_json::from_str::<Value>(&raw) else {
            return Self {
                raw,
                connection_id: None,
                kind: InboundKind::NotJson,
            };
        };

        let kind = match (str_field(&value, "type"), str_field(&value, "downloadUrl")) {
            (Some("image_complete"), Some(url)) if !url.is_empty() => {
                InboundKind::ImageComplete {
                    download_url: url.to_string(),
                }
            }
            (Some("image_complete"), _) => {
                warn!("image_complete message without downloadUrl");
                InboundKind::Other
            }
            _ => InboundKind::Other,
        };

        let connection_id = str_field(&value, "connectionId")
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        Self {
            raw,
            connection_id,
            kind,
        }
    }
}

fn str_field<'a>(value: &'a Value, name: &str) -> Option<&'a str> {
    value.get(name).and_then(Value::as_str)
}

/// Bounded rolling log, newest first
#[derive(Debug, Default)]
pub struct MessageLog {
    entries: VecDeque<String>,
}

impl MessageLog {
    pub fn push(&mut self, entry: impl Into<String>) {
        self.entries.push_front(entry.into());
        self.entries.truncate(MESSAGE_LOG_CAPACITY);
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Handle to the channel task
pub struct RealtimeChannel {
    outbound: mpsc::Sender<String>,
    state: watch::Receiver<ChannelState>,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl RealtimeChannel {
    /// Validate the URL and start connecting in the background
    pub fn connect(url: &str, events: mpsc::Sender<ChannelEvent>) -> Result<Self, ChannelError> {
        let parsed = Url::parse(url).map_err(|_| ChannelError::InvalidUrl(url.to_string()))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(ChannelError::InvalidUrl(url.to_string()));
        }

        let (outbound_tx, outbound_rx) = mpsc::channel::<String>(32);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let (state_tx, state_rx) = watch::channel(ChannelState::Disconnected);

        tokio::spawn(connection_task(
            parsed,
            outbound_rx,
            shutdown_rx,
            events,
            state_tx,
        ));

        Ok(Self {
            outbound: outbound_tx,
            state: state_rx,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Queue a text frame. Fails unless the socket is open.
    pub fn send(&self, text: impl Into<String>) -> Result<(), ChannelError> {
        if self.state() != ChannelState::Connected {
            return Err(ChannelError::NotConnected);
        }
        self.outbound
            .try_send(text.into())
            .map_err(|e| ChannelError::Send(e.to_string()))
    }

    pub async fn close(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
    }
}

async fn connection_task(
    url: Url,
    mut outbound_rx: mpsc::Receiver<String>,
    mut shutdown_rx: mpsc::Receiver<()>,
    events: mpsc::Sender<ChannelEvent>,
    state: watch::Sender<ChannelState>,
) {
    let report = |next: ChannelState| {
        state.send_replace(next);
        let events = events.clone();
        async move {
            let _ = events.send(ChannelEvent::State(next)).await;
        }
    };

    report(ChannelState::Connecting).await;
    info!("Connecting to realtime channel {}", url);

    let ws_stream = tokio::select! {
        result = connect_async(url.as_str()) => match result {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                error!("Realtime connection failed: {}", e);
                report(ChannelState::Disconnected).await;
                return;
            }
        },
        _ = shutdown_rx.recv() => {
            report(ChannelState::Disconnected).await;
            return;
        }
    };

    info!("Realtime channel connected");
    report(ChannelState::Connected).await;

    let (mut write, mut read) = ws_stream.split();

    if let Err(e) = write.send(Message::text(HANDSHAKE.to_string())).await {
        warn!("Failed to send handshake: {}", e);
        let _ = events.send(ChannelEvent::SendFailed(e.to_string())).await;
    }

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        debug!("Received: {}", text.as_str());
                        let message = InboundMessage::parse(text.as_str());
                        let _ = events.send(ChannelEvent::Message(message)).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        let message = InboundMessage::parse(String::from_utf8_lossy(&data));
                        let _ = events.send(ChannelEvent::Message(message)).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            warn!("Failed to send pong: {}", e);
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!("Server closed realtime channel: {:?}", frame);
                        break;
                    }
                    Some(Err(e)) => {
                        error!("Realtime channel error: {}", e);
                        break;
                    }
                    None => {
                        info!("Realtime stream ended");
                        break;
                    }
                    _ => {}
                }
            }

            outgoing = outbound_rx.recv() => {
                let Some(text) = outgoing else {
                    break;
                };
                debug!("Sending: {}", text);
                if let Err(e) = write.send(Message::text(text)).await {
                    warn!("Failed to send message: {}", e);
                    let _ = events.send(ChannelEvent::SendFailed(e.to_string())).await;
                }
            }

            _ = shutdown_rx.recv() => {
                info!("Closing realtime channel");
                let _ = write.send(Message::Close(None)).await;
                break;
            }
        }
    }

    report(ChannelState::Disconnected).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_is_captured() {
        let message = InboundMessage::parse(r#"{"connectionId":"abc123"}"#);
        assert_eq!(message.connection_id.as_deref(), Some("abc123"));
        assert_eq!(message.kind, InboundKind::Other);
    }

    #[test]
    fn image_complete_carries_download_url() {
        let message = InboundMessage::parse(
            r#"{"type":"image_complete","downloadUrl":"https://cdn.example.com/r.jpg","connectionId":"abc123"}"#,
        );
        assert_eq!(
            message.kind,
            InboundKind::ImageComplete {
                download_url: "https://cdn.example.com/r.jpg".to_string()
            }
        );
        assert_eq!(message.connection_id.as_deref(), Some("abc123"));
    }

    #[test]
    fn non_json_and_unknown_payloads_are_kept_raw() {
        let text = InboundMessage::parse("hello there");
        assert_eq!(text.kind, InboundKind::NotJson);
        assert_eq!(text.raw, "hello there");

        let array = InboundMessage::parse("[1,2,3]");
        assert_eq!(array.kind, InboundKind::Other);
        assert_eq!(array.connection_id, None);

        let wrong_type = InboundMessage::parse(r#"{"connectionId": 5}"#);
        assert_eq!(wrong_type.kind, InboundKind::Other);
        assert_eq!(wrong_type.connection_id, None);
    }

    #[test]
    fn mistyped_connection_id_keeps_completion() {
        let message = InboundMessage::parse(
            r#"{"type":"image_complete","downloadUrl":"https://cdn.example.com/r.jpg","connectionId":123}"#,
        );
        assert_eq!(
            message.kind,
            InboundKind::ImageComplete {
                download_url: "https://cdn.example.com/r.jpg".to_string()
            }
        );
        assert_eq!(message.connection_id, None);

        let message = InboundMessage::parse(r#"{"type":7,"connectionId":"abc"}"#);
        assert_eq!(message.kind, InboundKind::Other);
        assert_eq!(message.connection_id.as_deref(), Some("abc"));
    }

    #[test]
    fn log_is_bounded_and_newest_first() {
        let mut log = MessageLog::default();
        for i in 0..25 {
            log.push(format!("message {i}"));
            assert!(log.len() <= MESSAGE_LOG_CAPACITY);
        }

        let entries: Vec<&str> = log.entries().collect();
        assert_eq!(entries.len(), 10);
        assert_eq!(entries[0], "message 24");
        assert_eq!(entries[9], "message 15");
    }

    #[tokio::test]
    async fn rejects_non_websocket_urls() {
        let (tx, _rx) = mpsc::channel(4);
        assert!(matches!(
            RealtimeChannel::connect("https://example.com", tx.clone()),
            Err(ChannelError::InvalidUrl(_))
        ));
        assert!(matches!(
            RealtimeChannel::connect("not a url", tx),
            Err(ChannelError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn send_before_connect_is_refused() {
        let (tx, _rx) = mpsc::channel(4);
        // Port 9 (discard) is not expected to accept WebSocket upgrades
        let channel = RealtimeChannel::connect("ws://127.0.0.1:9", tx).unwrap();
        assert!(matches!(
            channel.send("hi"),
            Err(ChannelError::NotConnected)
        ));
    }
}
