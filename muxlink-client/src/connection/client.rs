//! Connection manager for the multiplexer service

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use muxlink_protocol::{codec, Envelope, Message, PROTOCOL_VERSION};
use muxlink_utils::{MuxlinkError, Result};

use crate::events::ClientEvent;

/// Client type reported in the `connect` handshake
const CLIENT_TYPE: &str = "cli";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection state
///
/// Owned exclusively by [`Connection`]; transitions are driven only by
/// transport events and reconnection timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Connection configuration
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket endpoint URL (e.g. `ws://host:8080/ws`)
    pub url: String,
    /// Optional auth token sent in the handshake
    pub token: Option<String>,
    /// Base reconnect delay, doubled on each consecutive failure
    pub reconnect_base: Duration,
    /// Attempt count after which reconnection stops silently
    pub reconnect_max_attempts: u32,
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
            reconnect_base: Duration::from_secs(2),
            reconnect_max_attempts: 5,
        }
    }
}

/// Clonable fire-and-forget sender bound to the live transport
///
/// `send` wraps the message in a fresh envelope and queues it; while the
/// connection is down it is a silent no-op. Callers treat response messages
/// (or their absence) as the liveness signal, never the send itself.
#[derive(Clone, Default)]
pub struct WireSender {
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<Envelope>>>>,
}

impl WireSender {
    /// Queue a message for delivery; no-op unless connected
    pub fn send(&self, message: Message) {
        match self.lock().as_ref() {
            Some(tx) => {
                let envelope = Envelope::new(message);
                if tx.send(envelope).is_err() {
                    tracing::debug!("transport task gone, dropping outgoing message");
                }
            }
            None => tracing::trace!("not connected, dropping outgoing message"),
        }
    }

    fn bind(&self, tx: mpsc::UnboundedSender<Envelope>) {
        *self.lock() = Some(tx);
    }

    fn unbind(&self) {
        *self.lock() = None;
    }

    fn lock(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<Envelope>>> {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sender wired to a plain channel, for driving the reconciler in tests
    #[cfg(test)]
    pub(crate) fn test_pair() -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sender = Self::default();
        sender.bind(tx);
        (sender, rx)
    }
}

/// Client connection to the multiplexer service
///
/// Owns exactly one logical connection to one endpoint. Transport churn is
/// hidden behind a stable API: inbound envelopes and lifecycle events are
/// delivered to the owner's event loop as [`ClientEvent`]s, and all state
/// transitions happen there, one event at a time.
pub struct Connection {
    config: ConnectionConfig,
    state: ConnectionState,
    sender: WireSender,
    events: mpsc::UnboundedSender<ClientEvent>,
    io_task: Option<tokio::task::JoinHandle<()>>,
    reconnect_task: Option<tokio::task::JoinHandle<()>>,
    reconnect_attempts: u32,
    auto_reconnect: bool,
}

impl Connection {
    /// Create a new connection (not yet connected)
    pub fn new(config: ConnectionConfig, events: mpsc::UnboundedSender<ClientEvent>) -> Self {
        Self {
            config,
            state: ConnectionState::Disconnected,
            sender: WireSender::default(),
            events,
            io_task: None,
            reconnect_task: None,
            reconnect_attempts: 0,
            auto_reconnect: true,
        }
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Get a fire-and-forget sender that stays valid across reconnects
    pub fn sender(&self) -> WireSender {
        self.sender.clone()
    }

    /// Connect to the service
    ///
    /// Resolves as soon as the transport is open and the handshake is
    /// queued; the server's `connect_ack` arrives asynchronously through the
    /// normal dispatch path, not through this call.
    pub async fn connect(&mut self) -> Result<()> {
        if self.state == ConnectionState::Connected {
            return Ok(());
        }

        self.cancel_reconnect();
        self.state = ConnectionState::Connecting;

        let (ws, _response) = connect_async(self.config.url.as_str()).await.map_err(|e| {
            self.state = ConnectionState::Disconnected;
            MuxlinkError::Connection(format!("failed to connect to {}: {}", self.config.url, e))
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        self.sender.bind(tx);
        self.io_task = Some(tokio::spawn(io_task(ws, rx, self.events.clone())));

        self.state = ConnectionState::Connected;
        self.reconnect_attempts = 0;
        self.auto_reconnect = true;

        // Handshake goes out through the normal send path; the ack is
        // dispatched like any other inbound message.
        self.sender.send(Message::Connect {
            client_type: CLIENT_TYPE.to_string(),
            version: PROTOCOL_VERSION.to_string(),
            token: self.config.token.clone(),
        });

        tracing::info!(url = %self.config.url, "connected");
        Ok(())
    }

    /// Explicit, user-initiated disconnect
    ///
    /// Terminal until `connect` is called again: suppresses auto-reconnect
    /// and cancels any pending backoff timer.
    pub fn disconnect(&mut self) {
        self.auto_reconnect = false;
        self.cancel_reconnect();
        if let Some(task) = self.io_task.take() {
            task.abort();
        }
        self.sender.unbind();
        self.state = ConnectionState::Disconnected;
        tracing::info!("disconnected");
    }

    /// Handle the transport task ending; called from the event loop
    pub fn on_transport_closed(&mut self) {
        let was_connected = self.state == ConnectionState::Connected;
        self.io_task = None;
        self.sender.unbind();
        self.state = ConnectionState::Disconnected;
        if was_connected && self.auto_reconnect {
            self.schedule_reconnect();
        }
    }

    /// Handle a reconnect timer firing; called from the event loop
    pub async fn on_reconnect_due(&mut self) {
        self.reconnect_task = None;
        if !self.auto_reconnect || self.state != ConnectionState::Disconnected {
            return;
        }
        if let Err(e) = self.connect().await {
            tracing::warn!(
                attempt = self.reconnect_attempts,
                error = %e,
                "reconnect attempt failed"
            );
            self.schedule_reconnect();
        }
    }

    /// Schedule the next reconnect attempt with exponential backoff
    fn schedule_reconnect(&mut self) {
        if self.reconnect_attempts >= self.config.reconnect_max_attempts {
            tracing::debug!("reconnect attempts exhausted, staying disconnected");
            return;
        }
        self.reconnect_attempts += 1;
        let delay = self.config.reconnect_base * 2u32.saturating_pow(self.reconnect_attempts - 1);
        tracing::debug!(attempt = self.reconnect_attempts, ?delay, "scheduling reconnect");

        let events = self.events.clone();
        self.reconnect_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(ClientEvent::ReconnectDue);
        }));
    }

    fn cancel_reconnect(&mut self) {
        if let Some(task) = self.reconnect_task.take() {
            task.abort();
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(task) = self.io_task.take() {
            task.abort();
        }
        if let Some(task) = self.reconnect_task.take() {
            task.abort();
        }
    }
}

/// Background task that owns the socket I/O for one connection
async fn io_task(
    ws: WsStream,
    mut outgoing: mpsc::UnboundedReceiver<Envelope>,
    events: mpsc::UnboundedSender<ClientEvent>,
) {
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            Some(envelope) = outgoing.recv() => {
                let text = match codec::encode(&envelope) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to encode outgoing message");
                        continue;
                    }
                };
                if let Err(e) = sink.send(WsMessage::Text(text.into())).await {
                    tracing::error!(error = %e, "failed to send message");
                    break;
                }
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => match codec::decode(text.as_str()) {
                        Ok(envelope) => {
                            if events.send(ClientEvent::Inbound(envelope)).is_err() {
                                tracing::debug!("event channel closed, receiver dropped");
                                break;
                            }
                        }
                        // Malformed frames are dropped; the connection stays up.
                        Err(e) => tracing::warn!(error = %e, "dropping malformed frame"),
                    },
                    Some(Ok(WsMessage::Ping(data))) => {
                        if sink.send(WsMessage::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        tracing::info!("server closed connection");
                        break;
                    }
                    Some(Ok(_)) => {
                        // Binary and pong frames are not part of this protocol
                    }
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "transport error");
                        break;
                    }
                }
            }
        }
    }

    let _ = events.send(ClientEvent::TransportClosed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    /// Accept a single WebSocket connection and hand the stream to `serve`
    async fn spawn_server<F, Fut>(serve: F) -> String
    where
        F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            serve(ws).await;
        });
        format!("ws://{}/ws", addr)
    }

    fn test_config(url: String) -> ConnectionConfig {
        ConnectionConfig {
            url,
            token: None,
            reconnect_base: Duration::from_millis(10),
            reconnect_max_attempts: 3,
        }
    }

    #[tokio::test]
    async fn test_connection_state_initial() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = Connection::new(test_config("ws://127.0.0.1:1/ws".into()), tx);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_no_server() {
        // Bind then drop a listener so the port is free but refused
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (tx, _rx) = mpsc::unbounded_channel();
        let mut conn = Connection::new(test_config(format!("ws://{}/ws", addr)), tx);

        assert!(conn.connect().await.is_err());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_sends_handshake() {
        let (handshake_tx, mut handshake_rx) = mpsc::unbounded_channel();
        let url = spawn_server(move |mut ws| async move {
            if let Some(Ok(WsMessage::Text(text))) = ws.next().await {
                let envelope = codec::decode(text.as_str()).unwrap();
                let _ = handshake_tx.send(envelope);
            }
        })
        .await;

        let (tx, _rx) = mpsc::unbounded_channel();
        let mut conn = Connection::new(test_config(url), tx);
        conn.connect().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Connected);

        let envelope = timeout(Duration::from_secs(1), handshake_rx.recv())
            .await
            .unwrap()
            .unwrap();
        match envelope.message {
            Message::Connect {
                client_type,
                version,
                token,
            } => {
                assert_eq!(client_type, CLIENT_TYPE);
                assert_eq!(version, PROTOCOL_VERSION);
                assert!(token.is_none());
            }
            other => panic!("expected connect handshake, got {:?}", other),
        }

        conn.disconnect();
    }

    #[tokio::test]
    async fn test_connect_already_connected() {
        let url = spawn_server(|mut ws| async move {
            while ws.next().await.is_some() {}
        })
        .await;

        let (tx, _rx) = mpsc::unbounded_channel();
        let mut conn = Connection::new(test_config(url), tx);
        conn.connect().await.unwrap();
        // Second connect is a no-op
        conn.connect().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Connected);

        conn.disconnect();
    }

    #[tokio::test]
    async fn test_send_not_connected_is_silent() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = Connection::new(test_config("ws://127.0.0.1:1/ws".into()), tx);
        // Must not panic or error
        conn.sender().send(Message::ListSessions {});
    }

    #[tokio::test]
    async fn test_inbound_messages_are_delivered() {
        let url = spawn_server(|mut ws| async move {
            let frame = codec::encode(&Envelope::new(Message::ConnectAck {
                success: true,
                server_version: "0.1.0".to_string(),
                encryption_enabled: false,
            }))
            .unwrap();
            ws.send(WsMessage::Text(frame.into())).await.unwrap();
            while ws.next().await.is_some() {}
        })
        .await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut conn = Connection::new(test_config(url), tx);
        conn.connect().await.unwrap();

        let event = timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            ClientEvent::Inbound(envelope) => {
                assert_eq!(envelope.message.kind().as_str(), "connect_ack");
            }
            other => panic!("expected inbound message, got {:?}", other),
        }

        conn.disconnect();
    }

    #[tokio::test]
    async fn test_malformed_frame_keeps_connection_alive() {
        let url = spawn_server(|mut ws| async move {
            ws.send(WsMessage::Text("this is not json".into()))
                .await
                .unwrap();
            let frame = codec::encode(&Envelope::new(Message::ConnectAck {
                success: true,
                server_version: "0.1.0".to_string(),
                encryption_enabled: false,
            }))
            .unwrap();
            ws.send(WsMessage::Text(frame.into())).await.unwrap();
            while ws.next().await.is_some() {}
        })
        .await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut conn = Connection::new(test_config(url), tx);
        conn.connect().await.unwrap();

        // The malformed frame is dropped; the valid one still arrives.
        let event = timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, ClientEvent::Inbound(_)));

        conn.disconnect();
    }

    #[tokio::test]
    async fn test_server_close_reports_transport_closed() {
        let url = spawn_server(|mut ws| async move {
            // Consume the handshake, then close
            let _ = ws.next().await;
            let _ = ws.close(None).await;
        })
        .await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut conn = Connection::new(test_config(url), tx);
        conn.connect().await.unwrap();

        loop {
            let event = timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            if matches!(event, ClientEvent::TransportClosed) {
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_transport_close_schedules_reconnect() {
        let url = spawn_server(|mut ws| async move {
            let _ = ws.next().await;
            let _ = ws.close(None).await;
        })
        .await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut conn = Connection::new(test_config(url), tx);
        conn.connect().await.unwrap();

        // Drain until the transport reports closure, then drive the manager
        loop {
            let event = timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            if matches!(event, ClientEvent::TransportClosed) {
                break;
            }
        }
        conn.on_transport_closed();
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        let event = timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, ClientEvent::ReconnectDue));
    }

    #[tokio::test]
    async fn test_no_reconnect_after_explicit_disconnect() {
        let url = spawn_server(|mut ws| async move {
            while ws.next().await.is_some() {}
        })
        .await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut conn = Connection::new(test_config(url), tx);
        conn.connect().await.unwrap();
        conn.disconnect();

        // Even if a straggling close notification comes through, a
        // deliberate disconnect stays terminal.
        conn.on_transport_closed();

        let result = timeout(Duration::from_millis(100), async {
            loop {
                match rx.recv().await {
                    Some(ClientEvent::ReconnectDue) => break,
                    Some(_) => continue,
                    None => std::future::pending::<()>().await,
                }
            }
        })
        .await;
        assert!(result.is_err(), "no reconnect timer may fire after disconnect");
    }

    #[tokio::test]
    async fn test_reconnect_attempts_reset_on_success() {
        let url = spawn_server(|mut ws| async move {
            while ws.next().await.is_some() {}
        })
        .await;

        let (tx, _rx) = mpsc::unbounded_channel();
        let mut conn = Connection::new(test_config(url), tx);
        conn.reconnect_attempts = 2;
        conn.connect().await.unwrap();
        assert_eq!(conn.reconnect_attempts, 0);

        conn.disconnect();
    }

    #[tokio::test]
    async fn test_reconnect_stops_silently_past_cap() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut config = test_config("ws://127.0.0.1:1/ws".into());
        config.reconnect_max_attempts = 2;
        let mut conn = Connection::new(config, tx);

        // Two failed attempts use up the allowed count
        conn.schedule_reconnect();
        conn.schedule_reconnect();
        assert_eq!(conn.reconnect_attempts, 2);

        // The third schedule is refused without error
        conn.schedule_reconnect();
        assert_eq!(conn.reconnect_attempts, 2);

        // Both scheduled timers fire, nothing more
        let mut due = 0;
        while timeout(Duration::from_millis(200), rx.recv())
            .await
            .ok()
            .flatten()
            .is_some()
        {
            due += 1;
            if due > 2 {
                break;
            }
        }
        assert_eq!(due, 2);
    }

    #[tokio::test]
    async fn test_backoff_doubles_per_attempt() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let config = test_config("ws://127.0.0.1:1/ws".into());
        let base = config.reconnect_base;
        let mut conn = Connection::new(config, tx);

        conn.schedule_reconnect();
        assert_eq!(conn.reconnect_attempts, 1);
        // Delay is base * 2^(attempt-1); verify the arithmetic directly
        assert_eq!(base * 2u32.saturating_pow(0), base);
        assert_eq!(base * 2u32.saturating_pow(2), base * 4);
    }
}
