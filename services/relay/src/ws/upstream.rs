//! Upstream Engine Client
//!
//! Owns the one outbound WebSocket to the conversational engine for the
//! lifetime of a session. `UpstreamClient::connect` consumes the client, so a
//! connection that has ended can never be reused by a later session.

use bytes::Bytes;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use sales_agent_core::{ConnectionState, Dialect, SessionConfig, UpstreamEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::{
    net::TcpStream,
    sync::{Mutex, watch},
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        client::{ClientRequestBuilder, IntoClientRequest},
        handshake::client::Request,
        http::Uri,
        protocol::Message as WsMessage,
    },
};
use tracing::{debug, info, warn};

type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Invalid upstream request: {0}")]
    Request(String),
    #[error("Upstream handshake failed: {0}")]
    Handshake(String),
    #[error("Upstream handshake timed out after {0:?}")]
    Timeout(Duration),
    #[error("Upstream transport failed: {0}")]
    Transport(String),
    #[error("Malformed upstream frame: {0}")]
    Malformed(String),
}

/// A frame was offered while the connection could not take it.
#[derive(Debug, thiserror::Error)]
#[error("Upstream connection is {state}; frame dropped")]
pub struct NotActiveError {
    pub state: ConnectionState,
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error(transparent)]
    NotActive(#[from] NotActiveError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// A raw outbound frame, written verbatim.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

/// An inbound frame together with its decoded classification.
#[derive(Debug, Clone)]
pub enum UpstreamFrame {
    Text { raw: String, event: UpstreamEvent },
    Binary(Bytes),
}

/// Shared view of the connection state. Every transition is validated against
/// `ConnectionState::can_transition_to`; invalid ones are ignored.
#[derive(Clone)]
pub struct StateHandle(Arc<watch::Sender<ConnectionState>>);

impl StateHandle {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Idle);
        Self(Arc::new(tx))
    }

    pub fn get(&self) -> ConnectionState {
        *self.0.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.0.subscribe()
    }

    fn transition(&self, next: ConnectionState) -> bool {
        self.0.send_if_modified(|current| {
            if current.can_transition_to(next) {
                debug!(from = %current, to = %next, "Upstream state transition");
                *current = next;
                true
            } else {
                false
            }
        })
    }
}

/// An idle, not yet connected upstream client.
pub struct UpstreamClient {
    dialect: Dialect,
    connect_timeout: Duration,
    state: StateHandle,
}

impl UpstreamClient {
    pub fn new(dialect: Dialect, connect_timeout: Duration) -> Self {
        Self {
            dialect,
            connect_timeout,
            state: StateHandle::new(),
        }
    }

    pub fn state(&self) -> StateHandle {
        self.state.clone()
    }

    /// Performs the handshake and sends the session configuration before any
    /// other outbound frame is possible.
    ///
    /// On failure the state is `Error` and every acquired transport handle has
    /// already been dropped.
    pub async fn connect(
        self,
        request: Request,
        config: &SessionConfig,
    ) -> Result<(UpstreamSender, UpstreamEvents), ConnectionError> {
        let state = self.state;
        let fail = |err: ConnectionError| {
            state.transition(ConnectionState::Error);
            err
        };

        state.transition(ConnectionState::Connecting);
        let session_frame = self
            .dialect
            .session_frame(config)
            .map_err(|e| fail(ConnectionError::Request(e.to_string())))?;

        let (socket, _response) = tokio::time::timeout(self.connect_timeout, connect_async(request))
            .await
            .map_err(|_| fail(ConnectionError::Timeout(self.connect_timeout)))?
            .map_err(|e| fail(ConnectionError::Handshake(e.to_string())))?;
        info!(provider = %self.dialect, "Connected to upstream engine.");

        state.transition(ConnectionState::Configuring);
        let (mut sink, stream) = socket.split();
        sink.send(WsMessage::Text(session_frame.into()))
            .await
            .map_err(|e| fail(ConnectionError::Transport(e.to_string())))?;
        debug!("Session configuration sent.");

        let sender = UpstreamSender {
            sink: Arc::new(Mutex::new(sink)),
            dialect: self.dialect,
            state: state.clone(),
        };
        let events = UpstreamEvents {
            stream,
            dialect: self.dialect,
            state,
        };
        Ok((sender, events))
    }
}

/// Write half. Cloneable; writes are serialized through the mutex so frames
/// from different tasks never interleave.
#[derive(Clone)]
pub struct UpstreamSender {
    sink: Arc<Mutex<SplitSink<UpstreamSocket, WsMessage>>>,
    dialect: Dialect,
    state: StateHandle,
}

impl UpstreamSender {
    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub async fn send(&self, frame: Frame) -> Result<(), SendError> {
        let state = self.state.get();
        if !state.accepts_outbound() {
            return Err(NotActiveError { state }.into());
        }
        let msg = match frame {
            Frame::Text(text) => WsMessage::Text(text.into()),
            Frame::Binary(data) => WsMessage::Binary(data),
        };
        self.sink.lock().await.send(msg).await.map_err(|e| {
            self.state.transition(ConnectionState::Error);
            ConnectionError::Transport(e.to_string()).into()
        })
    }

    /// Starts the close handshake. Safe to call more than once and from any state.
    pub async fn close(&self) {
        let was = self.state.get();
        self.state.transition(ConnectionState::Ended);
        if was.accepts_outbound() {
            if let Err(e) = self.sink.lock().await.close().await {
                debug!(error = %e, "Upstream close handshake did not complete");
            }
            info!("Upstream connection closed.");
        }
    }
}

/// Read half: the lazy sequence of decoded upstream frames.
pub struct UpstreamEvents {
    stream: SplitStream<UpstreamSocket>,
    dialect: Dialect,
    state: StateHandle,
}

impl UpstreamEvents {
    /// Returns the next frame, `None` once the connection has ended.
    pub async fn next(&mut self) -> Option<Result<UpstreamFrame, ConnectionError>> {
        loop {
            if self.state.get().is_terminal() {
                return None;
            }
            let msg = match self.stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    self.state.transition(ConnectionState::Error);
                    return Some(Err(ConnectionError::Transport(e.to_string())));
                }
                None => {
                    self.state.transition(ConnectionState::Ended);
                    return None;
                }
            };

            match msg {
                WsMessage::Text(text) => {
                    let raw = text.as_str().to_owned();
                    let event = match self.dialect.decode(&raw) {
                        Ok(event) => event,
                        Err(e) => {
                            warn!(error = %e, "Upstream sent a malformed frame");
                            self.state.transition(ConnectionState::Error);
                            return Some(Err(ConnectionError::Malformed(e.to_string())));
                        }
                    };
                    self.acknowledge(&event);
                    return Some(Ok(UpstreamFrame::Text { raw, event }));
                }
                WsMessage::Binary(data) => {
                    self.acknowledge(&UpstreamEvent::AudioDelta);
                    return Some(Ok(UpstreamFrame::Binary(data)));
                }
                WsMessage::Close(frame) => {
                    debug!(?frame, "Upstream sent close frame");
                    self.state.transition(ConnectionState::Ended);
                    return None;
                }
                WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => continue,
            }
        }
    }

    fn acknowledge(&self, event: &UpstreamEvent) {
        if self.state.get() == ConnectionState::Configuring && self.dialect.acknowledges(event) {
            self.state.transition(ConnectionState::Active);
            info!("Upstream session active.");
        }
    }
}

/// Builds a handshake request for `url` with the given headers.
pub(crate) fn build_request(
    url: &str,
    headers: Vec<(&'static str, String)>,
) -> Result<Request, ConnectionError> {
    let uri: Uri = url
        .parse()
        .map_err(|e| ConnectionError::Request(format!("{url}: {e}")))?;
    headers
        .into_iter()
        .fold(ClientRequestBuilder::new(uri), |builder, (name, value)| {
            builder.with_header(name, value)
        })
        .into_client_request()
        .map_err(|e| ConnectionError::Request(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sales_agent_core::{SessionConfigBuilder, SessionOptions};
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn config() -> SessionConfig {
        SessionConfigBuilder::new(SessionOptions::default())
            .build()
            .unwrap()
    }

    #[test]
    fn test_state_handle_only_follows_valid_transitions() {
        let state = StateHandle::new();
        let mut rx = state.subscribe();

        assert!(!state.transition(ConnectionState::Active));
        assert_eq!(state.get(), ConnectionState::Idle);

        assert!(state.transition(ConnectionState::Connecting));
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), ConnectionState::Connecting);

        assert!(state.transition(ConnectionState::Error));
        assert!(!state.transition(ConnectionState::Connecting));
        assert_eq!(state.get(), ConnectionState::Error);
    }

    #[test]
    fn test_build_request_sets_headers() {
        let request = build_request(
            "ws://127.0.0.1:9000/v1/realtime",
            vec![("xi-api-key", "k".to_string())],
        )
        .unwrap();
        assert_eq!(request.headers()["xi-api-key"], "k");
        assert!(request.headers().contains_key("sec-websocket-key"));
    }

    #[tokio::test]
    async fn test_handshake_timeout_leaves_error_state() {
        // Accepts TCP through the backlog but never answers the upgrade.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/", listener.local_addr().unwrap());

        let client = UpstreamClient::new(Dialect::OpenAi, Duration::from_millis(200));
        let state = client.state();
        let err = client
            .connect(build_request(&url, vec![]).unwrap(), &config())
            .await
            .err()
            .unwrap();

        assert!(matches!(err, ConnectionError::Timeout(_)));
        assert_eq!(state.get(), ConnectionState::Error);
        drop(listener);
    }

    #[tokio::test]
    async fn test_refused_connection_is_a_handshake_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/", listener.local_addr().unwrap());
        drop(listener);

        let client = UpstreamClient::new(Dialect::ElevenLabs, Duration::from_secs(2));
        let state = client.state();
        let err = client
            .connect(build_request(&url, vec![]).unwrap(), &config())
            .await
            .err()
            .unwrap();

        assert!(matches!(err, ConnectionError::Handshake(_)));
        assert_eq!(state.get(), ConnectionState::Error);
    }

    #[tokio::test]
    async fn test_send_after_close_is_not_active() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/", listener.local_addr().unwrap());
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            // Session frame, then the close handshake.
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_close() {
                    break;
                }
            }
        });

        let client = UpstreamClient::new(Dialect::OpenAi, Duration::from_secs(2));
        let Ok((sender, _events)) = client
            .connect(build_request(&url, vec![]).unwrap(), &config())
            .await
        else {
            panic!("upstream handshake failed");
        };
        assert_eq!(sender.state(), ConnectionState::Configuring);

        sender.close().await;
        let result = sender.send(Frame::Text(r#"{"type":"response.create"}"#.into())).await;

        match result {
            Err(SendError::NotActive(e)) => assert_eq!(e.state, ConnectionState::Ended),
            Err(e) => panic!("expected NotActive, got {e}"),
            Ok(()) => panic!("frame was written after close"),
        }
        server.await.unwrap();
    }
}
