//! Test harness: a scripted upstream engine and a relay bound to a local port.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use sales_agent_core::{
    Dialect, Recommendations,
    completion::{CompletionStrategy, DEFAULT_CUE_PHRASE},
};
use sales_agent_relay::{
    config::{Config, UpstreamSettings},
    router::create_router,
    state::AppState,
};
use secrecy::SecretString;
use serde_json::Value;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, accept_async, connect_async, tungstenite::Message,
};
use tracing::Level;

pub const WAIT: Duration = Duration::from_secs(5);
pub const PERSONA: &str = "You are a SIXT sales agent helping with booking {{booking_id}}.";

/// What the mock upstream saw from the relay.
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Text(String),
    Binary(Vec<u8>),
    Closed,
}

enum Outbound {
    Text(String),
    Close,
}

/// Accepts upstream connections and hands each one to the test.
pub struct MockUpstream {
    pub url: String,
    connections: Arc<AtomicUsize>,
    conn_rx: mpsc::UnboundedReceiver<MockConnection>,
}

impl MockUpstream {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/v1/realtime", listener.local_addr().unwrap());
        let connections = Arc::new(AtomicUsize::new(0));
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();

        let counter = connections.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let (inbound_tx, inbound) = mpsc::unbounded_channel();
                let (outbound, outbound_rx) = mpsc::unbounded_channel();
                if conn_tx.send(MockConnection { inbound, outbound }).is_err() {
                    break;
                }
                tokio::spawn(serve_connection(stream, inbound_tx, outbound_rx));
            }
        });

        Self {
            url,
            connections,
            conn_rx,
        }
    }

    pub async fn next_connection(&mut self) -> MockConnection {
        tokio::time::timeout(WAIT, self.conn_rx.recv())
            .await
            .expect("relay never connected upstream")
            .expect("mock listener stopped")
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

async fn serve_connection(
    stream: TcpStream,
    inbound: mpsc::UnboundedSender<Recorded>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    let Ok(ws_stream) = accept_async(stream).await else {
        return;
    };
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let _ = inbound.send(Recorded::Text(text.as_str().to_owned()));
                }
                Some(Ok(Message::Binary(data))) => {
                    let _ = inbound.send(Recorded::Binary(data.to_vec()));
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    let _ = inbound.send(Recorded::Closed);
                    break;
                }
                Some(Ok(_)) => {}
            },
            out = outbound.recv() => match out {
                Some(Outbound::Text(text)) => {
                    if write.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = write.close().await;
                    break;
                }
            },
        }
    }
}

/// One accepted upstream connection, driven by the test.
pub struct MockConnection {
    inbound: mpsc::UnboundedReceiver<Recorded>,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl MockConnection {
    pub async fn recv(&mut self) -> Recorded {
        tokio::time::timeout(WAIT, self.inbound.recv())
            .await
            .expect("timed out waiting for a relay frame")
            .unwrap_or(Recorded::Closed)
    }

    pub async fn recv_json(&mut self) -> Value {
        match self.recv().await {
            Recorded::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected a text frame, got {other:?}"),
        }
    }

    pub fn send(&self, frame: &Value) {
        self.send_raw(frame.to_string());
    }

    pub fn send_raw(&self, frame: String) {
        self.outbound.send(Outbound::Text(frame)).unwrap();
    }

    pub fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }
}

pub fn test_config(dialect: Dialect, upstream_url: &str) -> Config {
    Config {
        bind_address: SocketAddr::from(([127, 0, 0, 1], 0)),
        log_level: Level::DEBUG,
        upstream: UpstreamSettings {
            dialect,
            url: Some(upstream_url.to_string()),
            api_key: SecretString::from("test-key".to_string()),
            openai_model: "gpt-4o-realtime-preview".to_string(),
            elevenlabs_agent_id: Some("agent_test".to_string()),
            connect_timeout: Duration::from_secs(2),
        },
        prompts_path: PathBuf::from("./prompts"),
        required_dynamic_variables: vec!["booking_id".to_string()],
        completion_policy: CompletionStrategy::Any,
        completion_cue: DEFAULT_CUE_PHRASE.to_string(),
        fallback_recommendations_path: None,
        client_tools_enabled: true,
        session_timeout: Duration::from_secs(30),
    }
}

/// Serves the relay on an ephemeral port.
pub async fn spawn_relay(config: Config) -> SocketAddr {
    let state = Arc::new(AppState::new(
        config,
        PERSONA.to_string(),
        Recommendations::demo_fallback(),
    ));
    let app = create_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub async fn connect_client(addr: SocketAddr, query: &str) -> Client {
    let (client, _) = connect_async(format!("ws://{addr}/realtime?{query}"))
        .await
        .expect("client handshake failed");
    client
}

/// The next text frame the client receives, or `None` once the relay closed.
pub async fn next_text(client: &mut Client) -> Option<String> {
    loop {
        let msg = tokio::time::timeout(WAIT, client.next())
            .await
            .expect("timed out waiting for a client frame");
        match msg {
            Some(Ok(Message::Text(text))) => return Some(text.as_str().to_owned()),
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return None,
            Some(Ok(_)) => continue,
        }
    }
}

pub async fn next_json(client: &mut Client) -> Value {
    let text = next_text(client).await.expect("relay closed the client");
    serde_json::from_str(&text).unwrap()
}

pub async fn send_text(client: &mut Client, frame: &Value) {
    client
        .send(Message::Text(frame.to_string().into()))
        .await
        .unwrap();
}
