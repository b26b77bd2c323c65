//! Manages one relay session: the client socket, the upstream connection and
//! the two forwarding loops between them.

use super::{
    protocol::{ErrorCode, ServerMessage},
    provider,
    upstream::{
        ConnectionError, Frame, SendError, UpstreamClient, UpstreamEvents, UpstreamFrame,
        UpstreamSender,
    },
};
use crate::{handlers::ApiError, state::AppState};
use anyhow::Result;
use async_trait::async_trait;
use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    response::Response,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use sales_agent_core::{
    CompletionDetector, ConnectionState, Session, SessionConfig, ToolDispatcher, ToolEffects,
    UpstreamEvent, VehicleDescriptor,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

/// Where `redirect_to_confirmation` sends the client.
pub const CONFIRMATION_TARGET: &str = "confirmation";

type ClientSink = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// Axum handler to upgrade an HTTP connection to a relay session.
///
/// Query parameters become the session's dynamic variables. The session
/// configuration is validated before the upgrade, so a missing required
/// variable is a plain 400 and no upstream connection is attempted.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<BTreeMap<String, String>>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    let ws = ws.map_err(|rejection| {
        debug!(%rejection, "Rejecting non-upgrade request");
        ApiError::UpgradeRequired
    })?;
    let config = state.session_config(params.clone())?;
    let session = Session::new(params);
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, session, config)))
}

/// Why a relay session stopped.
#[derive(Debug)]
enum SessionEnd {
    ClientClosed,
    ClientFailed(String),
    UpstreamClosed,
    UpstreamFailed(ConnectionError),
    TimedOut,
}

/// Surfaces client-tool effects as `ui.*` frames on the client socket.
struct ClientUi {
    client_tx: ClientSink,
}

#[async_trait]
impl ToolEffects for ClientUi {
    async fn show_vehicle(&self, vehicle: VehicleDescriptor) -> Result<()> {
        send_msg(&mut *self.client_tx.lock().await, ServerMessage::ShowVehicle { vehicle }).await
    }

    async fn dismiss_vehicle(&self) -> Result<()> {
        send_msg(&mut *self.client_tx.lock().await, ServerMessage::DismissVehicle).await
    }

    async fn redirect_to_confirmation(&self) -> Result<()> {
        send_msg(
            &mut *self.client_tx.lock().await,
            ServerMessage::Redirect {
                target: CONFIRMATION_TARGET.to_string(),
            },
        )
        .await
    }
}

#[instrument(name = "relay_session", skip_all, fields(session_id, provider, provider_session_id))]
async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    mut session: Session,
    config: SessionConfig,
) {
    let dialect = state.config.upstream.dialect;
    let span = tracing::Span::current();
    span.record("session_id", tracing::field::display(session.id));
    span.record("provider", tracing::field::display(dialect));
    info!(
        variables = ?session.dynamic_variables.keys().collect::<Vec<_>>(),
        "New relay session. Connecting upstream..."
    );

    let (client_sink, mut client_rx) = socket.split();
    let client_tx: ClientSink = Arc::new(Mutex::new(client_sink));

    let upstream = UpstreamClient::new(dialect, state.config.upstream.connect_timeout);
    let upstream_state = upstream.state();
    let connect = async {
        let request = provider::upstream_request(&state.config.upstream)?;
        upstream.connect(request, &config).await
    };
    tokio::pin!(connect);

    // The client is watched during the handshake; leaving drops the pending
    // connect and with it the upstream socket.
    let connected = loop {
        tokio::select! {
            result = &mut connect => break result,
            msg = client_rx.next() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    info!(
                        state = %upstream_state.get(),
                        "Client left before the upstream session was established"
                    );
                    return;
                }
                Some(Ok(_)) => warn!("Client frame dropped while connecting upstream"),
            },
        }
    };
    let (upstream_tx, mut events) = match connected {
        Ok(halves) => halves,
        Err(e) => {
            error!(error = %e, state = %upstream_state.get(), "Upstream connection failed");
            close_client(
                &client_tx,
                Some(ServerMessage::error(
                    ErrorCode::UpstreamConnectionFailed,
                    "Connection to the AI service failed",
                )),
            )
            .await;
            return;
        }
    };

    let mut detector = CompletionDetector::new(
        state.completion_policy.clone(),
        (*state.fallback_recommendations).clone(),
    );
    let dispatcher = config.client_tools().then(|| {
        ToolDispatcher::new(ClientUi {
            client_tx: client_tx.clone(),
        })
    });

    let relay = async {
        tokio::select! {
            end = client_to_upstream(&mut client_rx, &upstream_tx) => end,
            end = upstream_to_client(
                &mut events,
                &client_tx,
                &upstream_tx,
                &mut detector,
                dispatcher.as_ref(),
                &mut session,
            ) => end,
        }
    };
    let end = tokio::time::timeout(state.config.session_timeout, relay)
        .await
        .unwrap_or(SessionEnd::TimedOut);

    match end {
        SessionEnd::ClientClosed => {
            info!("Client closed the session. Closing upstream.");
            upstream_tx.close().await;
        }
        SessionEnd::ClientFailed(reason) => {
            warn!(%reason, "Client socket failed. Closing upstream.");
            upstream_tx.close().await;
        }
        SessionEnd::UpstreamClosed => {
            info!("Upstream closed the session. Closing client.");
            close_client(&client_tx, None).await;
        }
        SessionEnd::UpstreamFailed(e) => {
            error!(error = %e, "Upstream connection failed mid-session");
            upstream_tx.close().await;
            close_client(
                &client_tx,
                Some(ServerMessage::error(ErrorCode::UpstreamError, e.to_string())),
            )
            .await;
        }
        SessionEnd::TimedOut => {
            warn!(timeout = ?state.config.session_timeout, "Session timed out");
            upstream_tx.close().await;
            close_client(
                &client_tx,
                Some(ServerMessage::error(
                    ErrorCode::SessionTimeout,
                    "Session exceeded its maximum duration",
                )),
            )
            .await;
        }
    }

    session.state = upstream_tx.state();
    info!(
        state = %session.state,
        completed = detector.has_fired(),
        "Relay session finished."
    );
}

/// Forwards client frames upstream verbatim, in arrival order.
///
/// Frames arriving while the upstream session is not yet (or no longer)
/// active are dropped, not buffered.
async fn client_to_upstream(
    client_rx: &mut SplitStream<WebSocket>,
    upstream_tx: &UpstreamSender,
) -> SessionEnd {
    while let Some(msg) = client_rx.next().await {
        let frame = match msg {
            Ok(Message::Text(text)) => Frame::Text(text.as_str().to_owned()),
            Ok(Message::Binary(data)) => Frame::Binary(data),
            Ok(Message::Close(_)) => return SessionEnd::ClientClosed,
            Ok(Message::Ping(_) | Message::Pong(_)) => continue,
            Err(e) => return SessionEnd::ClientFailed(e.to_string()),
        };

        let state = upstream_tx.state();
        if state != ConnectionState::Active {
            warn!(%state, "Dropping client frame: upstream session is not active");
            continue;
        }
        match upstream_tx.send(frame).await {
            Ok(()) => {}
            Err(SendError::NotActive(e)) => warn!(error = %e, "Dropping client frame"),
            Err(SendError::Connection(e)) => return SessionEnd::UpstreamFailed(e),
        }
    }
    SessionEnd::ClientClosed
}

/// Forwards upstream frames to the client verbatim, then lets the detector
/// and the dispatcher react to them. Anything they emit follows the frame
/// that caused it.
async fn upstream_to_client(
    events: &mut UpstreamEvents,
    client_tx: &ClientSink,
    upstream_tx: &UpstreamSender,
    detector: &mut CompletionDetector,
    dispatcher: Option<&ToolDispatcher<ClientUi>>,
    session: &mut Session,
) -> SessionEnd {
    while let Some(next) = events.next().await {
        let (raw, event) = match next {
            Ok(UpstreamFrame::Text { raw, event }) => (raw, event),
            Ok(UpstreamFrame::Binary(data)) => {
                if let Err(e) = client_tx.lock().await.send(Message::Binary(data)).await {
                    return SessionEnd::ClientFailed(e.to_string());
                }
                continue;
            }
            Err(e) => return SessionEnd::UpstreamFailed(e),
        };

        debug!(kind = event.kind(), "Upstream frame");
        if let Err(e) = client_tx.lock().await.send(Message::Text(raw.into())).await {
            return SessionEnd::ClientFailed(e.to_string());
        }

        if let Some(complete) = detector.inspect(&event) {
            if let Err(e) = send_msg(&mut *client_tx.lock().await, complete.into()).await {
                return SessionEnd::ClientFailed(e.to_string());
            }
        }

        match event {
            UpstreamEvent::SessionAck {
                session_id: Some(id),
            } => {
                tracing::Span::current().record("provider_session_id", id.as_str());
                info!(provider_session_id = %id, "Upstream acknowledged the session.");
                session.provider_session_id = Some(id);
            }
            UpstreamEvent::ToolCall(call) => {
                let Some(dispatcher) = dispatcher else {
                    debug!(tool = %call.name, "Client tools disabled; leaving tool call to the client");
                    continue;
                };
                let outcome = dispatcher.dispatch(&call).await;
                let frames = match upstream_tx.dialect().tool_result_frames(&outcome) {
                    Ok(frames) => frames,
                    Err(e) => {
                        error!(error = %e, tool = %call.name, "Failed to encode tool result");
                        continue;
                    }
                };
                for frame in frames {
                    if let Some(end) = send_upstream(upstream_tx, frame).await {
                        return end;
                    }
                }
            }
            UpstreamEvent::Ping { event_id } => {
                if let Some(pong) = upstream_tx.dialect().pong_frame(event_id) {
                    if let Some(end) = send_upstream(upstream_tx, pong).await {
                        return end;
                    }
                }
            }
            UpstreamEvent::Error { message } => {
                warn!(%message, "Upstream reported an error");
            }
            _ => {}
        }
    }
    SessionEnd::UpstreamClosed
}

/// Sends a relay-originated frame upstream. Returns the session end if the
/// transport failed.
async fn send_upstream(upstream_tx: &UpstreamSender, frame: String) -> Option<SessionEnd> {
    match upstream_tx.send(Frame::Text(frame)).await {
        Ok(()) => None,
        Err(SendError::NotActive(e)) => {
            warn!(error = %e, "Dropping relay frame");
            None
        }
        Err(SendError::Connection(e)) => Some(SessionEnd::UpstreamFailed(e)),
    }
}

/// Sends an optional final message and closes the client socket.
async fn close_client(client_tx: &ClientSink, last: Option<ServerMessage>) {
    let mut sink = client_tx.lock().await;
    if let Some(msg) = last {
        if let Err(e) = send_msg(&mut sink, msg).await {
            debug!(error = %e, "Could not deliver final message to client");
        }
    }
    if let Err(e) = sink.close().await {
        debug!(error = %e, "Client close handshake did not complete");
    }
}

/// A helper function to serialize and send a `ServerMessage` to the client.
pub(crate) async fn send_msg(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    msg: ServerMessage,
) -> Result<()> {
    let serialized = serde_json::to_string(&msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}
