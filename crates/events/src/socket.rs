//! WebSocket gateway onto the message bus.
//!
//! Clients connect to `GET /ws?node_id=..&kind=..`. Text frames carry JSON
//! `NeuralMessage`s in both directions; binary and malformed frames are
//! dropped without closing the connection. The server pings every heartbeat
//! interval and treats pongs as heartbeats.

use std::sync::Arc;

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use synapse_core::ResultExt;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::bus::MessageBus;
use crate::error::{Error, Result};
use crate::registry::NodeRegistration;
use crate::types::{NodeId, NodeKind, NodeMetadata};

/// Query parameters of the upgrade request.
#[derive(Debug, Clone, Deserialize)]
pub struct Handshake {
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default = "default_kind")]
    pub kind: NodeKind,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

const fn default_kind() -> NodeKind {
    NodeKind::Ui
}

impl Handshake {
    /// Registration for this handshake; a missing or blank id is generated.
    pub fn into_registration(self) -> NodeRegistration {
        let id = self
            .node_id
            .filter(|id| !id.trim().is_empty())
            .map_or_else(|| NodeId::generate(self.kind.as_str()), NodeId::new);
        let metadata = NodeMetadata {
            role: self.role,
            display_name: self.display_name,
            ..NodeMetadata::default()
        };
        NodeRegistration::new(id, self.kind).with_metadata(metadata)
    }
}

/// Router exposing the gateway at `/ws`.
pub fn router(bus: Arc<MessageBus>) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(bus)
}

/// GET /ws - WebSocket upgrade endpoint
async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(handshake): Query<Handshake>,
    State(bus): State<Arc<MessageBus>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, bus, handshake))
}

/// Connection lifecycle: register -> frame loop -> close.
async fn handle_socket(socket: WebSocket, bus: Arc<MessageBus>, handshake: Handshake) {
    let mut connection = match bus.connect(handshake.into_registration()).await {
        Ok(connection) => connection,
        Err(e) => {
            error!(error = %e, "Failed to register connection");
            return;
        }
    };
    let node_id = connection.node_id().clone();
    info!(node_id = %node_id, "WebSocket connection established");

    let (mut sender, mut receiver) = socket.split();
    let mut ping = tokio::time::interval(bus.registry().config().heartbeat_interval());

    loop {
        tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    bus.handle_frame(&node_id, text.as_str()).await;
                }
                Some(Ok(Message::Binary(_))) => {
                    warn!(node_id = %node_id, "Dropping binary frame");
                }
                Some(Ok(Message::Pong(_) | Message::Ping(_))) => {
                    bus.registry().heartbeat(&node_id).await.ok_logged("Heartbeat for unregistered node");
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!(node_id = %node_id, "Client disconnected");
                    break;
                }
                Some(Err(e)) => {
                    warn!(node_id = %node_id, error = %e, "WebSocket receive failed");
                    break;
                }
            },
            outgoing = connection.recv() => match outgoing {
                Some(message) => match message.to_json() {
                    Ok(json) => {
                        if let Err(e) = sender.send(Message::Text(json.into())).await {
                            warn!(node_id = %node_id, error = %e, "WebSocket send failed");
                            break;
                        }
                    }
                    Err(e) => warn!(node_id = %node_id, error = %e, "Failed to encode message"),
                },
                None => {
                    debug!(node_id = %node_id, "Connection dropped by bus");
                    break;
                }
            },
            _ = ping.tick() => {
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    bus.close(connection).await;
    info!(node_id = %node_id, "WebSocket connection closed");
}

/// Serve the gateway on `listener` until `shutdown` flips to `true`.
///
/// # Errors
///
/// Returns `Error::Internal` if the server fails.
pub async fn serve(listener: TcpListener, bus: Arc<MessageBus>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Socket gateway listening");
    }
    axum::serve(listener, router(bus))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .map_err(|e| Error::Internal(format!("socket gateway failed: {e}")))
}
