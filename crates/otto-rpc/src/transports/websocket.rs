//! WebSocket transport: one JSON object per text frame, served by axum.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use otto_config::ServerEndpoint;

use crate::server::ServerHandle;
use crate::transport::{new_client_id, TransportEvent, TransportHandle};

#[derive(Clone)]
struct WsState {
    server: ServerHandle,
    auth_required: bool,
}

/// Bind and serve one WebSocket endpoint. Runs until the listener fails.
pub async fn serve(endpoint: ServerEndpoint, server: ServerHandle) -> std::io::Result<()> {
    let state = WsState {
        server,
        auth_required: endpoint.authentication_enabled,
    };
    let app = Router::new()
        .route("/", get(upgrade_handler))
        .with_state(state);

    let listener = TcpListener::bind((endpoint.address.as_str(), endpoint.port)).await?;
    info!(
        address = %endpoint.address,
        port = endpoint.port,
        "WebSocket server listening"
    );
    axum::serve(listener, app)
        .await
        .map_err(std::io::Error::other)
}

async fn upgrade_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_client(socket, state))
}

async fn serve_client(socket: WebSocket, state: WsState) {
    let client_id = new_client_id();
    let (mut sink, mut stream) = socket.split();

    let (sender, mut outbound) = mpsc::unbounded_channel::<String>();
    state.server.transport_event(TransportEvent::ClientConnected {
        client_id,
        handle: TransportHandle {
            sender,
            auth_required: state.auth_required,
        },
    });

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if sink.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                state.server.transport_event(TransportEvent::DataAvailable {
                    client_id,
                    data: text,
                });
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(%client_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    state
        .server
        .transport_event(TransportEvent::ClientDisconnected { client_id });
    writer.abort();
    debug!(%client_id, "WebSocket client gone");
}
