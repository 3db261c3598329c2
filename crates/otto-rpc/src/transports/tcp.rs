//! Plain TCP transport: one JSON object per newline-delimited frame.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use otto_config::ServerEndpoint;

use crate::server::ServerHandle;
use crate::transport::{new_client_id, TransportEvent, TransportHandle};

/// Bind and serve one TCP endpoint. Runs until the listener fails.
pub async fn serve(endpoint: ServerEndpoint, server: ServerHandle) -> std::io::Result<()> {
    let listener = TcpListener::bind((endpoint.address.as_str(), endpoint.port)).await?;
    info!(
        address = %endpoint.address,
        port = endpoint.port,
        "TCP server listening"
    );

    loop {
        let (stream, peer) = listener.accept().await?;
        debug!(%peer, "TCP client connecting");
        let server = server.clone();
        let auth_required = endpoint.authentication_enabled;
        tokio::spawn(async move {
            serve_client(stream, auth_required, server).await;
        });
    }
}

async fn serve_client(stream: TcpStream, auth_required: bool, server: ServerHandle) {
    let client_id = new_client_id();
    let (read_half, mut write_half) = stream.into_split();

    let (sender, mut outbound) = mpsc::unbounded_channel::<String>();
    server.transport_event(TransportEvent::ClientConnected {
        client_id,
        handle: TransportHandle {
            sender,
            auth_required,
        },
    });

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if write_half.write_all(frame.as_bytes()).await.is_err() {
                break;
            }
            if write_half.write_all(b"\n").await.is_err() {
                break;
            }
        }
    });

    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                server.transport_event(TransportEvent::DataAvailable {
                    client_id,
                    data: line,
                });
            }
            Ok(None) => break,
            Err(e) => {
                warn!(%client_id, error = %e, "TCP read error");
                break;
            }
        }
    }

    server.transport_event(TransportEvent::ClientDisconnected { client_id });
    writer.abort();
    debug!(%client_id, "TCP client gone");
}
