//! Transport abstraction.
//!
//! Concrete transports (TCP, WebSocket) run on their own tasks and cross
//! into the core only through the event channel: client connect/disconnect
//! and raw frames in, serialized frames out through the per-client sender
//! registered at connect time.

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::handler::ClientId;

/// A handle the dispatcher uses to reach one connected client.
#[derive(Debug, Clone)]
pub struct TransportHandle {
    /// Outbound frames for this client.
    pub sender: mpsc::UnboundedSender<String>,
    /// Whether the transport this client connected through requires
    /// authentication.
    pub auth_required: bool,
}

/// Events a transport feeds into the dispatcher.
#[derive(Debug)]
pub enum TransportEvent {
    ClientConnected {
        client_id: ClientId,
        handle: TransportHandle,
    },
    ClientDisconnected {
        client_id: ClientId,
    },
    DataAvailable {
        client_id: ClientId,
        data: String,
    },
}

/// Allocate a fresh client id.
pub fn new_client_id() -> ClientId {
    Uuid::new_v4()
}
