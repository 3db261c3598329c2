//! Handler model: one handler per namespace, explicit method tables,
//! synchronous or async replies, and effects the dispatcher applies after
//! the handler returns.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use uuid::Uuid;

use otto_config::ConfigManager;
use otto_devices::DeviceRegistry;
use otto_rules::RuleEngine;
use otto_types::PairingTransactionId;
use otto_users::{PushButtonManager, UserManager};

use crate::schema::{MethodDescriptor, NotificationDescriptor};

/// Identifies one connected client across all transports.
pub type ClientId = Uuid;

/// All core state a handler may touch. Owned by the dispatcher task;
/// handlers get exclusive access for the duration of one call.
pub struct Core {
    pub engine: RuleEngine,
    pub users: UserManager,
    pub push_button: PushButtonManager,
    pub config: ConfigManager,
    pub registry: Arc<dyn DeviceRegistry>,
    /// Whether a physical push button is wired up on this installation.
    pub push_button_available: bool,
    pub cloud_connected: bool,
}

/// Side effects a handler requests; the dispatcher applies them after the
/// call returns.
#[derive(Debug)]
pub enum Effect {
    /// Fan a notification out to every client with notifications enabled.
    Notify {
        namespace: &'static str,
        name: &'static str,
        params: Value,
    },
    /// Flip the calling client's notification-enable flag.
    SetNotificationsEnabled(bool),
    /// A push-button transaction started for the calling client.
    PushButtonStarted {
        transaction_id: PairingTransactionId,
    },
    /// A pending transaction was pre-empted; its requester gets the
    /// failure notification.
    PushButtonPreempted {
        transaction_id: PairingTransactionId,
    },
}

/// Per-call context handed to a handler.
pub struct HandlerContext<'a> {
    pub core: &'a mut Core,
    pub client_id: ClientId,
    /// The (already verified) token the request carried, if any.
    pub token: Option<String>,
    pub effects: Vec<Effect>,
}

impl HandlerContext<'_> {
    pub fn notify(&mut self, namespace: &'static str, name: &'static str, params: Value) {
        self.effects.push(Effect::Notify {
            namespace,
            name,
            params,
        });
    }
}

/// What a method call produced: an immediate reply or a one-shot handle
/// the dispatcher waits on (with a deadline).
pub enum HandlerOutcome {
    Reply(Map<String, Value>),
    Async(oneshot::Receiver<Map<String, Value>>),
}

impl HandlerOutcome {
    pub fn reply(value: Value) -> Self {
        match value {
            Value::Object(map) => HandlerOutcome::Reply(map),
            _ => HandlerOutcome::Reply(Map::new()),
        }
    }
}

/// One namespace of the API.
#[async_trait]
pub trait JsonHandler: Send + Sync {
    /// The namespace, e.g. "Rules".
    fn name(&self) -> &'static str;

    fn methods(&self) -> &[MethodDescriptor];

    fn notifications(&self) -> &[NotificationDescriptor];

    fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods().iter().find(|m| m.name == name)
    }

    /// Invoke a method. `params` are already validated against the
    /// method's declared schema.
    async fn handle(
        &self,
        method: &str,
        params: &Map<String, Value>,
        ctx: &mut HandlerContext<'_>,
    ) -> HandlerOutcome;
}
