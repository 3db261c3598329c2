//! The JSON-RPC dispatcher.
//!
//! One task owns all core state. Transports, the device registry and the
//! clock feed it through a single event channel; requests are parsed,
//! gated, validated and routed here, replies and notifications flow back
//! through the per-client senders. Async replies re-enter the loop as
//! events so return validation stays on the core task.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use otto_rules::RuleOutcome;
use otto_types::{Event, PairingTransactionId};

use crate::handler::{ClientId, Core, Effect, HandlerContext, HandlerOutcome, JsonHandler};
use crate::handlers::{ConfigurationHandler, JsonRpcHandler, RulesHandler};
use crate::schema::{introspection_document, validate_object};
use crate::transport::{TransportEvent, TransportHandle};
use crate::wire::{
    error_response, notification_message, success_response, unauthorized_response, Request,
    JSON_PROTOCOL_VERSION,
};

/// Default deadline for async replies.
const ASYNC_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything that can wake the dispatcher.
#[derive(Debug)]
pub enum ServerEvent {
    Transport(TransportEvent),
    DeviceEvent(Event),
    TimeTick(DateTime<Utc>),
    PushButtonPressed,
    CloudConnectedChanged(bool),
    AsyncReplyFinished {
        client_id: ClientId,
        command_id: i32,
        namespace: String,
        method: String,
        /// `None` when the reply deadline expired.
        reply: Option<Map<String, Value>>,
    },
}

/// Cheap cloneable sender half; transports and the host feed the
/// dispatcher through this.
#[derive(Clone)]
pub struct ServerHandle {
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl ServerHandle {
    pub fn transport_event(&self, event: TransportEvent) {
        let _ = self.tx.send(ServerEvent::Transport(event));
    }

    pub fn device_event(&self, event: Event) {
        let _ = self.tx.send(ServerEvent::DeviceEvent(event));
    }

    pub fn time_tick(&self, now: DateTime<Utc>) {
        let _ = self.tx.send(ServerEvent::TimeTick(now));
    }

    pub fn push_button_pressed(&self) {
        let _ = self.tx.send(ServerEvent::PushButtonPressed);
    }

    pub fn set_cloud_connected(&self, connected: bool) {
        let _ = self.tx.send(ServerEvent::CloudConnectedChanged(connected));
    }
}

struct ClientContext {
    handle: TransportHandle,
    notifications_enabled: bool,
}

pub struct RpcServer {
    core: Core,
    handlers: Vec<Box<dyn JsonHandler>>,
    introspection: Value,
    clients: HashMap<ClientId, ClientContext>,
    /// transaction id → requesting client
    push_button_clients: HashMap<PairingTransactionId, ClientId>,
    notification_id: i32,
    async_reply_timeout: Duration,
    rx: mpsc::UnboundedReceiver<ServerEvent>,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl RpcServer {
    pub fn new(core: Core) -> (Self, ServerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handlers: Vec<Box<dyn JsonHandler>> = vec![
            Box::new(JsonRpcHandler::new()),
            Box::new(RulesHandler::new()),
            Box::new(ConfigurationHandler::new()),
        ];
        let mut server = Self {
            core,
            handlers,
            introspection: Value::Null,
            clients: HashMap::new(),
            push_button_clients: HashMap::new(),
            notification_id: 0,
            async_reply_timeout: ASYNC_REPLY_TIMEOUT,
            rx,
            tx: tx.clone(),
        };
        server.rebuild_introspection();
        (server, ServerHandle { tx })
    }

    /// Register an additional namespace handler before running.
    pub fn register_handler(&mut self, handler: Box<dyn JsonHandler>) {
        self.handlers.push(handler);
        self.rebuild_introspection();
    }

    /// Override the async reply deadline.
    pub fn set_async_reply_timeout(&mut self, timeout: Duration) {
        self.async_reply_timeout = timeout;
    }

    fn rebuild_introspection(&mut self) {
        self.introspection = introspection_document(
            self.handlers
                .iter()
                .map(|h| (h.name(), h.methods(), h.notifications())),
        );
    }

    /// Run until all `ServerHandle`s are dropped.
    pub async fn run(mut self) {
        info!("JSON-RPC server running");
        while let Some(event) = self.rx.recv().await {
            self.process(event).await;
        }
        info!("JSON-RPC server stopped");
    }

    async fn process(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Transport(TransportEvent::ClientConnected { client_id, handle }) => {
                debug!(%client_id, "Client connected");
                // Notifications start disabled on transports requiring
                // authentication; the client has to opt in.
                let notifications_enabled = !handle.auth_required;
                let welcome = self.welcome_message(handle.auth_required).await;
                self.clients.insert(
                    client_id,
                    ClientContext {
                        handle,
                        notifications_enabled,
                    },
                );
                self.send_to_client(client_id, welcome.to_string());
            }
            ServerEvent::Transport(TransportEvent::ClientDisconnected { client_id }) => {
                debug!(%client_id, "Client disconnected");
                self.clients.remove(&client_id);
                let owned: Vec<PairingTransactionId> = self
                    .push_button_clients
                    .iter()
                    .filter(|(_, owner)| **owner == client_id)
                    .map(|(tx, _)| *tx)
                    .collect();
                for transaction_id in owned {
                    self.core.push_button.cancel(transaction_id);
                    self.push_button_clients.remove(&transaction_id);
                }
            }
            ServerEvent::Transport(TransportEvent::DataAvailable { client_id, data }) => {
                self.process_data(client_id, &data).await;
            }
            ServerEvent::DeviceEvent(event) => {
                let outcomes = self.core.engine.evaluate_event(&event);
                self.dispatch_outcomes(&outcomes, Some(&event));
            }
            ServerEvent::TimeTick(now) => {
                let outcomes = self.core.engine.evaluate_time(now);
                self.dispatch_outcomes(&outcomes, None);
            }
            ServerEvent::PushButtonPressed => {
                self.handle_push_button_pressed().await;
            }
            ServerEvent::CloudConnectedChanged(connected) => {
                self.core.cloud_connected = connected;
                self.fanout(
                    "JSONRPC",
                    "CloudConnectedChanged",
                    json!({ "connected": connected }),
                );
            }
            ServerEvent::AsyncReplyFinished {
                client_id,
                command_id,
                namespace,
                method,
                reply,
            } => match reply {
                Some(map) => {
                    self.warn_on_invalid_returns(&namespace, &method, &map);
                    self.send_to_client(
                        client_id,
                        success_response(command_id, Value::Object(map)),
                    );
                }
                None => {
                    warn!(namespace, method, "Async reply timed out");
                    self.send_to_client(client_id, error_response(command_id, "Command timed out"));
                }
            },
        }
    }

    async fn process_data(&mut self, client_id: ClientId, data: &str) {
        debug!(%client_id, data, "Incoming data");
        let Some(auth_required) = self
            .clients
            .get(&client_id)
            .map(|c| c.handle.auth_required)
        else {
            warn!(%client_id, "Data from unknown client");
            return;
        };

        let request = match Request::parse(data) {
            Ok(request) => request,
            Err(e) => {
                self.send_to_client(client_id, error_response(e.id, &e.message));
                return;
            }
        };

        if auth_required && !self.authorize(&request).await {
            let message = if self.users_empty().await {
                "Initial setup required. Call CreateUser first."
            } else {
                "Forbidden: Invalid token."
            };
            self.send_to_client(client_id, unauthorized_response(request.id, message));
            return;
        }

        let Some(handler_index) = self
            .handlers
            .iter()
            .position(|h| h.name() == request.namespace)
        else {
            self.send_to_client(client_id, error_response(request.id, "No such namespace"));
            return;
        };

        let Some(descriptor) = self.handlers[handler_index].method(&request.method) else {
            self.send_to_client(client_id, error_response(request.id, "No such method"));
            return;
        };

        if let Err(e) = validate_object(&descriptor.params, &request.params) {
            self.send_to_client(
                client_id,
                error_response(request.id, &format!("Invalid params: {e}")),
            );
            return;
        }

        // Hello and Introspect need dispatcher-level state and are answered
        // here; their schemas live in the JSONRPC handler's table.
        if request.namespace == "JSONRPC" && request.method == "Hello" {
            let welcome = self.welcome_message(auth_required).await;
            self.send_to_client(client_id, success_response(request.id, welcome));
            return;
        }
        if request.namespace == "JSONRPC" && request.method == "Introspect" {
            let doc = self.introspection.clone();
            self.send_to_client(client_id, success_response(request.id, doc));
            return;
        }

        debug!(namespace = %request.namespace, method = %request.method, "Invoking method");
        let mut ctx = HandlerContext {
            core: &mut self.core,
            client_id,
            token: request.token.clone(),
            effects: Vec::new(),
        };
        let outcome = self.handlers[handler_index]
            .handle(&request.method, &request.params, &mut ctx)
            .await;
        let effects = ctx.effects;

        match outcome {
            HandlerOutcome::Reply(map) => {
                self.warn_on_invalid_returns(&request.namespace, &request.method, &map);
                self.send_to_client(client_id, success_response(request.id, Value::Object(map)));
            }
            HandlerOutcome::Async(receiver) => {
                let tx = self.tx.clone();
                let timeout = self.async_reply_timeout;
                let namespace = request.namespace.clone();
                let method = request.method.clone();
                let command_id = request.id;
                tokio::spawn(async move {
                    let reply = tokio::time::timeout(timeout, receiver).await.ok().and_then(Result::ok);
                    let _ = tx.send(ServerEvent::AsyncReplyFinished {
                        client_id,
                        command_id,
                        namespace,
                        method,
                        reply,
                    });
                });
            }
        }

        for effect in effects {
            self.apply_effect(client_id, effect);
        }
    }

    async fn users_empty(&self) -> bool {
        self.core.users.users().await.unwrap_or_default().is_empty()
    }

    /// The per-method authentication gate for transports that require it.
    async fn authorize(&self, request: &Request) -> bool {
        let exempt: &[&str] = if self.users_empty().await {
            &["Introspect", "Hello", "CreateUser", "RequestPushButtonAuth"]
        } else {
            &["Introspect", "Hello", "Authenticate", "RequestPushButtonAuth"]
        };
        if request.namespace == "JSONRPC" && exempt.contains(&request.method.as_str()) {
            return true;
        }
        match &request.token {
            Some(token) => self.core.users.verify_token(token).await,
            None => false,
        }
    }

    /// The unsolicited welcome sent on connect, also returned by Hello.
    async fn welcome_message(&self, auth_required: bool) -> Value {
        let users_empty = self.users_empty().await;
        json!({
            "id": 0,
            "server": "otto",
            "name": self.core.config.server_name(),
            "version": env!("CARGO_PKG_VERSION"),
            "uuid": self.core.config.server_uuid(),
            "language": self.core.config.language(),
            "protocol version": JSON_PROTOCOL_VERSION,
            "initialSetupRequired": auth_required && users_empty,
            "authenticationRequired": auth_required,
            "pushButtonAuthAvailable": self.core.push_button_available,
        })
    }

    fn warn_on_invalid_returns(&self, namespace: &str, method: &str, map: &Map<String, Value>) {
        let Some(descriptor) = self
            .handlers
            .iter()
            .find(|h| h.name() == namespace)
            .and_then(|h| h.method(method))
        else {
            return;
        };
        if let Err(e) = validate_object(&descriptor.returns, map) {
            warn!(namespace, method, error = %e, "Return value does not match the declared schema");
            debug_assert!(false, "invalid returns for {namespace}.{method}: {e}");
        }
    }

    async fn handle_push_button_pressed(&mut self) {
        let Some(transaction) = self.core.push_button.press() else {
            return;
        };
        let (status, token) = match self
            .core
            .users
            .create_push_button_token(&transaction.device_name)
            .await
        {
            Ok(token) => ("NoError", Some(token)),
            Err(e) => {
                warn!(error = %e, "Could not persist push-button token");
                (e.name(), None)
            }
        };

        let Some(requester) = self
            .push_button_clients
            .remove(&transaction.transaction_id)
        else {
            debug!("Push-button reply without a requesting client");
            return;
        };
        let mut params = json!({
            "transactionId": transaction.transaction_id,
            "status": status,
        });
        if let Some(token) = token {
            params["token"] = json!(token);
        }
        self.notify_single(requester, "JSONRPC", "PushButtonAuthFinished", params);
    }

    fn dispatch_outcomes(&mut self, outcomes: &[RuleOutcome], event: Option<&Event>) {
        for outcome in outcomes {
            self.core.engine.dispatch(outcome, event);
        }
        for outcome in outcomes {
            if let RuleOutcome::ActiveChanged { rule } = outcome {
                self.fanout(
                    "Rules",
                    "RuleActiveChanged",
                    json!({ "ruleId": rule.id, "active": rule.active }),
                );
            }
        }
    }

    fn apply_effect(&mut self, client_id: ClientId, effect: Effect) {
        match effect {
            Effect::Notify {
                namespace,
                name,
                params,
            } => self.fanout(namespace, name, params),
            Effect::SetNotificationsEnabled(enabled) => {
                if let Some(client) = self.clients.get_mut(&client_id) {
                    client.notifications_enabled = enabled;
                }
            }
            Effect::PushButtonStarted { transaction_id } => {
                self.push_button_clients.insert(transaction_id, client_id);
            }
            Effect::PushButtonPreempted { transaction_id } => {
                if let Some(requester) = self.push_button_clients.remove(&transaction_id) {
                    self.notify_single(
                        requester,
                        "JSONRPC",
                        "PushButtonAuthFinished",
                        json!({
                            "transactionId": transaction_id,
                            "status": "PermissionDenied",
                        }),
                    );
                }
            }
        }
    }

    fn next_notification_id(&mut self) -> i32 {
        let id = self.notification_id;
        self.notification_id = self.notification_id.wrapping_add(1);
        id
    }

    /// Send a notification to every client with notifications enabled.
    fn fanout(&mut self, namespace: &str, name: &str, params: Value) {
        let id = self.next_notification_id();
        let frame = notification_message(id, &format!("{namespace}.{name}"), params);
        for client in self.clients.values().filter(|c| c.notifications_enabled) {
            let _ = client.handle.sender.send(frame.clone());
        }
    }

    /// Send a notification to one client, regardless of its
    /// notification-enable flag.
    fn notify_single(&mut self, client_id: ClientId, namespace: &str, name: &str, params: Value) {
        let id = self.next_notification_id();
        let frame = notification_message(id, &format!("{namespace}.{name}"), params);
        self.send_to_client(client_id, frame);
    }

    fn send_to_client(&self, client_id: ClientId, frame: String) {
        if let Some(client) = self.clients.get(&client_id) {
            debug!(%client_id, frame = %frame, "Sending data");
            let _ = client.handle.sender.send(frame);
        }
    }
}
