//! The JSONRPC namespace: protocol plumbing and authentication.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::warn;

use otto_types::{PairingTransactionId, TokenId};

use crate::handler::{Effect, HandlerContext, HandlerOutcome, JsonHandler};
use crate::schema::{Field, MethodDescriptor, NotificationDescriptor, Schema};
use crate::wire::JSON_PROTOCOL_VERSION;

pub struct JsonRpcHandler {
    methods: Vec<MethodDescriptor>,
    notifications: Vec<NotificationDescriptor>,
}

impl JsonRpcHandler {
    pub fn new() -> Self {
        let methods = vec![
            MethodDescriptor {
                name: "Hello",
                description: "Returns the same welcome message that is sent when a client \
                              connects. The contents may change if the system state changed in \
                              the meantime, e.g. initialSetupRequired turns false once the \
                              first user exists.",
                params: vec![],
                returns: vec![
                    Field::required("id", Schema::Int),
                    Field::required("server", Schema::String),
                    Field::required("name", Schema::String),
                    Field::required("version", Schema::String),
                    Field::required("uuid", Schema::Uuid),
                    Field::required("language", Schema::String),
                    Field::required("protocol version", Schema::String),
                    Field::required("initialSetupRequired", Schema::Bool),
                    Field::required("authenticationRequired", Schema::Bool),
                    Field::required("pushButtonAuthAvailable", Schema::Bool),
                ],
            },
            MethodDescriptor {
                name: "Introspect",
                description: "Introspect this API.",
                params: vec![],
                returns: vec![
                    Field::required("types", Schema::Object),
                    Field::required("methods", Schema::Object),
                    Field::required("notifications", Schema::Object),
                ],
            },
            MethodDescriptor {
                name: "Version",
                description: "Version of this server and its JSON protocol.",
                params: vec![],
                returns: vec![
                    Field::required("version", Schema::String),
                    Field::required("protocol version", Schema::String),
                ],
            },
            MethodDescriptor {
                name: "SetNotificationStatus",
                description: "Enable or disable notifications for this connection.",
                params: vec![Field::required("enabled", Schema::Bool)],
                returns: vec![Field::required("enabled", Schema::Bool)],
            },
            MethodDescriptor {
                name: "CreateUser",
                description: "Create a new user. Call Authenticate afterwards to obtain a \
                              device token for this user.",
                params: vec![
                    Field::required("username", Schema::String),
                    Field::required("password", Schema::String),
                ],
                returns: vec![Field::required("error", Schema::Ref("UserError"))],
            },
            MethodDescriptor {
                name: "Authenticate",
                description: "Authenticate with username and password. The device name allows \
                              the user to identify the client and revoke the returned token if \
                              the device is lost.",
                params: vec![
                    Field::required("username", Schema::String),
                    Field::required("password", Schema::String),
                    Field::required("deviceName", Schema::String),
                ],
                returns: vec![
                    Field::required("success", Schema::Bool),
                    Field::optional("token", Schema::String),
                ],
            },
            MethodDescriptor {
                name: "RequestPushButtonAuth",
                description: "Authenticate via the push button. When the button is pressed, \
                              the PushButtonAuthFinished notification is sent to the requesting \
                              client. A second request pre-empts the first; the pre-empted \
                              requester is notified of the failure.",
                params: vec![Field::required("deviceName", Schema::String)],
                returns: vec![
                    Field::required("success", Schema::Bool),
                    Field::required("transactionId", Schema::Uuid),
                ],
            },
            MethodDescriptor {
                name: "Tokens",
                description: "List the token metadata of all tokens of the current user.",
                params: vec![],
                returns: vec![Field::required(
                    "tokenInfoList",
                    Schema::Array(Box::new(Schema::Ref("TokenInfo"))),
                )],
            },
            MethodDescriptor {
                name: "RemoveToken",
                description: "Revoke access for a given token.",
                params: vec![Field::required("tokenId", Schema::Uuid)],
                returns: vec![Field::required("error", Schema::Ref("UserError"))],
            },
            MethodDescriptor {
                name: "IsCloudConnected",
                description: "Check whether the cloud relay is currently connected.",
                params: vec![],
                returns: vec![Field::required("connected", Schema::Bool)],
            },
        ];

        let notifications = vec![
            NotificationDescriptor {
                name: "CloudConnectedChanged",
                description: "Emitted whenever the cloud connection status changes.",
                params: vec![Field::required("connected", Schema::Bool)],
            },
            NotificationDescriptor {
                name: "PushButtonAuthFinished",
                description: "Emitted when a push button authentication reaches its final \
                              state. Only sent to the client that requested the transaction, \
                              regardless of its notification setting.",
                params: vec![
                    Field::required("transactionId", Schema::Uuid),
                    Field::required("status", Schema::Ref("UserError")),
                    Field::optional("token", Schema::String),
                ],
            },
        ];

        Self {
            methods,
            notifications,
        }
    }
}

impl Default for JsonRpcHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JsonHandler for JsonRpcHandler {
    fn name(&self) -> &'static str {
        "JSONRPC"
    }

    fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }

    fn notifications(&self) -> &[NotificationDescriptor] {
        &self.notifications
    }

    async fn handle(
        &self,
        method: &str,
        params: &Map<String, Value>,
        ctx: &mut HandlerContext<'_>,
    ) -> HandlerOutcome {
        match method {
            "Version" => HandlerOutcome::reply(json!({
                "version": env!("CARGO_PKG_VERSION"),
                "protocol version": JSON_PROTOCOL_VERSION,
            })),
            "SetNotificationStatus" => {
                let enabled = params["enabled"].as_bool().unwrap_or(false);
                ctx.effects.push(Effect::SetNotificationsEnabled(enabled));
                HandlerOutcome::reply(json!({ "enabled": enabled }))
            }
            "CreateUser" => {
                let username = params["username"].as_str().unwrap_or_default();
                let password = params["password"].as_str().unwrap_or_default();
                let error = match ctx.core.users.create_user(username, password).await {
                    Ok(()) => "NoError",
                    Err(e) => e.name(),
                };
                HandlerOutcome::reply(json!({ "error": error }))
            }
            "Authenticate" => {
                let username = params["username"].as_str().unwrap_or_default();
                let password = params["password"].as_str().unwrap_or_default();
                let device_name = params["deviceName"].as_str().unwrap_or_default();
                match ctx
                    .core
                    .users
                    .authenticate(username, password, device_name)
                    .await
                {
                    Ok(Some(token)) => {
                        HandlerOutcome::reply(json!({ "success": true, "token": token }))
                    }
                    _ => HandlerOutcome::reply(json!({ "success": false })),
                }
            }
            "RequestPushButtonAuth" => {
                if !ctx.core.push_button_available {
                    return HandlerOutcome::reply(json!({
                        "success": false,
                        "transactionId": PairingTransactionId::nil(),
                    }));
                }
                let device_name = params["deviceName"].as_str().unwrap_or_default();
                let (transaction_id, preempted) = ctx.core.push_button.request(device_name);
                if let Some(failure) = preempted {
                    ctx.effects.push(Effect::PushButtonPreempted {
                        transaction_id: failure.transaction_id,
                    });
                }
                ctx.effects.push(Effect::PushButtonStarted { transaction_id });
                HandlerOutcome::reply(json!({
                    "success": true,
                    "transactionId": transaction_id,
                }))
            }
            "Tokens" => {
                let token = ctx.token.as_deref().unwrap_or_default();
                let username = ctx
                    .core
                    .users
                    .user_for_token(token)
                    .await
                    .unwrap_or_default();
                let infos = ctx.core.users.tokens(&username).await.unwrap_or_default();
                HandlerOutcome::reply(json!({ "tokenInfoList": infos }))
            }
            "RemoveToken" => {
                let token_id = params["tokenId"]
                    .as_str()
                    .and_then(|s| TokenId::parse(s).ok())
                    .unwrap_or_default();
                let error = match ctx.core.users.remove_token(token_id).await {
                    Ok(()) => "NoError",
                    Err(e) => e.name(),
                };
                HandlerOutcome::reply(json!({ "error": error }))
            }
            "IsCloudConnected" => HandlerOutcome::reply(json!({
                "connected": ctx.core.cloud_connected,
            })),
            other => {
                // Hello and Introspect are answered by the dispatcher.
                warn!(method = other, "Unrouted JSONRPC method");
                HandlerOutcome::Reply(Map::new())
            }
        }
    }
}
