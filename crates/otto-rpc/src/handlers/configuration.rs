//! The Configuration namespace: server identity and transport endpoints.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};

use otto_config::{ConfigError, ConfigManager, ServerEndpoint};

use crate::handler::{HandlerContext, HandlerOutcome, JsonHandler};
use crate::schema::{Field, MethodDescriptor, NotificationDescriptor, Schema};

pub struct ConfigurationHandler {
    methods: Vec<MethodDescriptor>,
    notifications: Vec<NotificationDescriptor>,
}

fn config_error_name(result: Result<(), ConfigError>) -> &'static str {
    match result {
        Ok(()) => "NoError",
        Err(e) => e.name(),
    }
}

fn basic_configuration(config: &ConfigManager) -> Value {
    json!({
        "serverName": config.server_name(),
        "serverUuid": config.server_uuid(),
        "serverTime": Utc::now().timestamp(),
        "timeZone": config.settings().time_zone,
        "language": config.language(),
    })
}

impl ConfigurationHandler {
    pub fn new() -> Self {
        let methods = vec![
            MethodDescriptor {
                name: "GetConfigurations",
                description: "Get all configuration parameters of the server.",
                params: vec![],
                returns: vec![
                    Field::required("basicConfiguration", Schema::Object),
                    Field::required(
                        "tcpServerConfigurations",
                        Schema::Array(Box::new(Schema::Ref("ServerConfiguration"))),
                    ),
                    Field::required(
                        "webSocketServerConfigurations",
                        Schema::Array(Box::new(Schema::Ref("ServerConfiguration"))),
                    ),
                ],
            },
            MethodDescriptor {
                name: "GetTimeZones",
                description: "Get the list of available time zones.",
                params: vec![],
                returns: vec![Field::required(
                    "timeZones",
                    Schema::Array(Box::new(Schema::String)),
                )],
            },
            MethodDescriptor {
                name: "GetAvailableLanguages",
                description: "Get the list of locale codes the server ships translations for, \
                              e.g. en_US, de_DE.",
                params: vec![],
                returns: vec![Field::required(
                    "languages",
                    Schema::Array(Box::new(Schema::String)),
                )],
            },
            MethodDescriptor {
                name: "SetServerName",
                description: "Set the name of the server.",
                params: vec![Field::required("serverName", Schema::String)],
                returns: vec![Field::required(
                    "configurationError",
                    Schema::Ref("ConfigurationError"),
                )],
            },
            MethodDescriptor {
                name: "SetTimeZone",
                description: "Set the time zone of the server. See also: GetTimeZones.",
                params: vec![Field::required("timeZone", Schema::String)],
                returns: vec![Field::required(
                    "configurationError",
                    Schema::Ref("ConfigurationError"),
                )],
            },
            MethodDescriptor {
                name: "SetLanguage",
                description: "Set the server language. See also: GetAvailableLanguages.",
                params: vec![Field::required("language", Schema::String)],
                returns: vec![Field::required(
                    "configurationError",
                    Schema::Ref("ConfigurationError"),
                )],
            },
            MethodDescriptor {
                name: "SetTcpServerConfiguration",
                description: "Configure a TCP interface of the server. An existing id modifies \
                              that configuration, a new id adds one.",
                params: vec![Field::required(
                    "configuration",
                    Schema::Ref("ServerConfiguration"),
                )],
                returns: vec![Field::required(
                    "configurationError",
                    Schema::Ref("ConfigurationError"),
                )],
            },
            MethodDescriptor {
                name: "DeleteTcpServerConfiguration",
                description: "Delete a TCP interface of the server.",
                params: vec![Field::required("id", Schema::String)],
                returns: vec![Field::required(
                    "configurationError",
                    Schema::Ref("ConfigurationError"),
                )],
            },
            MethodDescriptor {
                name: "SetWebSocketServerConfiguration",
                description: "Configure a WebSocket interface of the server. An existing id \
                              modifies that configuration, a new id adds one.",
                params: vec![Field::required(
                    "configuration",
                    Schema::Ref("ServerConfiguration"),
                )],
                returns: vec![Field::required(
                    "configurationError",
                    Schema::Ref("ConfigurationError"),
                )],
            },
            MethodDescriptor {
                name: "DeleteWebSocketServerConfiguration",
                description: "Delete a WebSocket interface of the server.",
                params: vec![Field::required("id", Schema::String)],
                returns: vec![Field::required(
                    "configurationError",
                    Schema::Ref("ConfigurationError"),
                )],
            },
        ];

        let notifications = vec![
            NotificationDescriptor {
                name: "BasicConfigurationChanged",
                description: "Emitted whenever the basic configuration of the server changes.",
                params: vec![Field::required("basicConfiguration", Schema::Object)],
            },
            NotificationDescriptor {
                name: "LanguageChanged",
                description: "Emitted whenever the server language changes.",
                params: vec![Field::required("language", Schema::String)],
            },
            NotificationDescriptor {
                name: "TcpServerConfigurationChanged",
                description: "Emitted whenever a TCP server configuration changes.",
                params: vec![Field::required(
                    "configuration",
                    Schema::Ref("ServerConfiguration"),
                )],
            },
            NotificationDescriptor {
                name: "WebSocketServerConfigurationChanged",
                description: "Emitted whenever a WebSocket server configuration changes.",
                params: vec![Field::required(
                    "configuration",
                    Schema::Ref("ServerConfiguration"),
                )],
            },
        ];

        Self {
            methods,
            notifications,
        }
    }
}

impl Default for ConfigurationHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JsonHandler for ConfigurationHandler {
    fn name(&self) -> &'static str {
        "Configuration"
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
            "GetConfigurations" => HandlerOutcome::reply(json!({
                "basicConfiguration": basic_configuration(&ctx.core.config),
                "tcpServerConfigurations": ctx.core.config.settings().tcp_servers,
                "webSocketServerConfigurations": ctx.core.config.settings().web_socket_servers,
            })),
            "GetTimeZones" => HandlerOutcome::reply(json!({
                "timeZones": ConfigManager::available_time_zones(),
            })),
            "GetAvailableLanguages" => HandlerOutcome::reply(json!({
                "languages": ConfigManager::available_languages(),
            })),
            "SetServerName" => {
                let name = params["serverName"].as_str().unwrap_or_default();
                let result = ctx.core.config.set_server_name(name).await;
                if result.is_ok() {
                    let basic = basic_configuration(&ctx.core.config);
                    ctx.notify(
                        "Configuration",
                        "BasicConfigurationChanged",
                        json!({ "basicConfiguration": basic }),
                    );
                }
                HandlerOutcome::reply(json!({ "configurationError": config_error_name(result) }))
            }
            "SetTimeZone" => {
                let time_zone = params["timeZone"].as_str().unwrap_or_default();
                let result = ctx.core.config.set_time_zone(time_zone).await;
                if result.is_ok() {
                    let zone = ctx.core.config.time_zone();
                    ctx.core.engine.set_time_zone(zone);
                    let basic = basic_configuration(&ctx.core.config);
                    ctx.notify(
                        "Configuration",
                        "BasicConfigurationChanged",
                        json!({ "basicConfiguration": basic }),
                    );
                }
                HandlerOutcome::reply(json!({ "configurationError": config_error_name(result) }))
            }
            "SetLanguage" => {
                let language = params["language"].as_str().unwrap_or_default().to_string();
                let result = ctx.core.config.set_language(&language).await;
                if result.is_ok() {
                    ctx.notify(
                        "Configuration",
                        "LanguageChanged",
                        json!({ "language": language }),
                    );
                }
                HandlerOutcome::reply(json!({ "configurationError": config_error_name(result) }))
            }
            "SetTcpServerConfiguration" | "SetWebSocketServerConfiguration" => {
                let endpoint: Result<ServerEndpoint, _> =
                    serde_json::from_value(params["configuration"].clone());
                let Ok(endpoint) = endpoint else {
                    return HandlerOutcome::reply(json!({
                        "configurationError": ConfigError::InvalidHostAddress.name(),
                    }));
                };
                let packed = json!({ "configuration": &endpoint });
                let result = if method == "SetTcpServerConfiguration" {
                    ctx.core.config.set_tcp_server(endpoint).await
                } else {
                    ctx.core.config.set_web_socket_server(endpoint).await
                };
                if result.is_ok() {
                    let notification = if method == "SetTcpServerConfiguration" {
                        "TcpServerConfigurationChanged"
                    } else {
                        "WebSocketServerConfigurationChanged"
                    };
                    ctx.notify("Configuration", notification, packed);
                }
                HandlerOutcome::reply(json!({ "configurationError": config_error_name(result) }))
            }
            "DeleteTcpServerConfiguration" | "DeleteWebSocketServerConfiguration" => {
                let id = params["id"].as_str().unwrap_or_default();
                let is_tcp = method == "DeleteTcpServerConfiguration";
                let endpoints = if is_tcp {
                    &ctx.core.config.settings().tcp_servers
                } else {
                    &ctx.core.config.settings().web_socket_servers
                };
                let removed = endpoints.iter().find(|e| e.id == id).cloned();
                let result = if is_tcp {
                    ctx.core.config.delete_tcp_server(id).await
                } else {
                    ctx.core.config.delete_web_socket_server(id).await
                };
                if result.is_ok() {
                    if let Some(endpoint) = removed {
                        let notification = if is_tcp {
                            "TcpServerConfigurationChanged"
                        } else {
                            "WebSocketServerConfigurationChanged"
                        };
                        ctx.notify(
                            "Configuration",
                            notification,
                            json!({ "configuration": endpoint }),
                        );
                    }
                }
                HandlerOutcome::reply(json!({ "configurationError": config_error_name(result) }))
            }
            _ => HandlerOutcome::Reply(Map::new()),
        }
    }
}
