//! The Rules namespace: CRUD and execution of rules.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use otto_rules::{Rule, RuleError};
use otto_types::{DeviceId, RuleId};

use crate::handler::{HandlerContext, HandlerOutcome, JsonHandler};
use crate::schema::{Field, MethodDescriptor, NotificationDescriptor, Schema};

pub struct RulesHandler {
    methods: Vec<MethodDescriptor>,
    notifications: Vec<NotificationDescriptor>,
}

/// Serialize a rule for the wire: the stored shape plus the runtime
/// `active` flag.
pub fn pack_rule(rule: &Rule) -> Value {
    let mut value = serde_json::to_value(rule).unwrap_or_else(|_| json!({}));
    if let Some(map) = value.as_object_mut() {
        map.insert("active".to_string(), json!(rule.active));
    }
    value
}

fn pack_rule_description(rule: &Rule) -> Value {
    json!({
        "id": rule.id,
        "name": rule.name,
        "enabled": rule.enabled,
        "active": rule.active,
        "executable": rule.executable,
    })
}

fn rule_error_name(result: Result<(), RuleError>) -> &'static str {
    match result {
        Ok(()) => "NoError",
        Err(e) => e.name(),
    }
}

fn rule_fields() -> Vec<Field> {
    vec![
        Field::optional("name", Schema::String),
        Field::required("actions", Schema::Array(Box::new(Schema::Object))),
        Field::optional("eventDescriptors", Schema::Array(Box::new(Schema::Object))),
        Field::optional("stateEvaluator", Schema::Object),
        Field::optional("timeDescriptor", Schema::Object),
        Field::optional("exitActions", Schema::Array(Box::new(Schema::Object))),
        Field::optional("enabled", Schema::Bool),
        Field::optional("executable", Schema::Bool),
    ]
}

impl RulesHandler {
    pub fn new() -> Self {
        let mut edit_rule_params = vec![Field::required("ruleId", Schema::Uuid)];
        edit_rule_params.append(&mut rule_fields());

        let methods = vec![
            MethodDescriptor {
                name: "GetRules",
                description: "Get the descriptions of all configured rules.",
                params: vec![],
                returns: vec![Field::required(
                    "ruleDescriptions",
                    Schema::Array(Box::new(Schema::Ref("RuleDescription"))),
                )],
            },
            MethodDescriptor {
                name: "GetRuleDetails",
                description: "Get the full configuration of a rule.",
                params: vec![Field::required("ruleId", Schema::Uuid)],
                returns: vec![
                    Field::required("ruleError", Schema::Ref("RuleError")),
                    Field::optional("rule", Schema::Ref("Rule")),
                ],
            },
            MethodDescriptor {
                name: "AddRule",
                description: "Add a rule. The rule id is generated by the server and returned \
                              on success.",
                params: rule_fields(),
                returns: vec![
                    Field::required("ruleError", Schema::Ref("RuleError")),
                    Field::optional("ruleId", Schema::Uuid),
                ],
            },
            MethodDescriptor {
                name: "EditRule",
                description: "Replace the rule with the given id. The edit is atomic: if the \
                              new configuration is rejected, the previous one stays in place.",
                params: edit_rule_params,
                returns: vec![Field::required("ruleError", Schema::Ref("RuleError"))],
            },
            MethodDescriptor {
                name: "RemoveRule",
                description: "Remove a rule.",
                params: vec![Field::required("ruleId", Schema::Uuid)],
                returns: vec![Field::required("ruleError", Schema::Ref("RuleError"))],
            },
            MethodDescriptor {
                name: "EnableRule",
                description: "Enable a rule that was previously disabled.",
                params: vec![Field::required("ruleId", Schema::Uuid)],
                returns: vec![Field::required("ruleError", Schema::Ref("RuleError"))],
            },
            MethodDescriptor {
                name: "DisableRule",
                description: "Disable a rule. Disabled rules are never evaluated.",
                params: vec![Field::required("ruleId", Schema::Uuid)],
                returns: vec![Field::required("ruleError", Schema::Ref("RuleError"))],
            },
            MethodDescriptor {
                name: "ExecuteActions",
                description: "Execute the actions of a rule on request.",
                params: vec![Field::required("ruleId", Schema::Uuid)],
                returns: vec![Field::required("ruleError", Schema::Ref("RuleError"))],
            },
            MethodDescriptor {
                name: "ExecuteExitActions",
                description: "Execute the exit actions of a rule on request.",
                params: vec![Field::required("ruleId", Schema::Uuid)],
                returns: vec![Field::required("ruleError", Schema::Ref("RuleError"))],
            },
            MethodDescriptor {
                name: "FindRules",
                description: "Find all rules referencing a device anywhere in their \
                              configuration.",
                params: vec![Field::required("deviceId", Schema::Uuid)],
                returns: vec![Field::required(
                    "ruleIds",
                    Schema::Array(Box::new(Schema::Uuid)),
                )],
            },
        ];

        let notifications = vec![
            NotificationDescriptor {
                name: "RuleAdded",
                description: "Emitted whenever a rule is added.",
                params: vec![Field::required("rule", Schema::Ref("Rule"))],
            },
            NotificationDescriptor {
                name: "RuleRemoved",
                description: "Emitted whenever a rule is removed.",
                params: vec![Field::required("ruleId", Schema::Uuid)],
            },
            NotificationDescriptor {
                name: "RuleConfigurationChanged",
                description: "Emitted whenever the configuration of a rule changes.",
                params: vec![Field::required("rule", Schema::Ref("Rule"))],
            },
            NotificationDescriptor {
                name: "RuleActiveChanged",
                description: "Emitted whenever a rule enters or leaves the active state.",
                params: vec![
                    Field::required("ruleId", Schema::Uuid),
                    Field::required("active", Schema::Bool),
                ],
            },
        ];

        Self {
            methods,
            notifications,
        }
    }

    fn rule_from_params(params: &Map<String, Value>, id: RuleId) -> Result<Rule, RuleError> {
        let mut map = params.clone();
        map.remove("ruleId");
        map.insert("id".to_string(), json!(id));
        serde_json::from_value(Value::Object(map)).map_err(|_| RuleError::InvalidRuleFormat)
    }

    fn param_rule_id(params: &Map<String, Value>) -> RuleId {
        params
            .get("ruleId")
            .and_then(Value::as_str)
            .and_then(|s| RuleId::parse(s).ok())
            .unwrap_or_default()
    }
}

impl Default for RulesHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JsonHandler for RulesHandler {
    fn name(&self) -> &'static str {
        "Rules"
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
            "GetRules" => {
                let descriptions: Vec<Value> = ctx
                    .core
                    .engine
                    .rules()
                    .iter()
                    .map(pack_rule_description)
                    .collect();
                HandlerOutcome::reply(json!({ "ruleDescriptions": descriptions }))
            }
            "GetRuleDetails" => {
                let rule_id = Self::param_rule_id(params);
                match ctx.core.engine.find_rule(rule_id) {
                    Some(rule) => HandlerOutcome::reply(json!({
                        "ruleError": "NoError",
                        "rule": pack_rule(rule),
                    })),
                    None => HandlerOutcome::reply(json!({
                        "ruleError": RuleError::RuleNotFound.name(),
                    })),
                }
            }
            "AddRule" => {
                let rule_id = RuleId::new();
                let rule = match Self::rule_from_params(params, rule_id) {
                    Ok(rule) => rule,
                    Err(e) => {
                        return HandlerOutcome::reply(json!({ "ruleError": e.name() }));
                    }
                };
                match ctx.core.engine.add_rule(rule, false).await {
                    Ok(()) => {
                        if let Some(rule) = ctx.core.engine.find_rule(rule_id) {
                            let packed = pack_rule(rule);
                            ctx.notify("Rules", "RuleAdded", json!({ "rule": packed }));
                        }
                        HandlerOutcome::reply(json!({
                            "ruleError": "NoError",
                            "ruleId": rule_id,
                        }))
                    }
                    Err(e) => HandlerOutcome::reply(json!({ "ruleError": e.name() })),
                }
            }
            "EditRule" => {
                let rule_id = Self::param_rule_id(params);
                let rule = match Self::rule_from_params(params, rule_id) {
                    Ok(rule) => rule,
                    Err(e) => {
                        return HandlerOutcome::reply(json!({ "ruleError": e.name() }));
                    }
                };
                match ctx.core.engine.edit_rule(rule).await {
                    Ok(()) => {
                        if let Some(rule) = ctx.core.engine.find_rule(rule_id) {
                            let packed = pack_rule(rule);
                            ctx.notify(
                                "Rules",
                                "RuleConfigurationChanged",
                                json!({ "rule": packed }),
                            );
                        }
                        HandlerOutcome::reply(json!({ "ruleError": "NoError" }))
                    }
                    Err(e) => HandlerOutcome::reply(json!({ "ruleError": e.name() })),
                }
            }
            "RemoveRule" => {
                let rule_id = Self::param_rule_id(params);
                match ctx.core.engine.remove_rule(rule_id, false).await {
                    Ok(()) => {
                        ctx.notify("Rules", "RuleRemoved", json!({ "ruleId": rule_id }));
                        HandlerOutcome::reply(json!({ "ruleError": "NoError" }))
                    }
                    Err(e) => HandlerOutcome::reply(json!({ "ruleError": e.name() })),
                }
            }
            "EnableRule" | "DisableRule" => {
                let rule_id = Self::param_rule_id(params);
                let result = if method == "EnableRule" {
                    ctx.core.engine.enable_rule(rule_id).await
                } else {
                    ctx.core.engine.disable_rule(rule_id).await
                };
                match result {
                    Ok(changed) => {
                        if changed {
                            if let Some(rule) = ctx.core.engine.find_rule(rule_id) {
                                let packed = pack_rule(rule);
                                ctx.notify(
                                    "Rules",
                                    "RuleConfigurationChanged",
                                    json!({ "rule": packed }),
                                );
                            }
                        }
                        HandlerOutcome::reply(json!({ "ruleError": "NoError" }))
                    }
                    Err(e) => HandlerOutcome::reply(json!({ "ruleError": e.name() })),
                }
            }
            "ExecuteActions" => {
                let rule_id = Self::param_rule_id(params);
                let result = ctx.core.engine.execute_actions(rule_id);
                HandlerOutcome::reply(json!({ "ruleError": rule_error_name(result) }))
            }
            "ExecuteExitActions" => {
                let rule_id = Self::param_rule_id(params);
                let result = ctx.core.engine.execute_exit_actions(rule_id);
                HandlerOutcome::reply(json!({ "ruleError": rule_error_name(result) }))
            }
            "FindRules" => {
                let device_id = params
                    .get("deviceId")
                    .and_then(Value::as_str)
                    .and_then(|s| DeviceId::parse(s).ok())
                    .unwrap_or_default();
                let rule_ids = ctx.core.engine.find_rules(device_id);
                HandlerOutcome::reply(json!({ "ruleIds": rule_ids }))
            }
            _ => HandlerOutcome::Reply(Map::new()),
        }
    }
}
