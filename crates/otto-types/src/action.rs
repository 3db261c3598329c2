//! Actions and the rule action parameter binding forms.

use serde::{Deserialize, Serialize};

use crate::event::Event;
use crate::id::{ActionTypeId, DeviceId, EventTypeId, ParamTypeId};
use crate::param::Param;
use crate::value::TypedValue;

/// A typed command directed at a device, ready for dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub action_type_id: ActionTypeId,
    pub device_id: DeviceId,
    #[serde(default)]
    pub params: Vec<Param>,
}

/// One parameter of a rule action.
///
/// Either a literal `value`, or a binding (`eventTypeId` +
/// `eventParamTypeId`) resolved at fire time from the triggering event.
/// Exactly one of the two forms must be set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleActionParam {
    pub param_type_id: ParamTypeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<TypedValue>,
    #[serde(default, skip_serializing_if = "EventTypeId::is_nil")]
    pub event_type_id: EventTypeId,
    #[serde(default, skip_serializing_if = "ParamTypeId::is_nil")]
    pub event_param_type_id: ParamTypeId,
}

impl RuleActionParam {
    pub fn literal(param_type_id: ParamTypeId, value: impl Into<TypedValue>) -> Self {
        Self {
            param_type_id,
            value: Some(value.into()),
            event_type_id: EventTypeId::nil(),
            event_param_type_id: ParamTypeId::nil(),
        }
    }

    pub fn event_bound(
        param_type_id: ParamTypeId,
        event_type_id: EventTypeId,
        event_param_type_id: ParamTypeId,
    ) -> Self {
        Self {
            param_type_id,
            value: None,
            event_type_id,
            event_param_type_id,
        }
    }

    pub fn is_event_based(&self) -> bool {
        !self.event_type_id.is_nil()
    }

    /// A param is valid when exactly one of the forms is populated.
    pub fn is_valid(&self) -> bool {
        self.value.is_some() != self.is_event_based()
    }
}

/// An action template inside a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleAction {
    pub action_type_id: ActionTypeId,
    pub device_id: DeviceId,
    #[serde(default)]
    pub rule_action_params: Vec<RuleActionParam>,
}

impl RuleAction {
    pub fn new(
        action_type_id: ActionTypeId,
        device_id: DeviceId,
        rule_action_params: Vec<RuleActionParam>,
    ) -> Self {
        Self {
            action_type_id,
            device_id,
            rule_action_params,
        }
    }

    /// True if any param binds to a param of the triggering event.
    pub fn is_event_based(&self) -> bool {
        self.rule_action_params.iter().any(|p| p.is_event_based())
    }

    /// Materialize a dispatchable [`Action`], resolving event-bound params
    /// from `event`. Returns `None` when a binding cannot be satisfied.
    pub fn resolve(&self, event: Option<&Event>) -> Option<Action> {
        let mut params = Vec::with_capacity(self.rule_action_params.len());
        for rap in &self.rule_action_params {
            let value = if rap.is_event_based() {
                let event = event?;
                if event.event_type_id != rap.event_type_id {
                    return None;
                }
                event.param_value(rap.event_param_type_id)?.clone()
            } else {
                rap.value.clone()?
            };
            params.push(Param {
                param_type_id: rap.param_type_id,
                value,
            });
        }
        Some(Action {
            action_type_id: self.action_type_id,
            device_id: self.device_id,
            params,
        })
    }
}
