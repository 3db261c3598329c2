//! The rule entity.

use serde::{Deserialize, Serialize};

use otto_types::{DeviceId, EventDescriptor, RuleAction, RuleId};

use crate::state_evaluator::StateEvaluator;
use crate::time::TimeDescriptor;

/// A rule: triggers (events and/or time), gates (states and calendar
/// windows) and effects (actions, and exit actions for the moment the rule
/// turns inactive).
///
/// The serialized form carries only user-supplied configuration; the
/// `states_active` / `time_active` / `active` flags are engine runtime
/// state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: RuleId,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub executable: bool,
    #[serde(default, skip_serializing_if = "TimeDescriptor::is_empty")]
    pub time_descriptor: TimeDescriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_evaluator: Option<StateEvaluator>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub event_descriptors: Vec<EventDescriptor>,
    #[serde(default)]
    pub actions: Vec<RuleAction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exit_actions: Vec<RuleAction>,

    #[serde(skip)]
    pub states_active: bool,
    #[serde(skip)]
    pub time_active: bool,
    #[serde(skip)]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl Rule {
    pub fn new(id: RuleId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            enabled: true,
            executable: true,
            time_descriptor: TimeDescriptor::default(),
            state_evaluator: None,
            event_descriptors: Vec::new(),
            actions: Vec::new(),
            exit_actions: Vec::new(),
            states_active: false,
            time_active: false,
            active: false,
        }
    }

    /// Consistency per the rule model:
    /// - at least one action,
    /// - no exit actions when the rule is event-triggered or carries time
    ///   event items (they would be unreachable).
    pub fn is_consistent(&self) -> bool {
        if self.actions.is_empty() {
            return false;
        }
        if !self.exit_actions.is_empty()
            && (!self.event_descriptors.is_empty()
                || !self.time_descriptor.time_event_items.is_empty())
        {
            return false;
        }
        true
    }

    /// True if any part of the rule references the given device.
    pub fn references_device(&self, device_id: DeviceId) -> bool {
        self.event_descriptors
            .iter()
            .any(|d| d.device_id == device_id)
            || self
                .state_evaluator
                .as_ref()
                .is_some_and(|e| e.contains_device(device_id))
            || self.actions.iter().any(|a| a.device_id == device_id)
            || self.exit_actions.iter().any(|a| a.device_id == device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::TimeEventItem;
    use chrono::NaiveTime;
    use otto_types::{ActionTypeId, EventTypeId};

    fn some_action() -> RuleAction {
        RuleAction::new(ActionTypeId::new(), DeviceId::new(), vec![])
    }

    #[test]
    fn rule_without_actions_is_inconsistent() {
        let rule = Rule::new(RuleId::new(), "noop");
        assert!(!rule.is_consistent());
    }

    #[test]
    fn event_rule_with_exit_actions_is_inconsistent() {
        let mut rule = Rule::new(RuleId::new(), "doorbell");
        rule.actions = vec![some_action()];
        rule.event_descriptors = vec![EventDescriptor::device_based(
            EventTypeId::new(),
            DeviceId::new(),
            vec![],
        )];
        assert!(rule.is_consistent());

        rule.exit_actions = vec![some_action()];
        assert!(!rule.is_consistent());
    }

    #[test]
    fn time_event_rule_with_exit_actions_is_inconsistent() {
        let mut rule = Rule::new(RuleId::new(), "wakeup");
        rule.actions = vec![some_action()];
        rule.exit_actions = vec![some_action()];
        rule.time_descriptor = TimeDescriptor::from_time_event_items(vec![TimeEventItem::at_time(
            NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
        )]);
        assert!(!rule.is_consistent());
    }

    #[test]
    fn runtime_flags_are_not_serialized() {
        let mut rule = Rule::new(RuleId::new(), "r");
        rule.actions = vec![some_action()];
        rule.active = true;
        rule.states_active = true;

        let json = serde_json::to_value(&rule).unwrap();
        assert!(json.get("active").is_none());
        assert!(json.get("statesActive").is_none());

        let back: Rule = serde_json::from_value(json).unwrap();
        assert!(!back.active);
    }

    #[test]
    fn serialize_parse_serialize_is_stable() {
        let mut rule = Rule::new(RuleId::new(), "stable");
        rule.actions = vec![some_action()];
        let first = serde_json::to_string(&rule).unwrap();
        let parsed: Rule = serde_json::from_str(&first).unwrap();
        let second = serde_json::to_string(&parsed).unwrap();
        assert_eq!(first, second);
    }
}
