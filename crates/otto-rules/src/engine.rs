//! The rule engine.
//!
//! Owns the rule index exclusively; every mutation persists before it takes
//! effect in memory or is reported to the caller. Evaluation walks rules in
//! insertion order and returns the rules that fired or changed their active
//! state; the caller dispatches actions and fans out notifications from the
//! returned outcomes.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use tracing::{debug, info, warn};

use otto_devices::{verify_params, DeviceRegistry};
use otto_types::{DeviceId, Event, EventDescriptor, RuleAction, RuleId, StateTypeId};

use crate::error::RuleError;
use crate::rule::Rule;
use crate::store::RuleStore;

/// What evaluation decided for one rule.
#[derive(Debug, Clone)]
pub enum RuleOutcome {
    /// A state/time gated rule crossed its active threshold; `rule.active`
    /// carries the new state. Actions fire on activation, exit actions on
    /// deactivation.
    ActiveChanged { rule: Rule },
    /// An event- or time-event-triggered rule fired (one-shot).
    Triggered { rule: Rule },
}

impl RuleOutcome {
    pub fn rule(&self) -> &Rule {
        match self {
            RuleOutcome::ActiveChanged { rule } | RuleOutcome::Triggered { rule } => rule,
        }
    }
}

pub struct RuleEngine {
    registry: Arc<dyn DeviceRegistry>,
    store: RuleStore,
    order: Vec<RuleId>,
    rules: HashMap<RuleId, Rule>,
    last_evaluation_time: Option<DateTime<Utc>>,
    time_zone: Tz,
}

impl RuleEngine {
    pub fn new(registry: Arc<dyn DeviceRegistry>, store: RuleStore, time_zone: Tz) -> Self {
        Self {
            registry,
            store,
            order: Vec::new(),
            rules: HashMap::new(),
            last_evaluation_time: None,
            time_zone,
        }
    }

    /// Load persisted rules. Dangling references are tolerated; the rules
    /// just evaluate false until their devices reappear or they get edited.
    pub async fn load(&mut self) -> Result<(), crate::store::StoreError> {
        let rules = self.store.load().await?;
        for rule in rules {
            self.append(rule);
        }
        info!(count = self.order.len(), "Rule engine loaded");
        Ok(())
    }

    pub fn set_time_zone(&mut self, time_zone: Tz) {
        self.time_zone = time_zone;
    }

    /// All rules in insertion order.
    pub fn rules(&self) -> Vec<Rule> {
        self.order
            .iter()
            .filter_map(|id| self.rules.get(id).cloned())
            .collect()
    }

    pub fn rule_count(&self) -> usize {
        self.order.len()
    }

    pub fn find_rule(&self, id: RuleId) -> Option<&Rule> {
        self.rules.get(&id)
    }

    /// Add a validated rule, persist it, and insert it into the index.
    pub async fn add_rule(&mut self, rule: Rule, from_edit: bool) -> Result<(), RuleError> {
        if rule.id.is_nil() {
            return Err(RuleError::InvalidRuleFormat);
        }
        if self.rules.contains_key(&rule.id) {
            warn!(rule_id = %rule.id, "Already have a rule with this id");
            return Err(RuleError::DuplicateId);
        }
        self.validate(&rule)?;

        if let Err(e) = self.store.save(&rule).await {
            warn!(rule_id = %rule.id, error = %e, "Could not persist rule");
            return Err(RuleError::BackendError);
        }
        let id = rule.id;
        self.append(rule);

        if !from_edit {
            debug!(rule_id = %id, "Rule added");
        }
        Ok(())
    }

    /// Atomic replace: remove the old rule, add the new one; on add failure
    /// the old rule is restored in memory and on disk.
    pub async fn edit_rule(&mut self, rule: Rule) -> Result<(), RuleError> {
        if rule.id.is_nil() {
            return Err(RuleError::InvalidRuleFormat);
        }
        let old = self
            .rules
            .get(&rule.id)
            .cloned()
            .ok_or(RuleError::RuleNotFound)?;

        self.remove_rule(old.id, true).await?;

        if let Err(e) = self.add_rule(rule, true).await {
            warn!(rule_id = %old.id, "Edit failed, restoring previous rule");
            if let Err(save_err) = self.store.save(&old).await {
                warn!(rule_id = %old.id, error = %save_err, "Could not re-persist previous rule");
            }
            self.append(old);
            return Err(e);
        }
        Ok(())
    }

    /// Remove a rule from the index, the active set and the persistent
    /// store.
    pub async fn remove_rule(&mut self, id: RuleId, from_edit: bool) -> Result<(), RuleError> {
        let Some(index) = self.order.iter().position(|r| *r == id) else {
            return Err(RuleError::RuleNotFound);
        };

        if let Err(e) = self.store.remove(id).await {
            warn!(rule_id = %id, error = %e, "Could not remove rule from store");
            return Err(RuleError::BackendError);
        }
        self.order.remove(index);
        self.rules.remove(&id);

        if !from_edit {
            debug!(rule_id = %id, "Rule removed");
        }
        Ok(())
    }

    /// Enable a rule. Idempotent; returns whether anything changed.
    pub async fn enable_rule(&mut self, id: RuleId) -> Result<bool, RuleError> {
        self.set_enabled(id, true).await
    }

    /// Disable a rule. Disabled rules are never evaluated.
    pub async fn disable_rule(&mut self, id: RuleId) -> Result<bool, RuleError> {
        self.set_enabled(id, false).await
    }

    async fn set_enabled(&mut self, id: RuleId, enabled: bool) -> Result<bool, RuleError> {
        let rule = self.rules.get_mut(&id).ok_or(RuleError::RuleNotFound)?;
        if rule.enabled == enabled {
            return Ok(false);
        }
        rule.enabled = enabled;
        let snapshot = rule.clone();
        if let Err(e) = self.store.save(&snapshot).await {
            warn!(rule_id = %id, error = %e, "Could not persist enabled flag");
            if let Some(rule) = self.rules.get_mut(&id) {
                rule.enabled = !enabled;
            }
            return Err(RuleError::BackendError);
        }
        info!(
            target: "otto::audit",
            rule_id = %id,
            rule_name = %snapshot.name,
            enabled,
            "rule enabled changed"
        );
        Ok(true)
    }

    /// Execute a rule's actions on explicit request.
    pub fn execute_actions(&self, id: RuleId) -> Result<(), RuleError> {
        let rule = self.rules.get(&id).ok_or(RuleError::RuleNotFound)?;
        if !rule.executable {
            return Err(RuleError::NotExecutable);
        }
        if rule.actions.iter().any(|a| a.is_event_based()) {
            return Err(RuleError::ContainsEventBasedAction);
        }
        info!(
            target: "otto::audit",
            rule_id = %id, rule_name = %rule.name, "rule actions executed"
        );
        self.dispatch_actions(rule, &rule.actions, None);
        Ok(())
    }

    /// Execute a rule's exit actions on explicit request.
    pub fn execute_exit_actions(&self, id: RuleId) -> Result<(), RuleError> {
        let rule = self.rules.get(&id).ok_or(RuleError::RuleNotFound)?;
        if !rule.executable {
            return Err(RuleError::NotExecutable);
        }
        if rule.exit_actions.is_empty() {
            return Err(RuleError::NoExitActions);
        }
        info!(
            target: "otto::audit",
            rule_id = %id, rule_name = %rule.name, "rule exit actions executed"
        );
        self.dispatch_actions(rule, &rule.exit_actions, None);
        Ok(())
    }

    /// Evaluate all enabled rules against one device event.
    pub fn evaluate_event(&mut self, event: &Event) -> Vec<RuleOutcome> {
        let state_type = StateTypeId::from_uuid(event.event_type_id.uuid());
        let mut outcomes = Vec::new();

        for id in self.order.clone() {
            let Some(rule) = self.rules.get_mut(&id) else {
                continue;
            };
            if !rule.enabled {
                continue;
            }

            // A state change event re-evaluates every tree referencing it.
            if let Some(evaluator) = &rule.state_evaluator {
                if evaluator.references_state_type(state_type) {
                    rule.states_active = evaluator.evaluate(&*self.registry);
                }
            }

            if rule.event_descriptors.is_empty() {
                let should_be_active = rule.time_active && rule.states_active;
                if should_be_active != rule.active {
                    rule.active = should_be_active;
                    debug!(rule_id = %id, active = should_be_active, "Rule activity changed");
                    outcomes.push(RuleOutcome::ActiveChanged { rule: rule.clone() });
                }
            } else if rule.states_active
                && rule.time_active
                && event_matches(&rule.event_descriptors, event, &*self.registry)
            {
                debug!(rule_id = %id, "Rule triggered by event");
                outcomes.push(RuleOutcome::Triggered { rule: rule.clone() });
            }
        }

        outcomes
    }

    /// Evaluate time-based rules for the tick at `now`.
    pub fn evaluate_time(&mut self, now: DateTime<Utc>) -> Vec<RuleOutcome> {
        let last = self
            .last_evaluation_time
            .unwrap_or(now - Duration::seconds(1));
        let mut outcomes = Vec::new();

        for id in self.order.clone() {
            let Some(rule) = self.rules.get_mut(&id) else {
                continue;
            };
            if !rule.enabled || rule.time_descriptor.is_empty() {
                continue;
            }

            if !rule.time_descriptor.calendar_items.is_empty() {
                rule.time_active = rule.time_descriptor.contains(now, self.time_zone);

                if rule.time_descriptor.time_event_items.is_empty() {
                    let should_be_active = rule.time_active && rule.states_active;
                    if should_be_active != rule.active {
                        rule.active = should_be_active;
                        debug!(rule_id = %id, active = should_be_active, "Rule activity changed");
                        outcomes.push(RuleOutcome::ActiveChanged { rule: rule.clone() });
                    }
                }
            }

            if !rule.time_descriptor.time_event_items.is_empty() {
                let fired = rule.time_descriptor.fires_between(last, now, self.time_zone);
                if fired && rule.states_active && rule.time_active {
                    debug!(rule_id = %id, "Rule triggered by time event");
                    outcomes.push(RuleOutcome::Triggered { rule: rule.clone() });
                }
            }
        }

        self.last_evaluation_time = Some(now);
        outcomes
    }

    /// Dispatch the actions an outcome calls for, resolving event-bound
    /// params from the triggering event.
    pub fn dispatch(&self, outcome: &RuleOutcome, event: Option<&Event>) {
        match outcome {
            RuleOutcome::ActiveChanged { rule } => {
                let actions = if rule.active {
                    &rule.actions
                } else {
                    &rule.exit_actions
                };
                self.dispatch_actions(rule, actions, None);
            }
            RuleOutcome::Triggered { rule } => {
                self.dispatch_actions(rule, &rule.actions, event);
            }
        }
    }

    fn dispatch_actions(&self, rule: &Rule, actions: &[RuleAction], event: Option<&Event>) {
        for rule_action in actions {
            match rule_action.resolve(event) {
                Some(action) => self.registry.execute_action(action),
                None => warn!(
                    rule_id = %rule.id,
                    action_type_id = %rule_action.action_type_id,
                    "Could not resolve action params, skipping"
                ),
            }
        }
    }

    /// Ids of all rules referencing the given device anywhere.
    pub fn find_rules(&self, device_id: DeviceId) -> Vec<RuleId> {
        self.order
            .iter()
            .filter(|id| {
                self.rules
                    .get(id)
                    .is_some_and(|r| r.references_device(device_id))
            })
            .copied()
            .collect()
    }

    /// Distinct devices referenced by any rule.
    pub fn devices_in_rules(&self) -> Vec<DeviceId> {
        let mut devices = Vec::new();
        let mut push = |id: DeviceId| {
            if !id.is_nil() && !devices.contains(&id) {
                devices.push(id);
            }
        };
        for id in &self.order {
            let Some(rule) = self.rules.get(id) else {
                continue;
            };
            for descriptor in &rule.event_descriptors {
                push(descriptor.device_id);
            }
            if let Some(evaluator) = &rule.state_evaluator {
                for device in evaluator.contained_devices() {
                    push(device);
                }
            }
            for action in rule.actions.iter().chain(&rule.exit_actions) {
                push(action.device_id);
            }
        }
        devices
    }

    /// Prune one device out of a rule: its event descriptors, evaluator
    /// leaves and actions referencing the device disappear; the rule itself
    /// survives.
    pub async fn remove_device_from_rule(
        &mut self,
        id: RuleId,
        device_id: DeviceId,
    ) -> Result<(), RuleError> {
        let rule = self.rules.get(&id).ok_or(RuleError::RuleNotFound)?;

        let mut updated = rule.clone();
        updated
            .event_descriptors
            .retain(|d| d.device_id != device_id);
        updated.state_evaluator = updated
            .state_evaluator
            .take()
            .and_then(|e| e.remove_device(device_id));
        updated.actions.retain(|a| a.device_id != device_id);
        updated.exit_actions.retain(|a| a.device_id != device_id);

        if let Err(e) = self.store.save(&updated).await {
            warn!(rule_id = %id, error = %e, "Could not persist pruned rule");
            return Err(RuleError::BackendError);
        }
        self.rules.insert(id, updated);
        Ok(())
    }

    /// Insert into the index, computing the initial runtime flags.
    fn append(&mut self, mut rule: Rule) {
        rule.states_active = rule
            .state_evaluator
            .as_ref()
            .map(|e| e.evaluate(&*self.registry))
            .unwrap_or(true);
        rule.time_active = rule.time_descriptor.calendar_items.is_empty()
            || rule.time_descriptor.contains(Utc::now(), self.time_zone);
        rule.active = false;
        self.order.push(rule.id);
        self.rules.insert(rule.id, rule);
    }

    fn validate(&self, rule: &Rule) -> Result<(), RuleError> {
        if !rule.is_consistent() {
            warn!(rule_id = %rule.id, "Rule is inconsistent");
            return Err(RuleError::InvalidRuleFormat);
        }

        for descriptor in &rule.event_descriptors {
            self.validate_event_descriptor(descriptor)?;
        }

        if let Some(evaluator) = &rule.state_evaluator {
            if !evaluator.is_valid(&*self.registry) {
                warn!(rule_id = %rule.id, "Invalid state evaluator");
                return Err(RuleError::InvalidStateEvaluatorValue);
            }
        }

        self.validate_time_descriptor(rule)?;

        for action in &rule.actions {
            self.validate_action(rule, action)?;
        }
        for action in &rule.exit_actions {
            if action.is_event_based() {
                warn!(rule_id = %rule.id, "Exit action may not be event based");
                return Err(RuleError::InvalidRuleActionParameter);
            }
            self.validate_action(rule, action)?;
        }
        Ok(())
    }

    fn validate_event_descriptor(&self, descriptor: &EventDescriptor) -> Result<(), RuleError> {
        if descriptor.is_interface_based() {
            return Ok(());
        }
        if !descriptor.is_device_based() {
            return Err(RuleError::InvalidRuleFormat);
        }
        let device = self
            .registry
            .device(descriptor.device_id)
            .ok_or(RuleError::DeviceNotFound)?;
        if device.event_type(descriptor.event_type_id).is_none() {
            warn!(
                device = %device.name,
                event_type_id = %descriptor.event_type_id,
                "Device has no such event type"
            );
            return Err(RuleError::EventTypeNotFound);
        }
        Ok(())
    }

    fn validate_time_descriptor(&self, rule: &Rule) -> Result<(), RuleError> {
        for item in &rule.time_descriptor.calendar_items {
            if !item.has_single_anchor() {
                return Err(RuleError::InvalidTimeDescriptor);
            }
            if item.duration < 1 || !item.mode_fits_anchor() {
                return Err(RuleError::InvalidCalendarItem);
            }
            if !item.repeating_option.is_empty() && !item.repeating_option.is_valid() {
                return Err(RuleError::InvalidRepeatingOption);
            }
        }
        for item in &rule.time_descriptor.time_event_items {
            if !item.has_single_anchor() {
                return Err(RuleError::InvalidTimeDescriptor);
            }
            if !item.mode_fits_anchor() {
                return Err(RuleError::InvalidTimeEventItem);
            }
            if !item.repeating_option.is_empty() && !item.repeating_option.is_valid() {
                return Err(RuleError::InvalidRepeatingOption);
            }
        }
        Ok(())
    }

    fn validate_action(&self, rule: &Rule, action: &RuleAction) -> Result<(), RuleError> {
        let device = self
            .registry
            .device(action.device_id)
            .ok_or(RuleError::DeviceNotFound)?;
        let action_type = device
            .action_type(action.action_type_id)
            .ok_or(RuleError::ActionTypeNotFound)?;

        for param in &action.rule_action_params {
            if !param.is_valid() {
                return Err(RuleError::InvalidRuleActionParameter);
            }
        }

        if action.is_event_based() {
            for param in &action.rule_action_params {
                if !param.is_event_based() {
                    continue;
                }
                if rule.event_descriptors.is_empty()
                    || !rule
                        .event_descriptors
                        .iter()
                        .any(|d| d.event_type_id == param.event_type_id)
                {
                    warn!(
                        action_type_id = %action.action_type_id,
                        "Event binding references an event type outside the rule's descriptors"
                    );
                    return Err(RuleError::InvalidRuleActionParameter);
                }
                let event_param_type = self
                    .registry
                    .event_param_type(param.event_type_id, param.event_param_type_id);
                let action_param_type = self
                    .registry
                    .action_param_type(action.action_type_id, param.param_type_id);
                match (event_param_type, action_param_type) {
                    (Some(e), Some(a)) if e == a => {}
                    _ => {
                        warn!(
                            action_type_id = %action.action_type_id,
                            param_type_id = %param.param_type_id,
                            "Event param and action param types do not match"
                        );
                        return Err(RuleError::TypesNotMatching);
                    }
                }
            }
        } else {
            let resolved = action
                .resolve(None)
                .ok_or(RuleError::InvalidRuleActionParameter)?;
            if verify_params(&action_type.param_types, &resolved.params).is_err() {
                return Err(RuleError::InvalidRuleActionParameter);
            }
        }
        Ok(())
    }
}

/// Does the event match any of the rule's descriptors? Interface-bound
/// descriptors resolve through the device registry.
fn event_matches(
    descriptors: &[EventDescriptor],
    event: &Event,
    registry: &dyn DeviceRegistry,
) -> bool {
    descriptors.iter().any(|descriptor| {
        if descriptor.is_device_based() {
            return descriptor.matches(event);
        }
        let (Some(interface), Some(interface_event)) =
            (&descriptor.interface, &descriptor.interface_event)
        else {
            return false;
        };
        let Some(device) = registry.device(event.device_id) else {
            return false;
        };
        device.has_interface(interface)
            && device
                .event_type(event.event_type_id)
                .is_some_and(|t| &t.name == interface_event)
            && descriptor.params_match(event)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone};
    use chrono_tz::UTC;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    use otto_devices::{ActionType, Device, EventType, MemoryDeviceRegistry, StateType};
    use otto_types::{
        ActionTypeId, EventTypeId, Param, ParamDescriptor, ParamType, ParamTypeId, RuleActionParam,
        StateDescriptor, TypedValue, ValueOperator, ValueType,
    };

    use crate::state_evaluator::StateEvaluator;
    use crate::time::{CalendarItem, RepeatingOption, TimeDescriptor, TimeEventItem};

    struct Fixture {
        engine: RuleEngine,
        registry: Arc<MemoryDeviceRegistry>,
        events: mpsc::UnboundedReceiver<Event>,
        device_id: DeviceId,
        temp_state: StateTypeId,
        button_event: EventTypeId,
        button_param: ParamTypeId,
        set_action: ActionTypeId,
        target_param: ParamTypeId,
        _dir: TempDir,
    }

    fn fixture() -> Fixture {
        let (registry, events) = MemoryDeviceRegistry::new();
        let registry = Arc::new(registry);

        let device_id = DeviceId::new();
        let temp_state = StateTypeId::new();
        let button_event = EventTypeId::new();
        let button_param = ParamTypeId::new();
        let set_action = ActionTypeId::new();
        let target_param = ParamTypeId::new();

        registry.add_device(Device {
            id: device_id,
            name: "dev1".into(),
            interfaces: vec!["button".into()],
            event_types: vec![
                EventType {
                    id: EventTypeId::from_uuid(temp_state.uuid()),
                    name: "temp changed".into(),
                    param_types: vec![ParamType::new(
                        ParamTypeId::from_uuid(temp_state.uuid()),
                        "temp",
                        ValueType::Int,
                    )],
                },
                EventType {
                    id: button_event,
                    name: "pressed".into(),
                    param_types: vec![ParamType::new(button_param, "y", ValueType::Int)],
                },
            ],
            action_types: vec![ActionType {
                id: set_action,
                name: "set".into(),
                param_types: vec![ParamType::new(target_param, "x", ValueType::Int)],
            }],
            state_types: vec![StateType {
                id: temp_state,
                name: "temp".into(),
                value_type: ValueType::Int,
            }],
        });

        let dir = TempDir::new().unwrap();
        let engine = RuleEngine::new(registry.clone(), RuleStore::new(dir.path()), UTC);
        Fixture {
            engine,
            registry,
            events,
            device_id,
            temp_state,
            button_event,
            button_param,
            set_action,
            target_param,
            _dir: dir,
        }
    }

    impl Fixture {
        fn action(&self, value: i64) -> RuleAction {
            RuleAction::new(
                self.set_action,
                self.device_id,
                vec![RuleActionParam::literal(self.target_param, value)],
            )
        }

        fn temp_above_20_rule(&self, with_exit: bool) -> Rule {
            let mut rule = Rule::new(RuleId::new(), "heating");
            rule.state_evaluator = Some(StateEvaluator::leaf(StateDescriptor::new(
                self.temp_state,
                self.device_id,
                ValueOperator::Greater,
                TypedValue::Int(20),
            )));
            rule.actions = vec![self.action(1)];
            if with_exit {
                rule.exit_actions = vec![self.action(0)];
            }
            rule
        }

        fn set_temp(&mut self, value: i64) -> Event {
            self.registry
                .set_state(self.device_id, self.temp_state, TypedValue::Int(value));
            self.events.try_recv().unwrap()
        }
    }

    #[tokio::test]
    async fn state_only_rule_lifecycle() {
        let mut fx = fixture();
        let _ = fx.set_temp(18);
        let rule = fx.temp_above_20_rule(true);
        let rule_id = rule.id;
        fx.engine.add_rule(rule, false).await.unwrap();
        assert!(!fx.engine.find_rule(rule_id).unwrap().states_active);

        // 18 -> 22: rule turns active, actions dispatch
        let event = fx.set_temp(22);
        let outcomes = fx.engine.evaluate_event(&event);
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(&outcomes[0], RuleOutcome::ActiveChanged { rule } if rule.active));
        fx.engine.dispatch(&outcomes[0], Some(&event));
        let executed = fx.registry.executed_actions();
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0].params[0].value, TypedValue::Int(1));

        // same side of the threshold: no transition
        let event = fx.set_temp(25);
        assert!(fx.engine.evaluate_event(&event).is_empty());

        // 25 -> 19: rule turns inactive, exit actions dispatch
        let event = fx.set_temp(19);
        let outcomes = fx.engine.evaluate_event(&event);
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(&outcomes[0], RuleOutcome::ActiveChanged { rule } if !rule.active));
        fx.engine.dispatch(&outcomes[0], Some(&event));
        let executed = fx.registry.executed_actions();
        assert_eq!(executed.len(), 2);
        assert_eq!(executed[1].params[0].value, TypedValue::Int(0));
    }

    #[tokio::test]
    async fn event_rule_binds_action_param_to_event_param() {
        let mut fx = fixture();
        let mut rule = Rule::new(RuleId::new(), "press to set");
        rule.event_descriptors = vec![EventDescriptor::device_based(
            fx.button_event,
            fx.device_id,
            vec![],
        )];
        rule.actions = vec![RuleAction::new(
            fx.set_action,
            fx.device_id,
            vec![RuleActionParam::event_bound(
                fx.target_param,
                fx.button_event,
                fx.button_param,
            )],
        )];
        fx.engine.add_rule(rule, false).await.unwrap();

        let event = Event::new(
            fx.button_event,
            fx.device_id,
            vec![Param::new(fx.button_param, 7i64)],
        );
        let outcomes = fx.engine.evaluate_event(&event);
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(&outcomes[0], RuleOutcome::Triggered { .. }));

        fx.engine.dispatch(&outcomes[0], Some(&event));
        let executed = fx.registry.executed_actions();
        assert_eq!(executed[0].params[0].param_type_id, fx.target_param);
        assert_eq!(executed[0].params[0].value, TypedValue::Int(7));
    }

    #[tokio::test]
    async fn event_rule_with_exit_actions_is_rejected_without_persisting() {
        let mut fx = fixture();
        let mut rule = Rule::new(RuleId::new(), "inconsistent");
        rule.event_descriptors = vec![EventDescriptor::device_based(
            fx.button_event,
            fx.device_id,
            vec![],
        )];
        rule.actions = vec![fx.action(1)];
        rule.exit_actions = vec![fx.action(0)];

        assert_eq!(
            fx.engine.add_rule(rule, false).await,
            Err(RuleError::InvalidRuleFormat)
        );
        assert_eq!(fx.engine.rule_count(), 0);
        // no file was written
        assert!(std::fs::read_dir(fx._dir.path())
            .map(|mut d| d.next().is_none())
            .unwrap_or(true));
    }

    #[tokio::test]
    async fn weekly_calendar_rule_activates_and_deactivates() {
        let mut fx = fixture();
        let mut rule = Rule::new(RuleId::new(), "monday morning");
        // Mondays 08:00, one hour
        rule.time_descriptor = TimeDescriptor::from_calendar_items(vec![CalendarItem::daily(
            NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            60,
        )
        .with_repeating(RepeatingOption::weekly(vec![1]))]);
        rule.actions = vec![fx.action(1)];
        rule.exit_actions = vec![fx.action(0)];
        let rule_id = rule.id;
        fx.engine.add_rule(rule, false).await.unwrap();

        // 2017-03-06 is a Monday
        let t = |h, m| chrono::Utc.with_ymd_and_hms(2017, 3, 6, h, m, 0).unwrap();

        assert!(fx.engine.evaluate_time(t(7, 59)).is_empty());

        let outcomes = fx.engine.evaluate_time(t(8, 0));
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(&outcomes[0], RuleOutcome::ActiveChanged { rule } if rule.active));
        fx.engine.dispatch(&outcomes[0], None);

        assert!(fx.engine.evaluate_time(t(8, 30)).is_empty());

        let outcomes = fx.engine.evaluate_time(t(9, 0));
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(&outcomes[0], RuleOutcome::ActiveChanged { rule } if !rule.active));
        fx.engine.dispatch(&outcomes[0], None);

        let executed = fx.registry.executed_actions();
        assert_eq!(executed.len(), 2);
        assert_eq!(executed[0].params[0].value, TypedValue::Int(1));
        assert_eq!(executed[1].params[0].value, TypedValue::Int(0));
        assert!(!fx.engine.find_rule(rule_id).unwrap().active);
    }

    #[tokio::test]
    async fn time_event_rule_fires_once_per_instant() {
        let mut fx = fixture();
        let mut rule = Rule::new(RuleId::new(), "morning bell");
        rule.time_descriptor = TimeDescriptor::from_time_event_items(vec![TimeEventItem::at_time(
            NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
        )]);
        rule.actions = vec![fx.action(1)];
        fx.engine.add_rule(rule, false).await.unwrap();

        let t = |h: u32, m: u32, s: u32| {
            chrono::Utc.with_ymd_and_hms(2017, 3, 6, h, m, s).unwrap()
        };
        assert!(fx.engine.evaluate_time(t(6, 59, 59)).is_empty());
        let outcomes = fx.engine.evaluate_time(t(7, 0, 0));
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(&outcomes[0], RuleOutcome::Triggered { .. }));
        assert!(fx.engine.evaluate_time(t(7, 0, 1)).is_empty());
    }

    #[tokio::test]
    async fn failed_edit_restores_rule_and_store() {
        let mut fx = fixture();
        let rule = fx.temp_above_20_rule(false);
        let rule_id = rule.id;
        fx.engine.add_rule(rule.clone(), false).await.unwrap();

        let path = fx._dir.path().join(format!("{rule_id}.json"));
        let before = std::fs::read_to_string(&path).unwrap();

        // edited version has no actions and must be rejected
        let mut broken = rule.clone();
        broken.actions.clear();
        assert_eq!(
            fx.engine.edit_rule(broken).await,
            Err(RuleError::InvalidRuleFormat)
        );

        let restored = fx.engine.find_rule(rule_id).unwrap();
        assert_eq!(restored.actions, rule.actions);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
    }

    #[tokio::test]
    async fn edit_swaps_rule_without_duplicate() {
        let mut fx = fixture();
        let rule = fx.temp_above_20_rule(false);
        let rule_id = rule.id;
        fx.engine.add_rule(rule.clone(), false).await.unwrap();

        let mut edited = rule;
        edited.name = "cooling".into();
        fx.engine.edit_rule(edited).await.unwrap();

        assert_eq!(fx.engine.rule_count(), 1);
        assert_eq!(fx.engine.find_rule(rule_id).unwrap().name, "cooling");
    }

    #[tokio::test]
    async fn enable_disable_is_idempotent_and_gates_evaluation() {
        let mut fx = fixture();
        let _ = fx.set_temp(18);
        let rule = fx.temp_above_20_rule(false);
        let rule_id = rule.id;
        fx.engine.add_rule(rule, false).await.unwrap();

        assert_eq!(fx.engine.disable_rule(rule_id).await, Ok(true));
        assert_eq!(fx.engine.disable_rule(rule_id).await, Ok(false));

        let event = fx.set_temp(25);
        assert!(fx.engine.evaluate_event(&event).is_empty());

        assert_eq!(fx.engine.enable_rule(rule_id).await, Ok(true));
        let event = fx.set_temp(26);
        assert_eq!(fx.engine.evaluate_event(&event).len(), 1);

        assert_eq!(
            fx.engine.enable_rule(RuleId::new()).await,
            Err(RuleError::RuleNotFound)
        );
    }

    #[tokio::test]
    async fn execute_preconditions() {
        let mut fx = fixture();
        let mut rule = fx.temp_above_20_rule(false);
        rule.executable = false;
        let not_executable = rule.id;
        fx.engine.add_rule(rule, false).await.unwrap();
        assert_eq!(
            fx.engine.execute_actions(not_executable),
            Err(RuleError::NotExecutable)
        );

        let rule = fx.temp_above_20_rule(false);
        let no_exit = rule.id;
        fx.engine.add_rule(rule, false).await.unwrap();
        fx.engine.execute_actions(no_exit).unwrap();
        assert_eq!(
            fx.engine.execute_exit_actions(no_exit),
            Err(RuleError::NoExitActions)
        );

        let mut rule = Rule::new(RuleId::new(), "bound");
        rule.event_descriptors = vec![EventDescriptor::device_based(
            fx.button_event,
            fx.device_id,
            vec![],
        )];
        rule.actions = vec![RuleAction::new(
            fx.set_action,
            fx.device_id,
            vec![RuleActionParam::event_bound(
                fx.target_param,
                fx.button_event,
                fx.button_param,
            )],
        )];
        let bound = rule.id;
        fx.engine.add_rule(rule, false).await.unwrap();
        assert_eq!(
            fx.engine.execute_actions(bound),
            Err(RuleError::ContainsEventBasedAction)
        );
    }

    #[tokio::test]
    async fn event_binding_with_wrong_type_is_rejected() {
        let mut fx = fixture();
        // bind the Int action param to a param of a different (string) event
        let string_event = EventTypeId::new();
        let string_param = ParamTypeId::new();
        let mut device = fx.registry.device(fx.device_id).unwrap();
        device.event_types.push(EventType {
            id: string_event,
            name: "named".into(),
            param_types: vec![ParamType::new(string_param, "label", ValueType::String)],
        });
        fx.registry.add_device(device);

        let mut rule = Rule::new(RuleId::new(), "mismatch");
        rule.event_descriptors = vec![EventDescriptor::device_based(
            string_event,
            fx.device_id,
            vec![],
        )];
        rule.actions = vec![RuleAction::new(
            fx.set_action,
            fx.device_id,
            vec![RuleActionParam::event_bound(
                fx.target_param,
                string_event,
                string_param,
            )],
        )];
        assert_eq!(
            fx.engine.add_rule(rule, false).await,
            Err(RuleError::TypesNotMatching)
        );
    }

    #[tokio::test]
    async fn duplicate_rule_id_is_rejected() {
        let mut fx = fixture();
        let rule = fx.temp_above_20_rule(false);
        fx.engine.add_rule(rule.clone(), false).await.unwrap();
        assert_eq!(
            fx.engine.add_rule(rule, false).await,
            Err(RuleError::DuplicateId)
        );
    }

    #[tokio::test]
    async fn event_rule_gated_by_state() {
        let mut fx = fixture();
        let _ = fx.set_temp(18);
        let mut rule = Rule::new(RuleId::new(), "press while warm");
        rule.state_evaluator = Some(StateEvaluator::leaf(StateDescriptor::new(
            fx.temp_state,
            fx.device_id,
            ValueOperator::Greater,
            TypedValue::Int(20),
        )));
        rule.event_descriptors = vec![EventDescriptor::device_based(
            fx.button_event,
            fx.device_id,
            vec![ParamDescriptor::new(
                fx.button_param,
                ValueOperator::Equals,
                TypedValue::Int(1),
            )],
        )];
        rule.actions = vec![fx.action(1)];
        fx.engine.add_rule(rule, false).await.unwrap();

        let press = Event::new(
            fx.button_event,
            fx.device_id,
            vec![Param::new(fx.button_param, 1i64)],
        );
        // state gate closed
        assert!(fx.engine.evaluate_event(&press).is_empty());

        let _ = fx.set_temp(25);
        let warm = fx.engine.evaluate_event(&Event::new(
            EventTypeId::from_uuid(fx.temp_state.uuid()),
            fx.device_id,
            vec![],
        ));
        assert!(warm.is_empty()); // event rule tracks no active state

        assert_eq!(fx.engine.evaluate_event(&press).len(), 1);

        // param filter mismatch
        let wrong = Event::new(
            fx.button_event,
            fx.device_id,
            vec![Param::new(fx.button_param, 2i64)],
        );
        assert!(fx.engine.evaluate_event(&wrong).is_empty());
    }

    #[tokio::test]
    async fn remove_device_from_rule_prunes_references() {
        let mut fx = fixture();
        let rule = fx.temp_above_20_rule(true);
        let rule_id = rule.id;
        fx.engine.add_rule(rule, false).await.unwrap();
        assert_eq!(fx.engine.find_rules(fx.device_id), vec![rule_id]);
        assert_eq!(fx.engine.devices_in_rules(), vec![fx.device_id]);

        fx.engine
            .remove_device_from_rule(rule_id, fx.device_id)
            .await
            .unwrap();
        let rule = fx.engine.find_rule(rule_id).unwrap();
        assert!(rule.state_evaluator.is_none());
        assert!(rule.actions.is_empty());
        assert!(fx.engine.find_rules(fx.device_id).is_empty());
    }

    #[tokio::test]
    async fn rules_survive_a_reload() {
        let mut fx = fixture();
        let rule = fx.temp_above_20_rule(true);
        let rule_id = rule.id;
        fx.engine.add_rule(rule.clone(), false).await.unwrap();

        let mut cold = RuleEngine::new(
            fx.registry.clone(),
            RuleStore::new(fx._dir.path()),
            UTC,
        );
        cold.load().await.unwrap();

        let reloaded = cold.find_rule(rule_id).unwrap();
        assert_eq!(reloaded.name, rule.name);
        assert_eq!(reloaded.actions, rule.actions);
        assert_eq!(reloaded.exit_actions, rule.exit_actions);
        assert!(!reloaded.active);
    }

    #[tokio::test]
    async fn interface_descriptor_matches_by_interface_and_event_name() {
        let mut fx = fixture();
        let mut rule = Rule::new(RuleId::new(), "any button");
        rule.event_descriptors =
            vec![EventDescriptor::interface_based("button", "pressed", vec![])];
        rule.actions = vec![fx.action(1)];
        fx.engine.add_rule(rule, false).await.unwrap();

        let press = Event::new(fx.button_event, fx.device_id, vec![]);
        assert_eq!(fx.engine.evaluate_event(&press).len(), 1);

        let other_device = Event::new(fx.button_event, DeviceId::new(), vec![]);
        assert!(fx.engine.evaluate_event(&other_device).is_empty());
    }
}

