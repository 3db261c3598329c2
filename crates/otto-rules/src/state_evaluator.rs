//! Boolean trees over device-state comparisons.

use serde::{Deserialize, Serialize};

use otto_devices::DeviceRegistry;
use otto_types::{DeviceId, StateDescriptor, StateOperator, StateTypeId};

/// A recursive boolean tree: either a single state comparison (leaf) or an
/// AND/OR combinator over child evaluators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateEvaluator {
    #[serde(rename_all = "camelCase")]
    Leaf { state_descriptor: StateDescriptor },
    #[serde(rename_all = "camelCase")]
    Group {
        #[serde(default)]
        operator: StateOperator,
        child_evaluators: Vec<StateEvaluator>,
    },
}

impl StateEvaluator {
    pub fn leaf(state_descriptor: StateDescriptor) -> Self {
        StateEvaluator::Leaf { state_descriptor }
    }

    pub fn group(operator: StateOperator, child_evaluators: Vec<StateEvaluator>) -> Self {
        StateEvaluator::Group {
            operator,
            child_evaluators,
        }
    }

    /// Walk the tree against current device states. A leaf whose device or
    /// state value is unknown evaluates to false.
    pub fn evaluate(&self, registry: &dyn DeviceRegistry) -> bool {
        match self {
            StateEvaluator::Leaf { state_descriptor } => registry
                .state_value(state_descriptor.device_id, state_descriptor.state_type_id)
                .is_some_and(|current| state_descriptor.matches(&current)),
            StateEvaluator::Group {
                operator,
                child_evaluators,
            } => match operator {
                StateOperator::And => child_evaluators.iter().all(|c| c.evaluate(registry)),
                StateOperator::Or => child_evaluators.iter().any(|c| c.evaluate(registry)),
            },
        }
    }

    /// Structural and referential validity: leaves must reference an
    /// existing device state of a compatible value type, groups must have at
    /// least one child.
    pub fn is_valid(&self, registry: &dyn DeviceRegistry) -> bool {
        match self {
            StateEvaluator::Leaf { state_descriptor } => {
                let Some(device) = registry.device(state_descriptor.device_id) else {
                    return false;
                };
                let Some(state_type) = device.state_type(state_descriptor.state_type_id) else {
                    return false;
                };
                state_descriptor.value.matches_type(state_type.value_type)
            }
            StateEvaluator::Group {
                child_evaluators, ..
            } => {
                !child_evaluators.is_empty()
                    && child_evaluators.iter().all(|c| c.is_valid(registry))
            }
        }
    }

    /// True iff any leaf references the given state type.
    pub fn references_state_type(&self, state_type_id: StateTypeId) -> bool {
        match self {
            StateEvaluator::Leaf { state_descriptor } => {
                state_descriptor.state_type_id == state_type_id
            }
            StateEvaluator::Group {
                child_evaluators, ..
            } => child_evaluators
                .iter()
                .any(|c| c.references_state_type(state_type_id)),
        }
    }

    /// True iff any leaf references the given device.
    pub fn contains_device(&self, device_id: DeviceId) -> bool {
        match self {
            StateEvaluator::Leaf { state_descriptor } => state_descriptor.device_id == device_id,
            StateEvaluator::Group {
                child_evaluators, ..
            } => child_evaluators.iter().any(|c| c.contains_device(device_id)),
        }
    }

    /// All devices referenced by leaves, in tree order with duplicates
    /// removed.
    pub fn contained_devices(&self) -> Vec<DeviceId> {
        let mut devices = Vec::new();
        self.collect_devices(&mut devices);
        devices
    }

    fn collect_devices(&self, out: &mut Vec<DeviceId>) {
        match self {
            StateEvaluator::Leaf { state_descriptor } => {
                if !out.contains(&state_descriptor.device_id) {
                    out.push(state_descriptor.device_id);
                }
            }
            StateEvaluator::Group {
                child_evaluators, ..
            } => {
                for child in child_evaluators {
                    child.collect_devices(out);
                }
            }
        }
    }

    /// Prune all leaves referencing `device_id`. Groups left without
    /// children are dropped; the whole tree may disappear.
    pub fn remove_device(self, device_id: DeviceId) -> Option<StateEvaluator> {
        match self {
            StateEvaluator::Leaf { state_descriptor } => {
                (state_descriptor.device_id != device_id)
                    .then_some(StateEvaluator::Leaf { state_descriptor })
            }
            StateEvaluator::Group {
                operator,
                child_evaluators,
            } => {
                let children: Vec<StateEvaluator> = child_evaluators
                    .into_iter()
                    .filter_map(|c| c.remove_device(device_id))
                    .collect();
                (!children.is_empty()).then_some(StateEvaluator::Group {
                    operator,
                    child_evaluators: children,
                })
            }
        }
    }
}
