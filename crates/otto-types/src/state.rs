//! Device states and state descriptors.

use serde::{Deserialize, Serialize};

use crate::id::{DeviceId, StateTypeId};
use crate::value::{TypedValue, ValueOperator};

/// The current value of one state of one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct State {
    pub state_type_id: StateTypeId,
    pub device_id: DeviceId,
    pub value: TypedValue,
}

/// A comparison against one device state, the leaf of a state evaluator
/// tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDescriptor {
    pub state_type_id: StateTypeId,
    pub device_id: DeviceId,
    #[serde(default)]
    pub operator: ValueOperator,
    pub value: TypedValue,
}

impl StateDescriptor {
    pub fn new(
        state_type_id: StateTypeId,
        device_id: DeviceId,
        operator: ValueOperator,
        value: TypedValue,
    ) -> Self {
        Self {
            state_type_id,
            device_id,
            operator,
            value,
        }
    }

    /// Evaluate against the device's current state value.
    pub fn matches(&self, current: &TypedValue) -> bool {
        self.operator.evaluate(current, &self.value)
    }
}
