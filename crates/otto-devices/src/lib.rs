//! Device registry abstraction.
//!
//! Device plugins and their wire protocols live outside the core; the core
//! only sees the [`DeviceRegistry`] trait: device metadata lookups, current
//! state values and a fire-and-forget action sink. The in-memory
//! implementation is what the server wires plugins into and what tests
//! populate directly.

use std::sync::Mutex;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use otto_types::{
    Action, ActionTypeId, DeviceId, Event, EventTypeId, Param, ParamType, ParamTypeId,
    StateTypeId, TypedValue, ValueType,
};

/// Device lookup and param verification errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("device not found")]
    DeviceNotFound,

    #[error("missing parameter: {0}")]
    MissingParameter(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// An event type declared by a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventType {
    pub id: EventTypeId,
    pub name: String,
    #[serde(default)]
    pub param_types: Vec<ParamType>,
}

/// An action type declared by a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionType {
    pub id: ActionTypeId,
    pub name: String,
    #[serde(default)]
    pub param_types: Vec<ParamType>,
}

/// A state type declared by a device. Every state type has a companion
/// event type sharing its UUID, emitted on each state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateType {
    pub id: StateTypeId,
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
}

/// Metadata of one configured device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    /// Interfaces this device implements, e.g. "light" or "presencesensor".
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub event_types: Vec<EventType>,
    #[serde(default)]
    pub action_types: Vec<ActionType>,
    #[serde(default)]
    pub state_types: Vec<StateType>,
}

impl Device {
    pub fn event_type(&self, id: EventTypeId) -> Option<&EventType> {
        self.event_types.iter().find(|t| t.id == id)
    }

    pub fn action_type(&self, id: ActionTypeId) -> Option<&ActionType> {
        self.action_types.iter().find(|t| t.id == id)
    }

    pub fn state_type(&self, id: StateTypeId) -> Option<&StateType> {
        self.state_types.iter().find(|t| t.id == id)
    }

    pub fn has_interface(&self, interface: &str) -> bool {
        self.interfaces.iter().any(|i| i == interface)
    }
}

/// Check concrete params against their declarations: every declared param
/// must be present (or have a default) and valid; unknown params are
/// rejected.
pub fn verify_params(param_types: &[ParamType], params: &[Param]) -> Result<(), DeviceError> {
    for param in params {
        let Some(pt) = param_types.iter().find(|pt| pt.id == param.param_type_id) else {
            return Err(DeviceError::InvalidParameter(param.param_type_id.to_string()));
        };
        if !pt.validate(&param.value) {
            return Err(DeviceError::InvalidParameter(pt.name.clone()));
        }
    }
    for pt in param_types {
        let present = params.iter().any(|p| p.param_type_id == pt.id);
        if !present && pt.default_value.is_none() {
            return Err(DeviceError::MissingParameter(pt.name.clone()));
        }
    }
    Ok(())
}

/// The registry interface the core depends on.
pub trait DeviceRegistry: Send + Sync {
    /// Metadata of one configured device.
    fn device(&self, id: DeviceId) -> Option<Device>;

    /// All configured devices.
    fn devices(&self) -> Vec<Device>;

    /// Current value of one device state.
    fn state_value(&self, device_id: DeviceId, state_type_id: StateTypeId) -> Option<TypedValue>;

    /// Declared type of an event param, searched across all devices.
    fn event_param_type(
        &self,
        event_type_id: EventTypeId,
        param_type_id: ParamTypeId,
    ) -> Option<ValueType>;

    /// Declared type of an action param, searched across all devices.
    fn action_param_type(
        &self,
        action_type_id: ActionTypeId,
        param_type_id: ParamTypeId,
    ) -> Option<ValueType>;

    /// Send a typed action request to the owning plugin. Fire and forget;
    /// the per-action outcome is logged, not returned.
    fn execute_action(&self, action: Action);
}

/// In-memory registry backing the server and the test suites.
///
/// Plugins (or tests) register devices, update states and emit events;
/// state updates emit the companion state-change event carrying the new
/// value as a single param.
pub struct MemoryDeviceRegistry {
    devices: DashMap<DeviceId, Device>,
    states: DashMap<(DeviceId, StateTypeId), TypedValue>,
    events: mpsc::UnboundedSender<Event>,
    executed: Mutex<Vec<Action>>,
}

impl MemoryDeviceRegistry {
    /// Create a registry plus the event feed the core consumes.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                devices: DashMap::new(),
                states: DashMap::new(),
                events,
                executed: Mutex::new(Vec::new()),
            },
            rx,
        )
    }

    pub fn add_device(&self, device: Device) {
        debug!(device_id = %device.id, name = %device.name, "Registering device");
        self.devices.insert(device.id, device);
    }

    pub fn remove_device(&self, id: DeviceId) -> Option<Device> {
        self.states.retain(|(device_id, _), _| *device_id != id);
        self.devices.remove(&id).map(|(_, d)| d)
    }

    /// Update a state value and emit the companion state-change event.
    pub fn set_state(&self, device_id: DeviceId, state_type_id: StateTypeId, value: TypedValue) {
        self.states.insert((device_id, state_type_id), value.clone());
        let event = Event::new(
            EventTypeId::from_uuid(state_type_id.uuid()),
            device_id,
            vec![Param {
                param_type_id: ParamTypeId::from_uuid(state_type_id.uuid()),
                value,
            }],
        );
        let _ = self.events.send(event);
    }

    /// Emit a device event into the core.
    pub fn emit_event(&self, event: Event) {
        let _ = self.events.send(event);
    }

    /// Actions dispatched so far, oldest first.
    pub fn executed_actions(&self) -> Vec<Action> {
        self.executed.lock().expect("registry poisoned").clone()
    }
}

impl DeviceRegistry for MemoryDeviceRegistry {
    fn device(&self, id: DeviceId) -> Option<Device> {
        self.devices.get(&id).map(|entry| entry.value().clone())
    }

    fn devices(&self) -> Vec<Device> {
        self.devices.iter().map(|entry| entry.value().clone()).collect()
    }

    fn state_value(&self, device_id: DeviceId, state_type_id: StateTypeId) -> Option<TypedValue> {
        self.states
            .get(&(device_id, state_type_id))
            .map(|entry| entry.value().clone())
    }

    fn event_param_type(
        &self,
        event_type_id: EventTypeId,
        param_type_id: ParamTypeId,
    ) -> Option<ValueType> {
        self.devices.iter().find_map(|device| {
            device
                .event_type(event_type_id)?
                .param_types
                .iter()
                .find(|pt| pt.id == param_type_id)
                .map(|pt| pt.value_type)
        })
    }

    fn action_param_type(
        &self,
        action_type_id: ActionTypeId,
        param_type_id: ParamTypeId,
    ) -> Option<ValueType> {
        self.devices.iter().find_map(|device| {
            device
                .action_type(action_type_id)?
                .param_types
                .iter()
                .find(|pt| pt.id == param_type_id)
                .map(|pt| pt.value_type)
        })
    }

    fn execute_action(&self, action: Action) {
        match self.device(action.device_id) {
            Some(device) => {
                debug!(
                    device = %device.name,
                    action_type_id = %action.action_type_id,
                    "Dispatching action"
                );
                self.executed.lock().expect("registry poisoned").push(action);
            }
            None => {
                warn!(
                    device_id = %action.device_id,
                    "Dropping action for unknown device"
                );
            }
        }
    }
}
