//! Device events and the descriptors that match them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{DeviceId, EventTypeId, ParamTypeId};
use crate::param::{Param, ParamDescriptor};
use crate::value::TypedValue;

/// A timestamped occurrence emitted by a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_type_id: EventTypeId,
    pub device_id: DeviceId,
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(default = "Utc::now")]
    pub time_fired: DateTime<Utc>,
}

impl Event {
    pub fn new(event_type_id: EventTypeId, device_id: DeviceId, params: Vec<Param>) -> Self {
        Self {
            event_type_id,
            device_id,
            params,
            time_fired: Utc::now(),
        }
    }

    /// The value of the param with the given type id, if present.
    pub fn param_value(&self, param_type_id: ParamTypeId) -> Option<&TypedValue> {
        self.params
            .iter()
            .find(|p| p.param_type_id == param_type_id)
            .map(|p| &p.value)
    }
}

/// A pattern matching events.
///
/// A descriptor is either device-bound (`eventTypeId` + `deviceId`) or
/// interface-bound (`interface` + `interfaceEvent`); exactly one of the two
/// forms must be populated. Param descriptors further narrow the match.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDescriptor {
    #[serde(default, skip_serializing_if = "EventTypeId::is_nil")]
    pub event_type_id: EventTypeId,
    #[serde(default, skip_serializing_if = "DeviceId::is_nil")]
    pub device_id: DeviceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface_event: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub param_descriptors: Vec<ParamDescriptor>,
}

impl EventDescriptor {
    pub fn device_based(
        event_type_id: EventTypeId,
        device_id: DeviceId,
        param_descriptors: Vec<ParamDescriptor>,
    ) -> Self {
        Self {
            event_type_id,
            device_id,
            interface: None,
            interface_event: None,
            param_descriptors,
        }
    }

    pub fn interface_based(
        interface: impl Into<String>,
        interface_event: impl Into<String>,
        param_descriptors: Vec<ParamDescriptor>,
    ) -> Self {
        Self {
            event_type_id: EventTypeId::nil(),
            device_id: DeviceId::nil(),
            interface: Some(interface.into()),
            interface_event: Some(interface_event.into()),
            param_descriptors,
        }
    }

    pub fn is_device_based(&self) -> bool {
        !self.event_type_id.is_nil() && !self.device_id.is_nil()
    }

    pub fn is_interface_based(&self) -> bool {
        self.interface.is_some() && self.interface_event.is_some()
    }

    /// Match a concrete event against a device-bound descriptor. Interface
    /// matching needs device class metadata and lives with the registry.
    pub fn matches(&self, event: &Event) -> bool {
        self.event_type_id == event.event_type_id
            && self.device_id == event.device_id
            && self.params_match(event)
    }

    /// True if all param descriptors hold for the event's params.
    pub fn params_match(&self, event: &Event) -> bool {
        self.param_descriptors.iter().all(|d| d.matches(&event.params))
    }
}
