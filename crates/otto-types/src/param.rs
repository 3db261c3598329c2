//! Parameter declarations and descriptors.

use serde::{Deserialize, Serialize};

use crate::id::ParamTypeId;
use crate::value::{TypedValue, ValueOperator, ValueType};

/// Declaration of one named, typed parameter of an event, action or state
/// type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamType {
    pub id: ParamTypeId,
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    /// Display order among the params of one type.
    #[serde(default)]
    pub index: u32,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<TypedValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<TypedValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<TypedValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_values: Vec<TypedValue>,
    /// UI hint, e.g. "TextLine" or "IPv4Address".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_type: Option<String>,
    /// UI hint, e.g. "DegreeCelsius".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default)]
    pub read_only: bool,
}

impl ParamType {
    pub fn new(id: ParamTypeId, name: impl Into<String>, value_type: ValueType) -> Self {
        let name = name.into();
        Self {
            id,
            display_name: name.clone(),
            name,
            index: 0,
            value_type,
            default_value: None,
            min_value: None,
            max_value: None,
            allowed_values: Vec::new(),
            input_type: None,
            unit: None,
            read_only: false,
        }
    }

    pub fn with_limits(mut self, min: TypedValue, max: TypedValue) -> Self {
        self.min_value = Some(min);
        self.max_value = Some(max);
        self
    }

    pub fn with_allowed_values(mut self, values: Vec<TypedValue>) -> Self {
        self.allowed_values = values;
        self
    }

    /// A value is valid for this param type iff it type-matches and, where
    /// limits or allowed values are declared, lies within them. Limits are
    /// inclusive.
    pub fn validate(&self, value: &TypedValue) -> bool {
        let Some(value) = value.coerce(self.value_type) else {
            return false;
        };
        if let Some(min) = &self.min_value {
            if !ValueOperator::GreaterOrEqual.evaluate(&value, min) {
                return false;
            }
        }
        if let Some(max) = &self.max_value {
            if !ValueOperator::LessOrEqual.evaluate(&value, max) {
                return false;
            }
        }
        if !self.allowed_values.is_empty()
            && !self
                .allowed_values
                .iter()
                .any(|allowed| ValueOperator::Equals.evaluate(&value, allowed))
        {
            return false;
        }
        true
    }
}

/// A concrete parameter value carried by an event or action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Param {
    pub param_type_id: ParamTypeId,
    pub value: TypedValue,
}

impl Param {
    pub fn new(param_type_id: ParamTypeId, value: impl Into<TypedValue>) -> Self {
        Self {
            param_type_id,
            value: value.into(),
        }
    }
}

/// A param filter inside an event descriptor: the named param must compare
/// to `value` under `operator`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamDescriptor {
    pub param_type_id: ParamTypeId,
    #[serde(default)]
    pub operator: ValueOperator,
    pub value: TypedValue,
}

impl ParamDescriptor {
    pub fn new(param_type_id: ParamTypeId, operator: ValueOperator, value: TypedValue) -> Self {
        Self {
            param_type_id,
            operator,
            value,
        }
    }

    /// True if `params` contains the referenced param and its value
    /// satisfies the comparison.
    pub fn matches(&self, params: &[Param]) -> bool {
        params
            .iter()
            .filter(|p| p.param_type_id == self.param_type_id)
            .any(|p| self.operator.evaluate(&p.value, &self.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_param_type() -> ParamType {
        ParamType::new(ParamTypeId::new(), "temperature", ValueType::Double)
            .with_limits(TypedValue::Double(-40.0), TypedValue::Double(80.0))
    }

    #[test]
    fn validate_checks_type_and_limits() {
        let pt = temp_param_type();
        assert!(pt.validate(&TypedValue::Double(21.5)));
        assert!(pt.validate(&TypedValue::Int(21)));
        assert!(!pt.validate(&TypedValue::Double(120.0)));
        assert!(!pt.validate(&TypedValue::from("warm")));
    }

    #[test]
    fn validate_checks_allowed_values() {
        let pt = ParamType::new(ParamTypeId::new(), "mode", ValueType::String)
            .with_allowed_values(vec![TypedValue::from("eco"), TypedValue::from("boost")]);
        assert!(pt.validate(&TypedValue::from("eco")));
        assert!(!pt.validate(&TypedValue::from("off")));
    }

    #[test]
    fn descriptor_matches_params() {
        let id = ParamTypeId::new();
        let descriptor =
            ParamDescriptor::new(id, ValueOperator::Greater, TypedValue::Int(20));
        let params = vec![Param::new(id, 22i64)];
        assert!(descriptor.matches(&params));
        let params = vec![Param::new(id, 18i64)];
        assert!(!descriptor.matches(&params));
        assert!(!descriptor.matches(&[]));
    }
}
