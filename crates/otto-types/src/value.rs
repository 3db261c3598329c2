//! Typed parameter values and comparison operators.
//!
//! Values on the wire are plain JSON scalars; the declared [`ValueType`] of
//! the surrounding param type decides how a scalar is interpreted. Bytes are
//! carried base64-encoded, timestamps as epoch seconds, UUIDs in canonical
//! string form.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The declared type of a parameter or state value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValueType {
    Bool,
    Int,
    Double,
    String,
    Bytes,
    Uuid,
    Timestamp,
}

/// A value together with its runtime type.
///
/// Deserialization is untagged: JSON scalars map onto the closest variant
/// (uuid-shaped strings become `Uuid`). Where the declared type differs from
/// the parsed variant, [`TypedValue::coerce`] reinterprets the value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TypedValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    Uuid(Uuid),
    String(String),
}

impl TypedValue {
    /// The [`ValueType`] this value currently carries.
    pub fn value_type(&self) -> ValueType {
        match self {
            TypedValue::Bool(_) => ValueType::Bool,
            TypedValue::Int(_) => ValueType::Int,
            TypedValue::Double(_) => ValueType::Double,
            TypedValue::Uuid(_) => ValueType::Uuid,
            TypedValue::String(_) => ValueType::String,
        }
    }

    /// Reinterpret this value as `target`, applying the permitted
    /// conversions: int↔double widening, int as timestamp, strings as
    /// bytes (base64) or uuids. Returns `None` when the value cannot
    /// represent the target type.
    pub fn coerce(&self, target: ValueType) -> Option<TypedValue> {
        match (self, target) {
            (TypedValue::Bool(_), ValueType::Bool) => Some(self.clone()),
            (TypedValue::Int(_), ValueType::Int | ValueType::Timestamp) => Some(self.clone()),
            (TypedValue::Int(i), ValueType::Double) => Some(TypedValue::Double(*i as f64)),
            (TypedValue::Double(_), ValueType::Double) => Some(self.clone()),
            (TypedValue::Double(d), ValueType::Int) if d.fract() == 0.0 => {
                Some(TypedValue::Int(*d as i64))
            }
            (TypedValue::Uuid(_), ValueType::Uuid) => Some(self.clone()),
            (TypedValue::Uuid(u), ValueType::String) => Some(TypedValue::String(u.to_string())),
            (TypedValue::String(_), ValueType::String | ValueType::Bytes) => Some(self.clone()),
            (TypedValue::String(s), ValueType::Uuid) => {
                Uuid::parse_str(s).ok().map(TypedValue::Uuid)
            }
            _ => None,
        }
    }

    /// True if this value can stand for the declared `target` type.
    pub fn matches_type(&self, target: ValueType) -> bool {
        self.coerce(target).is_some()
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            TypedValue::Int(i) => Some(*i as f64),
            TypedValue::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// Compare two values where both sides are of a comparable type.
    ///
    /// Numeric widening applies between int and double only. Strings
    /// compare case-sensitively. Returns `None` for incomparable types.
    pub fn partial_cmp_value(&self, other: &TypedValue) -> Option<Ordering> {
        match (self, other) {
            (TypedValue::Bool(a), TypedValue::Bool(b)) => Some(a.cmp(b)),
            (TypedValue::String(a), TypedValue::String(b)) => Some(a.cmp(b)),
            (TypedValue::Uuid(a), TypedValue::Uuid(b)) => Some(a.cmp(b)),
            _ => {
                let (a, b) = (self.as_f64()?, other.as_f64()?);
                a.partial_cmp(&b)
            }
        }
    }
}

impl From<bool> for TypedValue {
    fn from(v: bool) -> Self {
        TypedValue::Bool(v)
    }
}

impl From<i64> for TypedValue {
    fn from(v: i64) -> Self {
        TypedValue::Int(v)
    }
}

impl From<f64> for TypedValue {
    fn from(v: f64) -> Self {
        TypedValue::Double(v)
    }
}

impl From<&str> for TypedValue {
    fn from(v: &str) -> Self {
        TypedValue::String(v.to_string())
    }
}

/// Comparison operator used by param and state descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValueOperator {
    #[default]
    Equals,
    NotEquals,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
}

impl ValueOperator {
    /// Apply the operator with `actual` on the left hand side.
    ///
    /// Incomparable operands evaluate to false, except under `NotEquals`
    /// which treats them as unequal.
    pub fn evaluate(&self, actual: &TypedValue, target: &TypedValue) -> bool {
        match actual.partial_cmp_value(target) {
            Some(ordering) => match self {
                ValueOperator::Equals => ordering == Ordering::Equal,
                ValueOperator::NotEquals => ordering != Ordering::Equal,
                ValueOperator::Less => ordering == Ordering::Less,
                ValueOperator::LessOrEqual => ordering != Ordering::Greater,
                ValueOperator::Greater => ordering == Ordering::Greater,
                ValueOperator::GreaterOrEqual => ordering != Ordering::Less,
            },
            None => matches!(self, ValueOperator::NotEquals),
        }
    }
}

/// Boolean combinator for state evaluator trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StateOperator {
    #[default]
    And,
    Or,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_widening() {
        let a = TypedValue::Int(21);
        let b = TypedValue::Double(21.0);
        assert!(ValueOperator::Equals.evaluate(&a, &b));
        assert!(ValueOperator::GreaterOrEqual.evaluate(&b, &a));
        assert!(ValueOperator::Less.evaluate(&TypedValue::Int(20), &b));
    }

    #[test]
    fn string_comparison_is_case_sensitive() {
        let a = TypedValue::from("On");
        let b = TypedValue::from("on");
        assert!(ValueOperator::NotEquals.evaluate(&a, &b));
        assert!(ValueOperator::Equals.evaluate(&a, &a));
    }

    #[test]
    fn incomparable_types() {
        let a = TypedValue::Bool(true);
        let b = TypedValue::Int(1);
        assert!(!ValueOperator::Equals.evaluate(&a, &b));
        assert!(ValueOperator::NotEquals.evaluate(&a, &b));
        assert!(!ValueOperator::Greater.evaluate(&a, &b));
    }

    #[test]
    fn uuid_strings_deserialize_as_uuid() {
        let value: TypedValue =
            serde_json::from_str("\"5dcc7ae0-54e6-40a9-8b8e-d2b1b00e1f6a\"").unwrap();
        assert_eq!(value.value_type(), ValueType::Uuid);
        assert!(value.matches_type(ValueType::String));
    }

    #[test]
    fn coercion_rules() {
        assert!(TypedValue::Int(5).matches_type(ValueType::Double));
        assert!(TypedValue::Int(5).matches_type(ValueType::Timestamp));
        assert!(TypedValue::Double(5.5).coerce(ValueType::Int).is_none());
        assert!(TypedValue::Double(5.0).matches_type(ValueType::Int));
        assert!(!TypedValue::Bool(true).matches_type(ValueType::Int));
    }
}
