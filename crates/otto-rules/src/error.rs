//! Rule engine error taxonomy.
//!
//! These variants cross the RPC boundary by name; clients branch on the
//! serialized variant string, so renaming one is a protocol change.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum RuleError {
    #[error("a rule with this id already exists")]
    DuplicateId,

    #[error("rule not found")]
    RuleNotFound,

    #[error("referenced device not found")]
    DeviceNotFound,

    #[error("referenced event type not found")]
    EventTypeNotFound,

    #[error("referenced action type not found")]
    ActionTypeNotFound,

    #[error("referenced state type not found")]
    StateTypeNotFound,

    #[error("rule format is inconsistent")]
    InvalidRuleFormat,

    #[error("state evaluator references an invalid state or value")]
    InvalidStateEvaluatorValue,

    #[error("time descriptor is invalid")]
    InvalidTimeDescriptor,

    #[error("time event item is invalid")]
    InvalidTimeEventItem,

    #[error("calendar item is invalid")]
    InvalidCalendarItem,

    #[error("repeating option is invalid")]
    InvalidRepeatingOption,

    #[error("rule action parameter is invalid")]
    InvalidRuleActionParameter,

    #[error("action param type and event param type do not match")]
    TypesNotMatching,

    #[error("rule is not executable")]
    NotExecutable,

    #[error("rule has no exit actions")]
    NoExitActions,

    #[error("rule contains an event-based action")]
    ContainsEventBasedAction,

    #[error("persistence backend failed")]
    BackendError,
}

impl RuleError {
    /// The wire name, equal to the variant name.
    pub fn name(&self) -> &'static str {
        match self {
            RuleError::DuplicateId => "DuplicateId",
            RuleError::RuleNotFound => "RuleNotFound",
            RuleError::DeviceNotFound => "DeviceNotFound",
            RuleError::EventTypeNotFound => "EventTypeNotFound",
            RuleError::ActionTypeNotFound => "ActionTypeNotFound",
            RuleError::StateTypeNotFound => "StateTypeNotFound",
            RuleError::InvalidRuleFormat => "InvalidRuleFormat",
            RuleError::InvalidStateEvaluatorValue => "InvalidStateEvaluatorValue",
            RuleError::InvalidTimeDescriptor => "InvalidTimeDescriptor",
            RuleError::InvalidTimeEventItem => "InvalidTimeEventItem",
            RuleError::InvalidCalendarItem => "InvalidCalendarItem",
            RuleError::InvalidRepeatingOption => "InvalidRepeatingOption",
            RuleError::InvalidRuleActionParameter => "InvalidRuleActionParameter",
            RuleError::TypesNotMatching => "TypesNotMatching",
            RuleError::NotExecutable => "NotExecutable",
            RuleError::NoExitActions => "NoExitActions",
            RuleError::ContainsEventBasedAction => "ContainsEventBasedAction",
            RuleError::BackendError => "BackendError",
        }
    }
}
