//! Shared identifier, value and descriptor types for the otto server.
//!
//! Everything here is plain data: typed UUID identifiers, the tagged value
//! union with its comparison operators, parameter declarations and the
//! descriptor types rules are built from. Behavior lives in the crates that
//! consume these types.

mod action;
mod event;
mod id;
mod param;
mod state;
mod value;

pub use action::{Action, RuleAction, RuleActionParam};
pub use event::{Event, EventDescriptor};
pub use id::{
    ActionTypeId, DeviceId, EventTypeId, PairingTransactionId, ParamTypeId, RuleId, StateTypeId,
    TokenId,
};
pub use param::{Param, ParamDescriptor, ParamType};
pub use state::{State, StateDescriptor};
pub use value::{StateOperator, TypedValue, ValueOperator, ValueType};
