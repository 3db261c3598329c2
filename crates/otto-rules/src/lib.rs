//! Rule model, persistence and the rule engine.
//!
//! A rule connects device events, device states and the calendar to device
//! actions. The [`RuleEngine`] owns the rule index, validates and persists
//! every change, and evaluates rules against incoming events and clock
//! ticks.

mod engine;
mod error;
mod rule;
mod state_evaluator;
mod store;
pub mod time;

pub use engine::{RuleEngine, RuleOutcome};
pub use error::RuleError;
pub use rule::Rule;
pub use state_evaluator::StateEvaluator;
pub use store::{RuleStore, StoreError, StoreResult};
pub use time::{CalendarItem, RepeatingMode, RepeatingOption, TimeDescriptor, TimeEventItem};
