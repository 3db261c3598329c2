//! Namespace handlers.

mod configuration;
mod jsonrpc;
mod rules;

pub use configuration::ConfigurationHandler;
pub use jsonrpc::JsonRpcHandler;
pub use rules::{pack_rule, RulesHandler};
