//! JSON-RPC dispatch core.
//!
//! A namespaced, introspectable request/response protocol with
//! asynchronous notifications, multiplexed over pluggable transports.
//! The dispatcher is a single task that owns all core state; see
//! [`server::RpcServer`].

pub mod handler;
pub mod handlers;
pub mod schema;
pub mod server;
pub mod transport;
pub mod transports;
pub mod wire;

pub use handler::{ClientId, Core, Effect, HandlerContext, HandlerOutcome, JsonHandler};
pub use server::{RpcServer, ServerEvent, ServerHandle};
pub use transport::{new_client_id, TransportEvent, TransportHandle};
