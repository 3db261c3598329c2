//! Concrete transports.

pub mod tcp;
pub mod websocket;
