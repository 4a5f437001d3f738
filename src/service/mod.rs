//! # Broker Service Layer
//!
//! - **server**: the sequential accept-dispatch-respond loop
//! - **client**: the caller side, one request at a time per handle
//! - **broker**: start/stop hooks owning the loop's thread

pub mod broker;
pub mod client;
pub mod server;

pub use broker::BrokerService;
pub use client::BrokerClient;
pub use server::{BrokerServer, ServerHandle};
