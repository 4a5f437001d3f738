//! # Privilege Broker
//!
//! A privileged process answers a small fixed set of tasks for unprivileged
//! local callers over one named local channel: a Unix domain socket, or a
//! named pipe on Windows.
//!
//! Each exchange is one connection carrying one request frame and one
//! response frame. The server handles connections strictly one at a time on
//! a dedicated thread, always answers, and only stops when asked to with the
//! `StopNamedPipeServer` control task.
//!
//! ## Example
//! ```rust,no_run
//! use privilege_broker::{
//!     BrokerClient, BrokerConfig, BrokerServer, Diagnostics, Dispatcher, Request, RequestTask,
//!     Response,
//! };
//!
//! # fn main() -> privilege_broker::Result<()> {
//! let config = BrokerConfig::default();
//! let dispatcher = Dispatcher::new();
//! dispatcher.register(RequestTask::Task1, |_request| Ok(Response::none()))?;
//!
//! let handle = BrokerServer::new(&config, dispatcher, Diagnostics::tracing_only()).spawn()?;
//!
//! let client = BrokerClient::new(&config, Diagnostics::tracing_only());
//! let response = client.call_blocking(&Request::new(RequestTask::Task1, "X"))?;
//! assert_eq!(response, Response::none());
//!
//! client.call_blocking(&Request::stop())?;
//! handle.join()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use config::BrokerConfig;
pub use error::{ProtocolError, Result};
pub use protocol::{
    DispatchOutcome, Dispatcher, Request, RequestTask, Response, ResponseCode, TaskFault,
    UnknownCode,
};
pub use service::{BrokerClient, BrokerServer, BrokerService, ServerHandle};
pub use transport::access::AccessPolicy;
pub use transport::ChannelName;
pub use utils::logging::{init_logging, Diagnostics, LogSink};
pub use utils::metrics::{BrokerMetrics, MetricsSnapshot};
