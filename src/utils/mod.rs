//! # Utility Modules
//!
//! Supporting utilities shared by the broker server and client.
//!
//! ## Components
//! - **Logging**: subscriber setup and the injected diagnostic sink
//! - **Metrics**: thread-safe counters for the accept loop

pub mod logging;
pub mod metrics;

pub use logging::{Diagnostics, LogSink};
pub use metrics::{BrokerMetrics, MetricsSnapshot};
