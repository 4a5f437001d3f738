//! # Protocol
//!
//! The broker's message model and the table that routes each task to its
//! handler.

pub mod dispatcher;
pub mod message;


pub use dispatcher::{DispatchOutcome, Dispatcher, TaskFault};
pub use message::{Request, RequestTask, Response, ResponseCode, UnknownCode};
