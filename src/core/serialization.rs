//! # Message Codec
//!
//! Turns [`Request`](crate::protocol::message::Request) and
//! [`Response`](crate::protocol::message::Response) values into the text
//! payload carried by one frame, and back.
//!
//! The payload is JSON so that the frame stays a plain string on the wire and
//! independently built clients can talk to the broker without sharing a binary
//! layout:
//!
//! ```text
//! {"requestTask":1,"messageBody":"X"}
//! {"responseCode":"None","messageBody":""}
//! ```
//!
//! Decoding never panics; malformed input is reported as
//! [`ProtocolError::DeserializeError`] and it is up to the caller to decide
//! what to answer.
//!
//! ## Usage
//! ```rust
//! use privilege_broker::core::serialization::WireMessage;
//! use privilege_broker::protocol::message::{Request, RequestTask};
//!
//! let request = Request::new(RequestTask::Task1, "X");
//! let text = request.encode().unwrap();
//! assert_eq!(Request::decode(&text).unwrap(), request);
//! ```

use crate::error::{ProtocolError, Result};
use crate::protocol::message::{Request, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Trait for the two message types that travel inside a frame.
pub trait WireMessage: Serialize + DeserializeOwned + Sized {
    /// Serialize to the frame payload
    fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializeError(e.to_string()))
    }

    /// Deserialize from a frame payload
    fn decode(payload: &str) -> Result<Self> {
        serde_json::from_str(payload).map_err(|e| ProtocolError::DeserializeError(e.to_string()))
    }
}

impl WireMessage for Request {}
impl WireMessage for Response {}

/// Free-function form of [`WireMessage::encode`].
pub fn encode<T: WireMessage>(value: &T) -> Result<String> {
    value.encode()
}

/// Free-function form of [`WireMessage::decode`].
pub fn decode<T: WireMessage>(payload: &str) -> Result<T> {
    T::decode(payload)
}
