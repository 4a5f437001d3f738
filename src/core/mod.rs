//! # Core Protocol Components
//!
//! Framing and message encoding for the broker channel.
//!
//! ## Components
//! - **Codec**: Tokio codec for length-prefixed UTF-8 frames
//! - **Serialization**: JSON encoding of requests and responses
//!
//! ## Wire Format
//! ```text
//! [Length(4, big-endian)] [UTF-8 Payload(N)]
//! ```
//!
//! ## Security
//! - Maximum frame size is configurable, 1 MiB by default
//! - Length validation before allocation

pub mod codec;
pub mod serialization;
