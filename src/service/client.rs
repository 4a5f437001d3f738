//! # Broker Client
//!
//! Sends one request to the broker and waits for its answer.
//!
//! Calls through a [`BrokerClient`] (and all of its clones) are serialized by
//! an async mutex held across connect, write and read, so at most one request
//! from a handle is in flight. The guard is released on every exit path. A
//! failed call is reported to the caller and never retried here.

use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::instrument;

use crate::config::{BrokerConfig, ClientConfig};
use crate::core::codec::{read_frame, write_frame};
use crate::core::serialization::{decode, encode};
use crate::error::Result;
use crate::protocol::message::{Request, Response};
use crate::transport::{self, ChannelName};
use crate::utils::logging::Diagnostics;
use crate::utils::metrics::Timer;

/// Context string attached to every diagnostic event from the client
pub const CLIENT_LOG_CONTEXT: &str = "BrokerClient";

/// Cloneable handle for calling the broker.
#[derive(Debug, Clone)]
pub struct BrokerClient {
    inner: Arc<ClientInner>,
}

#[derive(Debug)]
struct ClientInner {
    channel: ChannelName,
    config: ClientConfig,
    max_frame_size: usize,
    diagnostics: Diagnostics,
    call_lock: Mutex<()>,
}

impl BrokerClient {
    pub fn new(config: &BrokerConfig, diagnostics: Diagnostics) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                channel: config.channel_name(),
                config: config.client.clone(),
                max_frame_size: config.channel.max_frame_size,
                diagnostics,
                call_lock: Mutex::new(()),
            }),
        }
    }

    pub fn channel(&self) -> &ChannelName {
        &self.inner.channel
    }

    /// Send `request` and return the broker's response.
    ///
    /// Errors:
    /// - `ChannelClosed` when no broker is accepting on the channel, or it
    ///   went away mid-exchange
    /// - `AccessDenied` when the endpoint's access rules exclude the caller
    /// - `DeserializeError` / `FrameTooLarge` / `InvalidUtf8` when the answer
    ///   is not a well-formed response
    #[instrument(skip_all, fields(channel = %self.inner.channel, task = %request.request_task))]
    pub async fn call(&self, request: &Request) -> Result<Response> {
        let _guard = self.inner.call_lock.lock().await;
        let _timer = Timer::start("broker_call");

        let result = self.exchange(request).await;
        if let Err(e) = &result {
            self.inner
                .diagnostics
                .error(CLIENT_LOG_CONTEXT, &format!("Broker call failed: {e}"));
        }
        result
    }

    /// Blocking form of [`call`](Self::call) for synchronous callers such as
    /// service stop hooks.
    ///
    /// Builds a private current-thread runtime, so it must not be called from
    /// inside an async context.
    pub fn call_blocking(&self, request: &Request) -> Result<Response> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.call(request))
    }

    async fn exchange(&self, request: &Request) -> Result<Response> {
        let inner = &self.inner;
        let payload = encode(request)?;

        inner.diagnostics.debug(
            CLIENT_LOG_CONTEXT,
            &format!(
                "Sending message to service. Type={} MessageBody={}",
                request.request_task, request.message_body
            ),
        );
        inner
            .diagnostics
            .debug(CLIENT_LOG_CONTEXT, "Waiting to connect to service...");

        let mut connection = transport::connect(&inner.channel, &inner.config).await?;
        inner
            .diagnostics
            .debug(CLIENT_LOG_CONTEXT, "Connected to service.");

        write_frame(&mut connection, &payload, inner.max_frame_size).await?;
        let frame = read_frame(&mut connection, inner.max_frame_size).await?;
        let response: Response = decode(&frame)?;

        // The response is already in hand; a failed close changes nothing
        let _ = connection.shutdown().await;

        inner.diagnostics.debug(
            CLIENT_LOG_CONTEXT,
            &format!(
                "Received response of '{}' type='{}'",
                response.message_body, response.response_code
            ),
        );
        Ok(response)
    }
}

#[cfg(all(test, unix))]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::error::ProtocolError;
    use crate::protocol::message::RequestTask;

    #[tokio::test]
    async fn test_call_without_broker_is_channel_closed() {
        let dir = tempfile::tempdir().unwrap();
        let name = dir.path().join("absent.sock").to_string_lossy().into_owned();
        let config = BrokerConfig::default_with_overrides(|c| c.channel.name = name);

        let client = BrokerClient::new(&config, Diagnostics::tracing_only());
        let result = client.call(&Request::new(RequestTask::Task1, "")).await;
        assert!(matches!(result, Err(ProtocolError::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_lock_released_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        let name = dir.path().join("absent.sock").to_string_lossy().into_owned();
        let config = BrokerConfig::default_with_overrides(|c| c.channel.name = name);

        let client = BrokerClient::new(&config, Diagnostics::tracing_only());
        assert!(client.call(&Request::stop()).await.is_err());
        assert!(client.inner.call_lock.try_lock().is_ok());
    }
}
