//! # Broker Service
//!
//! Start/stop hooks for a host process that owns the broker, such as an OS
//! service. `on_start` launches the accept thread; `on_stop` shuts it down by
//! sending the stop request through an ordinary client, then joins it.
//!
//! Neither hook returns an error: failures are logged through the injected
//! diagnostics and the service keeps going, which is what a service manager
//! callback can cope with. [`BrokerService::start`] is the fallible form.

use std::sync::Arc;

use crate::config::BrokerConfig;
use crate::error::Result;
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::message::Request;
use crate::service::client::BrokerClient;
use crate::service::server::{BrokerServer, ServerHandle};
use crate::utils::logging::Diagnostics;
use crate::utils::metrics::BrokerMetrics;

/// Context string attached to every diagnostic event from the service hooks
pub const SERVICE_LOG_CONTEXT: &str = "BrokerService";

/// Owns the broker loop for the lifetime of a host process.
#[derive(Debug)]
pub struct BrokerService {
    config: BrokerConfig,
    dispatcher: Dispatcher,
    diagnostics: Diagnostics,
    client: BrokerClient,
    handle: Option<ServerHandle>,
}

impl BrokerService {
    pub fn new(config: BrokerConfig, dispatcher: Dispatcher, diagnostics: Diagnostics) -> Self {
        let client = BrokerClient::new(&config, diagnostics.clone());
        Self {
            config,
            dispatcher,
            diagnostics,
            client,
            handle: None,
        }
    }

    /// Validate the configuration and spawn the accept thread.
    pub fn start(&mut self) -> Result<()> {
        if self.handle.is_some() {
            self.diagnostics
                .warn(SERVICE_LOG_CONTEXT, "Broker is already running");
            return Ok(());
        }

        self.config.validate_strict()?;

        let server = BrokerServer::new(&self.config, self.dispatcher.clone(), self.diagnostics.clone());
        let handle = server.spawn()?;
        self.diagnostics.info(
            SERVICE_LOG_CONTEXT,
            &format!("Broker listening on channel {}", handle.channel()),
        );
        self.handle = Some(handle);
        Ok(())
    }

    /// Start hook. Failures are logged, not returned.
    pub fn on_start(&mut self) {
        if let Err(e) = self.start() {
            self.diagnostics
                .error(SERVICE_LOG_CONTEXT, &format!("Failed to start broker: {e}"));
        }
    }

    /// Stop hook.
    ///
    /// Sends the stop request and waits for the accept thread. If the request
    /// cannot be delivered and the thread is still alive, the thread is
    /// detached rather than joined.
    pub fn on_stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        if let Err(e) = self.client.call_blocking(&Request::stop()) {
            self.diagnostics
                .error(SERVICE_LOG_CONTEXT, &format!("Failed to send stop request: {e}"));
            if !handle.is_finished() {
                self.diagnostics
                    .warn(SERVICE_LOG_CONTEXT, "Leaving broker thread detached");
                return;
            }
        }

        match handle.join() {
            Ok(()) => self.diagnostics.info(SERVICE_LOG_CONTEXT, "Broker stopped"),
            Err(e) => self
                .diagnostics
                .error(SERVICE_LOG_CONTEXT, &format!("Broker thread failed: {e}")),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Client bound to this service's channel.
    pub fn client(&self) -> &BrokerClient {
        &self.client
    }

    pub fn metrics(&self) -> Option<Arc<BrokerMetrics>> {
        self.handle.as_ref().map(ServerHandle::metrics)
    }
}
