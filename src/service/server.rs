//! # Broker Server
//!
//! The accept loop that answers broker requests.
//!
//! One connection is one exchange: read a request frame, answer with exactly
//! one response frame, close. Cycles are strictly sequential, so at most one
//! task handler runs at any time. The loop lives on its own named OS thread
//! driving a current-thread tokio runtime; [`BrokerServer::spawn`] starts it
//! and returns a [`ServerHandle`] to join it.
//!
//! The loop only ends when a client sends the `StopNamedPipeServer` control
//! task. Handler faults, malformed frames and transport hiccups are logged
//! and the loop goes back to accepting.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tracing::instrument;

use crate::config::BrokerConfig;
use crate::core::codec::{read_frame, write_frame};
use crate::core::serialization::{decode, encode};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::dispatcher::{DispatchOutcome, Dispatcher};
use crate::protocol::message::{Request, Response};
use crate::transport::access::AccessPolicy;
use crate::transport::{ChannelName, Listener, ServerConnection};
use crate::utils::logging::Diagnostics;
use crate::utils::metrics::{BrokerMetrics, Timer};

/// Context string attached to every diagnostic event from the server loop
pub const SERVER_LOG_CONTEXT: &str = "BrokerServer";

/// Pause after a failed accept before waiting again
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Broker accept loop and its dependencies.
#[derive(Debug)]
pub struct BrokerServer {
    channel: ChannelName,
    policy: AccessPolicy,
    max_frame_size: usize,
    thread_name: String,
    dispatcher: Dispatcher,
    diagnostics: Diagnostics,
    metrics: Arc<BrokerMetrics>,
}

impl BrokerServer {
    pub fn new(config: &BrokerConfig, dispatcher: Dispatcher, diagnostics: Diagnostics) -> Self {
        Self {
            channel: config.channel_name(),
            policy: config.access_policy(),
            max_frame_size: config.channel.max_frame_size,
            thread_name: config.server.thread_name.clone(),
            dispatcher,
            diagnostics,
            metrics: Arc::new(BrokerMetrics::new()),
        }
    }

    pub fn channel(&self) -> &ChannelName {
        &self.channel
    }

    pub fn metrics(&self) -> Arc<BrokerMetrics> {
        self.metrics.clone()
    }

    /// Create the endpoint with the access policy applied.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(&self) -> Result<Listener> {
        Listener::bind(&self.channel, &self.policy)
    }

    /// Bind and run the loop on the current runtime until a stop request.
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind()?;
        self.serve(listener).await
    }

    /// Run the accept loop on an already bound endpoint.
    ///
    /// Returns after the cycle that answered a stop request. The endpoint is
    /// dropped on return, which removes it so later connects fail.
    #[instrument(skip_all, fields(channel = %self.channel))]
    pub async fn serve(&self, mut listener: Listener) -> Result<()> {
        let thread = thread::current()
            .name()
            .unwrap_or("<unnamed>")
            .to_string();

        loop {
            self.diagnostics.debug(
                SERVER_LOG_CONTEXT,
                &format!("Waiting for connection on thread {thread}"),
            );

            let mut connection = match listener.accept().await {
                Ok(connection) => connection,
                Err(e) => {
                    self.metrics.accept_error();
                    self.diagnostics
                        .error(SERVER_LOG_CONTEXT, &format!("Failed to accept connection: {e}"));
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    continue;
                }
            };

            self.metrics.connection_established();
            let stop = self.serve_connection(&mut connection).await;

            if let Err(e) = connection.shutdown().await {
                self.diagnostics
                    .debug(SERVER_LOG_CONTEXT, &format!("Connection shutdown failed: {e}"));
            }
            drop(connection);

            self.diagnostics
                .debug(SERVER_LOG_CONTEXT, &format!("Finished with connection on thread {thread}"));

            if stop {
                break;
            }
        }

        self.diagnostics.info(SERVER_LOG_CONTEXT, "Closing server pipe.");
        drop(listener);
        self.metrics.log_metrics();
        Ok(())
    }

    /// Start the loop on a dedicated thread.
    ///
    /// Returns once the endpoint is bound, so a client created afterwards can
    /// connect straight away. Bind failures are returned here rather than
    /// from [`ServerHandle::join`].
    pub fn spawn(self) -> Result<ServerHandle> {
        let metrics = self.metrics.clone();
        let channel = self.channel.clone();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let join = thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || -> Result<()> {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(ProtocolError::Io(e)));
                        return Ok(());
                    }
                };

                runtime.block_on(async move {
                    let listener = match self.bind() {
                        Ok(listener) => listener,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return Ok(());
                        }
                    };
                    let _ = ready_tx.send(Ok(()));
                    self.serve(listener).await
                })
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(ServerHandle {
                join,
                metrics,
                channel,
            }),
            Ok(Err(e)) => {
                let _ = join.join();
                Err(e)
            }
            Err(_) => {
                let _ = join.join();
                Err(ProtocolError::Custom(
                    constants::ERR_SERVER_THREAD_PANICKED.to_string(),
                ))
            }
        }
    }

    /// One cycle: read, answer, report whether the loop should stop.
    async fn serve_connection(&self, connection: &mut ServerConnection) -> bool {
        let _timer = Timer::start("broker_cycle");

        let (response, stop) = match read_frame(&mut *connection, self.max_frame_size).await {
            Ok(frame) => self.handle_frame(&frame),
            Err(ProtocolError::ChannelClosed) => {
                self.metrics.peer_disconnected();
                self.diagnostics.warn(
                    SERVER_LOG_CONTEXT,
                    "Client disconnected before sending a complete request",
                );
                return false;
            }
            Err(e) if e.is_protocol_error() => {
                self.metrics.malformed_request();
                self.diagnostics
                    .error(SERVER_LOG_CONTEXT, &format!("Rejected request frame: {e}"));
                (Response::error(e.to_string()), false)
            }
            Err(e) => {
                self.diagnostics
                    .error(SERVER_LOG_CONTEXT, &format!("Failed to read request: {e}"));
                return false;
            }
        };

        self.send_response(connection, &response).await;
        stop
    }

    /// Decode and dispatch one request frame.
    fn handle_frame(&self, frame: &str) -> (Response, bool) {
        let request: Request = match decode(frame) {
            Ok(request) => request,
            Err(e) => {
                self.metrics.malformed_request();
                self.diagnostics
                    .error(SERVER_LOG_CONTEXT, &format!("Failed to decode request: {e}"));
                return (Response::error(e.to_string()), false);
            }
        };

        self.diagnostics.info(
            SERVER_LOG_CONTEXT,
            &format!(
                "Received new message from client. Type={} MessageBody={}",
                request.request_task, request.message_body
            ),
        );

        match self.dispatcher.dispatch(&request) {
            DispatchOutcome::Control => {
                self.metrics.control_request();
                self.diagnostics.info(
                    SERVER_LOG_CONTEXT,
                    "Shutting down named pipe server thread on request.",
                );
                (Response::none(), true)
            }
            DispatchOutcome::Handled(response) => {
                self.metrics.request_dispatched();
                (response, false)
            }
            DispatchOutcome::Faulted(fault) => {
                self.metrics.request_dispatched();
                self.metrics.handler_fault();
                let body = format!("{}{}", constants::ERR_REQUEST_FAILED_PREFIX, fault.reason());
                self.diagnostics.error(SERVER_LOG_CONTEXT, &body);
                (Response::error(body), false)
            }
            DispatchOutcome::Unrecognized => {
                self.metrics.unknown_task();
                self.diagnostics.warn(
                    SERVER_LOG_CONTEXT,
                    &format!(
                        "Unknown message received from client: {}",
                        request.request_task
                    ),
                );
                (Response::none(), false)
            }
        }
    }

    async fn send_response(&self, connection: &mut ServerConnection, response: &Response) {
        let payload = match self.encode_response(response) {
            Ok(payload) => payload,
            Err(e) => {
                self.metrics.response_failed();
                self.diagnostics
                    .error(SERVER_LOG_CONTEXT, &format!("Failed to encode response: {e}"));
                return;
            }
        };

        self.diagnostics.debug(
            SERVER_LOG_CONTEXT,
            &format!(
                "Sending response of '{}' type='{}'",
                response.message_body, response.response_code
            ),
        );

        match write_frame(&mut *connection, &payload, self.max_frame_size).await {
            Ok(()) => self.metrics.response_sent(),
            Err(e) => {
                self.metrics.response_failed();
                self.diagnostics
                    .error(SERVER_LOG_CONTEXT, &format!("Failed to send response: {e}"));
            }
        }
    }

    /// Encode `response`, substituting an error response when it does not
    /// fit in one frame.
    fn encode_response(&self, response: &Response) -> Result<String> {
        match encode(response) {
            Ok(payload) if payload.len() <= self.max_frame_size => Ok(payload),
            Ok(payload) => {
                let reason = ProtocolError::FrameTooLarge(payload.len());
                encode(&Response::error(format!(
                    "{}{reason}",
                    constants::ERR_REQUEST_FAILED_PREFIX
                )))
            }
            Err(e) => encode(&Response::error(format!(
                "{}{e}",
                constants::ERR_REQUEST_FAILED_PREFIX
            ))),
        }
    }
}

/// Handle to a broker loop running on its own thread.
#[derive(Debug)]
pub struct ServerHandle {
    join: JoinHandle<Result<()>>,
    metrics: Arc<BrokerMetrics>,
    channel: ChannelName,
}

impl ServerHandle {
    /// Wait for the loop to exit.
    ///
    /// The loop exits only after answering a stop request, so send one first
    /// or this blocks forever.
    pub fn join(self) -> Result<()> {
        self.join.join().map_err(|_| {
            ProtocolError::Custom(constants::ERR_SERVER_THREAD_PANICKED.to_string())
        })?
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub fn metrics(&self) -> Arc<BrokerMetrics> {
        self.metrics.clone()
    }

    pub fn channel(&self) -> &ChannelName {
        &self.channel
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::protocol::dispatcher::TaskFault;
    use crate::protocol::message::{RequestTask, ResponseCode};
    use std::sync::Mutex;

    fn server_with(dispatcher: Dispatcher) -> (BrokerServer, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let diagnostics = Diagnostics::with_sink(move |_: &str, message: &str| {
            sink.lock().unwrap().push(message.to_string());
        });
        let server = BrokerServer::new(&BrokerConfig::default(), dispatcher, diagnostics);
        (server, seen)
    }

    fn frame_for(request: &Request) -> String {
        encode(request).unwrap()
    }

    #[test]
    fn test_handled_request() {
        let dispatcher = Dispatcher::new();
        dispatcher
            .register(RequestTask::Task1, |_| Ok(Response::none()))
            .unwrap();
        let (server, seen) = server_with(dispatcher);

        let (response, stop) = server.handle_frame(&frame_for(&Request::new(RequestTask::Task1, "X")));
        assert_eq!(response, Response::none());
        assert!(!stop);
        assert!(seen
            .lock()
            .unwrap()
            .iter()
            .any(|m| m == "Received new message from client. Type=Task1 MessageBody=X"));
    }

    #[test]
    fn test_stop_request_ends_loop() {
        let (server, seen) = server_with(Dispatcher::new());

        let (response, stop) = server.handle_frame(&frame_for(&Request::stop()));
        assert_eq!(response, Response::none());
        assert!(stop);
        assert_eq!(server.metrics().snapshot().control_requests, 1);
        assert!(seen
            .lock()
            .unwrap()
            .iter()
            .any(|m| m.starts_with("Shutting down named pipe server thread")));
    }

    #[test]
    fn test_unknown_task_gets_empty_none() {
        let (server, seen) = server_with(Dispatcher::new());

        let (response, stop) =
            server.handle_frame(&frame_for(&Request::new(RequestTask::from(9999), "")));
        assert_eq!(response.response_code, ResponseCode::None);
        assert!(response.message_body.is_empty());
        assert!(!stop);
        assert!(seen
            .lock()
            .unwrap()
            .iter()
            .any(|m| m.starts_with("Unknown message received from client")));
    }

    #[test]
    fn test_fault_becomes_error_response() {
        let dispatcher = Dispatcher::new();
        dispatcher
            .register(RequestTask::Task2, |_| Err(TaskFault::new("boom")))
            .unwrap();
        let (server, _) = server_with(dispatcher);

        let (response, stop) = server.handle_frame(&frame_for(&Request::new(RequestTask::Task2, "")));
        assert_eq!(
            response,
            Response::error("Error occurred while running protocol request: boom")
        );
        assert!(!stop);
        assert_eq!(server.metrics().snapshot().handler_faults, 1);
    }

    #[test]
    fn test_malformed_frame_becomes_error_response() {
        let (server, _) = server_with(Dispatcher::new());

        let (response, stop) = server.handle_frame("{not json");
        assert!(response.is_error());
        assert!(!response.message_body.is_empty());
        assert!(!stop);
        assert_eq!(server.metrics().snapshot().malformed_requests, 1);
    }

    #[test]
    fn test_oversized_response_is_replaced() {
        let config = BrokerConfig::default_with_overrides(|c| c.channel.max_frame_size = 1024);
        let server = BrokerServer::new(&config, Dispatcher::new(), Diagnostics::tracing_only());

        let payload = server
            .encode_response(&Response::success("x".repeat(4096)))
            .unwrap();
        let response: Response = decode(&payload).unwrap();
        assert!(response.is_error());
        assert!(response
            .message_body
            .starts_with(constants::ERR_REQUEST_FAILED_PREFIX));
    }
}
