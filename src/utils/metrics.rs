//! Observability and Metrics
//!
//! Counters for the broker accept loop. One [`BrokerMetrics`] is shared by a
//! server and whoever holds its handle. The loop serves one connection at a
//! time, so there are no concurrency gauges.
//!
//! Uses atomic counters for thread-safe metrics collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Metrics collector for the broker loop
#[derive(Debug)]
pub struct BrokerMetrics {
    /// Total connections accepted
    pub connections_total: AtomicU64,
    /// Failures while waiting for a connection
    pub accept_errors: AtomicU64,
    /// Peers that went away before sending a complete request frame
    pub peer_disconnects: AtomicU64,
    /// Requests decoded and routed to a handler
    pub requests_dispatched: AtomicU64,
    /// Control requests (shutdown) received
    pub control_requests: AtomicU64,
    /// Requests for tasks with no handler
    pub unknown_tasks: AtomicU64,
    /// Handlers that returned a fault or panicked
    pub handler_faults: AtomicU64,
    /// Frames that could not be decoded as a request
    pub malformed_requests: AtomicU64,
    /// Responses written back
    pub responses_sent: AtomicU64,
    /// Responses that could not be written back
    pub response_failures: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl BrokerMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            accept_errors: AtomicU64::new(0),
            peer_disconnects: AtomicU64::new(0),
            requests_dispatched: AtomicU64::new(0),
            control_requests: AtomicU64::new(0),
            unknown_tasks: AtomicU64::new(0),
            handler_faults: AtomicU64::new(0),
            malformed_requests: AtomicU64::new(0),
            responses_sent: AtomicU64::new(0),
            response_failures: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record an accepted connection
    pub fn connection_established(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn accept_error(&self) {
        self.accept_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn peer_disconnected(&self) {
        self.peer_disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_dispatched(&self) {
        self.requests_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn control_request(&self) {
        self.control_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unknown_task(&self) {
        self.unknown_tasks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handler_fault(&self) {
        self.handler_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn malformed_request(&self) {
        self.malformed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn response_sent(&self) {
        self.responses_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn response_failed(&self) {
        self.response_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            accept_errors: self.accept_errors.load(Ordering::Relaxed),
            peer_disconnects: self.peer_disconnects.load(Ordering::Relaxed),
            requests_dispatched: self.requests_dispatched.load(Ordering::Relaxed),
            control_requests: self.control_requests.load(Ordering::Relaxed),
            unknown_tasks: self.unknown_tasks.load(Ordering::Relaxed),
            handler_faults: self.handler_faults.load(Ordering::Relaxed),
            malformed_requests: self.malformed_requests.load(Ordering::Relaxed),
            responses_sent: self.responses_sent.load(Ordering::Relaxed),
            response_failures: self.response_failures.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_total = snapshot.connections_total,
            accept_errors = snapshot.accept_errors,
            peer_disconnects = snapshot.peer_disconnects,
            requests_dispatched = snapshot.requests_dispatched,
            control_requests = snapshot.control_requests,
            unknown_tasks = snapshot.unknown_tasks,
            handler_faults = snapshot.handler_faults,
            malformed_requests = snapshot.malformed_requests,
            responses_sent = snapshot.responses_sent,
            response_failures = snapshot.response_failures,
            uptime_seconds = snapshot.uptime_seconds,
            "Broker metrics snapshot"
        );
    }
}

impl Default for BrokerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub accept_errors: u64,
    pub peer_disconnects: u64,
    pub requests_dispatched: u64,
    pub control_requests: u64,
    pub unknown_tasks: u64,
    pub handler_faults: u64,
    pub malformed_requests: u64,
    pub responses_sent: u64,
    pub response_failures: u64,
    pub uptime_seconds: u64,
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start timing an operation
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_ms = duration.as_millis() as u64,
            "Operation completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = BrokerMetrics::new();

        metrics.connection_established();
        metrics.connection_established();
        metrics.response_sent();
        metrics.handler_fault();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connections_total, 2);
        assert_eq!(snapshot.responses_sent, 1);
        assert_eq!(snapshot.handler_faults, 1);
    }

    #[test]
    fn test_counters_start_at_zero() {
        let snapshot = BrokerMetrics::default().snapshot();
        assert_eq!(snapshot.responses_sent, 0);
        assert_eq!(snapshot.handler_faults, 0);
        assert_eq!(snapshot.unknown_tasks, 0);
    }
}
