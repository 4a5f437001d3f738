use crate::error::{constants, ProtocolError, Result};
use crate::protocol::message::{Request, RequestTask, Response};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{debug, warn};

type HandlerFn = dyn Fn(&Request) -> std::result::Result<Response, TaskFault> + Send + Sync + 'static;

/// Failure reported by a task handler.
///
/// The server never forwards this as an error; it becomes an `Error` response
/// whose body carries [`TaskFault::reason`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct TaskFault {
    reason: String,
}

impl TaskFault {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Wrap any displayable error as a fault.
    pub fn from_error(err: impl fmt::Display) -> Self {
        Self::new(err.to_string())
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// What the dispatcher did with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The handler ran and produced a response.
    Handled(Response),
    /// The handler returned a fault or panicked.
    Faulted(TaskFault),
    /// No handler is registered for the task.
    Unrecognized,
    /// The task belongs to the broker loop, not to a handler.
    Control,
}

/// Task dispatcher routing each [`RequestTask`] to its handler.
///
/// Clones share the same handler table.
#[derive(Clone)]
pub struct Dispatcher {
    handlers: Arc<RwLock<HashMap<RequestTask, Box<HandlerFn>>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tasks: Vec<RequestTask> = match self.handlers.read() {
            Ok(handlers) => handlers.keys().copied().collect(),
            Err(poisoned) => poisoned.into_inner().keys().copied().collect(),
        };
        f.debug_struct("Dispatcher").field("tasks", &tasks).finish()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register the handler for `task`, replacing any earlier one.
    ///
    /// Control tasks are answered by the broker loop and are rejected with
    /// `ReservedTask`. Codes outside the task table are rejected with
    /// `UnknownTask`.
    pub fn register<F>(&self, task: RequestTask, handler: F) -> Result<()>
    where
        F: Fn(&Request) -> std::result::Result<Response, TaskFault> + Send + Sync + 'static,
    {
        if task.is_control() {
            return Err(ProtocolError::ReservedTask(task.code()));
        }
        if !task.is_recognized() {
            return Err(ProtocolError::UnknownTask(task.code()));
        }

        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_DISPATCHER_WRITE_LOCK.to_string()))?;

        if handlers.insert(task, Box::new(handler)).is_some() {
            debug!(%task, "Replaced task handler");
        }
        Ok(())
    }

    pub fn is_registered(&self, task: RequestTask) -> bool {
        match self.handlers.read() {
            Ok(handlers) => handlers.contains_key(&task),
            Err(poisoned) => poisoned.into_inner().contains_key(&task),
        }
    }

    /// Run the handler for `request` on the calling thread.
    ///
    /// A panicking handler is reported as [`DispatchOutcome::Faulted`].
    pub fn dispatch(&self, request: &Request) -> DispatchOutcome {
        let task = request.request_task;
        if task.is_control() {
            return DispatchOutcome::Control;
        }

        // Handler panics are caught below and never unwind through this guard
        let handlers = match self.handlers.read() {
            Ok(handlers) => handlers,
            Err(poisoned) => {
                warn!(error = constants::ERR_DISPATCHER_READ_LOCK, "Recovering poisoned handler table");
                poisoned.into_inner()
            }
        };

        let Some(handler) = handlers.get(&task) else {
            return DispatchOutcome::Unrecognized;
        };

        match panic::catch_unwind(AssertUnwindSafe(|| handler(request))) {
            Ok(Ok(response)) => DispatchOutcome::Handled(response),
            Ok(Err(fault)) => DispatchOutcome::Faulted(fault),
            Err(payload) => DispatchOutcome::Faulted(TaskFault::new(format!(
                "{}: {}",
                constants::ERR_HANDLER_PANICKED,
                panic_message(payload.as_ref())
            ))),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic payload"
    }
}
