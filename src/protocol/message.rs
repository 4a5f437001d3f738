use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies the privileged operation a [`Request`] asks for.
///
/// On the wire a task is its numeric code. Codes the broker does not know
/// decode to [`RequestTask::Unrecognized`] so that a newer client talking to an
/// older broker gets a no-op answer rather than a decode failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum RequestTask {
    /// Control task handled by the server loop itself; stops the accept thread.
    StopNamedPipeServer,
    Task1,
    Task2,
    /// A code outside the task table.
    Unrecognized(UnknownCode),
}

/// A task code that is not in the task table.
///
/// The field is private: the only constructors reject the codes of known
/// tasks, so an `Unrecognized` request can never reach a real handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnknownCode(u32);

impl UnknownCode {
    /// Wraps `code`, or `None` when it names a known task.
    pub fn new(code: u32) -> Option<Self> {
        match RequestTask::from(code) {
            RequestTask::Unrecognized(unknown) => Some(unknown),
            _ => None,
        }
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for UnknownCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl RequestTask {
    pub const STOP_NAMED_PIPE_SERVER_CODE: u32 = 0;
    pub const TASK1_CODE: u32 = 1;
    pub const TASK2_CODE: u32 = 2;

    /// Numeric wire code for this task.
    pub fn code(self) -> u32 {
        match self {
            RequestTask::StopNamedPipeServer => Self::STOP_NAMED_PIPE_SERVER_CODE,
            RequestTask::Task1 => Self::TASK1_CODE,
            RequestTask::Task2 => Self::TASK2_CODE,
            RequestTask::Unrecognized(code) => code.get(),
        }
    }

    /// Whether the broker loop handles this task instead of a registered handler.
    pub fn is_control(self) -> bool {
        matches!(self, RequestTask::StopNamedPipeServer)
    }

    pub fn is_recognized(self) -> bool {
        !matches!(self, RequestTask::Unrecognized(_))
    }
}

impl From<u32> for RequestTask {
    fn from(code: u32) -> Self {
        match code {
            Self::STOP_NAMED_PIPE_SERVER_CODE => RequestTask::StopNamedPipeServer,
            Self::TASK1_CODE => RequestTask::Task1,
            Self::TASK2_CODE => RequestTask::Task2,
            other => RequestTask::Unrecognized(UnknownCode(other)),
        }
    }
}

impl From<RequestTask> for u32 {
    fn from(task: RequestTask) -> Self {
        task.code()
    }
}

impl fmt::Display for RequestTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestTask::StopNamedPipeServer => f.write_str("StopNamedPipeServer"),
            RequestTask::Task1 => f.write_str("Task1"),
            RequestTask::Task2 => f.write_str("Task2"),
            RequestTask::Unrecognized(code) => write!(f, "Unrecognized({code})"),
        }
    }
}

/// Outcome class of a [`Response`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ResponseCode {
    /// Accepted with no result; also the acknowledgement for control and
    /// unrecognized tasks.
    #[default]
    None,
    Success,
    Error,
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseCode::None => f.write_str("None"),
            ResponseCode::Success => f.write_str("Success"),
            ResponseCode::Error => f.write_str("Error"),
        }
    }
}

/// A single call into the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub request_task: RequestTask,
    pub message_body: String,
}

impl Request {
    pub fn new(request_task: RequestTask, message_body: impl Into<String>) -> Self {
        Self {
            request_task,
            message_body: message_body.into(),
        }
    }

    /// The control request that asks the broker loop to exit.
    pub fn stop() -> Self {
        Self::new(RequestTask::StopNamedPipeServer, String::new())
    }
}

/// The broker's single answer to a [`Request`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub response_code: ResponseCode,
    pub message_body: String,
}

impl Response {
    /// Empty `None` response: the acknowledgement used when there is no result.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn success(message_body: impl Into<String>) -> Self {
        Self {
            response_code: ResponseCode::Success,
            message_body: message_body.into(),
        }
    }

    pub fn error(message_body: impl Into<String>) -> Self {
        Self {
            response_code: ResponseCode::Error,
            message_body: message_body.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.response_code == ResponseCode::Error
    }
}
