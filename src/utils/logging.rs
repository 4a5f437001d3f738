//! # Logging
//!
//! Two things live here:
//!
//! - [`init_logging`], which installs the process-wide `tracing` subscriber
//!   from a [`LoggingConfig`]
//! - [`Diagnostics`], the capability the broker server and client are
//!   constructed with. Every diagnostic event goes to `tracing` at its level
//!   and, when one was injected, to a caller-supplied [`LogSink`] as a
//!   `(context, message)` pair.
//!
//! ```rust
//! use privilege_broker::utils::logging::Diagnostics;
//! use std::sync::{Arc, Mutex};
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = seen.clone();
//! let diagnostics = Diagnostics::with_sink(move |context: &str, message: &str| {
//!     sink.lock().unwrap().push(format!("{context}: {message}"));
//! });
//!
//! diagnostics.info("example", "hello");
//! assert_eq!(seen.lock().unwrap().as_slice(), ["example: hello"]);
//! ```

use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, IsTerminal};
use std::sync::{Arc, Mutex};

use once_cell::sync::OnceCell;
use tracing::level_filters::LevelFilter;
use tracing::{debug, error, info, warn, Subscriber};
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};

static LOGGING_GUARD: OnceCell<()> = OnceCell::new();

/// Receiver for broker diagnostic events.
pub trait LogSink: Send + Sync {
    fn log(&self, context: &str, message: &str);
}

impl<F> LogSink for F
where
    F: Fn(&str, &str) + Send + Sync,
{
    fn log(&self, context: &str, message: &str) {
        self(context, message)
    }
}

/// Diagnostic event emitter handed to the broker server and client.
#[derive(Clone, Default)]
pub struct Diagnostics {
    sink: Option<Arc<dyn LogSink>>,
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

impl Diagnostics {
    /// Emit through `tracing` only.
    pub fn tracing_only() -> Self {
        Self::default()
    }

    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink: Some(sink) }
    }

    pub fn with_sink<S>(sink: S) -> Self
    where
        S: LogSink + 'static,
    {
        Self::new(Arc::new(sink))
    }

    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    pub fn debug(&self, context: &str, message: &str) {
        debug!(context, "{message}");
        self.forward(context, message);
    }

    pub fn info(&self, context: &str, message: &str) {
        info!(context, "{message}");
        self.forward(context, message);
    }

    pub fn warn(&self, context: &str, message: &str) {
        warn!(context, "{message}");
        self.forward(context, message);
    }

    pub fn error(&self, context: &str, message: &str) {
        error!(context, "{message}");
        self.forward(context, message);
    }

    fn forward(&self, context: &str, message: &str) {
        if let Some(sink) = &self.sink {
            sink.log(context, message);
        }
    }
}

/// Install the global `tracing` subscriber described by `config`.
///
/// Only the first call installs anything; later calls return `Ok(())`.
/// `RUST_LOG` overrides the configured level when set.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    LOGGING_GUARD
        .get_or_try_init(|| install_subscriber(config))
        .map(|_| ())
}

fn install_subscriber(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(config.log_level).into())
        .from_env_lossy();

    let writer = make_writer(config)?;
    let ansi = config.log_to_console && !config.log_to_file && io::stderr().is_terminal();

    let builder = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_thread_names(true)
        .with_ansi(ansi)
        .with_writer(writer);

    let subscriber: Box<dyn Subscriber + Send + Sync> = if config.json_format {
        Box::new(builder.json().flatten_event(true).finish())
    } else {
        Box::new(builder.compact().finish())
    };

    tracing::subscriber::set_global_default(subscriber).map_err(|e| {
        ProtocolError::ConfigError(format!("Failed to install logging subscriber: {e}"))
    })?;

    info!(app = %config.app_name, level = %config.log_level, "Logging initialized");
    Ok(())
}

fn make_writer(config: &LoggingConfig) -> Result<BoxMakeWriter> {
    let file = match (config.log_to_file, config.log_file_path.as_deref()) {
        (true, Some(path)) => Some(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| {
                    ProtocolError::ConfigError(format!("Failed to open log file {path}: {e}"))
                })?,
        ),
        (true, None) => {
            return Err(ProtocolError::ConfigError(
                "log_file_path must be specified when log_to_file is true".to_string(),
            ))
        }
        (false, _) => None,
    };

    let writer = match (config.log_to_console, file) {
        (true, Some(file)) => BoxMakeWriter::new(io::stderr.and(Mutex::new(file))),
        (false, Some(file)) => BoxMakeWriter::new(Mutex::new(file)),
        (_, None) => BoxMakeWriter::new(io::stderr),
    };

    Ok(writer)
}
