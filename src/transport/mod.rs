//! # Transport Layer
//!
//! The broker talks over one local, connection-oriented channel:
//!
//! - **Unix**: a Unix domain socket (`local`)
//! - **Windows**: a named pipe (`windows_pipe`)
//!
//! Both sides refer to the channel by a [`ChannelName`]; the platform module
//! turns it into a socket path or a pipe name. The server side exposes a
//! [`Listener`] with `bind` and `accept`; the client side exposes [`connect`].
//! Access rules for the endpoint live in [`access`].

pub mod access;

#[cfg(unix)]
pub mod local;
#[cfg(windows)]
pub mod windows_pipe;

use std::fmt;

use crate::config::DEFAULT_CHANNEL_NAME;

#[cfg(unix)]
pub use local::{connect, ClientConnection, LocalListener as Listener, ServerConnection};
#[cfg(windows)]
pub use windows_pipe::{connect, ClientConnection, PipeListener as Listener, ServerConnection};

/// Prefix every Windows named pipe lives under
pub const PIPE_PREFIX: &str = r"\\.\pipe\";

/// Identity of the broker channel, shared by server and clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelName(String);

impl ChannelName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Socket path for this channel.
    ///
    /// Absolute names are used as-is; bare names live in the system temp
    /// directory as `<name>.sock`.
    ///
    /// The temp directory is usually world-writable, so any local user can
    /// bind a bare name before the broker does. The broker then fails with
    /// `AddrInUse` and callers reach the other process. Deployments that
    /// cross a privilege boundary should name an absolute path inside a
    /// directory the service owns, e.g. `/run/<service>/broker.sock`.
    #[cfg(unix)]
    pub fn socket_path(&self) -> std::path::PathBuf {
        let path = std::path::Path::new(&self.0);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::temp_dir().join(format!("{}.sock", self.0))
        }
    }

    /// Whether the socket lands in the shared temp directory, where another
    /// user could claim the path first.
    #[cfg(unix)]
    pub fn is_in_shared_dir(&self) -> bool {
        !std::path::Path::new(&self.0).is_absolute()
    }

    /// Full `\\.\pipe\<name>` form of this channel.
    pub fn pipe_name(&self) -> String {
        if self.0.starts_with(PIPE_PREFIX) {
            return self.0.clone();
        }

        let name = self
            .0
            .trim_start_matches('/')
            .replace(['/', '\\'], "_");

        let name = if name.is_empty() {
            DEFAULT_CHANNEL_NAME
        } else {
            name.as_str()
        };

        format!("{PIPE_PREFIX}{name}")
    }
}

impl Default for ChannelName {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_NAME)
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}
