//! # Unix Domain Socket Transport
//!
//! The broker endpoint on Unix is a socket file. One listener is bound for the
//! life of the accept loop; each accepted stream is one exchange. The access
//! policy is written to the socket file at bind time and re-applied before
//! every accept, so a mode changed behind the broker's back does not survive
//! into the next cycle.
//!
//! Dropping the listener removes the socket file, which is what makes
//! connects after shutdown fail with `ChannelClosed`.

use std::io;
use std::path::{Path, PathBuf};

use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, instrument, warn};

use crate::config::ClientConfig;
use crate::error::{ProtocolError, Result};
use crate::transport::access::AccessPolicy;
use crate::transport::ChannelName;

/// Server end of one accepted exchange
pub type ServerConnection = UnixStream;

/// Client end of one exchange
pub type ClientConnection = UnixStream;

/// Broker endpoint bound to a socket path.
#[derive(Debug)]
pub struct LocalListener {
    listener: UnixListener,
    path: PathBuf,
    policy: AccessPolicy,
}

impl LocalListener {
    /// Bind the channel's socket and apply `policy` to it.
    ///
    /// Must be called from within a tokio runtime. Fails with `AddrInUse` if
    /// another broker is already answering on the same path.
    #[instrument(skip_all, fields(channel = %channel))]
    pub fn bind(channel: &ChannelName, policy: &AccessPolicy) -> Result<Self> {
        let path = channel.socket_path();
        if channel.is_in_shared_dir() {
            warn!(
                path = %path.display(),
                "Socket is in the shared temp directory; another user can claim it first. Use an absolute path in a service-owned directory"
            );
        }

        ensure_parent_dir(&path)?;
        remove_stale_socket(&path)?;

        let listener = UnixListener::bind(&path)?;
        policy.apply_to_socket(&path)?;

        info!(path = %path.display(), mode = %format!("{:o}", policy.unix_mode()), "Listening on unix socket");

        Ok(Self {
            listener,
            path,
            policy: policy.clone(),
        })
    }

    /// Wait for the next caller.
    pub async fn accept(&mut self) -> Result<ServerConnection> {
        self.policy.apply_to_socket(&self.path)?;

        let (stream, _) = self.listener.accept().await?;

        match stream.peer_cred() {
            Ok(cred) => debug!(uid = cred.uid(), pid = ?cred.pid(), "Accepted broker connection"),
            Err(e) => debug!(error = %e, "Accepted broker connection (peer credentials unavailable)"),
        }

        Ok(stream)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LocalListener {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => info!(path = %self.path.display(), "Removed socket file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, path = %self.path.display(), "Failed to remove socket file"),
        }
    }
}

/// Open a connection to the broker.
///
/// A connect to a live broker that is busy with another caller is queued by
/// the kernel until the broker accepts it.
#[instrument(skip_all, fields(channel = %channel))]
pub async fn connect(channel: &ChannelName, _config: &ClientConfig) -> Result<ClientConnection> {
    let path = channel.socket_path();
    UnixStream::connect(&path)
        .await
        .map_err(ProtocolError::from_connect_error)
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
            std::fs::create_dir_all(parent).map_err(|e| {
                ProtocolError::Io(io::Error::new(
                    e.kind(),
                    format!("failed to create directory {}: {e}", parent.display()),
                ))
            })
        }
        _ => Ok(()),
    }
}

/// Remove a socket file left behind by a broker that did not shut down
/// cleanly. Refuses to touch anything that is not a socket, and refuses to
/// steal the path from a broker that still answers.
fn remove_stale_socket(path: &Path) -> Result<()> {
    use std::os::unix::fs::FileTypeExt;

    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(ProtocolError::Io(io::Error::new(
                e.kind(),
                format!("failed to stat {}: {e}", path.display()),
            )))
        }
    };

    if !metadata.file_type().is_socket() {
        return Err(ProtocolError::Io(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("path {} exists but is not a socket", path.display()),
        )));
    }

    if std::os::unix::net::UnixStream::connect(path).is_ok() {
        return Err(ProtocolError::Io(io::Error::new(
            io::ErrorKind::AddrInUse,
            format!("a broker is already listening on {}", path.display()),
        )));
    }

    debug!(path = %path.display(), "Removing stale socket file");
    std::fs::remove_file(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn channel_in(dir: &tempfile::TempDir, name: &str) -> ChannelName {
        ChannelName::new(dir.path().join(name).to_string_lossy().into_owned())
    }

    #[tokio::test]
    async fn test_bind_applies_policy_and_drop_removes_socket() {
        let dir = tempfile::tempdir().unwrap();
        let channel = channel_in(&dir, "bind.sock");

        let listener = LocalListener::bind(&channel, &AccessPolicy::broker_default()).unwrap();
        let path = listener.path().to_path_buf();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o666);

        drop(listener);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_accept_reapplies_policy() {
        let dir = tempfile::tempdir().unwrap();
        let channel = channel_in(&dir, "reapply.sock");
        let mut listener = LocalListener::bind(&channel, &AccessPolicy::owner_only()).unwrap();

        std::fs::set_permissions(listener.path(), std::fs::Permissions::from_mode(0o777)).unwrap();

        let client_channel = channel.clone();
        let client = tokio::spawn(async move {
            connect(&client_channel, &ClientConfig::default()).await.unwrap()
        });

        let _conn = listener.accept().await.unwrap();
        let mode = std::fs::metadata(listener.path()).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        drop(client.await.unwrap());
    }

    #[tokio::test]
    async fn test_bind_replaces_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let channel = channel_in(&dir, "stale.sock");
        let path = channel.socket_path();

        // A std listener that is dropped leaves its socket file behind
        drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        let listener = LocalListener::bind(&channel, &AccessPolicy::default()).unwrap();
        assert_eq!(listener.path(), path.as_path());
    }

    #[tokio::test]
    async fn test_bind_refuses_live_broker() {
        let dir = tempfile::tempdir().unwrap();
        let channel = channel_in(&dir, "live.sock");

        let _first = LocalListener::bind(&channel, &AccessPolicy::default()).unwrap();
        let second = LocalListener::bind(&channel, &AccessPolicy::default());
        assert!(matches!(second, Err(ProtocolError::Io(ref e)) if e.kind() == io::ErrorKind::AddrInUse));
    }

    #[tokio::test]
    async fn test_bind_refuses_non_socket_path() {
        let dir = tempfile::tempdir().unwrap();
        let channel = channel_in(&dir, "regular-file");
        std::fs::write(channel.socket_path(), b"not a socket").unwrap();

        let result = LocalListener::bind(&channel, &AccessPolicy::default());
        assert!(matches!(result, Err(ProtocolError::Io(ref e)) if e.kind() == io::ErrorKind::AlreadyExists));
    }

    #[tokio::test]
    async fn test_connect_without_broker_is_channel_closed() {
        let dir = tempfile::tempdir().unwrap();
        let channel = channel_in(&dir, "absent.sock");

        let result = connect(&channel, &ClientConfig::default()).await;
        assert!(matches!(result, Err(ProtocolError::ChannelClosed)));
    }
}
