//! # Windows Named Pipes Transport
//!
//! The broker endpoint on Windows is a named pipe. Every pipe instance is
//! created with the access policy's DACL attached. The listener keeps one idle
//! instance armed ahead of time, so the pipe name never disappears between
//! cycles while the loop is running; once the listener is dropped the name is
//! gone and later connects fail with `ChannelClosed`.
//!
//! Callers that find every instance busy wait and retry at the configured
//! interval, which is how "block until the broker accepts" is expressed on
//! this platform.

use std::ffi::{c_void, OsStr};
use std::io;
use std::iter::once;
use std::os::windows::ffi::OsStrExt;
use std::ptr;

use tokio::net::windows::named_pipe::{
    ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions,
};
use tracing::{debug, info, instrument};
use windows_sys::Win32::Foundation::{LocalFree, ERROR_PIPE_BUSY};
use windows_sys::Win32::Security::Authorization::ConvertStringSecurityDescriptorToSecurityDescriptorW;
use windows_sys::Win32::Security::{PSECURITY_DESCRIPTOR, SECURITY_ATTRIBUTES};

use crate::config::ClientConfig;
use crate::error::{ProtocolError, Result};
use crate::transport::access::AccessPolicy;
use crate::transport::ChannelName;

const SDDL_REVISION_1: u32 = 1;

/// Server end of one accepted exchange
pub type ServerConnection = NamedPipeServer;

/// Client end of one exchange
pub type ClientConnection = NamedPipeClient;

/// Broker endpoint bound to a pipe name.
#[derive(Debug)]
pub struct PipeListener {
    pipe_name: String,
    policy: AccessPolicy,
    next: Option<NamedPipeServer>,
}

impl PipeListener {
    /// Create the first pipe instance for the channel.
    ///
    /// Fails if another process already owns the pipe name.
    #[instrument(skip_all, fields(channel = %channel))]
    pub fn bind(channel: &ChannelName, policy: &AccessPolicy) -> Result<Self> {
        let pipe_name = channel.pipe_name();
        let first = create_instance(&pipe_name, policy, true)?;
        info!(pipe = %pipe_name, sddl = %policy.to_sddl(), "Named pipe server listening");

        Ok(Self {
            pipe_name,
            policy: policy.clone(),
            next: Some(first),
        })
    }

    /// Wait for the next caller.
    pub async fn accept(&mut self) -> Result<ServerConnection> {
        let server = match self.next.take() {
            Some(server) => server,
            None => create_instance(&self.pipe_name, &self.policy, false)?,
        };

        server.connect().await?;

        // Arm the following instance before handing this one out
        match create_instance(&self.pipe_name, &self.policy, false) {
            Ok(next) => self.next = Some(next),
            Err(e) => debug!(error = %e, "Deferred creation of next pipe instance"),
        }

        Ok(server)
    }

    pub fn pipe_name(&self) -> &str {
        &self.pipe_name
    }
}

/// Open a connection to the broker, waiting while every instance is busy.
#[instrument(skip_all, fields(channel = %channel))]
pub async fn connect(channel: &ChannelName, config: &ClientConfig) -> Result<ClientConnection> {
    let pipe_name = channel.pipe_name();

    loop {
        match ClientOptions::new().open(&pipe_name) {
            Ok(client) => {
                info!(pipe = %pipe_name, "Connected to named pipe");
                return Ok(client);
            }
            Err(e) if e.raw_os_error() == Some(ERROR_PIPE_BUSY as i32) => {
                debug!(pipe = %pipe_name, "Pipe busy, waiting");
            }
            Err(e) => return Err(ProtocolError::from_connect_error(e)),
        }

        tokio::time::sleep(config.busy_retry_interval).await;
    }
}

fn create_instance(
    pipe_name: &str,
    policy: &AccessPolicy,
    first: bool,
) -> Result<NamedPipeServer> {
    let descriptor = SecurityDescriptor::from_sddl(&policy.to_sddl())?;
    let mut attributes = SECURITY_ATTRIBUTES {
        nLength: std::mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
        lpSecurityDescriptor: descriptor.as_ptr(),
        bInheritHandle: 0,
    };

    let mut options = ServerOptions::new();
    options.first_pipe_instance(first);

    // SAFETY: `attributes` points at a security descriptor owned by
    // `descriptor`, and both outlive the call.
    let server = unsafe {
        options.create_with_security_attributes_raw(
            pipe_name,
            &mut attributes as *mut SECURITY_ATTRIBUTES as *mut c_void,
        )
    }?;

    Ok(server)
}

/// Self-describing security descriptor allocated by the system.
struct SecurityDescriptor(PSECURITY_DESCRIPTOR);

impl SecurityDescriptor {
    fn from_sddl(sddl: &str) -> io::Result<Self> {
        let wide: Vec<u16> = OsStr::new(sddl).encode_wide().chain(once(0)).collect();
        let mut descriptor: PSECURITY_DESCRIPTOR = ptr::null_mut();

        // SAFETY: `wide` is NUL-terminated and `descriptor` is a valid out
        // pointer; the size out-parameter is optional.
        let ok = unsafe {
            ConvertStringSecurityDescriptorToSecurityDescriptorW(
                wide.as_ptr(),
                SDDL_REVISION_1,
                &mut descriptor,
                ptr::null_mut(),
            )
        };

        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self(descriptor))
    }

    fn as_ptr(&self) -> *mut c_void {
        self.0
    }
}

impl Drop for SecurityDescriptor {
    fn drop(&mut self) {
        // SAFETY: the descriptor was allocated with LocalAlloc by
        // ConvertStringSecurityDescriptorToSecurityDescriptorW.
        unsafe {
            LocalFree(self.0);
        }
    }
}
