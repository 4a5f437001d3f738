//! # Access Policy
//!
//! Who may open the broker channel, and with what rights.
//!
//! The broker's default policy grants:
//!
//! | Principal            | Rights        |
//! |----------------------|---------------|
//! | service identity     | full control  |
//! | process owner        | full control  |
//! | authenticated users  | read/write    |
//!
//! Read/write is enough to connect and exchange frames but not to reconfigure
//! or remove the endpoint. The policy is applied every time an endpoint
//! instance is created or re-armed, never per call.
//!
//! ## Platform rendering
//! - Windows: an SDDL DACL attached to each named-pipe instance
//! - Unix: socket file mode bits (owner vs. group/other)

use std::fmt;

#[cfg(unix)]
use crate::error::{ProtocolError, Result};
#[cfg(unix)]
use std::path::Path;

/// A security principal the policy can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Principal {
    /// Identity the broker service runs under
    ServiceIdentity,
    /// User that owns the broker process
    ProcessOwner,
    /// Any authenticated local user
    AuthenticatedUsers,
}

impl Principal {
    /// SDDL trustee alias
    pub fn sddl_alias(self) -> &'static str {
        match self {
            Principal::ServiceIdentity => "SY",
            Principal::ProcessOwner => "OW",
            Principal::AuthenticatedUsers => "AU",
        }
    }
}

/// Rights granted to a principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessRights {
    FullControl,
    /// Connect and exchange frames only
    ReadWrite,
}

impl AccessRights {
    /// SDDL generic rights
    pub fn sddl_rights(self) -> &'static str {
        match self {
            AccessRights::FullControl => "GA",
            AccessRights::ReadWrite => "GRGW",
        }
    }
}

/// One allow entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccessRule {
    pub principal: Principal,
    pub rights: AccessRights,
}

impl AccessRule {
    pub const fn new(principal: Principal, rights: AccessRights) -> Self {
        Self { principal, rights }
    }
}

/// Ordered set of allow rules applied to every endpoint instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPolicy {
    rules: Vec<AccessRule>,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self::broker_default()
    }
}

impl AccessPolicy {
    pub fn new(rules: Vec<AccessRule>) -> Self {
        Self { rules }
    }

    /// Full control for the service and process owner, read/write for any
    /// authenticated local user.
    pub fn broker_default() -> Self {
        Self::new(vec![
            AccessRule::new(Principal::ServiceIdentity, AccessRights::FullControl),
            AccessRule::new(Principal::ProcessOwner, AccessRights::FullControl),
            AccessRule::new(Principal::AuthenticatedUsers, AccessRights::ReadWrite),
        ])
    }

    /// Same as [`broker_default`](Self::broker_default) without the
    /// authenticated-users entry.
    pub fn owner_only() -> Self {
        Self::new(vec![
            AccessRule::new(Principal::ServiceIdentity, AccessRights::FullControl),
            AccessRule::new(Principal::ProcessOwner, AccessRights::FullControl),
        ])
    }

    pub fn rules(&self) -> &[AccessRule] {
        &self.rules
    }

    /// Rights granted to `principal`; the first matching rule wins.
    pub fn rights_for(&self, principal: Principal) -> Option<AccessRights> {
        self.rules
            .iter()
            .find(|rule| rule.principal == principal)
            .map(|rule| rule.rights)
    }

    pub fn allows_authenticated_users(&self) -> bool {
        self.rights_for(Principal::AuthenticatedUsers).is_some()
    }

    /// Protected DACL in SDDL form, e.g. `D:P(A;;GA;;;SY)(A;;GA;;;OW)(A;;GRGW;;;AU)`.
    pub fn to_sddl(&self) -> String {
        let mut sddl = String::from("D:P");
        for rule in &self.rules {
            sddl.push_str(&format!(
                "(A;;{};;;{})",
                rule.rights.sddl_rights(),
                rule.principal.sddl_alias()
            ));
        }
        sddl
    }

    /// Socket file mode implementing this policy.
    ///
    /// Connecting to a Unix socket needs write permission, so read/write maps
    /// to `rw`. The socket owner is the process owner, so both full-control
    /// principals land on the owner bits.
    #[cfg(unix)]
    pub fn unix_mode(&self) -> u32 {
        self.rules.iter().fold(0, |mode, rule| match rule.principal {
            Principal::ServiceIdentity | Principal::ProcessOwner => mode | 0o600,
            Principal::AuthenticatedUsers => mode | 0o066,
        })
    }

    /// Apply the policy to a bound socket file.
    #[cfg(unix)]
    pub fn apply_to_socket(&self, path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let perms = std::fs::Permissions::from_mode(self.unix_mode());
        std::fs::set_permissions(path, perms).map_err(|e| {
            ProtocolError::Io(std::io::Error::new(
                e.kind(),
                format!(
                    "failed to apply access policy to {}: {e}",
                    path.display()
                ),
            ))
        })
    }
}

impl fmt::Display for AccessPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sddl())
    }
}
