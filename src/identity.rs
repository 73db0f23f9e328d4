//! uid to user name resolution.

use nix::unistd::{Uid, User};
use std::io;

/// Identity lookup failures. Every variant is reported to clients as NO-USER.
#[derive(Debug)]
pub enum IdentityError {
    /// No account with this uid
    NotFound(u32),
    /// The password database lookup itself failed
    Os(u32, io::Error),
}

impl std::fmt::Display for IdentityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentityError::NotFound(uid) => write!(f, "no user with uid {}", uid),
            IdentityError::Os(uid, e) => write!(f, "user lookup for uid {} failed: {}", uid, e),
        }
    }
}

impl std::error::Error for IdentityError {}

/// Source of user names.
pub trait UserDirectory: Send + Sync {
    fn username(&self, uid: u32) -> Result<String, IdentityError>;
}

/// The host's password database.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemUsers;

impl UserDirectory for SystemUsers {
    fn username(&self, uid: u32) -> Result<String, IdentityError> {
        match User::from_uid(Uid::from_raw(uid)) {
            Ok(Some(user)) => Ok(user.name),
            Ok(None) => Err(IdentityError::NotFound(uid)),
            Err(errno) => Err(IdentityError::Os(uid, io::Error::from(errno))),
        }
    }
}

/// Fixed uid table.
#[cfg(test)]
#[derive(Debug, Default, Clone)]
pub struct StaticUsers {
    users: std::collections::HashMap<u32, String>,
}

#[cfg(test)]
impl StaticUsers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, uid: u32, name: &str) -> Self {
        self.users.insert(uid, name.to_string());
        self
    }
}

#[cfg(test)]
impl UserDirectory for StaticUsers {
    fn username(&self, uid: u32) -> Result<String, IdentityError> {
        self.users
            .get(&uid)
            .cloned()
            .ok_or(IdentityError::NotFound(uid))
    }
}
