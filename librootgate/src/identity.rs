//! Acting identity from the process's real uid

use nix::unistd::{getgid, getuid, Gid, Uid, User};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("cannot read user database for uid {uid}: {source}")]
    Lookup {
        uid: u32,
        #[source]
        source: nix::Error,
    },

    #[error("uid {0} has no user database entry")]
    UnknownUid(u32),
}

/// Who is asking. Built only from the kernel's real ids, never from argv or
/// the environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
}

impl Identity {
    /// Resolve the real uid/gid of this process to a named user.
    pub fn resolve() -> Result<Self, IdentityError> {
        Self::for_ids(getuid(), getgid())
    }

    pub fn for_ids(uid: Uid, gid: Gid) -> Result<Self, IdentityError> {
        let user = User::from_uid(uid)
            .map_err(|source| IdentityError::Lookup {
                uid: uid.as_raw(),
                source,
            })?
            .ok_or(IdentityError::UnknownUid(uid.as_raw()))?;

        Ok(Self {
            name: user.name,
            uid: uid.as_raw(),
            gid: gid.as_raw(),
        })
    }

    pub fn is_root(&self) -> bool {
        self.uid == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_uses_real_uid() {
        let identity = Identity::resolve().unwrap();
        assert_eq!(identity.uid, getuid().as_raw());
        assert_eq!(identity.gid, getgid().as_raw());
        assert!(!identity.name.is_empty());
    }

    #[test]
    fn test_root_uid_maps_to_root() {
        let identity = Identity::for_ids(Uid::from_raw(0), Gid::from_raw(0)).unwrap();
        assert_eq!(identity.name, "root");
        assert!(identity.is_root());
    }

    #[test]
    fn test_unmapped_uid_fails() {
        let err = Identity::for_ids(Uid::from_raw(4_000_000_000), Gid::from_raw(0)).unwrap_err();
        assert!(matches!(err, IdentityError::UnknownUid(4_000_000_000)));
    }
}
