use std::collections::HashSet;

use bierp_core::UserId;

use crate::{Permission, Role};

/// A fully resolved principal for authorization decisions.
///
/// Built by the API layer from verified token claims; the gate never reads
/// storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: UserId,
    pub role: Role,
    pub security_level: u8,
    /// Per-user grants on top of the role defaults.
    pub granted: HashSet<Permission>,
    /// Per-user revocations; these win over role defaults and grants.
    pub revoked: HashSet<Permission>,
}

impl Principal {
    /// Principal carrying only its role defaults.
    pub fn with_role(user_id: UserId, role: Role) -> Self {
        Self {
            user_id,
            role,
            security_level: role.security_level(),
            granted: HashSet::new(),
            revoked: HashSet::new(),
        }
    }

    pub fn grant(mut self, permission: Permission) -> Self {
        self.granted.insert(permission);
        self
    }

    pub fn revoke(mut self, permission: Permission) -> Self {
        self.revoked.insert(permission);
        self
    }

    pub fn at_level(mut self, security_level: u8) -> Self {
        self.security_level = security_level;
        self
    }

    pub fn is_owner(&self) -> bool {
        self.role == Role::Owner
    }
}
