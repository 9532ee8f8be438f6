//! The permission gate.

use thiserror::Error;

use crate::{Permission, Principal, Role};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("security level {required_level} required for '{permission}'")]
    SecurityLevelInsufficient {
        permission: Permission,
        required_level: u8,
    },

    #[error("permission '{0}' revoked for this user")]
    Revoked(Permission),

    #[error("forbidden: missing permission '{0}'")]
    Forbidden(Permission),
}

impl AuthzError {
    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            AuthzError::SecurityLevelInsufficient { .. } => "SECURITY_LEVEL_INSUFFICIENT",
            AuthzError::Revoked(_) => "PERMISSION_REVOKED",
            AuthzError::Forbidden(_) => "PERMISSION_DENIED",
        }
    }

    /// The permission that was being checked.
    pub fn permission(&self) -> Permission {
        match self {
            AuthzError::SecurityLevelInsufficient { permission, .. } => *permission,
            AuthzError::Revoked(p) | AuthzError::Forbidden(p) => *p,
        }
    }
}

/// Decide whether `principal` may exercise `required`.
///
/// Order: unrestricted roles, security level, explicit revocation, explicit
/// grant, role default. No IO, no panics.
pub fn authorize(principal: &Principal, required: Permission) -> Result<(), AuthzError> {
    if principal.role.is_unrestricted() {
        return Ok(());
    }

    let required_level = required.required_level();
    if required_level > principal.security_level {
        return Err(AuthzError::SecurityLevelInsufficient {
            permission: required,
            required_level,
        });
    }

    if principal.revoked.contains(&required) {
        return Err(AuthzError::Revoked(required));
    }

    if principal.granted.contains(&required) || principal.role.grants(required) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required))
    }
}

/// Owners, and anyone the gate lets through for the bypass permission, may
/// skip the approval ledger.
pub fn can_bypass_approvals(principal: &Principal) -> bool {
    principal.role == Role::Owner || authorize(principal, Permission::BypassApprovals).is_ok()
}

/// Every catalogue permission the principal currently passes.
pub fn effective_permissions(principal: &Principal) -> Vec<Permission> {
    Permission::ALL
        .into_iter()
        .filter(|p| authorize(principal, *p).is_ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DeviceAction, InvoiceAction, InvoiceScope};
    use bierp_core::UserId;

    fn void_sales() -> Permission {
        Permission::invoice(InvoiceScope::Sales, InvoiceAction::Void)
    }

    #[test]
    fn owner_passes_everything() {
        let owner = Principal::with_role(UserId::new(), Role::Owner).at_level(0);
        for p in Permission::ALL {
            assert!(authorize(&owner, p).is_ok());
        }
        assert!(can_bypass_approvals(&owner));
    }

    #[test]
    fn role_default_allows() {
        let manager = Principal::with_role(UserId::new(), Role::Manager);
        assert!(authorize(&manager, void_sales()).is_ok());
        assert!(!can_bypass_approvals(&manager));
    }

    #[test]
    fn missing_permission_is_denied_with_its_name() {
        let sales = Principal::with_role(UserId::new(), Role::Salesperson);
        let err = authorize(&sales, Permission::Device(DeviceAction::Transfer)).unwrap_err();
        assert_eq!(err.code(), "PERMISSION_DENIED");
        assert_eq!(err.permission().code(), "devices.transfer");
    }

    #[test]
    fn security_level_is_checked_before_grants() {
        let sales = Principal::with_role(UserId::new(), Role::Salesperson).grant(void_sales());
        let err = authorize(&sales, void_sales()).unwrap_err();
        assert_eq!(
            err,
            AuthzError::SecurityLevelInsufficient {
                permission: void_sales(),
                required_level: 3
            }
        );
    }

    #[test]
    fn explicit_grant_allows_beyond_role() {
        let sales = Principal::with_role(UserId::new(), Role::Salesperson)
            .at_level(3)
            .grant(void_sales());
        assert!(authorize(&sales, void_sales()).is_ok());
    }

    #[test]
    fn revocation_beats_role_default() {
        let manager = Principal::with_role(UserId::new(), Role::Manager).revoke(void_sales());
        assert_eq!(
            authorize(&manager, void_sales()).unwrap_err().code(),
            "PERMISSION_REVOKED"
        );
    }

    #[test]
    fn granted_bypass_enables_approval_skip() {
        let admin = Principal::with_role(UserId::new(), Role::Admin)
            .at_level(5)
            .grant(Permission::BypassApprovals);
        assert!(can_bypass_approvals(&admin));
    }

    #[test]
    fn viewer_effective_permissions_are_read_only() {
        let viewer = Principal::with_role(UserId::new(), Role::Viewer);
        let perms = effective_permissions(&viewer);
        assert_eq!(perms.len(), 3);
        assert!(perms.contains(&Permission::Device(DeviceAction::Read)));
    }
}
