use thiserror::Error;

use bierp_audit::ExportError;
use bierp_auth::AuthzError;
use bierp_core::DomainError;

use crate::error::StoreError;

/// Failure of an application-service operation.
///
/// Every variant maps to one stable machine code (see [`ServiceError::code`]);
/// the HTTP layer picks status and message from that code.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The named record does not exist (or is soft-deleted).
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("invoice is already cancelled")]
    AlreadyCancelled,

    #[error("invoice is already deleted")]
    AlreadyDeleted,

    #[error("deletion requires an approved request")]
    DeletionRequiresApproval,

    #[error("only the owner can decide approvals")]
    OwnerOnly,

    #[error("a reason is required")]
    MissingReason,

    #[error("missing required field '{0}'")]
    MissingFields(&'static str),

    #[error("approval is not pending")]
    NotPending,

    #[error("approval has expired")]
    ApprovalExpired,

    #[error(transparent)]
    Forbidden(#[from] AuthzError),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Export(#[from] ExportError),
}

impl ServiceError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::NotFound(_) => "NOT_FOUND",
            ServiceError::Domain(e) => match e {
                DomainError::InvalidTransition { .. } => "INVALID_TRANSITION",
                DomainError::NotFound => "NOT_FOUND",
                DomainError::Conflict(_) => "CONFLICT",
                DomainError::Validation(_)
                | DomainError::InvariantViolation(_)
                | DomainError::InvalidId(_) => "VALIDATION_ERROR",
            },
            ServiceError::AlreadyCancelled => "ALREADY_CANCELLED",
            ServiceError::AlreadyDeleted => "ALREADY_DELETED",
            ServiceError::DeletionRequiresApproval => "DELETION_REQUIRES_APPROVAL",
            ServiceError::OwnerOnly => "OWNER_ONLY",
            ServiceError::MissingReason => "MISSING_REASON",
            ServiceError::MissingFields(_) => "MISSING_FIELDS",
            ServiceError::NotPending => "NOT_PENDING",
            ServiceError::ApprovalExpired => "APPROVAL_EXPIRED",
            ServiceError::Forbidden(e) => e.code(),
            ServiceError::Validation(_) => "VALIDATION_ERROR",
            ServiceError::Store(StoreError::Conflict(_)) => "CONFLICT",
            ServiceError::Store(_) | ServiceError::Export(_) => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bierp_auth::Permission;

    #[test]
    fn domain_errors_map_to_stable_codes() {
        let err: ServiceError = DomainError::invalid_transition("completed", "draft").into();
        assert_eq!(err.code(), "INVALID_TRANSITION");
        let err: ServiceError = DomainError::validation("bad").into();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn authz_errors_keep_their_code() {
        let err: ServiceError = AuthzError::Forbidden(Permission::BypassApprovals).into();
        assert_eq!(err.code(), "PERMISSION_DENIED");
    }

    #[test]
    fn store_conflicts_are_not_internal_errors() {
        let err: ServiceError = StoreError::Conflict("stale".into()).into();
        assert_eq!(err.code(), "CONFLICT");
        let err: ServiceError = StoreError::Database("down".into()).into();
        assert_eq!(err.code(), "INTERNAL_ERROR");
    }
}
