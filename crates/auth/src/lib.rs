//! Principals, roles, permissions and the JWT claims they travel in.
//!
//! Decoupled from HTTP and storage: the API layer turns a verified token into
//! a [`Principal`] and asks [`authorize`] before touching any domain state.

pub mod authorize;
pub mod claims;
pub mod jwt;
pub mod permissions;
pub mod principal;
pub mod roles;

pub use authorize::{AuthzError, authorize, can_bypass_approvals, effective_permissions};
pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use jwt::{Hs256JwtValidator, JwtValidator};
pub use permissions::{
    ApprovalAction, DeviceAction, InvoiceAction, InvoiceScope, Permission, UnknownPermission,
};
pub use principal::Principal;
pub use roles::Role;
