use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use bierp_core::UserId;

use crate::{Permission, Principal, Role};

/// JWT claims model (transport-agnostic).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject / user identifier.
    pub sub: UserId,

    pub role: Role,

    /// User security level; the role default applies when absent.
    #[serde(default)]
    pub security_level: Option<u8>,

    /// Per-user permission overrides.
    #[serde(default)]
    pub granted: Vec<Permission>,
    #[serde(default)]
    pub revoked: Vec<Permission>,

    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl JwtClaims {
    pub fn into_principal(self) -> Principal {
        let mut principal = Principal::with_role(self.sub, self.role);
        if let Some(level) = self.security_level {
            principal.security_level = level;
        }
        principal.granted.extend(self.granted);
        principal.revoked.extend(self.revoked);
        principal
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid token time window (expires_at <= issued_at)")]
    InvalidTimeWindow,

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("invalid token signature")]
    InvalidSignature,
}

/// Deterministically validate the time window of decoded claims.
pub fn validate_claims(claims: &JwtClaims, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
    if claims.expires_at <= claims.issued_at {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    if now < claims.issued_at {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= claims.expires_at {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn claims(now: DateTime<Utc>) -> JwtClaims {
        JwtClaims {
            sub: UserId::new(),
            role: Role::Salesperson,
            security_level: None,
            granted: vec![],
            revoked: vec![],
            issued_at: now,
            expires_at: now + Duration::minutes(5),
        }
    }

    #[test]
    fn window_checks() {
        let now = Utc::now();
        let c = claims(now);
        assert!(validate_claims(&c, now).is_ok());
        assert_eq!(
            validate_claims(&c, now + Duration::minutes(5)),
            Err(TokenValidationError::Expired)
        );
        assert_eq!(
            validate_claims(&c, now - Duration::seconds(1)),
            Err(TokenValidationError::NotYetValid)
        );
    }

    #[test]
    fn principal_takes_overrides_and_level() {
        let now = Utc::now();
        let mut c = claims(now);
        c.security_level = Some(3);
        c.revoked = vec![Permission::ViewReports];
        let p = c.into_principal();
        assert_eq!(p.security_level, 3);
        assert!(p.revoked.contains(&Permission::ViewReports));
    }

    #[test]
    fn level_defaults_to_role() {
        let p = claims(Utc::now()).into_principal();
        assert_eq!(p.security_level, Role::Salesperson.security_level());
    }
}
