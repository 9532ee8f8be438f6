//! HS256 token verification.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, errors::ErrorKind};

use crate::claims::{JwtClaims, TokenValidationError, validate_claims};

/// Verifies a bearer token and yields its claims.
pub trait JwtValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenValidationError>;
}

/// Shared-secret HS256 validator.
///
/// Signature checking is delegated to `jsonwebtoken`; the time window lives in
/// our own `issued_at`/`expires_at` claims and goes through [`validate_claims`].
pub struct Hs256JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl Hs256JwtValidator {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        Self {
            key: DecodingKey::from_secret(secret.as_ref()),
            validation,
        }
    }
}

impl JwtValidator for Hs256JwtValidator {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenValidationError> {
        let data = jsonwebtoken::decode::<JwtClaims>(token, &self.key, &self.validation).map_err(
            |e| match e.kind() {
                ErrorKind::InvalidSignature => TokenValidationError::InvalidSignature,
                _ => TokenValidationError::Malformed(e.to_string()),
            },
        )?;
        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bierp_core::UserId;
    use chrono::Duration;
    use jsonwebtoken::{EncodingKey, Header};

    use crate::Role;

    fn mint(secret: &str, claims: &JwtClaims) -> String {
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims(now: DateTime<Utc>) -> JwtClaims {
        JwtClaims {
            sub: UserId::new(),
            role: Role::Owner,
            security_level: None,
            granted: vec![],
            revoked: vec![],
            issued_at: now - Duration::seconds(1),
            expires_at: now + Duration::minutes(10),
        }
    }

    #[test]
    fn accepts_token_signed_with_the_same_secret() {
        let now = Utc::now();
        let c = claims(now);
        let token = mint("s3cret", &c);
        let decoded = Hs256JwtValidator::new("s3cret").validate(&token, now).unwrap();
        assert_eq!(decoded, c);
    }

    #[test]
    fn rejects_foreign_signature() {
        let now = Utc::now();
        let token = mint("other", &claims(now));
        let err = Hs256JwtValidator::new("s3cret").validate(&token, now).unwrap_err();
        assert_eq!(err, TokenValidationError::InvalidSignature);
    }

    #[test]
    fn rejects_expired_token() {
        let now = Utc::now();
        let token = mint("s3cret", &claims(now));
        let err = Hs256JwtValidator::new("s3cret")
            .validate(&token, now + Duration::hours(1))
            .unwrap_err();
        assert_eq!(err, TokenValidationError::Expired);
    }

    #[test]
    fn rejects_garbage() {
        let err = Hs256JwtValidator::new("s3cret")
            .validate("not.a.token", Utc::now())
            .unwrap_err();
        assert!(matches!(err, TokenValidationError::Malformed(_)));
    }
}
