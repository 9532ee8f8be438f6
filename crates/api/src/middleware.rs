use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use tracing::debug;

use bierp_auth::{JwtValidator, TokenValidationError};

use crate::app::errors;
use crate::context::PrincipalContext;

#[derive(Clone)]
pub struct AuthState {
    pub jwt: Arc<dyn JwtValidator>,
}

pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let token = extract_bearer(req.headers()).ok_or_else(unauthorized)?;

    let claims = state.jwt.validate(token, Utc::now()).map_err(|e| {
        debug!(error = %e, "rejected bearer token");
        match e {
            TokenValidationError::Expired => errors::json_error(
                StatusCode::UNAUTHORIZED,
                "TOKEN_EXPIRED",
                "انتهت صلاحية الجلسة",
            ),
            _ => unauthorized(),
        }
    })?;

    req.extensions_mut()
        .insert(PrincipalContext::new(claims.into_principal()));

    Ok(next.run(req).await)
}

fn unauthorized() -> Response {
    errors::json_error(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "يجب تسجيل الدخول")
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get(axum::http::header::AUTHORIZATION)?;
    let token = header.to_str().ok()?.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_prefix_is_required() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_bearer(&headers), None);

        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_bearer(&headers), None);

        headers.insert("authorization", HeaderValue::from_static("Bearer   "));
        assert_eq!(extract_bearer(&headers), None);

        headers.insert("authorization", HeaderValue::from_static("Bearer tok "));
        assert_eq!(extract_bearer(&headers), Some("tok"));
    }
}
