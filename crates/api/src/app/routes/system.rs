use axum::{
    Json,
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;

use bierp_auth::effective_permissions;

use crate::app::errors;
use crate::context::PrincipalContext;

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "success": true, "status": "ok" })))
}

pub async fn whoami(Extension(ctx): Extension<PrincipalContext>) -> impl IntoResponse {
    let principal = ctx.principal();
    let permissions: Vec<&'static str> = effective_permissions(principal)
        .into_iter()
        .map(|p| p.code())
        .collect();
    errors::ok(json!({
        "user_id": principal.user_id,
        "role": principal.role,
        "security_level": principal.security_level,
        "permissions": permissions,
    }))
}
