use std::sync::Arc;

use axum::{
    Router,
    extract::rejection::QueryRejection,
    extract::{Extension, Query},
    http::header,
    response::IntoResponse,
    routing::get,
};

use bierp_audit::AuditQuery;
use bierp_auth::Permission;

use crate::app::errors::{self, ApiResult};
use crate::app::{dto, services::AppServices};
use crate::authz;
use crate::context::PrincipalContext;

const DEFAULT_STATS_DAYS: u32 = 7;

pub fn router() -> Router {
    Router::new()
        .route("/", get(search_audit))
        .route("/stats", get(audit_stats))
        .route("/export", get(export_audit))
}

pub async fn search_audit(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    query: Result<Query<AuditQuery>, QueryRejection>,
) -> ApiResult {
    let query = dto::query(query)?;
    authz::guard(&services, ctx.principal(), Permission::ViewAudit, "audit").await?;
    let (entries, total) = services
        .audit
        .search(&query)
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(errors::ok(serde_json::json!({
        "items": entries,
        "total": total,
        "page": query.page.unwrap_or(1),
    })))
}

pub async fn audit_stats(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    query: Result<Query<dto::StatsQuery>, QueryRejection>,
) -> ApiResult {
    let days = dto::query(query)?.days.unwrap_or(DEFAULT_STATS_DAYS).max(1);
    authz::guard(&services, ctx.principal(), Permission::ViewAudit, "audit/stats").await?;
    let stats = services
        .audit
        .stats(days)
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(errors::ok(stats))
}

pub async fn export_audit(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    query: Result<Query<AuditQuery>, QueryRejection>,
) -> ApiResult {
    let query = dto::query(query)?;
    authz::guard(&services, ctx.principal(), Permission::ViewAudit, "audit/export").await?;
    let csv = services
        .audit
        .export_csv(ctx.principal(), &query)
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(csv_download(csv, "audit_logs.csv"))
}

/// `text/csv` attachment.
pub fn csv_download(csv: String, filename: &str) -> axum::response::Response {
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        csv,
    )
        .into_response()
}
