use std::sync::Arc;

use axum::{
    Router,
    extract::rejection::QueryRejection,
    extract::{Extension, Path, Query},
    routing::get,
};
use chrono::Utc;

use bierp_auth::Permission;
use bierp_infra::services::ReportKind;

use super::audit::csv_download;
use crate::app::errors::{self, ApiResult};
use crate::app::{dto, services::AppServices};
use crate::authz;
use crate::context::PrincipalContext;

const DEFAULT_EMPLOYEE_LIMIT: usize = 10;

pub fn router() -> Router {
    Router::new()
        .route("/sales-by-employee", get(sales_by_employee))
        .route("/profitability", get(profitability))
        .route("/cash-flow", get(cash_flow))
        .route("/stock", get(stock_levels))
        .route("/export/:report_type", get(export_report))
}

async fn guard_reports(
    services: &AppServices,
    ctx: &PrincipalContext,
    target: &str,
) -> Result<(), axum::response::Response> {
    authz::guard(services, ctx.principal(), Permission::ViewReports, target).await
}

pub async fn sales_by_employee(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    query: Result<Query<dto::PeriodQuery>, QueryRejection>,
) -> ApiResult {
    let query = dto::query(query)?;
    guard_reports(&services, &ctx, "reports/sales-by-employee").await?;
    let period = query.period().map_err(errors::service_error_to_response)?;
    let limit = query.limit.unwrap_or(DEFAULT_EMPLOYEE_LIMIT).max(1);
    let rows = services
        .reports
        .sales_by_employee(period, limit)
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(errors::ok(rows))
}

pub async fn profitability(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    query: Result<Query<dto::PeriodQuery>, QueryRejection>,
) -> ApiResult {
    let query = dto::query(query)?;
    guard_reports(&services, &ctx, "reports/profitability").await?;
    let period = query.period().map_err(errors::service_error_to_response)?;
    let report = services
        .reports
        .profitability(period)
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(errors::ok(report))
}

pub async fn cash_flow(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    query: Result<Query<dto::PeriodQuery>, QueryRejection>,
) -> ApiResult {
    let query = dto::query(query)?;
    guard_reports(&services, &ctx, "reports/cash-flow").await?;
    let period = query.period().map_err(errors::service_error_to_response)?;
    let report = services
        .reports
        .cash_flow(period)
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(errors::ok(report))
}

pub async fn stock_levels(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
) -> ApiResult {
    guard_reports(&services, &ctx, "reports/stock").await?;
    let stock = services
        .reports
        .stock_levels()
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(errors::ok(stock))
}

pub async fn export_report(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(report_type): Path<String>,
    query: Result<Query<dto::PeriodQuery>, QueryRejection>,
) -> ApiResult {
    let query = dto::query(query)?;
    guard_reports(&services, &ctx, "reports/export").await?;
    let kind = ReportKind::parse(&report_type)
        .ok_or_else(|| errors::bad_request(format!("نوع تقرير غير معروف: {report_type}")))?;
    let period = query.period().map_err(errors::service_error_to_response)?;
    let csv = services
        .reports
        .export_csv(ctx.principal(), kind, period)
        .await
        .map_err(errors::service_error_to_response)?;
    let filename = format!("{}_{}.csv", kind.as_str(), Utc::now().format("%Y%m%d"));
    Ok(csv_download(csv, &filename))
}
