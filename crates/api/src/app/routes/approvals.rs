use std::sync::Arc;

use axum::{
    Json, Router,
    extract::rejection::{JsonRejection, QueryRejection},
    extract::{Extension, Path, Query},
    routing::{get, post},
};

use bierp_approvals::Approval;
use bierp_auth::{ApprovalAction, Permission};
use bierp_core::ApprovalId;
use bierp_infra::services::ApprovalService;

use crate::app::errors::{self, ApiResult};
use crate::app::{dto, services::AppServices};
use crate::authz;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_approvals))
        .route("/pending", get(pending_approvals))
        .route("/meta/types", get(approval_types))
        .route("/my/requests", get(my_requests))
        .route("/deletion", post(request_deletion))
        .route("/invoice-void", post(request_invoice_void))
        .route("/quantity", post(request_quantity_correction))
        .route("/:id", get(get_approval))
        .route("/:id/approve", post(approve))
        .route("/:id/reject", post(reject))
}

fn requested(approval: Approval) -> axum::response::Response {
    errors::created(approval)
}

pub async fn list_approvals(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    query: Result<Query<dto::ApprovalListQuery>, QueryRejection>,
) -> ApiResult {
    let filter = dto::query(query)?.into_filter()?;
    let permission = Permission::Approval(ApprovalAction::Read);
    authz::guard(&services, ctx.principal(), permission, "approvals").await?;
    let approvals = services
        .approvals
        .list(filter)
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(errors::ok(approvals))
}

pub async fn pending_approvals(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
) -> ApiResult {
    let permission = Permission::Approval(ApprovalAction::Read);
    authz::guard(&services, ctx.principal(), permission, "approvals/pending").await?;
    let approvals = services
        .approvals
        .pending()
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(errors::ok(approvals))
}

pub async fn approval_types() -> ApiResult {
    Ok(errors::ok(ApprovalService::types()))
}

pub async fn my_requests(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
) -> ApiResult {
    let approvals = services
        .approvals
        .my_requests(ctx.principal())
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(errors::ok(approvals))
}

pub async fn get_approval(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let id: ApprovalId = dto::path_id(&id)?;
    let permission = Permission::Approval(ApprovalAction::Read);
    authz::guard(&services, ctx.principal(), permission, &format!("approval:{id}")).await?;
    let approval = services
        .approvals
        .get(id)
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(errors::ok(approval))
}

pub async fn request_deletion(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    payload: Result<Json<dto::DeletionApprovalRequest>, JsonRejection>,
) -> ApiResult {
    let body = dto::body(payload)?;
    let permission = Permission::Approval(ApprovalAction::Request);
    authz::guard(&services, ctx.principal(), permission, "approvals/deletion").await?;
    let approval = services
        .approvals
        .request_deletion(ctx.principal(), body.entity_type, &body.entity_id, &body.reason)
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(requested(approval))
}

pub async fn request_invoice_void(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    payload: Result<Json<dto::InvoiceVoidApprovalRequest>, JsonRejection>,
) -> ApiResult {
    let body = dto::body(payload)?;
    let permission = Permission::Approval(ApprovalAction::Request);
    authz::guard(&services, ctx.principal(), permission, "approvals/invoice-void").await?;
    let approval = services
        .approvals
        .request_invoice_void(ctx.principal(), body.invoice_id, &body.reason)
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(requested(approval))
}

pub async fn request_quantity_correction(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    payload: Result<Json<dto::QuantityApprovalRequest>, JsonRejection>,
) -> ApiResult {
    let body = dto::body(payload)?;
    let product_id = body.product()?;
    let permission = Permission::Approval(ApprovalAction::Request);
    authz::guard(&services, ctx.principal(), permission, "approvals/quantity").await?;
    let approval = services
        .approvals
        .request_quantity_correction(ctx.principal(), product_id, body.new_quantity, &body.reason)
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(requested(approval))
}

/// Owner only; the service enforces it and answers `OWNER_ONLY`.
pub async fn approve(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(id): Path<String>,
    payload: Result<Json<dto::DecisionRequest>, JsonRejection>,
) -> ApiResult {
    let body = dto::optional_body(payload)?;
    let id: ApprovalId = dto::path_id(&id)?;
    let approval = services
        .approvals
        .approve(ctx.principal(), id, body.notes)
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(errors::ok_with_message(approval, "تمت الموافقة وتنفيذ الطلب"))
}

pub async fn reject(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(id): Path<String>,
    payload: Result<Json<dto::DecisionRequest>, JsonRejection>,
) -> ApiResult {
    let body = dto::optional_body(payload)?;
    let id: ApprovalId = dto::path_id(&id)?;
    let reason = body.reason.unwrap_or_default();
    let approval = services
        .approvals
        .reject(ctx.principal(), id, &reason)
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(errors::ok_with_message(approval, "تم رفض الطلب"))
}
