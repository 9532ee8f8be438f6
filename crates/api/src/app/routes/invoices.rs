use std::sync::Arc;

use axum::{
    Json, Router,
    extract::rejection::{JsonRejection, QueryRejection},
    extract::{Extension, Path, Query},
    routing::{delete, get, post},
};
use chrono::Utc;
use serde_json::json;

use bierp_approvals::Approval;
use bierp_auth::{InvoiceAction, InvoiceScope, Permission, Principal};
use bierp_core::InvoiceId;
use bierp_infra::services::CancelOutcome;
use bierp_invoicing::{Invoice, InvoiceType};

use crate::app::errors::{self, ApiResult};
use crate::app::{dto, services::AppServices};
use crate::authz;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_invoices).post(create_invoice))
        .route("/waiting", get(waiting_invoices))
        .route("/stats", get(invoice_stats))
        .route("/:id", get(get_invoice).put(update_invoice).delete(delete_invoice))
        .route("/:id/print", get(print_invoice))
        .route("/:id/payments", post(register_payment))
        .route("/:id/workflow-log", get(workflow_log))
        .route("/:id/transition", post(transition_invoice))
        .route("/:id/audit", post(audit_invoice))
        .route("/:id/prepare", post(prepare_invoice))
        .route("/:id/convert-to-active", post(convert_to_active))
        .route("/:id/remind", post(remind_invoice))
        .route("/:id/cancel", post(cancel_invoice))
        .route("/:id/cancel-now", post(cancel_invoice_now))
        .route("/:id/request-deletion", post(request_invoice_deletion))
        .route("/:id/force", delete(force_delete_invoice))
}

/// Load the invoice and check `action` in the book its type belongs to.
async fn guarded(
    services: &AppServices,
    principal: &Principal,
    raw_id: &str,
    action: InvoiceAction,
) -> Result<Invoice, axum::response::Response> {
    let id: InvoiceId = dto::path_id(raw_id)?;
    let invoice = services
        .invoices
        .get(id)
        .await
        .map_err(errors::service_error_to_response)?;
    let permission = authz::invoice_permission(invoice.invoice_type(), action);
    authz::guard(services, principal, permission, &format!("invoice:{id}")).await?;
    Ok(invoice)
}

fn pending_approval(approval: &Approval, message: &str) -> axum::response::Response {
    errors::accepted(
        json!({
            "approval_id": approval.id_typed(),
            "approval_number": approval.approval_number(),
            "status": "pending",
        }),
        message,
    )
}

pub async fn list_invoices(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    query: Result<Query<dto::InvoiceListQuery>, QueryRejection>,
) -> ApiResult {
    let query = dto::query(query)?;
    let invoice_type = query.invoice_type.unwrap_or(InvoiceType::Sale);
    let permission = authz::invoice_permission(invoice_type, InvoiceAction::View);
    authz::guard(&services, ctx.principal(), permission, "invoices").await?;

    let (filter, page, limit) = query.into_filter(ctx.user_id());
    let page = services
        .invoices
        .list(&filter, page, limit)
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(errors::ok(page))
}

pub async fn waiting_invoices(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
) -> ApiResult {
    let permission = Permission::invoice(InvoiceScope::Sales, InvoiceAction::View);
    authz::guard(&services, ctx.principal(), permission, "invoices/waiting").await?;
    let invoices = services
        .invoices
        .waiting()
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(errors::ok(invoices))
}

pub async fn invoice_stats(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
) -> ApiResult {
    let permission = Permission::invoice(InvoiceScope::Sales, InvoiceAction::View);
    authz::guard(&services, ctx.principal(), permission, "invoices/stats").await?;
    let stats = services
        .invoices
        .stats()
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(errors::ok(stats))
}

pub async fn create_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    payload: Result<Json<dto::CreateInvoiceRequest>, JsonRejection>,
) -> ApiResult {
    let body = dto::body(payload)?;
    let permission = authz::invoice_permission(body.invoice_type, InvoiceAction::Create);
    authz::guard(&services, ctx.principal(), permission, "invoices").await?;

    let new = body.into_new_invoice()?;
    let invoice = services
        .invoices
        .create(ctx.principal(), new)
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(errors::created(invoice))
}

pub async fn get_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let invoice = guarded(&services, ctx.principal(), &id, InvoiceAction::View).await?;
    Ok(errors::ok(invoice))
}

pub async fn print_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let invoice = guarded(&services, ctx.principal(), &id, InvoiceAction::Print).await?;
    Ok(errors::ok(json!({
        "invoice": invoice,
        "printed_by": ctx.user_id(),
        "printed_at": Utc::now(),
    })))
}

pub async fn update_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(id): Path<String>,
    payload: Result<Json<dto::UpdateInvoiceRequest>, JsonRejection>,
) -> ApiResult {
    let update = dto::body(payload)?.into_update()?;
    let invoice = guarded(&services, ctx.principal(), &id, InvoiceAction::Edit).await?;
    let invoice = services
        .invoices
        .update(ctx.principal(), invoice.id_typed(), update)
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(errors::ok_with_message(invoice, "تم تحديث الفاتورة"))
}

pub async fn register_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(id): Path<String>,
    payload: Result<Json<dto::PaymentRequest>, JsonRejection>,
) -> ApiResult {
    let body = dto::body(payload)?;
    let invoice = guarded(&services, ctx.principal(), &id, InvoiceAction::Edit).await?;
    let invoice = services
        .invoices
        .register_payment(ctx.principal(), invoice.id_typed(), body.amount)
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(errors::ok_with_message(invoice, "تم تسجيل الدفعة"))
}

pub async fn workflow_log(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let invoice = guarded(&services, ctx.principal(), &id, InvoiceAction::View).await?;
    let log = services
        .invoices
        .workflow_log(invoice.id_typed())
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(errors::ok(log))
}

pub async fn transition_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(id): Path<String>,
    payload: Result<Json<dto::TransitionRequest>, JsonRejection>,
) -> ApiResult {
    let body = dto::body(payload)?;
    let invoice = guarded(&services, ctx.principal(), &id, InvoiceAction::View).await?;
    let invoice = services
        .invoices
        .transition(ctx.principal(), invoice.id_typed(), body.status, body.notes)
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(errors::ok(invoice))
}

pub async fn audit_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let invoice = guarded(&services, ctx.principal(), &id, InvoiceAction::View).await?;
    let invoice = services
        .invoices
        .mark_audited(ctx.principal(), invoice.id_typed())
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(errors::ok_with_message(invoice, "تم تدقيق الفاتورة"))
}

pub async fn prepare_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let invoice = guarded(&services, ctx.principal(), &id, InvoiceAction::View).await?;
    let invoice = services
        .invoices
        .mark_prepared(ctx.principal(), invoice.id_typed())
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(errors::ok_with_message(invoice, "تم تجهيز الفاتورة"))
}

pub async fn convert_to_active(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let invoice = guarded(&services, ctx.principal(), &id, InvoiceAction::View).await?;
    let invoice = services
        .invoices
        .convert_to_active(ctx.principal(), invoice.id_typed())
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(errors::ok(invoice))
}

pub async fn remind_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(id): Path<String>,
    payload: Result<Json<dto::RemindRequest>, JsonRejection>,
) -> ApiResult {
    let body = dto::optional_body(payload)?;
    let invoice = guarded(&services, ctx.principal(), &id, InvoiceAction::View).await?;
    let reminder = services
        .invoices
        .remind(ctx.principal(), invoice.id_typed(), body.remind_at)
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(errors::created(reminder))
}

pub async fn cancel_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(id): Path<String>,
    payload: Result<Json<dto::ReasonRequest>, JsonRejection>,
) -> ApiResult {
    let body = dto::optional_body(payload)?;
    let invoice = guarded(&services, ctx.principal(), &id, InvoiceAction::Void).await?;
    let outcome = services
        .invoices
        .request_cancel(ctx.principal(), invoice.id_typed(), body.reason())
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(match outcome {
        CancelOutcome::Cancelled(invoice) => errors::ok_with_message(invoice, "تم إلغاء الفاتورة"),
        CancelOutcome::PendingApproval(approval) => {
            pending_approval(&approval, "تم إرسال طلب الإلغاء للموافقة")
        }
    })
}

pub async fn cancel_invoice_now(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(id): Path<String>,
    payload: Result<Json<dto::ReasonRequest>, JsonRejection>,
) -> ApiResult {
    let body = dto::optional_body(payload)?;
    let id: InvoiceId = dto::path_id(&id)?;
    authz::guard(&services, ctx.principal(), Permission::BypassApprovals, &format!("invoice:{id}"))
        .await?;
    let invoice = services
        .invoices
        .cancel_now(ctx.principal(), id, body.reason())
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(errors::ok_with_message(invoice, "تم إلغاء الفاتورة"))
}

pub async fn request_invoice_deletion(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(id): Path<String>,
    payload: Result<Json<dto::ReasonRequest>, JsonRejection>,
) -> ApiResult {
    let body = dto::optional_body(payload)?;
    let invoice = guarded(&services, ctx.principal(), &id, InvoiceAction::Delete).await?;
    let approval = services
        .invoices
        .request_deletion(ctx.principal(), invoice.id_typed(), body.reason())
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(pending_approval(&approval, "تم إرسال طلب الحذف للموافقة"))
}

pub async fn delete_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(id): Path<String>,
    payload: Result<Json<dto::ReasonRequest>, JsonRejection>,
) -> ApiResult {
    let body = dto::optional_body(payload)?;
    let id: InvoiceId = dto::path_id(&id)?;
    let invoice = services
        .invoices
        .delete(ctx.principal(), id, body.reason)
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(errors::ok_with_message(invoice, "تم الحذف"))
}

pub async fn force_delete_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(id): Path<String>,
    payload: Result<Json<dto::ReasonRequest>, JsonRejection>,
) -> ApiResult {
    let body = dto::optional_body(payload)?;
    let id: InvoiceId = dto::path_id(&id)?;
    authz::guard(&services, ctx.principal(), Permission::BypassApprovals, &format!("invoice:{id}"))
        .await?;
    let invoice = services
        .invoices
        .force_delete(ctx.principal(), id, body.reason)
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(errors::ok_with_message(invoice, "تم الحذف"))
}
