use std::sync::Arc;

use axum::{
    Json, Router,
    extract::rejection::{JsonRejection, QueryRejection},
    extract::{Extension, Path, Query},
    routing::{get, post},
};
use serde_json::json;

use bierp_auth::{DeviceAction, Permission};
use bierp_core::DeviceId;

use crate::app::errors::{self, ApiResult};
use crate::app::{dto, services::AppServices};
use crate::authz;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_devices).post(create_device))
        .route("/scan/:serial", get(scan_device))
        .route("/:id", get(get_device).delete(delete_device))
        .route("/:id/history", get(device_history))
        .route("/:id/inspect", post(inspect_device))
        .route("/:id/prepare", post(prepare_device))
        .route("/:id/custody", post(device_custody))
        .route("/:id/transfer", post(transfer_device))
        .route("/:id/request-deletion", post(request_device_deletion))
}

/// Parse the path id and check `action`.
async fn guarded(
    services: &AppServices,
    ctx: &PrincipalContext,
    raw_id: &str,
    action: DeviceAction,
) -> Result<DeviceId, axum::response::Response> {
    let id: DeviceId = dto::path_id(raw_id)?;
    authz::guard(services, ctx.principal(), Permission::Device(action), &format!("device:{id}"))
        .await?;
    Ok(id)
}

pub async fn list_devices(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    query: Result<Query<dto::DeviceListQuery>, QueryRejection>,
) -> ApiResult {
    let query = dto::query(query)?;
    authz::guard(&services, ctx.principal(), Permission::Device(DeviceAction::Read), "devices")
        .await?;
    let (filter, page, limit) = query.into_filter();
    let page = services
        .devices
        .list(&filter, page, limit)
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(errors::ok(page))
}

pub async fn create_device(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    payload: Result<Json<dto::CreateDeviceRequest>, JsonRejection>,
) -> ApiResult {
    let new = dto::body(payload)?.into_new_device()?;
    authz::guard(&services, ctx.principal(), Permission::Device(DeviceAction::Create), "devices")
        .await?;
    let device = services
        .devices
        .create(ctx.principal(), new)
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(errors::created(device))
}

pub async fn scan_device(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(serial): Path<String>,
) -> ApiResult {
    let target = format!("serial:{serial}");
    authz::guard(&services, ctx.principal(), Permission::Device(DeviceAction::Read), &target)
        .await?;
    let device = services
        .devices
        .scan(&serial)
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(errors::ok(device))
}

pub async fn get_device(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let id = guarded(&services, &ctx, &id, DeviceAction::Read).await?;
    let device = services
        .devices
        .get(id)
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(errors::ok(device))
}

pub async fn device_history(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let id = guarded(&services, &ctx, &id, DeviceAction::Read).await?;
    let history = services
        .devices
        .history(id)
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(errors::ok(history))
}

pub async fn inspect_device(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(id): Path<String>,
    payload: Result<Json<dto::InspectRequest>, JsonRejection>,
) -> ApiResult {
    let body = dto::body(payload)?;
    let id = guarded(&services, &ctx, &id, DeviceAction::Update).await?;
    let device = services
        .devices
        .inspect(ctx.principal(), id, body.result, body.notes)
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(errors::ok_with_message(device, "تم تسجيل الفحص"))
}

pub async fn prepare_device(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(id): Path<String>,
    payload: Result<Json<dto::PrepareRequest>, JsonRejection>,
) -> ApiResult {
    let body = dto::body(payload)?;
    let id = guarded(&services, &ctx, &id, DeviceAction::Update).await?;
    let device = services
        .devices
        .prepare(ctx.principal(), id, body.action, body.notes)
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(errors::ok(device))
}

pub async fn device_custody(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(id): Path<String>,
    payload: Result<Json<dto::CustodyRequest>, JsonRejection>,
) -> ApiResult {
    let body = dto::body(payload)?;
    let id = guarded(&services, &ctx, &id, DeviceAction::Custody).await?;
    let device = services
        .devices
        .custody(ctx.principal(), id, body.action, body.reason)
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(errors::ok(device))
}

pub async fn transfer_device(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(id): Path<String>,
    payload: Result<Json<dto::TransferRequest>, JsonRejection>,
) -> ApiResult {
    let body = dto::body(payload)?;
    let warehouse = body.warehouse()?;
    let id = guarded(&services, &ctx, &id, DeviceAction::Transfer).await?;
    let device = services
        .devices
        .transfer(ctx.principal(), id, warehouse, body.reason)
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(errors::ok_with_message(device, "تم نقل الجهاز"))
}

pub async fn request_device_deletion(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(id): Path<String>,
    payload: Result<Json<dto::ReasonRequest>, JsonRejection>,
) -> ApiResult {
    let body = dto::optional_body(payload)?;
    let id = guarded(&services, &ctx, &id, DeviceAction::DeleteRequest).await?;
    let approval = services
        .devices
        .request_deletion(ctx.principal(), id, body.reason())
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(errors::accepted(
        json!({
            "approval_id": approval.id_typed(),
            "approval_number": approval.approval_number(),
            "status": "pending",
        }),
        "تم إرسال طلب الحذف للموافقة",
    ))
}

/// Devices are only removed by an approved deletion request.
pub async fn delete_device(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let id: DeviceId = dto::path_id(&id)?;
    let device = services
        .devices
        .delete(ctx.principal(), id)
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(errors::ok(device))
}
