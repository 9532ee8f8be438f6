//! Response envelope: `{success, data?, error?, message?}`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;
use tracing::error;

use bierp_auth::AuthzError;
use bierp_infra::ServiceError;

/// Handlers return the error branch already rendered.
pub type ApiResult = Result<Response, Response>;

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({
            "success": false,
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn forbidden(err: &AuthzError) -> Response {
    let message = match err {
        AuthzError::SecurityLevelInsufficient { .. } => "مستوى الأمان غير كافٍ لهذه العملية",
        AuthzError::Revoked(_) => "هذه الصلاحية ملغية لحسابك",
        AuthzError::Forbidden(_) => "ليس لديك صلاحية لهذه العملية",
    };
    (
        StatusCode::FORBIDDEN,
        Json(json!({
            "success": false,
            "error": err.code(),
            "message": message,
            "required_permission": err.permission().code(),
        })),
    )
        .into_response()
}

pub fn service_error_to_response(err: ServiceError) -> Response {
    let code = err.code();
    let (status, message) = match &err {
        ServiceError::Forbidden(e) => return forbidden(e),
        ServiceError::NotFound(what) => (StatusCode::NOT_FOUND, not_found_message(what).to_string()),
        ServiceError::AlreadyCancelled => (StatusCode::BAD_REQUEST, "الفاتورة ملغاة مسبقاً".into()),
        ServiceError::AlreadyDeleted => (StatusCode::BAD_REQUEST, "الفاتورة محذوفة مسبقاً".into()),
        ServiceError::DeletionRequiresApproval => (
            StatusCode::BAD_REQUEST,
            "الحذف يتطلب موافقة المالك، استخدم طلب الحذف".into(),
        ),
        ServiceError::OwnerOnly => (StatusCode::FORBIDDEN, "فقط المالك يمكنه الموافقة".into()),
        ServiceError::MissingReason => (StatusCode::BAD_REQUEST, "يجب تحديد السبب".into()),
        ServiceError::MissingFields(field) => {
            (StatusCode::BAD_REQUEST, format!("حقل مطلوب: {field}"))
        }
        ServiceError::NotPending => (StatusCode::BAD_REQUEST, "تم البت في هذا الطلب مسبقاً".into()),
        ServiceError::ApprovalExpired => (StatusCode::BAD_REQUEST, "انتهت صلاحية طلب الموافقة".into()),
        ServiceError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        ServiceError::Domain(_) => match code {
            "NOT_FOUND" => (StatusCode::NOT_FOUND, "العنصر غير موجود".into()),
            "CONFLICT" => (StatusCode::CONFLICT, err.to_string()),
            "INVALID_TRANSITION" => (
                StatusCode::BAD_REQUEST,
                format!("انتقال غير مسموح: {err}"),
            ),
            _ => (StatusCode::BAD_REQUEST, err.to_string()),
        },
        ServiceError::Store(_) if code == "CONFLICT" => (
            StatusCode::CONFLICT,
            "تم تعديل السجل من مستخدم آخر، أعد المحاولة".into(),
        ),
        ServiceError::Store(_) | ServiceError::Export(_) => {
            error!(error = %err, "request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    };

    json_error(status, code, message)
}

fn not_found_message(what: &str) -> &'static str {
    match what {
        "invoice" => "الفاتورة غير موجودة",
        "device" => "الجهاز غير موجود",
        "approval" => "طلب الموافقة غير موجود",
        _ => "العنصر غير موجود",
    }
}

/// Request body or query failed validation before reaching a service.
pub fn bad_request(message: impl Into<String>) -> Response {
    json_error(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
}

pub fn ok<T: Serialize>(data: T) -> Response {
    with_status(StatusCode::OK, data, None)
}

pub fn created<T: Serialize>(data: T) -> Response {
    with_status(StatusCode::CREATED, data, None)
}

pub fn ok_with_message<T: Serialize>(data: T, message: &str) -> Response {
    with_status(StatusCode::OK, data, Some(message))
}

/// 202: the action is parked behind an approval.
pub fn accepted<T: Serialize>(data: T, message: &str) -> Response {
    with_status(StatusCode::ACCEPTED, data, Some(message))
}

fn with_status<T: Serialize>(status: StatusCode, data: T, message: Option<&str>) -> Response {
    let mut body = json!({ "success": true, "data": data });
    if let Some(message) = message {
        body["message"] = json!(message);
    }
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bierp_auth::Permission;
    use bierp_core::DomainError;

    #[test]
    fn statuses_follow_the_error_code() {
        let cases = [
            (ServiceError::NotFound("device"), StatusCode::NOT_FOUND),
            (ServiceError::OwnerOnly, StatusCode::FORBIDDEN),
            (ServiceError::MissingFields("warehouse_id"), StatusCode::BAD_REQUEST),
            (
                DomainError::invalid_transition("completed", "draft").into(),
                StatusCode::BAD_REQUEST,
            ),
            (DomainError::not_found().into(), StatusCode::NOT_FOUND),
            (DomainError::conflict("stale").into(), StatusCode::CONFLICT),
            (DomainError::validation("bad").into(), StatusCode::BAD_REQUEST),
            (
                AuthzError::Forbidden(Permission::BypassApprovals).into(),
                StatusCode::FORBIDDEN,
            ),
            (
                bierp_infra::StoreError::Database("boom".into()).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(service_error_to_response(err).status(), status);
        }
    }
}
