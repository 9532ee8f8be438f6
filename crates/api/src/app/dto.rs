//! Request DTOs.
//!
//! Bodies and query strings are checked here, before any service runs:
//! malformed JSON, unknown enum values and failed `validator` rules all
//! become 400 `VALIDATION_ERROR`.

use std::str::FromStr;

use axum::Json;
use axum::extract::Query;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::response::Response;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use bierp_approvals::{ApprovalStatus, ApprovalType, EntityType};
use bierp_core::{
    CustomerId, DeviceId, DomainError, InvoiceId, ProductId, SupplierId, UserId, WarehouseId,
};
use bierp_infra::ServiceError;
use bierp_infra::services::{
    ApprovalListFilter, CustodyAction, NewDevice, NewInvoice, NewLine, Period, PrepareStep,
};
use bierp_infra::store::{DeviceFilter, InvoiceFilter};
use bierp_inventory::{DeviceStatus, InspectionResult};
use bierp_invoicing::{InvoiceStatus, InvoiceSubType, InvoiceType, InvoiceUpdate, PaymentMethod};

use crate::app::errors;

pub const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 500;
const MAX_PAGE: usize = 100_000;

/// Unwrap a JSON body and run its validation rules.
pub fn body<T: Validate>(body: Result<Json<T>, JsonRejection>) -> Result<T, Response> {
    let Json(body) = body.map_err(|e| errors::bad_request(e.body_text()))?;
    validate_input(&body)?;
    Ok(body)
}

/// Like [`body`], but a request without a JSON body yields the default.
pub fn optional_body<T: Validate + Default>(
    payload: Result<Json<T>, JsonRejection>,
) -> Result<T, Response> {
    match payload {
        Err(JsonRejection::MissingJsonContentType(_)) => Ok(T::default()),
        other => body(other),
    }
}

/// Unwrap a query string.
pub fn query<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, Response> {
    query
        .map(|Query(q)| q)
        .map_err(|e| errors::bad_request(e.body_text()))
}

pub fn validate_input<T: Validate>(input: &T) -> Result<(), Response> {
    input
        .validate()
        .map_err(|e| errors::bad_request(format!("بيانات غير صالحة: {e}")))
}

fn key<K: FromStr<Err = DomainError>>(value: &str) -> Result<K, Response> {
    value
        .parse()
        .map_err(|e: DomainError| errors::bad_request(e.to_string()))
}

/// Id taken from a path segment.
pub fn path_id<K: FromStr<Err = DomainError>>(raw: &str) -> Result<K, Response> {
    key(raw)
}

/// Absent and blank both mean "not given".
fn optional_key<K: FromStr<Err = DomainError>>(value: Option<&str>) -> Result<Option<K>, Response> {
    match value {
        Some(v) if !v.trim().is_empty() => key(v).map(Some),
        _ => Ok(None),
    }
}

fn page_and_limit(page: Option<usize>, limit: Option<usize>) -> (usize, usize) {
    (
        page.unwrap_or(1).clamp(1, MAX_PAGE),
        limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
    )
}

// -------------------------
// Invoices
// -------------------------

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct InvoiceLineRequest {
    #[validate(length(min = 1))]
    pub product_id: String,
    // Same ceiling as bierp_invoicing::MAX_LINE_QUANTITY.
    #[validate(range(min = 1, max = 10_000))]
    pub quantity: i64,
    #[serde(alias = "unit_price", default)]
    pub price: u64,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub device_id: Option<DeviceId>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateInvoiceRequest {
    #[serde(rename = "type")]
    pub invoice_type: InvoiceType,
    #[serde(default)]
    pub sub_type: Option<InvoiceSubType>,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub supplier_id: Option<String>,
    #[validate(length(min = 1), nested)]
    pub items: Vec<InvoiceLineRequest>,
    #[serde(default)]
    pub discount_amount: u64,
    #[validate(range(max = 100))]
    #[serde(default)]
    pub discount_percent: Option<u8>,
    #[serde(default)]
    pub tax_amount: u64,
    #[serde(default)]
    pub paid_amount: u64,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl CreateInvoiceRequest {
    pub fn into_new_invoice(self) -> Result<NewInvoice, Response> {
        let mut lines = Vec::with_capacity(self.items.len());
        for item in self.items {
            let product_id: ProductId = key(&item.product_id)?;
            let mut line = NewLine::new(product_id, item.quantity, item.price);
            line.serial_number = item.serial_number.filter(|s| !s.trim().is_empty());
            if let Some(device_id) = item.device_id {
                line = line.with_device(device_id);
            }
            lines.push(line);
        }

        let mut new = NewInvoice::new(self.invoice_type, lines);
        new.sub_type = self.sub_type;
        new.customer_id = optional_key::<CustomerId>(self.customer_id.as_deref())?;
        new.supplier_id = optional_key::<SupplierId>(self.supplier_id.as_deref())?;
        new.discount_amount = self.discount_amount;
        new.discount_percent = self.discount_percent;
        new.tax_amount = self.tax_amount;
        new.paid_amount = self.paid_amount;
        new.payment_method = self.payment_method.unwrap_or_default();
        new.notes = self.notes;
        Ok(new)
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateInvoiceRequest {
    pub paid_amount: Option<u64>,
    pub discount_amount: Option<u64>,
    #[validate(range(max = 100))]
    pub discount_percent: Option<u8>,
    pub payment_method: Option<PaymentMethod>,
    pub notes: Option<String>,
}

impl UpdateInvoiceRequest {
    pub fn into_update(self) -> Result<InvoiceUpdate, Response> {
        let update = InvoiceUpdate {
            paid_amount: self.paid_amount,
            discount_amount: self.discount_amount,
            discount_percent: self.discount_percent,
            payment_method: self.payment_method,
            notes: self.notes,
        };
        if update.is_empty() {
            return Err(errors::bad_request("لا توجد تحديثات صالحة"));
        }
        Ok(update)
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct PaymentRequest {
    #[validate(range(min = 1))]
    pub amount: u64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct TransitionRequest {
    #[serde(alias = "new_status")]
    pub status: InvoiceStatus,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Body of cancel / delete / deletion-request calls.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct ReasonRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

impl ReasonRequest {
    pub fn reason(&self) -> &str {
        self.reason.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct RemindRequest {
    #[serde(default)]
    pub remind_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InvoiceListQuery {
    #[serde(rename = "type")]
    pub invoice_type: Option<InvoiceType>,
    pub status: Option<InvoiceStatus>,
    pub customer_id: Option<String>,
    pub supplier_id: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub search: Option<String>,
    #[serde(default)]
    pub my_only: bool,
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

impl InvoiceListQuery {
    /// Filter plus `(page, limit)`.
    pub fn into_filter(self, caller: UserId) -> (InvoiceFilter, usize, usize) {
        let (page, limit) = page_and_limit(self.page, self.limit);
        let filter = InvoiceFilter {
            invoice_type: self.invoice_type,
            status: self.status,
            customer_id: self.customer_id,
            supplier_id: self.supplier_id,
            date_from: self.from,
            date_to: self.to,
            search: self.search.filter(|s| !s.trim().is_empty()),
            created_by: self.my_only.then_some(caller),
            waiting_only: false,
        };
        (filter, page, limit)
    }
}

// -------------------------
// Devices
// -------------------------

#[derive(Debug, Deserialize, Validate)]
pub struct CreateDeviceRequest {
    #[validate(length(min = 1))]
    pub product_id: String,
    #[serde(default)]
    pub warehouse_id: Option<String>,
    #[serde(default)]
    pub purchase_cost: u64,
    #[serde(default)]
    pub purchase_invoice_id: Option<InvoiceId>,
}

impl CreateDeviceRequest {
    pub fn into_new_device(self) -> Result<NewDevice, Response> {
        Ok(NewDevice {
            product_id: key(&self.product_id)?,
            warehouse_id: optional_key(self.warehouse_id.as_deref())?,
            purchase_cost: self.purchase_cost,
            purchase_invoice_id: self.purchase_invoice_id,
        })
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct InspectRequest {
    pub result: InspectionResult,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PrepareRequest {
    pub action: PrepareStep,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CustodyRequest {
    pub action: CustodyAction,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct TransferRequest {
    #[serde(default)]
    pub warehouse_id: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl TransferRequest {
    /// A blank warehouse counts as missing.
    pub fn warehouse(&self) -> Result<Option<WarehouseId>, Response> {
        optional_key(self.warehouse_id.as_deref())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DeviceListQuery {
    pub status: Option<DeviceStatus>,
    pub warehouse_id: Option<String>,
    pub product_id: Option<String>,
    pub custody_employee_id: Option<UserId>,
    pub search: Option<String>,
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

impl DeviceListQuery {
    pub fn into_filter(self) -> (DeviceFilter, usize, usize) {
        let (page, limit) = page_and_limit(self.page, self.limit);
        let filter = DeviceFilter {
            status: self.status,
            warehouse_id: self.warehouse_id,
            product_id: self.product_id,
            custody_employee_id: self.custody_employee_id,
            search: self.search.filter(|s| !s.trim().is_empty()),
        };
        (filter, page, limit)
    }
}

// -------------------------
// Approvals
// -------------------------

#[derive(Debug, Deserialize, Validate)]
pub struct DeletionApprovalRequest {
    pub entity_type: EntityType,
    #[validate(length(min = 1))]
    pub entity_id: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct InvoiceVoidApprovalRequest {
    pub invoice_id: InvoiceId,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct QuantityApprovalRequest {
    #[validate(length(min = 1))]
    pub product_id: String,
    #[validate(range(min = 0))]
    pub new_quantity: i64,
    #[serde(default)]
    pub reason: String,
}

impl QuantityApprovalRequest {
    pub fn product(&self) -> Result<ProductId, Response> {
        key(&self.product_id)
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct DecisionRequest {
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApprovalListQuery {
    /// A status name, or `all`. Defaults to `pending`.
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub approval_type: Option<String>,
}

impl ApprovalListQuery {
    pub fn into_filter(self) -> Result<ApprovalListFilter, Response> {
        let status = match self.status.as_deref().unwrap_or("pending") {
            "all" => None,
            s => Some(
                ApprovalStatus::parse(s)
                    .ok_or_else(|| errors::bad_request(format!("حالة غير معروفة: {s}")))?,
            ),
        };
        let approval_type = match self.approval_type.as_deref() {
            None | Some("") | Some("all") => None,
            Some(t) => Some(
                ApprovalType::parse(t)
                    .ok_or_else(|| errors::bad_request(format!("نوع غير معروف: {t}")))?,
            ),
        };
        Ok(ApprovalListFilter {
            status,
            approval_type,
        })
    }
}

// -------------------------
// Audit / reports
// -------------------------

#[derive(Debug, Default, Deserialize)]
pub struct StatsQuery {
    pub days: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PeriodQuery {
    /// `YYYY-MM`; wins over `from` / `to`.
    pub month: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub limit: Option<usize>,
}

impl PeriodQuery {
    /// `None` means the service default (month to date).
    pub fn period(&self) -> Result<Option<Period>, ServiceError> {
        if let Some(month) = self.month.as_deref() {
            return Period::month(month).map(Some);
        }
        match (self.from, self.to) {
            (Some(from), Some(to)) => Period::between(from, to).map(Some),
            (Some(from), None) => Period::between(from, Utc::now().date_naive()).map(Some),
            (None, Some(_)) => Err(ServiceError::validation("`to` requires `from`")),
            (None, None) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn purchase_body_accepts_price_and_unit_price() {
        let req: CreateInvoiceRequest = serde_json::from_value(serde_json::json!({
            "type": "purchase",
            "items": [
                { "product_id": "P1", "quantity": 3, "price": 1000 },
                { "product_id": "P2", "quantity": 1, "unit_price": 50 }
            ]
        }))
        .unwrap();
        validate_input(&req).unwrap();
        let new = req.into_new_invoice().unwrap();
        assert_eq!(new.invoice_type, InvoiceType::Purchase);
        assert_eq!(new.lines[0].unit_price, 1000);
        assert_eq!(new.lines[1].unit_price, 50);
    }

    #[test]
    fn empty_items_and_zero_quantities_fail_validation() {
        let req: CreateInvoiceRequest =
            serde_json::from_value(serde_json::json!({ "type": "sale", "items": [] })).unwrap();
        assert!(validate_input(&req).is_err());

        let req: CreateInvoiceRequest = serde_json::from_value(serde_json::json!({
            "type": "sale",
            "items": [{ "product_id": "P1", "quantity": 0, "price": 10 }]
        }))
        .unwrap();
        assert!(validate_input(&req).is_err());
    }

    #[test]
    fn oversized_line_quantity_fails_validation() {
        let req: CreateInvoiceRequest = serde_json::from_value(serde_json::json!({
            "type": "purchase",
            "items": [{ "product_id": "P1", "quantity": 1_000_000, "price": 10 }]
        }))
        .unwrap();
        assert!(validate_input(&req).is_err());
    }

    #[test]
    fn page_numbers_are_capped() {
        let query = InvoiceListQuery {
            page: Some(usize::MAX),
            limit: Some(usize::MAX),
            ..Default::default()
        };
        let (_, page, limit) = query.into_filter(UserId::new());
        assert_eq!(page, MAX_PAGE);
        assert_eq!(limit, MAX_PAGE_SIZE);

        let (_, page, limit) = DeviceListQuery::default().into_filter();
        assert_eq!((page, limit), (1, DEFAULT_PAGE_SIZE));
    }

    #[test]
    fn blank_product_ids_are_rejected() {
        let req: CreateInvoiceRequest = serde_json::from_value(serde_json::json!({
            "type": "sale",
            "items": [{ "product_id": "  ", "quantity": 1, "price": 10 }]
        }))
        .unwrap();
        assert!(req.into_new_invoice().is_err());
    }

    #[test]
    fn approval_listing_defaults_to_pending() {
        let filter = ApprovalListQuery::default().into_filter().unwrap();
        assert_eq!(filter.status, Some(ApprovalStatus::Pending));

        let filter = ApprovalListQuery {
            status: Some("all".into()),
            approval_type: Some("invoice_void".into()),
        }
        .into_filter()
        .unwrap();
        assert_eq!(filter.status, None);
        assert_eq!(filter.approval_type, Some(ApprovalType::InvoiceVoid));

        let bad = ApprovalListQuery {
            status: Some("bogus".into()),
            approval_type: None,
        };
        assert!(bad.into_filter().is_err());
    }

    #[test]
    fn month_wins_over_a_date_range() {
        let q = PeriodQuery {
            month: Some("2026-02".into()),
            from: NaiveDate::from_ymd_opt(2026, 5, 1),
            ..PeriodQuery::default()
        };
        let period = q.period().unwrap().unwrap();
        assert_eq!(period.from, NaiveDate::from_ymd_opt(2026, 2, 1).unwrap());
        assert_eq!(period.to, NaiveDate::from_ymd_opt(2026, 2, 28).unwrap());
    }
}
