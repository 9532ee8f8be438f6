//! List filters shared by both stores.
//!
//! Postgres pushes the indexed columns (type, status, dates) into SQL and then
//! runs [`InvoiceFilter::matches`] / [`DeviceFilter::matches`] over the rows,
//! so both backends agree on the exact semantics.

use chrono::NaiveDate;

use bierp_core::UserId;
use bierp_inventory::{Device, DeviceStatus};
use bierp_invoicing::{Invoice, InvoiceStatus, InvoiceType};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvoiceFilter {
    pub invoice_type: Option<InvoiceType>,
    pub status: Option<InvoiceStatus>,
    pub customer_id: Option<String>,
    pub supplier_id: Option<String>,
    /// Inclusive creation-date bounds.
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    /// Case-insensitive substring of the invoice number.
    pub search: Option<String>,
    /// Only invoices created by this user (`my_only`).
    pub created_by: Option<UserId>,
    /// Draft / waiting status or the waiting sub-type.
    pub waiting_only: bool,
}

impl InvoiceFilter {
    pub fn of_type(invoice_type: InvoiceType) -> Self {
        Self {
            invoice_type: Some(invoice_type),
            ..Self::default()
        }
    }

    /// Deleted invoices only show up when asked for by status.
    pub fn matches(&self, invoice: &Invoice) -> bool {
        match self.status {
            Some(status) if invoice.status() != status => return false,
            None if invoice.status() == InvoiceStatus::Deleted => return false,
            _ => {}
        }
        if self.invoice_type.is_some_and(|t| invoice.invoice_type() != t) {
            return false;
        }
        if let Some(customer) = &self.customer_id {
            if invoice.customer_id().map(|c| c.as_str()) != Some(customer.as_str()) {
                return false;
            }
        }
        if let Some(supplier) = &self.supplier_id {
            if invoice.supplier_id().map(|s| s.as_str()) != Some(supplier.as_str()) {
                return false;
            }
        }
        let day = invoice.created_at().date_naive();
        if self.date_from.is_some_and(|from| day < from) {
            return false;
        }
        if self.date_to.is_some_and(|to| day > to) {
            return false;
        }
        if let Some(needle) = self.search.as_deref().filter(|s| !s.is_empty()) {
            if !invoice
                .invoice_number()
                .to_lowercase()
                .contains(&needle.to_lowercase())
            {
                return false;
            }
        }
        if self.created_by.is_some_and(|u| invoice.created_by() != u) {
            return false;
        }
        if self.waiting_only && !invoice.is_waiting() {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceFilter {
    pub status: Option<DeviceStatus>,
    pub warehouse_id: Option<String>,
    pub product_id: Option<String>,
    pub custody_employee_id: Option<UserId>,
    /// Case-insensitive substring of the serial number.
    pub search: Option<String>,
}

impl DeviceFilter {
    /// Soft-deleted devices never match.
    pub fn matches(&self, device: &Device) -> bool {
        if device.is_deleted() {
            return false;
        }
        if self.status.is_some_and(|s| device.status() != s) {
            return false;
        }
        if let Some(warehouse) = &self.warehouse_id {
            if device.warehouse_id().as_str() != warehouse {
                return false;
            }
        }
        if let Some(product) = &self.product_id {
            if device.product_id().as_str() != product {
                return false;
            }
        }
        if self
            .custody_employee_id
            .is_some_and(|e| device.custody_employee_id() != Some(e))
        {
            return false;
        }
        if let Some(needle) = self.search.as_deref().filter(|s| !s.is_empty()) {
            if !device
                .serial_number()
                .to_string()
                .to_lowercase()
                .contains(&needle.to_lowercase())
            {
                return false;
            }
        }
        true
    }
}
