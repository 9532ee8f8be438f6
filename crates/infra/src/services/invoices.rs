//! Invoice lifecycle service.
//!
//! Creation and completion carry cross-aggregate effects: purchases register
//! one device per unit, sales mark their tracked units sold, and every type
//! with a stock direction moves the product counters. All of it rides in the
//! same [`ChangeSet`] as the invoice row.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument};

use bierp_approvals::{Approval, EntityType};
use bierp_audit::{AuditCategory, Severity};
use bierp_auth::{AuthzError, Permission, Principal, can_bypass_approvals};
use bierp_core::{
    Aggregate, AggregateRoot, CustomerId, DeviceId, DomainError, InvoiceId, ProductId, SupplierId,
    WarehouseId,
};
use bierp_events::{Notification, NotificationKind};
use bierp_inventory::{Device, DeviceCommand, RegisterDevice, SerialNumber, serial_sequence_key};
use bierp_invoicing::{
    CreateInvoice, Invoice, InvoiceCommand, InvoiceEvent, InvoiceLine, InvoiceStatus,
    InvoiceSubType, InvoiceType, InvoiceUpdate, PaymentMethod, Reminder, StockDirection,
    WorkflowLogEntry, format_invoice_number, invoice_sequence_key,
};

use super::devices::{load_device, stage_device};
use super::{
    ApprovalService, AuditRecorder, Notifier, Page, ServiceError, ServiceResult, publish,
};
use crate::store::{ChangeSet, InvoiceFilter, StockChange, Store};

/// One requested invoice line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLine {
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price: u64,
    pub serial_number: Option<String>,
    /// Tracked unit sold on this line.
    pub device_id: Option<DeviceId>,
}

impl NewLine {
    pub fn new(product_id: ProductId, quantity: i64, unit_price: u64) -> Self {
        Self {
            product_id,
            quantity,
            unit_price,
            serial_number: None,
            device_id: None,
        }
    }

    pub fn with_device(mut self, device_id: DeviceId) -> Self {
        self.device_id = Some(device_id);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInvoice {
    pub invoice_type: InvoiceType,
    pub sub_type: Option<InvoiceSubType>,
    pub customer_id: Option<CustomerId>,
    pub supplier_id: Option<SupplierId>,
    pub lines: Vec<NewLine>,
    pub discount_amount: u64,
    pub discount_percent: Option<u8>,
    pub tax_amount: u64,
    pub paid_amount: u64,
    pub payment_method: PaymentMethod,
    pub notes: Option<String>,
}

impl NewInvoice {
    pub fn new(invoice_type: InvoiceType, lines: Vec<NewLine>) -> Self {
        Self {
            invoice_type,
            sub_type: None,
            customer_id: None,
            supplier_id: None,
            lines,
            discount_amount: 0,
            discount_percent: None,
            tax_amount: 0,
            paid_amount: 0,
            payment_method: PaymentMethod::default(),
            notes: None,
        }
    }

    pub fn sub_type(mut self, sub_type: InvoiceSubType) -> Self {
        self.sub_type = Some(sub_type);
        self
    }
}

/// Result of a cancel request: done now, or parked behind an approval.
#[derive(Debug, Clone)]
pub enum CancelOutcome {
    Cancelled(Invoice),
    PendingApproval(Approval),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InvoiceStats {
    pub by_type: BTreeMap<String, usize>,
    pub by_payment_status: BTreeMap<String, usize>,
    pub waiting: usize,
    pub today_sales: u64,
    pub month_sales: u64,
}

impl InvoiceStats {
    fn compute(invoices: &[Invoice], now: DateTime<Utc>) -> Self {
        let today = now.date_naive();
        let mut stats = InvoiceStats::default();
        for invoice in invoices.iter().filter(|i| !i.status().is_dead()) {
            *stats
                .by_type
                .entry(invoice.invoice_type().as_str().to_string())
                .or_default() += 1;
            *stats
                .by_payment_status
                .entry(invoice.payment_status().as_str().to_string())
                .or_default() += 1;
            if invoice.is_waiting() {
                stats.waiting += 1;
            }
            if !invoice.invoice_type().is_sale() {
                continue;
            }
            let day = invoice.created_at().date_naive();
            if day == today {
                stats.today_sales += invoice.total();
            }
            if day.year() == today.year() && day.month() == today.month() {
                stats.month_sales += invoice.total();
            }
        }
        stats
    }
}

pub(crate) async fn load_invoice(store: &dyn Store, id: InvoiceId) -> ServiceResult<Invoice> {
    store
        .get_invoice(id)
        .await?
        .ok_or(ServiceError::NotFound("invoice"))
}

/// Stage the invoice row, its journal events and its workflow rows.
pub(crate) fn stage_invoice(
    changes: &mut ChangeSet,
    invoice: &Invoice,
    loaded_version: u64,
    events: &[InvoiceEvent],
    actor_role: &str,
) -> ServiceResult<()> {
    let id = *invoice.id();
    changes.workflow.extend(
        events
            .iter()
            .filter_map(|e| WorkflowLogEntry::from_event(id, invoice.status(), e, actor_role)),
    );
    changes.put_invoice(invoice.clone(), loaded_version);
    changes.record(invoice, "invoice", loaded_version, events)?;
    Ok(())
}

#[derive(Clone)]
pub struct InvoiceService {
    store: Arc<dyn Store>,
    notifier: Arc<Notifier>,
    recorder: AuditRecorder,
    approvals: ApprovalService,
}

impl InvoiceService {
    pub fn new(
        store: Arc<dyn Store>,
        notifier: Arc<Notifier>,
        recorder: AuditRecorder,
        approvals: ApprovalService,
    ) -> Self {
        Self {
            store,
            notifier,
            recorder,
            approvals,
        }
    }

    #[instrument(skip(self, principal, new), fields(invoice_type = new.invoice_type.as_str()))]
    pub async fn create(&self, principal: &Principal, new: NewInvoice) -> ServiceResult<Invoice> {
        if new.lines.is_empty() {
            return Err(ServiceError::validation("cannot create invoice without lines"));
        }
        let mut seen_devices = HashSet::new();
        if let Some(device_id) = new
            .lines
            .iter()
            .filter_map(|l| l.device_id)
            .find(|id| !seen_devices.insert(*id))
        {
            return Err(ServiceError::validation(format!(
                "device {device_id} appears on more than one line"
            )));
        }
        let lines = new
            .lines
            .into_iter()
            .enumerate()
            .map(|(i, l)| {
                let mut line = InvoiceLine::new(i as u32 + 1, l.product_id, l.quantity, l.unit_price)?;
                if let Some(device_id) = l.device_id {
                    line = line.with_device(device_id);
                }
                if let Some(serial) = l.serial_number {
                    line = line.with_serial(serial);
                }
                Ok(line)
            })
            .collect::<Result<Vec<_>, DomainError>>()?;

        let now = Utc::now();
        let today = now.date_naive();
        let sequence = self
            .store
            .reserve(&invoice_sequence_key(new.invoice_type, today), 1)
            .await?;
        let id = InvoiceId::new();
        let mut invoice = Invoice::empty(id);
        let events = invoice.execute(&InvoiceCommand::Create(CreateInvoice {
            invoice_id: id,
            invoice_number: format_invoice_number(new.invoice_type, today, sequence),
            invoice_type: new.invoice_type,
            sub_type: new.sub_type,
            customer_id: new.customer_id,
            supplier_id: new.supplier_id,
            lines,
            discount_amount: new.discount_amount,
            discount_percent: new.discount_percent,
            tax_amount: new.tax_amount,
            paid_amount: new.paid_amount,
            payment_method: new.payment_method,
            notes: new.notes,
            created_by: principal.user_id,
            occurred_at: now,
        }))?;

        let mut changes = ChangeSet::new();
        stage_invoice(&mut changes, &invoice, 0, &events, principal.role.as_str())?;
        if invoice.status() == InvoiceStatus::Completed {
            self.stage_completion(principal, &invoice, now, &mut changes)
                .await?;
        }
        let devices_registered = changes.devices.len();
        self.store.commit(changes).await?;

        info!(
            invoice_id = %id,
            invoice_number = invoice.invoice_number(),
            status = invoice.status().as_str(),
            total = invoice.total(),
            devices_registered,
            "invoice created"
        );
        let data = json!({
            "invoice_number": invoice.invoice_number(),
            "invoice_type": invoice.invoice_type(),
            "total": invoice.total(),
            "created_by": principal.user_id,
        });
        publish(
            &self.notifier,
            Notification::new(
                NotificationKind::InvoiceCreated,
                id,
                format!("invoice {} created", invoice.invoice_number()),
                data.clone(),
            ),
        );
        if invoice.sub_type() == Some(InvoiceSubType::Waiting) {
            publish(
                &self.notifier,
                Notification::new(
                    NotificationKind::InvoiceWaitingPrices,
                    id,
                    format!("invoice {} is waiting for prices", invoice.invoice_number()),
                    data,
                ),
            );
        }
        let entry = AuditRecorder::entry(principal, "invoice_created", AuditCategory::Invoice)
            .entity("invoice", id)
            .entity_name(invoice.invoice_number())
            .metadata(json!({
                "invoice_type": invoice.invoice_type(),
                "status": invoice.status(),
                "total": invoice.total(),
                "devices_registered": devices_registered,
            }));
        self.recorder.record(entry).await;
        Ok(invoice)
    }

    /// Stock counters, purchased units and sold units for a completed
    /// invoice.
    async fn stage_completion(
        &self,
        principal: &Principal,
        invoice: &Invoice,
        now: DateTime<Utc>,
        changes: &mut ChangeSet,
    ) -> ServiceResult<()> {
        let invoice_type = invoice.invoice_type();
        let invoice_id = *invoice.id();

        if let Some(direction) = invoice_type.stock_direction() {
            for line in invoice.items() {
                let product_id = line.product_id.clone();
                changes.stock.push(match direction {
                    StockDirection::Out => StockChange::Adjust {
                        product_id,
                        delta: -line.quantity,
                    },
                    StockDirection::In if invoice_type == InvoiceType::Purchase => {
                        StockChange::Receive {
                            product_id,
                            quantity: line.quantity,
                            unit_cost: line.unit_price,
                        }
                    }
                    StockDirection::In => StockChange::Adjust {
                        product_id,
                        delta: line.quantity,
                    },
                });
            }
        }

        if invoice_type == InvoiceType::Purchase {
            let units: u64 = invoice.items().iter().map(|l| l.quantity as u64).sum();
            let year = now.year();
            let mut sequence = self
                .store
                .reserve(&serial_sequence_key(year), units)
                .await?;
            for line in invoice.items() {
                for _ in 0..line.quantity {
                    let device_id = DeviceId::new();
                    let mut device = Device::empty(device_id);
                    let events = device.execute(&DeviceCommand::Register(RegisterDevice {
                        device_id,
                        serial_number: SerialNumber::new(year, sequence),
                        product_id: line.product_id.clone(),
                        warehouse_id: WarehouseId::inspection(),
                        purchase_cost: line.unit_price,
                        purchase_invoice_id: Some(invoice_id),
                        actor: principal.user_id,
                        occurred_at: now,
                    }))?;
                    stage_device(changes, &device, 0, &events)?;
                    changes
                        .device_history
                        .extend(events.iter().map(|e| e.history(device_id)));
                    sequence += 1;
                }
            }
        }

        if invoice_type.is_sale() {
            for device_id in invoice.items().iter().filter_map(|l| l.device_id) {
                let mut device = load_device(&*self.store, device_id).await?;
                let loaded = device.version();
                let events = device.execute(&DeviceCommand::MarkSold {
                    invoice_id,
                    actor: principal.user_id,
                    occurred_at: now,
                })?;
                stage_device(changes, &device, loaded, &events)?;
                changes
                    .device_history
                    .extend(events.iter().map(|e| e.history(device_id)));
            }
        }
        Ok(())
    }

    pub async fn get(&self, id: InvoiceId) -> ServiceResult<Invoice> {
        load_invoice(&*self.store, id).await
    }

    pub async fn list(
        &self,
        filter: &InvoiceFilter,
        page: usize,
        limit: usize,
    ) -> ServiceResult<Page<Invoice>> {
        let all = self.store.list_invoices(filter).await?;
        Ok(Page::cut(all, page, limit))
    }

    /// Drafts, waiting invoices and the waiting sub-type.
    pub async fn waiting(&self) -> ServiceResult<Vec<Invoice>> {
        let filter = InvoiceFilter {
            waiting_only: true,
            ..InvoiceFilter::default()
        };
        Ok(self.store.list_invoices(&filter).await?)
    }

    pub async fn stats(&self) -> ServiceResult<InvoiceStats> {
        let all = self.store.list_invoices(&InvoiceFilter::default()).await?;
        Ok(InvoiceStats::compute(&all, Utc::now()))
    }

    #[instrument(skip(self, principal, notes), fields(invoice_id = %id, to = to.as_str()))]
    pub async fn transition(
        &self,
        principal: &Principal,
        id: InvoiceId,
        to: InvoiceStatus,
        notes: Option<String>,
    ) -> ServiceResult<Invoice> {
        let mut invoice = load_invoice(&*self.store, id).await?;
        let loaded = invoice.version();
        let from = invoice.status();
        let now = Utc::now();
        let events = invoice.execute(&InvoiceCommand::Transition {
            to,
            actor: principal.user_id,
            notes,
            occurred_at: now,
        })?;

        let mut changes = ChangeSet::new();
        stage_invoice(&mut changes, &invoice, loaded, &events, principal.role.as_str())?;
        if to == InvoiceStatus::Completed {
            changes.clear_reminders.push(id);
            self.stage_completion(principal, &invoice, now, &mut changes)
                .await?;
        }
        self.store.commit(changes).await?;

        info!(from = from.as_str(), "invoice status changed");
        let entry = AuditRecorder::entry(principal, "invoice_status_changed", AuditCategory::Invoice)
            .entity("invoice", id)
            .entity_name(invoice.invoice_number())
            .change(Some(json!({ "status": from })), Some(json!({ "status": to })));
        self.recorder.record(entry).await;
        Ok(invoice)
    }

    /// Draft or waiting straight to completed.
    pub async fn convert_to_active(
        &self,
        principal: &Principal,
        id: InvoiceId,
    ) -> ServiceResult<Invoice> {
        let invoice = load_invoice(&*self.store, id).await?;
        let status = invoice.status();
        if !matches!(status, InvoiceStatus::Draft | InvoiceStatus::Waiting) {
            return Err(DomainError::invalid_transition(status, InvoiceStatus::Completed).into());
        }
        self.transition(
            principal,
            id,
            InvoiceStatus::Completed,
            Some("converted to active".to_string()),
        )
        .await
    }

    /// Cancel now when the caller may bypass approvals, otherwise park a void
    /// request for the owner.
    pub async fn request_cancel(
        &self,
        principal: &Principal,
        id: InvoiceId,
        reason: &str,
    ) -> ServiceResult<CancelOutcome> {
        if reason.trim().is_empty() {
            return Err(ServiceError::MissingReason);
        }
        let invoice = load_invoice(&*self.store, id).await?;
        ensure_cancellable(&invoice)?;
        if can_bypass_approvals(principal) {
            let cancelled = self.cancel(principal, invoice, reason).await?;
            return Ok(CancelOutcome::Cancelled(cancelled));
        }
        let approval = self
            .approvals
            .request_invoice_void(principal, id, reason)
            .await?;
        Ok(CancelOutcome::PendingApproval(approval))
    }

    pub async fn cancel_now(
        &self,
        principal: &Principal,
        id: InvoiceId,
        reason: &str,
    ) -> ServiceResult<Invoice> {
        require_bypass(principal)?;
        if reason.trim().is_empty() {
            return Err(ServiceError::MissingReason);
        }
        let invoice = load_invoice(&*self.store, id).await?;
        ensure_cancellable(&invoice)?;
        self.cancel(principal, invoice, reason).await
    }

    async fn cancel(
        &self,
        principal: &Principal,
        mut invoice: Invoice,
        reason: &str,
    ) -> ServiceResult<Invoice> {
        let loaded = invoice.version();
        let events = invoice.execute(&InvoiceCommand::Cancel {
            reason: reason.trim().to_string(),
            actor: principal.user_id,
            occurred_at: Utc::now(),
        })?;
        let mut changes = ChangeSet::new();
        stage_invoice(&mut changes, &invoice, loaded, &events, principal.role.as_str())?;
        self.store.commit(changes).await?;

        info!(invoice_id = %invoice.id(), "invoice cancelled");
        let entry = AuditRecorder::entry(principal, "invoice_cancelled", AuditCategory::Invoice)
            .severity(Severity::Warning)
            .entity("invoice", invoice.id())
            .entity_name(invoice.invoice_number())
            .metadata(json!({ "reason": reason.trim(), "bypass": true }));
        self.recorder.record(entry).await;
        Ok(invoice)
    }

    pub async fn request_deletion(
        &self,
        principal: &Principal,
        id: InvoiceId,
        reason: &str,
    ) -> ServiceResult<Approval> {
        self.approvals
            .request_deletion(principal, EntityType::Invoice, &id.to_string(), reason)
            .await
    }

    /// Plain delete: only callers who may bypass approvals get through.
    pub async fn delete(
        &self,
        principal: &Principal,
        id: InvoiceId,
        reason: Option<String>,
    ) -> ServiceResult<Invoice> {
        if !can_bypass_approvals(principal) {
            return Err(ServiceError::DeletionRequiresApproval);
        }
        self.soft_delete(principal, id, reason).await
    }

    pub async fn force_delete(
        &self,
        principal: &Principal,
        id: InvoiceId,
        reason: Option<String>,
    ) -> ServiceResult<Invoice> {
        require_bypass(principal)?;
        self.soft_delete(principal, id, reason).await
    }

    async fn soft_delete(
        &self,
        principal: &Principal,
        id: InvoiceId,
        reason: Option<String>,
    ) -> ServiceResult<Invoice> {
        let mut invoice = load_invoice(&*self.store, id).await?;
        if invoice.status() == InvoiceStatus::Deleted {
            return Err(ServiceError::AlreadyDeleted);
        }
        let loaded = invoice.version();
        let events = invoice.execute(&InvoiceCommand::Delete {
            reason: reason.clone(),
            actor: principal.user_id,
            occurred_at: Utc::now(),
        })?;
        let mut changes = ChangeSet::new();
        stage_invoice(&mut changes, &invoice, loaded, &events, principal.role.as_str())?;
        self.store.commit(changes).await?;

        info!(invoice_id = %id, "invoice deleted");
        let entry = AuditRecorder::entry(principal, "invoice_deleted", AuditCategory::Invoice)
            .severity(Severity::Warning)
            .entity("invoice", id)
            .entity_name(invoice.invoice_number())
            .metadata(json!({ "reason": reason, "bypass": true }));
        self.recorder.record(entry).await;
        Ok(invoice)
    }

    pub async fn update(
        &self,
        principal: &Principal,
        id: InvoiceId,
        update: InvoiceUpdate,
    ) -> ServiceResult<Invoice> {
        let mut invoice = load_invoice(&*self.store, id).await?;
        let loaded = invoice.version();
        let before = money_snapshot(&invoice);
        let events = invoice.execute(&InvoiceCommand::Update {
            changes: update,
            actor: principal.user_id,
            occurred_at: Utc::now(),
        })?;
        let mut changes = ChangeSet::new();
        stage_invoice(&mut changes, &invoice, loaded, &events, principal.role.as_str())?;
        self.store.commit(changes).await?;

        let entry = AuditRecorder::entry(principal, "invoice_modified", AuditCategory::Invoice)
            .entity("invoice", id)
            .entity_name(invoice.invoice_number())
            .change(Some(before), Some(money_snapshot(&invoice)));
        self.recorder.record(entry).await;
        Ok(invoice)
    }

    pub async fn register_payment(
        &self,
        principal: &Principal,
        id: InvoiceId,
        amount: u64,
    ) -> ServiceResult<Invoice> {
        let mut invoice = load_invoice(&*self.store, id).await?;
        let loaded = invoice.version();
        let events = invoice.execute(&InvoiceCommand::RegisterPayment {
            amount,
            actor: principal.user_id,
            occurred_at: Utc::now(),
        })?;
        let mut changes = ChangeSet::new();
        stage_invoice(&mut changes, &invoice, loaded, &events, principal.role.as_str())?;
        self.store.commit(changes).await?;

        info!(invoice_id = %id, amount, remaining = invoice.remaining_amount(), "payment registered");
        let entry = AuditRecorder::entry(principal, "payment_registered", AuditCategory::Invoice)
            .entity("invoice", id)
            .entity_name(invoice.invoice_number())
            .metadata(json!({ "amount": amount, "paid_amount": invoice.paid_amount() }));
        self.recorder.record(entry).await;
        Ok(invoice)
    }

    pub async fn mark_audited(&self, principal: &Principal, id: InvoiceId) -> ServiceResult<Invoice> {
        self.mark(principal, id, InvoiceCommand::MarkAudited {
            actor: principal.user_id,
            occurred_at: Utc::now(),
        })
        .await
    }

    pub async fn mark_prepared(&self, principal: &Principal, id: InvoiceId) -> ServiceResult<Invoice> {
        self.mark(principal, id, InvoiceCommand::MarkPrepared {
            actor: principal.user_id,
            occurred_at: Utc::now(),
        })
        .await
    }

    async fn mark(
        &self,
        principal: &Principal,
        id: InvoiceId,
        command: InvoiceCommand,
    ) -> ServiceResult<Invoice> {
        let mut invoice = load_invoice(&*self.store, id).await?;
        let loaded = invoice.version();
        let events = invoice.execute(&command)?;
        let mut changes = ChangeSet::new();
        stage_invoice(&mut changes, &invoice, loaded, &events, principal.role.as_str())?;
        self.store.commit(changes).await?;
        Ok(invoice)
    }

    /// Follow-up reminder, by default a day from now.
    pub async fn remind(
        &self,
        principal: &Principal,
        id: InvoiceId,
        remind_at: Option<DateTime<Utc>>,
    ) -> ServiceResult<Reminder> {
        let invoice = load_invoice(&*self.store, id).await?;
        if invoice.status().is_dead() {
            return Err(DomainError::conflict(format!("invoice is {}", invoice.status())).into());
        }
        let reminder = Reminder::new(
            id,
            remind_at.unwrap_or_else(|| Utc::now() + Duration::hours(24)),
            principal.user_id,
        );
        let mut changes = ChangeSet::new();
        changes.reminders.push(reminder.clone());
        self.store.commit(changes).await?;
        Ok(reminder)
    }

    pub async fn reminders(&self, id: InvoiceId) -> ServiceResult<Vec<Reminder>> {
        load_invoice(&*self.store, id).await?;
        Ok(self.store.reminders(id).await?)
    }

    pub async fn workflow_log(&self, id: InvoiceId) -> ServiceResult<Vec<WorkflowLogEntry>> {
        load_invoice(&*self.store, id).await?;
        Ok(self.store.workflow_log(id).await?)
    }
}

fn ensure_cancellable(invoice: &Invoice) -> ServiceResult<()> {
    match invoice.status() {
        InvoiceStatus::Deleted => Err(ServiceError::AlreadyDeleted),
        s if s.is_cancelled() => Err(ServiceError::AlreadyCancelled),
        _ => Ok(()),
    }
}

fn require_bypass(principal: &Principal) -> ServiceResult<()> {
    if can_bypass_approvals(principal) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(Permission::BypassApprovals).into())
    }
}

fn money_snapshot(invoice: &Invoice) -> serde_json::Value {
    json!({
        "subtotal": invoice.subtotal(),
        "discount_amount": invoice.discount_amount(),
        "discount_percent": invoice.discount_percent(),
        "total": invoice.total(),
        "paid_amount": invoice.paid_amount(),
        "payment_method": invoice.payment_method(),
        "notes": invoice.notes(),
    })
}
