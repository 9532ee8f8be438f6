//! Approval ledger service: request, decide, expire, list.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use bierp_approvals::{
    Approval, ApprovalCommand, ApprovalStatus, ApprovalType, EntityType, Priority, RequestApproval,
    RequestData, format_approval_number, sort_pending,
};
use bierp_audit::{AuditCategory, AuditEntry, Severity};
use bierp_auth::Principal;
use bierp_core::{Aggregate, AggregateRoot, ApprovalId, DeviceId, InvoiceId, ProductId};
use bierp_events::{Notification, NotificationKind};
use bierp_inventory::DeviceCommand;
use bierp_invoicing::{InvoiceCommand, InvoiceStatus};

use super::devices::{load_device, stage_device};
use super::invoices::{load_invoice, stage_invoice};
use super::{AuditRecorder, Notifier, ServiceError, ServiceResult, ServiceSettings, publish};
use crate::error::StoreError;
use crate::store::{ChangeSet, StockChange, Store};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApprovalListFilter {
    /// `None` lists every status.
    pub status: Option<ApprovalStatus>,
    pub approval_type: Option<ApprovalType>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApprovalTypeInfo {
    #[serde(rename = "type")]
    pub approval_type: ApprovalType,
    pub label: &'static str,
}

#[derive(Clone)]
pub struct ApprovalService {
    store: Arc<dyn Store>,
    notifier: Arc<Notifier>,
    recorder: AuditRecorder,
    settings: ServiceSettings,
}

impl ApprovalService {
    pub fn new(
        store: Arc<dyn Store>,
        notifier: Arc<Notifier>,
        recorder: AuditRecorder,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            store,
            notifier,
            recorder,
            settings,
        }
    }

    pub fn types() -> Vec<ApprovalTypeInfo> {
        ApprovalType::ALL
            .into_iter()
            .map(|t| ApprovalTypeInfo {
                approval_type: t,
                label: t.label(),
            })
            .collect()
    }

    /// Park a deletion of an invoice or device until the owner decides.
    pub async fn request_deletion(
        &self,
        principal: &Principal,
        entity_type: EntityType,
        entity_id: &str,
        reason: &str,
    ) -> ServiceResult<Approval> {
        if reason.trim().is_empty() {
            return Err(ServiceError::MissingReason);
        }
        let (entity_id, entity_name) = match entity_type {
            EntityType::Invoice => {
                let invoice = load_invoice(&*self.store, entity_id.parse()?).await?;
                if invoice.status() == InvoiceStatus::Deleted {
                    return Err(ServiceError::AlreadyDeleted);
                }
                (invoice.id().to_string(), invoice.invoice_number().to_string())
            }
            EntityType::Device => {
                let device = load_device(&*self.store, entity_id.parse()?).await?;
                (device.id().to_string(), device.serial_number().to_string())
            }
            EntityType::Product => {
                return Err(ServiceError::validation(
                    "products are master data and cannot be deleted here",
                ));
            }
        };
        self.open(
            principal,
            entity_type,
            entity_id,
            Some(entity_name),
            reason,
            RequestData::Delete,
        )
        .await
    }

    pub async fn request_invoice_void(
        &self,
        principal: &Principal,
        invoice_id: InvoiceId,
        reason: &str,
    ) -> ServiceResult<Approval> {
        if reason.trim().is_empty() {
            return Err(ServiceError::MissingReason);
        }
        let invoice = load_invoice(&*self.store, invoice_id).await?;
        match invoice.status() {
            InvoiceStatus::Deleted => return Err(ServiceError::AlreadyDeleted),
            s if s.is_cancelled() => return Err(ServiceError::AlreadyCancelled),
            _ => {}
        }
        self.open(
            principal,
            EntityType::Invoice,
            invoice_id.to_string(),
            Some(invoice.invoice_number().to_string()),
            reason,
            RequestData::Void {
                reason: reason.trim().to_string(),
            },
        )
        .await
    }

    pub async fn request_quantity_correction(
        &self,
        principal: &Principal,
        product_id: ProductId,
        new_quantity: i64,
        reason: &str,
    ) -> ServiceResult<Approval> {
        if reason.trim().is_empty() {
            return Err(ServiceError::MissingReason);
        }
        let old_quantity = self
            .store
            .get_stock(&product_id)
            .await?
            .map(|s| s.quantity)
            .unwrap_or(0);
        self.open(
            principal,
            EntityType::Product,
            product_id.to_string(),
            None,
            reason,
            RequestData::quantity_correction(product_id, old_quantity, new_quantity),
        )
        .await
    }

    async fn open(
        &self,
        principal: &Principal,
        entity_type: EntityType,
        entity_id: String,
        entity_name: Option<String>,
        reason: &str,
        request_data: RequestData,
    ) -> ServiceResult<Approval> {
        let now = Utc::now();
        let id = ApprovalId::new();
        let suffix: u16 = rand::thread_rng().gen_range(0..10_000);
        let approval_type = request_data.approval_type();

        let mut approval = Approval::empty(id);
        let events = approval.execute(&ApprovalCommand::Request(RequestApproval {
            approval_id: id,
            approval_number: format_approval_number(now, suffix),
            entity_type,
            entity_id: entity_id.clone(),
            entity_name: entity_name.clone(),
            requested_by: principal.user_id,
            reason: reason.trim().to_string(),
            request_data,
            priority: Priority::High,
            expires_at: now + self.settings.approval_expiry,
            occurred_at: now,
        }))?;

        let mut changes = ChangeSet::new();
        changes.put_approval(approval.clone(), 0);
        changes.record(&approval, "approval", 0, &events)?;
        self.store.commit(changes).await?;

        info!(
            approval_id = %id,
            approval_number = approval.approval_number(),
            approval_type = approval_type.as_str(),
            entity_id = %entity_id,
            "approval requested"
        );
        publish(
            &self.notifier,
            Notification::new(
                NotificationKind::ApprovalRequested,
                id,
                format!("{}: {}", approval_type.label(), approval.approval_number()),
                json!({
                    "approval_number": approval.approval_number(),
                    "approval_type": approval_type,
                    "entity_type": entity_type,
                    "entity_id": entity_id,
                    "requested_by": principal.user_id,
                }),
            ),
        );

        let (event_type, severity) = match approval_type {
            ApprovalType::Deletion => ("delete_requested", Severity::Warning),
            ApprovalType::InvoiceVoid => ("invoice_void_requested", Severity::Warning),
            ApprovalType::QuantityCorrection => ("quantity_correction_requested", Severity::Info),
        };
        let mut entry = AuditRecorder::entry(principal, event_type, AuditCategory::Approval)
            .severity(severity)
            .entity(entity_type.as_str(), &entity_id)
            .metadata(json!({
                "approval_id": id,
                "approval_number": approval.approval_number(),
                "reason": approval.request_reason(),
            }));
        if let Some(name) = entity_name {
            entry = entry.entity_name(name);
        }
        self.recorder.record(entry).await;

        Ok(approval)
    }

    /// Approve and execute the parked action in the same commit.
    pub async fn approve(
        &self,
        principal: &Principal,
        id: ApprovalId,
        notes: Option<String>,
    ) -> ServiceResult<Approval> {
        if !principal.is_owner() {
            return Err(ServiceError::OwnerOnly);
        }
        let now = Utc::now();
        let mut approval = self.decidable(id, now).await?;
        let loaded = approval.version();

        let events = approval.execute(&ApprovalCommand::Approve {
            decider: principal.user_id,
            notes,
            occurred_at: now,
        })?;
        let mut changes = ChangeSet::new();
        changes.put_approval(approval.clone(), loaded);
        changes.record(&approval, "approval", loaded, &events)?;
        let executed = self.stage_action(principal, &approval, now, &mut changes).await?;
        self.store.commit(changes).await?;

        info!(
            approval_id = %id,
            approval_type = approval.approval_type().as_str(),
            entity_id = approval.entity_id(),
            "approval approved and executed"
        );
        self.decided(principal, &approval, "approval_approved").await;
        self.recorder.record(executed).await;
        Ok(approval)
    }

    pub async fn reject(
        &self,
        principal: &Principal,
        id: ApprovalId,
        reason: &str,
    ) -> ServiceResult<Approval> {
        if !principal.is_owner() {
            return Err(ServiceError::OwnerOnly);
        }
        if reason.trim().is_empty() {
            return Err(ServiceError::MissingReason);
        }
        let now = Utc::now();
        let mut approval = self.decidable(id, now).await?;
        let loaded = approval.version();

        let events = approval.execute(&ApprovalCommand::Reject {
            decider: principal.user_id,
            reason: reason.trim().to_string(),
            occurred_at: now,
        })?;
        let mut changes = ChangeSet::new();
        changes.put_approval(approval.clone(), loaded);
        changes.record(&approval, "approval", loaded, &events)?;
        self.store.commit(changes).await?;

        info!(approval_id = %id, "approval rejected");
        self.decided(principal, &approval, "approval_rejected").await;
        Ok(approval)
    }

    /// Pending and not yet expired; a stale request is marked expired on
    /// the way out.
    async fn decidable(&self, id: ApprovalId, now: DateTime<Utc>) -> ServiceResult<Approval> {
        let approval = self.load(id).await?;
        if approval.status() != ApprovalStatus::Pending {
            return Err(ServiceError::NotPending);
        }
        if approval.is_stale(now) {
            self.expire(approval, now).await?;
            return Err(ServiceError::ApprovalExpired);
        }
        Ok(approval)
    }

    async fn decided(&self, principal: &Principal, approval: &Approval, event_type: &str) {
        publish(
            &self.notifier,
            Notification::new(
                NotificationKind::ApprovalDecided,
                approval.id(),
                format!("{} {}", approval.approval_number(), approval.status().as_str()),
                json!({
                    "approval_number": approval.approval_number(),
                    "status": approval.status(),
                    "requested_by": approval.requested_by(),
                }),
            ),
        );
        let entry = AuditRecorder::entry(principal, event_type, AuditCategory::Approval)
            .entity("approval", approval.id())
            .entity_name(approval.approval_number())
            .metadata(json!({
                "approval_type": approval.approval_type(),
                "entity_type": approval.entity_type(),
                "entity_id": approval.entity_id(),
            }));
        self.recorder.record(entry).await;
    }

    /// Stage the approved action and describe it for the audit log.
    async fn stage_action(
        &self,
        principal: &Principal,
        approval: &Approval,
        now: DateTime<Utc>,
        changes: &mut ChangeSet,
    ) -> ServiceResult<AuditEntry> {
        let actor = principal.user_id;
        let role = principal.role.as_str();
        let reason = approval.request_reason().to_string();
        let meta = json!({ "approval_id": approval.id(), "reason": reason });

        match (approval.request_data(), approval.entity_type()) {
            (RequestData::Delete, EntityType::Invoice) => {
                let mut invoice = load_invoice(&*self.store, approval.entity_id().parse()?).await?;
                if invoice.status() == InvoiceStatus::Deleted {
                    return Err(ServiceError::AlreadyDeleted);
                }
                let loaded = invoice.version();
                let events = invoice.execute(&InvoiceCommand::Delete {
                    reason: Some(reason),
                    actor,
                    occurred_at: now,
                })?;
                stage_invoice(changes, &invoice, loaded, &events, role)?;
                Ok(AuditRecorder::entry(principal, "invoice_deleted", AuditCategory::Invoice)
                    .severity(Severity::Warning)
                    .entity("invoice", invoice.id())
                    .entity_name(invoice.invoice_number())
                    .metadata(meta))
            }
            (RequestData::Delete, EntityType::Device) => {
                let device_id: DeviceId = approval.entity_id().parse()?;
                let mut device = load_device(&*self.store, device_id).await?;
                let loaded = device.version();
                let events = device.execute(&DeviceCommand::Delete {
                    reason: Some(reason),
                    actor,
                    occurred_at: now,
                })?;
                stage_device(changes, &device, loaded, &events)?;
                changes
                    .device_history
                    .extend(events.iter().map(|e| e.history(device_id)));
                Ok(AuditRecorder::entry(principal, "device_deleted", AuditCategory::Inventory)
                    .severity(Severity::Warning)
                    .entity("device", device_id)
                    .entity_name(device.serial_number().to_string())
                    .metadata(meta))
            }
            (RequestData::Delete, EntityType::Product) => Err(ServiceError::validation(
                "products are master data and cannot be deleted here",
            )),
            (RequestData::Void { reason }, _) => {
                let mut invoice = load_invoice(&*self.store, approval.entity_id().parse()?).await?;
                match invoice.status() {
                    InvoiceStatus::Deleted => return Err(ServiceError::AlreadyDeleted),
                    s if s.is_cancelled() => return Err(ServiceError::AlreadyCancelled),
                    _ => {}
                }
                let loaded = invoice.version();
                let events = invoice.execute(&InvoiceCommand::Void {
                    reason: reason.clone(),
                    actor,
                    occurred_at: now,
                })?;
                stage_invoice(changes, &invoice, loaded, &events, role)?;
                Ok(AuditRecorder::entry(principal, "invoice_voided", AuditCategory::Invoice)
                    .severity(Severity::Warning)
                    .entity("invoice", invoice.id())
                    .entity_name(invoice.invoice_number())
                    .metadata(meta))
            }
            (
                RequestData::QuantityCorrection {
                    product_id,
                    old_quantity,
                    new_quantity,
                    difference,
                },
                _,
            ) => {
                changes.stock.push(StockChange::Set {
                    product_id: product_id.clone(),
                    quantity: *new_quantity,
                });
                Ok(
                    AuditRecorder::entry(principal, "quantity_manual_change", AuditCategory::Inventory)
                        .severity(Severity::Critical)
                        .entity("product", product_id)
                        .change(
                            Some(json!({ "quantity": old_quantity })),
                            Some(json!({ "quantity": new_quantity })),
                        )
                        .metadata(json!({
                            "approval_id": approval.id(),
                            "difference": difference,
                        })),
                )
            }
        }
    }

    async fn load(&self, id: ApprovalId) -> ServiceResult<Approval> {
        self.store
            .get_approval(id)
            .await?
            .ok_or(ServiceError::NotFound("approval"))
    }

    async fn expire(&self, mut approval: Approval, now: DateTime<Utc>) -> ServiceResult<Approval> {
        let loaded = approval.version();
        let events = approval.execute(&ApprovalCommand::Expire { occurred_at: now })?;
        let mut changes = ChangeSet::new();
        changes.put_approval(approval.clone(), loaded);
        changes.record(&approval, "approval", loaded, &events)?;
        match self.store.commit(changes).await {
            Ok(()) => {
                info!(approval_id = %approval.id(), "approval expired");
                Ok(approval)
            }
            // Another reader swept it first.
            Err(StoreError::Conflict(msg)) => {
                debug!(approval_id = %approval.id(), %msg, "approval already expired");
                self.load(*approval.id()).await
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Every approval, with stale pending requests swept to expired.
    async fn sweep(&self) -> ServiceResult<Vec<Approval>> {
        let now = Utc::now();
        let mut all = self.store.list_approvals().await?;
        for slot in all.iter_mut() {
            if slot.is_stale(now) {
                match self.expire(slot.clone(), now).await {
                    Ok(expired) => *slot = expired,
                    Err(err) => warn!(approval_id = %slot.id(), error = %err, "failed to expire approval"),
                }
            }
        }
        Ok(all)
    }

    pub async fn get(&self, id: ApprovalId) -> ServiceResult<Approval> {
        let approval = self.load(id).await?;
        let now = Utc::now();
        if approval.is_stale(now) {
            return self.expire(approval, now).await;
        }
        Ok(approval)
    }

    /// Newest first.
    pub async fn list(&self, filter: ApprovalListFilter) -> ServiceResult<Vec<Approval>> {
        Ok(self
            .sweep()
            .await?
            .into_iter()
            .filter(|a| filter.status.map_or(true, |s| a.status() == s))
            .filter(|a| filter.approval_type.map_or(true, |t| a.approval_type() == t))
            .collect())
    }

    /// Pending requests by priority, then oldest first.
    pub async fn pending(&self) -> ServiceResult<Vec<Approval>> {
        let mut pending = self
            .list(ApprovalListFilter {
                status: Some(ApprovalStatus::Pending),
                approval_type: None,
            })
            .await?;
        sort_pending(&mut pending);
        Ok(pending)
    }

    pub async fn my_requests(&self, principal: &Principal) -> ServiceResult<Vec<Approval>> {
        Ok(self
            .sweep()
            .await?
            .into_iter()
            .filter(|a| a.requested_by() == principal.user_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{NewInvoice, NewLine, ServiceSettings, Services};
    use crate::store::{InMemoryStore, StockStore};
    use bierp_auth::Role;
    use bierp_core::UserId;
    use bierp_events::EventBus;
    use bierp_invoicing::InvoiceType;

    fn owner() -> Principal {
        Principal::with_role(UserId::new(), Role::Owner)
    }

    fn manager() -> Principal {
        Principal::with_role(UserId::new(), Role::Manager)
    }

    fn sale() -> NewInvoice {
        NewInvoice::new(
            InvoiceType::Sale,
            vec![NewLine::new(ProductId::parse("P1").unwrap(), 1, 1000)],
        )
    }

    #[tokio::test]
    async fn only_the_owner_decides() {
        let (services, _store, _notifier) = Services::in_memory();
        let approval = services
            .approvals
            .request_quantity_correction(&manager(), ProductId::parse("P1").unwrap(), 4, "count")
            .await
            .unwrap();

        let err = services
            .approvals
            .approve(&Principal::with_role(UserId::new(), Role::Admin), *approval.id(), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "OWNER_ONLY");
    }

    #[tokio::test]
    async fn approving_a_quantity_correction_sets_stock() {
        let (services, store, _notifier) = Services::in_memory();
        let p1 = ProductId::parse("P1").unwrap();
        let approval = services
            .approvals
            .request_quantity_correction(&manager(), p1.clone(), 7, "recount")
            .await
            .unwrap();
        assert_eq!(approval.status(), ApprovalStatus::Pending);
        assert_eq!(approval.priority(), Priority::High);
        assert!(approval.approval_number().starts_with("APR-"));

        let approved = services
            .approvals
            .approve(&owner(), *approval.id(), Some("ok".into()))
            .await
            .unwrap();
        assert_eq!(approved.status(), ApprovalStatus::Approved);
        assert_eq!(store.get_stock(&p1).await.unwrap().unwrap().quantity, 7);

        let err = services
            .approvals
            .approve(&owner(), *approval.id(), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_PENDING");
    }

    #[tokio::test]
    async fn approving_a_void_voids_the_invoice() {
        let (services, _store, _notifier) = Services::in_memory();
        let invoice = services.invoices.create(&owner(), sale()).await.unwrap();
        let approval = services
            .approvals
            .request_invoice_void(&manager(), *invoice.id(), "typo")
            .await
            .unwrap();

        services
            .approvals
            .approve(&owner(), *approval.id(), None)
            .await
            .unwrap();
        let voided = services.invoices.get(*invoice.id()).await.unwrap();
        assert_eq!(voided.status(), InvoiceStatus::Voided);
        assert_eq!(voided.cancelled_reason(), Some("typo"));

        let err = services
            .approvals
            .request_invoice_void(&manager(), *invoice.id(), "again")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ALREADY_CANCELLED");
    }

    #[tokio::test]
    async fn rejection_needs_a_reason_and_leaves_the_entity_alone() {
        let (services, _store, _notifier) = Services::in_memory();
        let invoice = services.invoices.create(&owner(), sale()).await.unwrap();
        let approval = services
            .approvals
            .request_deletion(&manager(), EntityType::Invoice, &invoice.id().to_string(), "dup")
            .await
            .unwrap();

        let err = services
            .approvals
            .reject(&owner(), *approval.id(), "  ")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "MISSING_REASON");

        let rejected = services
            .approvals
            .reject(&owner(), *approval.id(), "not a duplicate")
            .await
            .unwrap();
        assert_eq!(rejected.status(), ApprovalStatus::Rejected);
        let untouched = services.invoices.get(*invoice.id()).await.unwrap();
        assert_eq!(untouched.status(), InvoiceStatus::Completed);
    }

    #[tokio::test]
    async fn stale_requests_expire_on_read_and_cannot_be_approved() {
        let store = Arc::new(InMemoryStore::new());
        let notifier = Arc::new(Notifier::new());
        let settings = ServiceSettings {
            approval_expiry: chrono::Duration::milliseconds(1),
        };
        let services = Services::new(store, notifier, settings);
        let approval = services
            .approvals
            .request_quantity_correction(&manager(), ProductId::parse("P1").unwrap(), 1, "x")
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let err = services
            .approvals
            .approve(&owner(), *approval.id(), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "APPROVAL_EXPIRED");
        let reloaded = services.approvals.get(*approval.id()).await.unwrap();
        assert_eq!(reloaded.status(), ApprovalStatus::Expired);
        assert!(services.approvals.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn requests_notify_and_show_up_in_my_requests() {
        let (services, _store, notifier) = Services::in_memory();
        let inbox = notifier.subscribe();
        let requester = manager();
        services
            .approvals
            .request_quantity_correction(&requester, ProductId::parse("P9").unwrap(), 2, "x")
            .await
            .unwrap();

        let kinds: Vec<_> = inbox.drain().into_iter().map(|n| n.kind).collect();
        assert!(kinds.contains(&NotificationKind::ApprovalRequested));
        assert_eq!(services.approvals.my_requests(&requester).await.unwrap().len(), 1);
        assert!(services.approvals.my_requests(&owner()).await.unwrap().is_empty());
    }

    #[test]
    fn type_metadata_lists_every_type() {
        let types = ApprovalService::types();
        assert_eq!(types.len(), ApprovalType::ALL.len());
    }
}
