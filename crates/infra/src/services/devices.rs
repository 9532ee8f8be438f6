//! Serial-numbered device lifecycle service.

use std::sync::Arc;

use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument, warn};

use bierp_approvals::{Approval, EntityType};
use bierp_audit::AuditCategory;
use bierp_auth::Principal;
use bierp_core::{Aggregate, AggregateRoot, DeviceId, InvoiceId, ProductId, WarehouseId};
use bierp_events::{Notification, NotificationKind};
use bierp_inventory::{
    Device, DeviceCommand, DeviceEvent, DeviceHistoryEntry, InspectionResult, RegisterDevice,
    SerialNumber, serial_sequence_key,
};

use super::{
    ApprovalService, AuditRecorder, Notifier, Page, ServiceError, ServiceResult, publish,
};
use crate::store::{ChangeSet, DeviceFilter, Store};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDevice {
    pub product_id: ProductId,
    /// Defaults to the inspection area.
    pub warehouse_id: Option<WarehouseId>,
    pub purchase_cost: u64,
    pub purchase_invoice_id: Option<InvoiceId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrepareStep {
    Start,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustodyAction {
    Take,
    Release,
}

/// Live device or `NotFound`; soft-deleted units count as missing.
pub(crate) async fn load_device(store: &dyn Store, id: DeviceId) -> ServiceResult<Device> {
    match store.get_device(id).await? {
        Some(device) if !device.is_deleted() => Ok(device),
        _ => Err(ServiceError::NotFound("device")),
    }
}

/// Stage the device row and its journal events. History rows are left to the
/// caller.
pub(crate) fn stage_device(
    changes: &mut ChangeSet,
    device: &Device,
    loaded_version: u64,
    events: &[DeviceEvent],
) -> ServiceResult<()> {
    changes.put_device(device.clone(), loaded_version);
    changes.record(device, "device", loaded_version, events)?;
    Ok(())
}

#[derive(Clone)]
pub struct DeviceService {
    store: Arc<dyn Store>,
    notifier: Arc<Notifier>,
    recorder: AuditRecorder,
    approvals: ApprovalService,
}

impl DeviceService {
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

    pub async fn list(
        &self,
        filter: &DeviceFilter,
        page: usize,
        limit: usize,
    ) -> ServiceResult<Page<Device>> {
        let all = self.store.list_devices(filter).await?;
        Ok(Page::cut(all, page, limit))
    }

    pub async fn get(&self, id: DeviceId) -> ServiceResult<Device> {
        load_device(&*self.store, id).await
    }

    /// Lookup by printed serial, e.g. from a barcode scanner.
    pub async fn scan(&self, serial: &str) -> ServiceResult<Device> {
        match self.store.find_device_by_serial(serial.trim()).await? {
            Some(device) if !device.is_deleted() => Ok(device),
            _ => Err(ServiceError::NotFound("device")),
        }
    }

    pub async fn history(&self, id: DeviceId) -> ServiceResult<Vec<DeviceHistoryEntry>> {
        load_device(&*self.store, id).await?;
        Ok(self.store.device_history(id).await?)
    }

    /// Manual registration outside a purchase invoice.
    #[instrument(skip(self, principal, new), fields(product_id = %new.product_id))]
    pub async fn create(&self, principal: &Principal, new: NewDevice) -> ServiceResult<Device> {
        let now = Utc::now();
        let year = now.year();
        let sequence = self.store.reserve(&serial_sequence_key(year), 1).await?;
        let device_id = DeviceId::new();
        let mut device = Device::empty(device_id);
        let events = device.execute(&DeviceCommand::Register(RegisterDevice {
            device_id,
            serial_number: SerialNumber::new(year, sequence),
            product_id: new.product_id,
            warehouse_id: new.warehouse_id.unwrap_or_else(WarehouseId::inspection),
            purchase_cost: new.purchase_cost,
            purchase_invoice_id: new.purchase_invoice_id,
            actor: principal.user_id,
            occurred_at: now,
        }))?;
        self.commit(principal, &device, 0, &events, "device_created")
            .await?;
        info!(device_id = %device_id, serial = %device.serial_number(), "device registered");
        Ok(device)
    }

    pub async fn inspect(
        &self,
        principal: &Principal,
        id: DeviceId,
        result: InspectionResult,
        notes: Option<String>,
    ) -> ServiceResult<Device> {
        let device = self
            .run(principal, id, "device_inspected", DeviceCommand::Inspect {
                result,
                notes,
                actor: principal.user_id,
                occurred_at: Utc::now(),
            })
            .await?;
        if result.is_pass() {
            publish(
                &self.notifier,
                Notification::new(
                    NotificationKind::InspectionComplete,
                    id,
                    format!("device {} passed inspection", device.serial_number()),
                    json!({
                        "serial_number": device.serial_number(),
                        "result": result,
                        "inspector": principal.user_id,
                    }),
                ),
            );
        }
        Ok(device)
    }

    pub async fn prepare(
        &self,
        principal: &Principal,
        id: DeviceId,
        step: PrepareStep,
        notes: Option<String>,
    ) -> ServiceResult<Device> {
        let actor = principal.user_id;
        let occurred_at = Utc::now();
        let command = match step {
            PrepareStep::Start => DeviceCommand::StartPreparation {
                notes,
                actor,
                occurred_at,
            },
            PrepareStep::Complete => DeviceCommand::CompletePreparation {
                notes,
                actor,
                occurred_at,
            },
        };
        self.run(principal, id, "device_prepared", command).await
    }

    /// Last write wins: taking a held device replaces the holder.
    pub async fn custody(
        &self,
        principal: &Principal,
        id: DeviceId,
        action: CustodyAction,
        reason: Option<String>,
    ) -> ServiceResult<Device> {
        let actor = principal.user_id;
        let occurred_at = Utc::now();
        let command = match action {
            CustodyAction::Take => DeviceCommand::TakeCustody {
                reason,
                actor,
                occurred_at,
            },
            CustodyAction::Release => DeviceCommand::ReleaseCustody {
                reason,
                actor,
                occurred_at,
            },
        };
        self.run(principal, id, "device_custody_changed", command)
            .await
    }

    pub async fn transfer(
        &self,
        principal: &Principal,
        id: DeviceId,
        warehouse_id: Option<WarehouseId>,
        reason: Option<String>,
    ) -> ServiceResult<Device> {
        let warehouse_id = warehouse_id.ok_or(ServiceError::MissingFields("warehouse_id"))?;
        self.run(principal, id, "device_transferred", DeviceCommand::Transfer {
            warehouse_id,
            reason,
            actor: principal.user_id,
            occurred_at: Utc::now(),
        })
        .await
    }

    pub async fn mark_sold(
        &self,
        principal: &Principal,
        id: DeviceId,
        invoice_id: Option<InvoiceId>,
    ) -> ServiceResult<Device> {
        let invoice_id = invoice_id.ok_or(ServiceError::MissingFields("invoice_id"))?;
        self.run(principal, id, "device_sold", DeviceCommand::MarkSold {
            invoice_id,
            actor: principal.user_id,
            occurred_at: Utc::now(),
        })
        .await
    }

    pub async fn request_deletion(
        &self,
        principal: &Principal,
        id: DeviceId,
        reason: &str,
    ) -> ServiceResult<Approval> {
        self.approvals
            .request_deletion(principal, EntityType::Device, &id.to_string(), reason)
            .await
    }

    /// Devices are only ever removed through an approved deletion request.
    pub async fn delete(&self, _principal: &Principal, _id: DeviceId) -> ServiceResult<Device> {
        Err(ServiceError::DeletionRequiresApproval)
    }

    async fn run(
        &self,
        principal: &Principal,
        id: DeviceId,
        event_type: &str,
        command: DeviceCommand,
    ) -> ServiceResult<Device> {
        let mut device = load_device(&*self.store, id).await?;
        let loaded = device.version();
        let from = device.status();
        let events = device.execute(&command)?;
        self.commit(principal, &device, loaded, &events, event_type)
            .await?;
        info!(
            device_id = %id,
            from = from.as_str(),
            to = device.status().as_str(),
            event_type,
            "device updated"
        );
        Ok(device)
    }

    /// Commit the device, then write history and audit best-effort.
    async fn commit(
        &self,
        principal: &Principal,
        device: &Device,
        loaded_version: u64,
        events: &[DeviceEvent],
        event_type: &str,
    ) -> ServiceResult<()> {
        let mut changes = ChangeSet::new();
        stage_device(&mut changes, device, loaded_version, events)?;
        self.store.commit(changes).await?;

        let device_id = *device.id();
        let history: Vec<_> = events.iter().map(|e| e.history(device_id)).collect();
        if let Err(err) = self.store.append_device_history(&history).await {
            warn!(device_id = %device_id, error = %err, "failed to write device history");
        }

        let details: Vec<_> = history.iter().map(|h| h.details.as_str()).collect();
        let entry = AuditRecorder::entry(principal, event_type, AuditCategory::Inventory)
            .entity("device", device_id)
            .entity_name(device.serial_number().to_string())
            .metadata(json!({
                "status": device.status(),
                "warehouse_id": device.warehouse_id(),
                "details": details,
            }));
        self.recorder.record(entry).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::Services;
    use bierp_approvals::ApprovalStatus;
    use bierp_auth::Role;
    use bierp_core::UserId;
    use bierp_events::EventBus;
    use bierp_inventory::DeviceStatus;

    fn principal(role: Role) -> Principal {
        Principal::with_role(UserId::new(), role)
    }

    fn new_device() -> NewDevice {
        NewDevice {
            product_id: ProductId::parse("P1").unwrap(),
            warehouse_id: None,
            purchase_cost: 700,
            purchase_invoice_id: None,
        }
    }

    #[tokio::test]
    async fn inspection_then_preparation_moves_to_main() {
        let (services, _store, notifier) = Services::in_memory();
        let inbox = notifier.subscribe();
        let keeper = principal(Role::WarehouseKeeper);
        let device = services.devices.create(&keeper, new_device()).await.unwrap();
        assert_eq!(device.warehouse_id(), &WarehouseId::inspection());
        let id = *device.id();

        let inspected = services
            .devices
            .inspect(&principal(Role::Inspector), id, InspectionResult::PassWithNotes, None)
            .await
            .unwrap();
        assert_eq!(inspected.status(), DeviceStatus::ReadyForPrep);
        assert!(
            inbox
                .drain()
                .iter()
                .any(|n| n.kind == NotificationKind::InspectionComplete)
        );

        let preparer = principal(Role::Preparer);
        services
            .devices
            .prepare(&preparer, id, PrepareStep::Start, None)
            .await
            .unwrap();
        let ready = services
            .devices
            .prepare(&preparer, id, PrepareStep::Complete, Some("cleaned".into()))
            .await
            .unwrap();
        assert_eq!(ready.status(), DeviceStatus::ReadyToSell);
        assert_eq!(ready.warehouse_id(), &WarehouseId::main());

        let history = services.devices.history(id).await.unwrap();
        assert_eq!(history.len(), 4);
    }

    #[tokio::test]
    async fn failed_inspection_is_defective_and_cannot_be_prepared() {
        let (services, _store, _notifier) = Services::in_memory();
        let owner = principal(Role::Owner);
        let device = services.devices.create(&owner, new_device()).await.unwrap();
        let id = *device.id();

        let defective = services
            .devices
            .inspect(&owner, id, InspectionResult::Fail, Some("cracked".into()))
            .await
            .unwrap();
        assert_eq!(defective.status(), DeviceStatus::Defective);

        let err = services
            .devices
            .prepare(&owner, id, PrepareStep::Start, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_TRANSITION");
    }

    #[tokio::test]
    async fn second_custody_take_overwrites_the_first() {
        let (services, _store, _notifier) = Services::in_memory();
        let a = principal(Role::Delivery);
        let b = principal(Role::Delivery);
        let device = services.devices.create(&a, new_device()).await.unwrap();
        let id = *device.id();

        services
            .devices
            .custody(&a, id, CustodyAction::Take, None)
            .await
            .unwrap();
        let held = services
            .devices
            .custody(&b, id, CustodyAction::Take, Some("delivery".into()))
            .await
            .unwrap();
        assert_eq!(held.custody_employee_id(), Some(b.user_id));

        let released = services
            .devices
            .custody(&b, id, CustodyAction::Release, None)
            .await
            .unwrap();
        assert_eq!(released.custody_employee_id(), None);
    }

    #[tokio::test]
    async fn transfer_requires_a_warehouse() {
        let (services, _store, _notifier) = Services::in_memory();
        let owner = principal(Role::Owner);
        let device = services.devices.create(&owner, new_device()).await.unwrap();

        let err = services
            .devices
            .transfer(&owner, *device.id(), None, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "MISSING_FIELDS");

        let moved = services
            .devices
            .transfer(&owner, *device.id(), Some(WarehouseId::parse("branch-2").unwrap()), None)
            .await
            .unwrap();
        assert_eq!(moved.warehouse_id().as_str(), "branch-2");
        assert_eq!(moved.status(), DeviceStatus::New);
    }

    #[tokio::test]
    async fn scan_finds_by_serial_and_missing_is_not_found() {
        let (services, _store, _notifier) = Services::in_memory();
        let owner = principal(Role::Owner);
        let device = services.devices.create(&owner, new_device()).await.unwrap();

        let found = services
            .devices
            .scan(&device.serial_number().to_string())
            .await
            .unwrap();
        assert_eq!(found.id(), device.id());
        let err = services.devices.scan("BI-1999-000001").await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
        let err = services.devices.get(DeviceId::new()).await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn deletion_goes_through_the_owner() {
        let (services, _store, _notifier) = Services::in_memory();
        let keeper = principal(Role::WarehouseKeeper);
        let owner = principal(Role::Owner);
        let device = services.devices.create(&keeper, new_device()).await.unwrap();
        let id = *device.id();

        let err = services.devices.delete(&owner, id).await.unwrap_err();
        assert_eq!(err.code(), "DELETION_REQUIRES_APPROVAL");

        let approval = services
            .devices
            .request_deletion(&keeper, id, "scrapped")
            .await
            .unwrap();
        assert_eq!(approval.status(), ApprovalStatus::Pending);
        services
            .approvals
            .approve(&owner, *approval.id(), None)
            .await
            .unwrap();

        let err = services.devices.get(id).await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }
}
