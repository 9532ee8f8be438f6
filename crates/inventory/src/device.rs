use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use bierp_core::{
    Aggregate, AggregateRoot, DeviceId, DomainError, InvoiceId, ProductId, UserId, WarehouseId,
};
use bierp_events::Event;

use crate::serial::SerialNumber;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    New,
    Inspection,
    ReadyForPrep,
    Preparing,
    ReadyToSell,
    Defective,
    ReturnToSupplier,
    Sold,
}

impl DeviceStatus {
    pub const ALL: [DeviceStatus; 8] = [
        DeviceStatus::New,
        DeviceStatus::Inspection,
        DeviceStatus::ReadyForPrep,
        DeviceStatus::Preparing,
        DeviceStatus::ReadyToSell,
        DeviceStatus::Defective,
        DeviceStatus::ReturnToSupplier,
        DeviceStatus::Sold,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::New => "new",
            DeviceStatus::Inspection => "inspection",
            DeviceStatus::ReadyForPrep => "ready_for_prep",
            DeviceStatus::Preparing => "preparing",
            DeviceStatus::ReadyToSell => "ready_to_sell",
            DeviceStatus::Defective => "defective",
            DeviceStatus::ReturnToSupplier => "return_to_supplier",
            DeviceStatus::Sold => "sold",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }
}

impl core::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InspectionResult {
    Pass,
    PassWithNotes,
    Fail,
    ReturnToSupplier,
}

impl InspectionResult {
    pub fn outcome(&self) -> DeviceStatus {
        match self {
            InspectionResult::Pass | InspectionResult::PassWithNotes => DeviceStatus::ReadyForPrep,
            InspectionResult::Fail => DeviceStatus::Defective,
            InspectionResult::ReturnToSupplier => DeviceStatus::ReturnToSupplier,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InspectionResult::Pass => "pass",
            InspectionResult::PassWithNotes => "pass_with_notes",
            InspectionResult::Fail => "fail",
            InspectionResult::ReturnToSupplier => "return_to_supplier",
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, InspectionResult::Pass | InspectionResult::PassWithNotes)
    }
}

/// Aggregate root: Device (one serial-numbered physical unit).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    id: DeviceId,
    serial_number: SerialNumber,
    product_id: ProductId,
    status: DeviceStatus,
    warehouse_id: WarehouseId,
    purchase_cost: u64,
    purchase_invoice_id: Option<InvoiceId>,
    sale_invoice_id: Option<InvoiceId>,
    sale_date: Option<DateTime<Utc>>,
    custody_employee_id: Option<UserId>,
    custody_date: Option<DateTime<Utc>>,
    inspection_result: Option<InspectionResult>,
    inspection_notes: Option<String>,
    inspected_by: Option<UserId>,
    inspected_at: Option<DateTime<Utc>>,
    prep_employee_id: Option<UserId>,
    prep_started_at: Option<DateTime<Utc>>,
    prep_completed_at: Option<DateTime<Utc>>,
    prep_notes: Option<String>,
    deleted: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: u64,
}

impl Device {
    /// Not-yet-registered instance; `Register` is the only command it accepts.
    pub fn empty(id: DeviceId) -> Self {
        Self {
            id,
            serial_number: SerialNumber::new(0, 0),
            product_id: ProductId::default(),
            status: DeviceStatus::New,
            warehouse_id: WarehouseId::inspection(),
            purchase_cost: 0,
            purchase_invoice_id: None,
            sale_invoice_id: None,
            sale_date: None,
            custody_employee_id: None,
            custody_date: None,
            inspection_result: None,
            inspection_notes: None,
            inspected_by: None,
            inspected_at: None,
            prep_employee_id: None,
            prep_started_at: None,
            prep_completed_at: None,
            prep_notes: None,
            deleted: false,
            created_at: DateTime::<Utc>::default(),
            updated_at: DateTime::<Utc>::default(),
            version: 0,
        }
    }

    pub fn exists(&self) -> bool {
        self.version > 0
    }

    pub fn id_typed(&self) -> DeviceId {
        self.id
    }

    pub fn serial_number(&self) -> &SerialNumber {
        &self.serial_number
    }

    pub fn product_id(&self) -> &ProductId {
        &self.product_id
    }

    pub fn status(&self) -> DeviceStatus {
        self.status
    }

    pub fn warehouse_id(&self) -> &WarehouseId {
        &self.warehouse_id
    }

    pub fn purchase_cost(&self) -> u64 {
        self.purchase_cost
    }

    pub fn purchase_invoice_id(&self) -> Option<InvoiceId> {
        self.purchase_invoice_id
    }

    pub fn sale_invoice_id(&self) -> Option<InvoiceId> {
        self.sale_invoice_id
    }

    pub fn custody_employee_id(&self) -> Option<UserId> {
        self.custody_employee_id
    }

    pub fn inspection_result(&self) -> Option<InspectionResult> {
        self.inspection_result
    }

    pub fn prep_employee_id(&self) -> Option<UserId> {
        self.prep_employee_id
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl AggregateRoot for Device {
    type Id = DeviceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterDevice (purchase receipt or manual entry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterDevice {
    pub device_id: DeviceId,
    pub serial_number: SerialNumber,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub purchase_cost: u64,
    pub purchase_invoice_id: Option<InvoiceId>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceCommand {
    Register(RegisterDevice),
    Inspect {
        result: InspectionResult,
        notes: Option<String>,
        actor: UserId,
        occurred_at: DateTime<Utc>,
    },
    StartPreparation {
        notes: Option<String>,
        actor: UserId,
        occurred_at: DateTime<Utc>,
    },
    CompletePreparation {
        notes: Option<String>,
        actor: UserId,
        occurred_at: DateTime<Utc>,
    },
    TakeCustody {
        reason: Option<String>,
        actor: UserId,
        occurred_at: DateTime<Utc>,
    },
    ReleaseCustody {
        reason: Option<String>,
        actor: UserId,
        occurred_at: DateTime<Utc>,
    },
    Transfer {
        warehouse_id: WarehouseId,
        reason: Option<String>,
        actor: UserId,
        occurred_at: DateTime<Utc>,
    },
    MarkSold {
        invoice_id: InvoiceId,
        actor: UserId,
        occurred_at: DateTime<Utc>,
    },
    Delete {
        reason: Option<String>,
        actor: UserId,
        occurred_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceEvent {
    Registered(RegisterDevice),
    Inspected {
        result: InspectionResult,
        from: DeviceStatus,
        to: DeviceStatus,
        notes: Option<String>,
        actor: UserId,
        occurred_at: DateTime<Utc>,
    },
    PreparationStarted {
        notes: Option<String>,
        actor: UserId,
        occurred_at: DateTime<Utc>,
    },
    PreparationCompleted {
        notes: Option<String>,
        actor: UserId,
        occurred_at: DateTime<Utc>,
    },
    CustodyTaken {
        previous: Option<UserId>,
        reason: Option<String>,
        actor: UserId,
        occurred_at: DateTime<Utc>,
    },
    CustodyReleased {
        previous: Option<UserId>,
        reason: Option<String>,
        actor: UserId,
        occurred_at: DateTime<Utc>,
    },
    Transferred {
        from_warehouse: WarehouseId,
        to_warehouse: WarehouseId,
        reason: Option<String>,
        actor: UserId,
        occurred_at: DateTime<Utc>,
    },
    Sold {
        from: DeviceStatus,
        invoice_id: InvoiceId,
        actor: UserId,
        occurred_at: DateTime<Utc>,
    },
    Deleted {
        reason: Option<String>,
        actor: UserId,
        occurred_at: DateTime<Utc>,
    },
}

/// Append-only lifecycle row kept per device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceHistoryEntry {
    pub device_id: DeviceId,
    pub action: String,
    pub from_status: Option<DeviceStatus>,
    pub to_status: Option<DeviceStatus>,
    pub details: String,
    pub performed_by: UserId,
    pub created_at: DateTime<Utc>,
}

impl DeviceEvent {
    pub fn actor(&self) -> UserId {
        match self {
            DeviceEvent::Registered(e) => e.actor,
            DeviceEvent::Inspected { actor, .. }
            | DeviceEvent::PreparationStarted { actor, .. }
            | DeviceEvent::PreparationCompleted { actor, .. }
            | DeviceEvent::CustodyTaken { actor, .. }
            | DeviceEvent::CustodyReleased { actor, .. }
            | DeviceEvent::Transferred { actor, .. }
            | DeviceEvent::Sold { actor, .. }
            | DeviceEvent::Deleted { actor, .. } => *actor,
        }
    }

    /// History row describing this event.
    pub fn history(&self, device_id: DeviceId) -> DeviceHistoryEntry {
        use DeviceStatus as S;
        let (action, from, to, details) = match self {
            DeviceEvent::Registered(e) => (
                "created",
                None,
                Some(S::New),
                format!("serial {} in {}", e.serial_number, e.warehouse_id),
            ),
            DeviceEvent::Inspected {
                result,
                from,
                to,
                notes,
                ..
            } => (
                "inspection",
                Some(*from),
                Some(*to),
                with_note(format!("result {}", result.as_str()), notes),
            ),
            DeviceEvent::PreparationStarted { notes, .. } => (
                "preparation_started",
                Some(S::ReadyForPrep),
                Some(S::Preparing),
                with_note(String::new(), notes),
            ),
            DeviceEvent::PreparationCompleted { notes, .. } => (
                "preparation_completed",
                Some(S::Preparing),
                Some(S::ReadyToSell),
                with_note(String::new(), notes),
            ),
            DeviceEvent::CustodyTaken {
                previous, reason, ..
            } => (
                "custody_taken",
                None,
                None,
                with_note(
                    previous
                        .map(|p| format!("replaces holder {p}"))
                        .unwrap_or_default(),
                    reason,
                ),
            ),
            DeviceEvent::CustodyReleased { reason, .. } => {
                ("custody_released", None, None, with_note(String::new(), reason))
            }
            DeviceEvent::Transferred {
                from_warehouse,
                to_warehouse,
                reason,
                ..
            } => (
                "transfer",
                None,
                None,
                with_note(format!("{from_warehouse} -> {to_warehouse}"), reason),
            ),
            DeviceEvent::Sold {
                from, invoice_id, ..
            } => (
                "sold",
                Some(*from),
                Some(S::Sold),
                format!("invoice {invoice_id}"),
            ),
            DeviceEvent::Deleted { reason, .. } => {
                ("deleted", None, None, with_note(String::new(), reason))
            }
        };
        DeviceHistoryEntry {
            device_id,
            action: action.to_string(),
            from_status: from,
            to_status: to,
            details,
            performed_by: self.actor(),
            created_at: self.occurred_at(),
        }
    }
}

fn with_note(base: String, note: &Option<String>) -> String {
    match (base.is_empty(), note.as_deref()) {
        (_, None) | (_, Some("")) => base,
        (true, Some(n)) => n.to_string(),
        (false, Some(n)) => format!("{base}: {n}"),
    }
}

impl Event for DeviceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DeviceEvent::Registered(_) => "inventory.device.registered",
            DeviceEvent::Inspected { .. } => "inventory.device.inspected",
            DeviceEvent::PreparationStarted { .. } => "inventory.device.preparation_started",
            DeviceEvent::PreparationCompleted { .. } => "inventory.device.preparation_completed",
            DeviceEvent::CustodyTaken { .. } => "inventory.device.custody_taken",
            DeviceEvent::CustodyReleased { .. } => "inventory.device.custody_released",
            DeviceEvent::Transferred { .. } => "inventory.device.transferred",
            DeviceEvent::Sold { .. } => "inventory.device.sold",
            DeviceEvent::Deleted { .. } => "inventory.device.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            DeviceEvent::Registered(e) => e.occurred_at,
            DeviceEvent::Inspected { occurred_at, .. }
            | DeviceEvent::PreparationStarted { occurred_at, .. }
            | DeviceEvent::PreparationCompleted { occurred_at, .. }
            | DeviceEvent::CustodyTaken { occurred_at, .. }
            | DeviceEvent::CustodyReleased { occurred_at, .. }
            | DeviceEvent::Transferred { occurred_at, .. }
            | DeviceEvent::Sold { occurred_at, .. }
            | DeviceEvent::Deleted { occurred_at, .. } => *occurred_at,
        }
    }
}

impl Aggregate for Device {
    type Command = DeviceCommand;
    type Event = DeviceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            DeviceEvent::Registered(e) => {
                self.id = e.device_id;
                self.serial_number = e.serial_number.clone();
                self.product_id = e.product_id.clone();
                self.status = DeviceStatus::New;
                self.warehouse_id = e.warehouse_id.clone();
                self.purchase_cost = e.purchase_cost;
                self.purchase_invoice_id = e.purchase_invoice_id;
                self.created_at = e.occurred_at;
            }
            DeviceEvent::Inspected {
                result,
                to,
                notes,
                actor,
                occurred_at,
                ..
            } => {
                self.status = *to;
                self.inspection_result = Some(*result);
                self.inspection_notes = notes.clone();
                self.inspected_by = Some(*actor);
                self.inspected_at = Some(*occurred_at);
            }
            DeviceEvent::PreparationStarted {
                actor, occurred_at, ..
            } => {
                self.status = DeviceStatus::Preparing;
                self.prep_employee_id = Some(*actor);
                self.prep_started_at = Some(*occurred_at);
            }
            DeviceEvent::PreparationCompleted {
                notes, occurred_at, ..
            } => {
                self.status = DeviceStatus::ReadyToSell;
                self.warehouse_id = WarehouseId::main();
                self.prep_completed_at = Some(*occurred_at);
                self.prep_notes = notes.clone();
            }
            DeviceEvent::CustodyTaken {
                actor, occurred_at, ..
            } => {
                self.custody_employee_id = Some(*actor);
                self.custody_date = Some(*occurred_at);
            }
            DeviceEvent::CustodyReleased { .. } => {
                self.custody_employee_id = None;
                self.custody_date = None;
            }
            DeviceEvent::Transferred { to_warehouse, .. } => {
                self.warehouse_id = to_warehouse.clone();
            }
            DeviceEvent::Sold {
                invoice_id,
                occurred_at,
                ..
            } => {
                self.status = DeviceStatus::Sold;
                self.sale_invoice_id = Some(*invoice_id);
                self.sale_date = Some(*occurred_at);
                self.custody_employee_id = None;
                self.custody_date = None;
            }
            DeviceEvent::Deleted { .. } => {
                self.deleted = true;
            }
        }

        self.updated_at = event.occurred_at();
        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        if let DeviceCommand::Register(cmd) = command {
            if self.exists() {
                return Err(DomainError::conflict("device already exists"));
            }
            return Ok(vec![DeviceEvent::Registered(cmd.clone())]);
        }
        if !self.exists() || self.deleted {
            return Err(DomainError::not_found());
        }

        let event = match command {
            DeviceCommand::Register(_) => {
                return Err(DomainError::conflict("device already exists"));
            }
            DeviceCommand::Inspect {
                result,
                notes,
                actor,
                occurred_at,
            } => {
                self.require(&[DeviceStatus::New, DeviceStatus::Inspection], result.outcome())?;
                DeviceEvent::Inspected {
                    result: *result,
                    from: self.status,
                    to: result.outcome(),
                    notes: notes.clone(),
                    actor: *actor,
                    occurred_at: *occurred_at,
                }
            }
            DeviceCommand::StartPreparation {
                notes,
                actor,
                occurred_at,
            } => {
                self.require(&[DeviceStatus::ReadyForPrep], DeviceStatus::Preparing)?;
                DeviceEvent::PreparationStarted {
                    notes: notes.clone(),
                    actor: *actor,
                    occurred_at: *occurred_at,
                }
            }
            DeviceCommand::CompletePreparation {
                notes,
                actor,
                occurred_at,
            } => {
                self.require(&[DeviceStatus::Preparing], DeviceStatus::ReadyToSell)?;
                DeviceEvent::PreparationCompleted {
                    notes: notes.clone(),
                    actor: *actor,
                    occurred_at: *occurred_at,
                }
            }
            DeviceCommand::TakeCustody {
                reason,
                actor,
                occurred_at,
            } => {
                self.ensure_not_sold()?;
                // Last write wins: a second take silently replaces the holder.
                DeviceEvent::CustodyTaken {
                    previous: self.custody_employee_id,
                    reason: reason.clone(),
                    actor: *actor,
                    occurred_at: *occurred_at,
                }
            }
            DeviceCommand::ReleaseCustody {
                reason,
                actor,
                occurred_at,
            } => {
                self.ensure_not_sold()?;
                DeviceEvent::CustodyReleased {
                    previous: self.custody_employee_id,
                    reason: reason.clone(),
                    actor: *actor,
                    occurred_at: *occurred_at,
                }
            }
            DeviceCommand::Transfer {
                warehouse_id,
                reason,
                actor,
                occurred_at,
            } => DeviceEvent::Transferred {
                from_warehouse: self.warehouse_id.clone(),
                to_warehouse: warehouse_id.clone(),
                reason: reason.clone(),
                actor: *actor,
                occurred_at: *occurred_at,
            },
            DeviceCommand::MarkSold {
                invoice_id,
                actor,
                occurred_at,
            } => {
                self.ensure_not_sold()?;
                DeviceEvent::Sold {
                    from: self.status,
                    invoice_id: *invoice_id,
                    actor: *actor,
                    occurred_at: *occurred_at,
                }
            }
            DeviceCommand::Delete {
                reason,
                actor,
                occurred_at,
            } => DeviceEvent::Deleted {
                reason: reason.clone(),
                actor: *actor,
                occurred_at: *occurred_at,
            },
        };
        Ok(vec![event])
    }
}

impl Device {
    fn require(&self, allowed: &[DeviceStatus], to: DeviceStatus) -> Result<(), DomainError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(DomainError::invalid_transition(self.status, to))
        }
    }

    fn ensure_not_sold(&self) -> Result<(), DomainError> {
        if self.status == DeviceStatus::Sold {
            return Err(DomainError::conflict("device is already sold"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn registered() -> Device {
        let device_id = DeviceId::new();
        let mut device = Device::empty(device_id);
        device
            .execute(&DeviceCommand::Register(RegisterDevice {
                device_id,
                serial_number: SerialNumber::new(2025, 1),
                product_id: ProductId::parse("P1").unwrap(),
                warehouse_id: WarehouseId::inspection(),
                purchase_cost: 1000,
                purchase_invoice_id: Some(InvoiceId::new()),
                actor: UserId::new(),
                occurred_at: now(),
            }))
            .unwrap();
        device
    }

    fn inspect(result: InspectionResult) -> DeviceCommand {
        DeviceCommand::Inspect {
            result,
            notes: Some("ok".into()),
            actor: UserId::new(),
            occurred_at: now(),
        }
    }

    fn prep(start: bool) -> DeviceCommand {
        let (notes, actor, occurred_at) = (None, UserId::new(), now());
        if start {
            DeviceCommand::StartPreparation {
                notes,
                actor,
                occurred_at,
            }
        } else {
            DeviceCommand::CompletePreparation {
                notes,
                actor,
                occurred_at,
            }
        }
    }

    fn take(actor: UserId) -> DeviceCommand {
        DeviceCommand::TakeCustody {
            reason: None,
            actor,
            occurred_at: now(),
        }
    }

    #[test]
    fn inspection_outcomes() {
        for (result, expected) in [
            (InspectionResult::Pass, DeviceStatus::ReadyForPrep),
            (InspectionResult::PassWithNotes, DeviceStatus::ReadyForPrep),
            (InspectionResult::Fail, DeviceStatus::Defective),
            (InspectionResult::ReturnToSupplier, DeviceStatus::ReturnToSupplier),
        ] {
            let mut device = registered();
            device.execute(&inspect(result)).unwrap();
            assert_eq!(device.status(), expected);
            assert_eq!(device.inspection_result(), Some(result));
        }
    }

    #[test]
    fn inspection_only_from_new_or_inspection() {
        let mut device = registered();
        device.execute(&inspect(InspectionResult::Pass)).unwrap();
        let err = device.handle(&inspect(InspectionResult::Fail)).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
    }

    #[test]
    fn preparation_flow_moves_device_to_main_warehouse() {
        let mut device = registered();
        assert!(device.handle(&prep(true)).is_err());
        device.execute(&inspect(InspectionResult::Pass)).unwrap();
        assert!(device.handle(&prep(false)).is_err());
        device.execute(&prep(true)).unwrap();
        assert_eq!(device.status(), DeviceStatus::Preparing);
        assert!(device.prep_employee_id().is_some());
        device.execute(&prep(false)).unwrap();
        assert_eq!(device.status(), DeviceStatus::ReadyToSell);
        assert_eq!(device.warehouse_id(), &WarehouseId::main());
    }

    #[test]
    fn second_custody_take_overwrites_the_first() {
        let (a, b) = (UserId::new(), UserId::new());
        let mut device = registered();
        device.execute(&take(a)).unwrap();
        let events = device.execute(&take(b)).unwrap();
        assert_eq!(device.custody_employee_id(), Some(b));
        assert!(matches!(&events[0], DeviceEvent::CustodyTaken { previous: Some(p), .. } if *p == a));

        device
            .execute(&DeviceCommand::ReleaseCustody {
                reason: None,
                actor: b,
                occurred_at: now(),
            })
            .unwrap();
        assert_eq!(device.custody_employee_id(), None);
    }

    #[test]
    fn sold_device_rejects_custody_and_second_sale() {
        let mut device = registered();
        let invoice_id = InvoiceId::new();
        device
            .execute(&DeviceCommand::MarkSold {
                invoice_id,
                actor: UserId::new(),
                occurred_at: now(),
            })
            .unwrap();
        assert_eq!(device.status(), DeviceStatus::Sold);
        assert_eq!(device.sale_invoice_id(), Some(invoice_id));
        assert!(device.handle(&take(UserId::new())).is_err());
    }

    #[test]
    fn deleted_device_behaves_as_missing() {
        let mut device = registered();
        device
            .execute(&DeviceCommand::Delete {
                reason: Some("dup".into()),
                actor: UserId::new(),
                occurred_at: now(),
            })
            .unwrap();
        assert!(device.is_deleted());
        assert_eq!(device.handle(&take(UserId::new())).unwrap_err(), DomainError::NotFound);
    }

    #[test]
    fn history_rows_carry_status_change() {
        let mut device = registered();
        let events = device.execute(&inspect(InspectionResult::Fail)).unwrap();
        let row = events[0].history(device.id_typed());
        assert_eq!(row.action, "inspection");
        assert_eq!(row.from_status, Some(DeviceStatus::New));
        assert_eq!(row.to_status, Some(DeviceStatus::Defective));
        assert!(row.details.ends_with("ok"));
    }
}
