use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use bierp_approvals::Approval;
use bierp_audit::{AuditEntry, AuditQuery};
use bierp_core::{AggregateRoot, ApprovalId, DeviceId, ExpectedVersion, InvoiceId, ProductId};
use bierp_events::EventEnvelope;
use bierp_inventory::{Device, DeviceHistoryEntry, ProductStock};
use bierp_invoicing::{Invoice, Reminder, WorkflowLogEntry};

use super::{
    ApprovalStore, AuditStore, ChangeSet, DeviceFilter, DeviceStore, InvoiceFilter, InvoiceStore,
    SequenceStore, StockStore, UnitOfWork,
};
use crate::error::StoreError;

#[derive(Debug, Default)]
struct State {
    invoices: HashMap<InvoiceId, Invoice>,
    devices: HashMap<DeviceId, Device>,
    approvals: HashMap<ApprovalId, Approval>,
    workflow: Vec<WorkflowLogEntry>,
    device_history: Vec<DeviceHistoryEntry>,
    reminders: Vec<Reminder>,
    stock: BTreeMap<ProductId, ProductStock>,
    sequences: HashMap<String, u64>,
    audit: Vec<AuditEntry>,
    journal: Vec<EventEnvelope<JsonValue>>,
}

/// In-memory store.
///
/// Intended for tests/dev and for running without `DATABASE_URL`. A commit
/// checks every expectation first and then applies the whole change set
/// under one write lock, so readers never observe half of it.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.state.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.state.write().map_err(|_| StoreError::Poisoned)
    }

    /// Every journaled event, in commit order.
    pub fn journal(&self) -> Result<Vec<EventEnvelope<JsonValue>>, StoreError> {
        Ok(self.read()?.journal.clone())
    }
}

fn check<T: AggregateRoot>(
    kind: &str,
    expected: ExpectedVersion,
    current: Option<&T>,
) -> Result<(), StoreError> {
    let actual = current.map(|c| c.version());
    if expected.matches(actual) {
        Ok(())
    } else {
        Err(StoreError::Conflict(format!(
            "{kind} changed concurrently (expected {expected:?}, found {actual:?})"
        )))
    }
}

impl State {
    fn validate(&self, changes: &ChangeSet) -> Result<(), StoreError> {
        changes.ensure_distinct()?;
        for v in &changes.invoices {
            let id = v.state.id_typed();
            check("invoice", v.expected, self.invoices.get(&id))?;
            if v.expected == ExpectedVersion::New
                && self
                    .invoices
                    .values()
                    .any(|i| i.invoice_number() == v.state.invoice_number())
            {
                return Err(StoreError::Conflict(format!(
                    "invoice number {} already taken",
                    v.state.invoice_number()
                )));
            }
        }
        for v in &changes.devices {
            let id = v.state.id_typed();
            check("device", v.expected, self.devices.get(&id))?;
            if v.expected == ExpectedVersion::New
                && self
                    .devices
                    .values()
                    .any(|d| d.serial_number() == v.state.serial_number())
            {
                return Err(StoreError::Conflict(format!(
                    "serial number {} already taken",
                    v.state.serial_number()
                )));
            }
        }
        for v in &changes.approvals {
            let id = v.state.id_typed();
            check("approval", v.expected, self.approvals.get(&id))?;
        }
        Ok(())
    }

    fn apply(&mut self, changes: ChangeSet) {
        for v in changes.invoices {
            self.invoices.insert(v.state.id_typed(), v.state);
        }
        for v in changes.devices {
            self.devices.insert(v.state.id_typed(), v.state);
        }
        for v in changes.approvals {
            self.approvals.insert(v.state.id_typed(), v.state);
        }
        self.workflow.extend(changes.workflow);
        self.device_history.extend(changes.device_history);
        self.reminders
            .retain(|r| !changes.clear_reminders.contains(&r.invoice_id));
        self.reminders.extend(changes.reminders);
        for change in changes.stock {
            let entry = self
                .stock
                .entry(change.product_id().clone())
                .or_insert_with(|| ProductStock::new(change.product_id().clone()));
            change.apply_to(entry);
        }
        self.journal.extend(changes.journal);
    }
}

#[async_trait]
impl InvoiceStore for InMemoryStore {
    async fn get_invoice(&self, id: InvoiceId) -> Result<Option<Invoice>, StoreError> {
        Ok(self.read()?.invoices.get(&id).cloned())
    }

    async fn list_invoices(&self, filter: &InvoiceFilter) -> Result<Vec<Invoice>, StoreError> {
        let state = self.read()?;
        let mut out: Vec<Invoice> = state
            .invoices
            .values()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(out)
    }

    async fn workflow_log(&self, id: InvoiceId) -> Result<Vec<WorkflowLogEntry>, StoreError> {
        Ok(self
            .read()?
            .workflow
            .iter()
            .filter(|w| w.invoice_id == id)
            .cloned()
            .collect())
    }

    async fn reminders(&self, id: InvoiceId) -> Result<Vec<Reminder>, StoreError> {
        Ok(self
            .read()?
            .reminders
            .iter()
            .filter(|r| r.invoice_id == id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DeviceStore for InMemoryStore {
    async fn get_device(&self, id: DeviceId) -> Result<Option<Device>, StoreError> {
        Ok(self.read()?.devices.get(&id).cloned())
    }

    async fn find_device_by_serial(&self, serial: &str) -> Result<Option<Device>, StoreError> {
        Ok(self
            .read()?
            .devices
            .values()
            .find(|d| d.serial_number().to_string() == serial)
            .cloned())
    }

    async fn list_devices(&self, filter: &DeviceFilter) -> Result<Vec<Device>, StoreError> {
        let state = self.read()?;
        let mut out: Vec<Device> = state
            .devices
            .values()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| b.serial_number().cmp(a.serial_number()))
        });
        Ok(out)
    }

    async fn device_history(&self, id: DeviceId) -> Result<Vec<DeviceHistoryEntry>, StoreError> {
        Ok(self
            .read()?
            .device_history
            .iter()
            .filter(|h| h.device_id == id)
            .cloned()
            .collect())
    }

    async fn append_device_history(&self, rows: &[DeviceHistoryEntry]) -> Result<(), StoreError> {
        self.write()?.device_history.extend_from_slice(rows);
        Ok(())
    }
}

#[async_trait]
impl ApprovalStore for InMemoryStore {
    async fn get_approval(&self, id: ApprovalId) -> Result<Option<Approval>, StoreError> {
        Ok(self.read()?.approvals.get(&id).cloned())
    }

    async fn list_approvals(&self) -> Result<Vec<Approval>, StoreError> {
        let mut out: Vec<Approval> = self.read()?.approvals.values().cloned().collect();
        out.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(out)
    }
}

#[async_trait]
impl AuditStore for InMemoryStore {
    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        self.write()?.audit.push(entry.clone());
        Ok(())
    }

    async fn search_audit(&self, query: &AuditQuery) -> Result<(Vec<AuditEntry>, usize), StoreError> {
        Ok(query.run(self.read()?.audit.iter()))
    }

    async fn audit_since(&self, since: DateTime<Utc>) -> Result<Vec<AuditEntry>, StoreError> {
        Ok(self
            .read()?
            .audit
            .iter()
            .filter(|e| e.created_at >= since)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl StockStore for InMemoryStore {
    async fn get_stock(&self, product_id: &ProductId) -> Result<Option<ProductStock>, StoreError> {
        Ok(self.read()?.stock.get(product_id).cloned())
    }

    async fn list_stock(&self) -> Result<Vec<ProductStock>, StoreError> {
        Ok(self.read()?.stock.values().cloned().collect())
    }
}

#[async_trait]
impl SequenceStore for InMemoryStore {
    async fn reserve(&self, name: &str, count: u64) -> Result<u64, StoreError> {
        let mut state = self.write()?;
        let value = state.sequences.entry(name.to_string()).or_insert(0);
        let first = *value + 1;
        *value += count;
        Ok(first)
    }
}

#[async_trait]
impl UnitOfWork for InMemoryStore {
    async fn commit(&self, changes: ChangeSet) -> Result<(), StoreError> {
        if changes.is_empty() {
            return Ok(());
        }
        let mut state = self.write()?;
        state.validate(&changes)?;
        state.apply(changes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StockChange;
    use bierp_core::{Aggregate, UserId, WarehouseId};
    use bierp_inventory::{DeviceCommand, RegisterDevice, SerialNumber};

    fn registered(sequence: u64) -> Device {
        let id = DeviceId::new();
        let mut device = Device::empty(id);
        device
            .execute(&DeviceCommand::Register(RegisterDevice {
                device_id: id,
                serial_number: SerialNumber::new(2025, sequence),
                product_id: ProductId::parse("P1").unwrap(),
                warehouse_id: WarehouseId::inspection(),
                purchase_cost: 100,
                purchase_invoice_id: None,
                actor: UserId::new(),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        device
    }

    #[tokio::test]
    async fn sequences_hand_out_disjoint_ranges() {
        let store = InMemoryStore::new();
        assert_eq!(store.reserve("serial:2025", 3).await.unwrap(), 1);
        assert_eq!(store.reserve("serial:2025", 1).await.unwrap(), 4);
        assert_eq!(store.reserve("serial:2026", 1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn stale_version_rejects_the_whole_change_set() {
        let store = InMemoryStore::new();
        let device = registered(1);
        let mut first = ChangeSet::new();
        first.put_device(device.clone(), 0);
        store.commit(first).await.unwrap();

        // A second writer that still believes the device is new.
        let mut second = ChangeSet::new();
        second.put_device(device.clone(), 0);
        second.stock.push(StockChange::Adjust {
            product_id: ProductId::parse("P1").unwrap(),
            delta: 5,
        });
        let err = store.commit(second).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(store.list_stock().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_serials_are_rejected() {
        let store = InMemoryStore::new();
        let mut changes = ChangeSet::new();
        changes.put_device(registered(7), 0);
        store.commit(changes).await.unwrap();

        let mut again = ChangeSet::new();
        again.put_device(registered(7), 0);
        assert!(matches!(
            store.commit(again).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn same_device_twice_in_one_commit_is_a_conflict() {
        let store = InMemoryStore::new();
        let device = registered(3);
        let mut changes = ChangeSet::new();
        changes.put_device(device.clone(), 0);
        store.commit(changes).await.unwrap();

        let mut twice = ChangeSet::new();
        twice.put_device(device.clone(), 1);
        twice.put_device(device.clone(), 1);
        twice.stock.push(StockChange::Adjust {
            product_id: ProductId::parse("P1").unwrap(),
            delta: -2,
        });
        let err = store.commit(twice).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(msg) if msg.contains("staged twice")));
        assert!(store.list_stock().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stock_changes_accumulate() {
        let store = InMemoryStore::new();
        let p1 = ProductId::parse("P1").unwrap();
        let mut changes = ChangeSet::new();
        changes.stock.push(StockChange::Receive {
            product_id: p1.clone(),
            quantity: 3,
            unit_cost: 900,
        });
        changes.stock.push(StockChange::Adjust {
            product_id: p1.clone(),
            delta: -1,
        });
        store.commit(changes).await.unwrap();

        let stock = store.get_stock(&p1).await.unwrap().unwrap();
        assert_eq!(stock.quantity, 2);
        assert_eq!(stock.last_purchase_cost, Some(900));
    }
}
