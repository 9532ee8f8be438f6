//! Storage boundary.
//!
//! Reads go through the per-concern traits; every multi-row write is one
//! [`ChangeSet`] handed to [`UnitOfWork::commit`], which applies it
//! all-or-nothing (one SQL transaction, or one write-lock section in memory).

pub mod filter;
pub mod in_memory;
pub mod postgres;

use std::collections::HashSet;
use std::hash::Hash;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use bierp_approvals::Approval;
use bierp_audit::{AuditEntry, AuditQuery};
use bierp_core::{
    AggregateRoot, ApprovalId, DeviceId, ExpectedVersion, InvoiceId, ProductId,
};
use bierp_events::{Event, EventEnvelope};
use bierp_inventory::{Device, DeviceHistoryEntry, ProductStock};
use bierp_invoicing::{Invoice, Reminder, WorkflowLogEntry};

use crate::error::StoreError;

pub use filter::{DeviceFilter, InvoiceFilter};
pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;

#[async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn get_invoice(&self, id: InvoiceId) -> Result<Option<Invoice>, StoreError>;

    /// Every invoice matching `filter`, newest first.
    async fn list_invoices(&self, filter: &InvoiceFilter) -> Result<Vec<Invoice>, StoreError>;

    async fn workflow_log(&self, id: InvoiceId) -> Result<Vec<WorkflowLogEntry>, StoreError>;

    async fn reminders(&self, id: InvoiceId) -> Result<Vec<Reminder>, StoreError>;
}

#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn get_device(&self, id: DeviceId) -> Result<Option<Device>, StoreError>;

    async fn find_device_by_serial(&self, serial: &str) -> Result<Option<Device>, StoreError>;

    async fn list_devices(&self, filter: &DeviceFilter) -> Result<Vec<Device>, StoreError>;

    async fn device_history(&self, id: DeviceId) -> Result<Vec<DeviceHistoryEntry>, StoreError>;

    /// Out-of-band history write, used when a row could not ride along with
    /// its state change.
    async fn append_device_history(&self, rows: &[DeviceHistoryEntry]) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ApprovalStore: Send + Sync {
    async fn get_approval(&self, id: ApprovalId) -> Result<Option<Approval>, StoreError>;

    /// All approvals, newest first.
    async fn list_approvals(&self) -> Result<Vec<Approval>, StoreError>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError>;

    /// One page of matching entries (newest first) plus the total match count.
    async fn search_audit(&self, query: &AuditQuery) -> Result<(Vec<AuditEntry>, usize), StoreError>;

    async fn audit_since(&self, since: DateTime<Utc>) -> Result<Vec<AuditEntry>, StoreError>;
}

#[async_trait]
pub trait StockStore: Send + Sync {
    async fn get_stock(&self, product_id: &ProductId) -> Result<Option<ProductStock>, StoreError>;

    async fn list_stock(&self) -> Result<Vec<ProductStock>, StoreError>;
}

#[async_trait]
pub trait SequenceStore: Send + Sync {
    /// Atomically reserve `count` consecutive values of the named counter and
    /// return the first one. Values are never handed out twice.
    async fn reserve(&self, name: &str, count: u64) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait UnitOfWork: Send + Sync {
    async fn commit(&self, changes: ChangeSet) -> Result<(), StoreError>;
}

/// The full storage surface the services run against.
pub trait Store:
    InvoiceStore + DeviceStore + ApprovalStore + AuditStore + StockStore + SequenceStore + UnitOfWork
{
}

impl<T> Store for T where
    T: InvoiceStore
        + DeviceStore
        + ApprovalStore
        + AuditStore
        + StockStore
        + SequenceStore
        + UnitOfWork
{
}

/// New state of an aggregate plus the version the writer loaded it at.
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    pub state: T,
    pub expected: ExpectedVersion,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StockChange {
    Adjust { product_id: ProductId, delta: i64 },
    Receive { product_id: ProductId, quantity: i64, unit_cost: u64 },
    Set { product_id: ProductId, quantity: i64 },
}

impl StockChange {
    pub fn apply_to(&self, stock: &mut ProductStock) {
        match self {
            StockChange::Adjust { delta, .. } => stock.adjust(*delta),
            StockChange::Receive {
                quantity,
                unit_cost,
                ..
            } => stock.receive(*quantity, *unit_cost),
            StockChange::Set { quantity, .. } => stock.quantity = *quantity,
        }
    }

    pub fn product_id(&self) -> &ProductId {
        match self {
            StockChange::Adjust { product_id, .. }
            | StockChange::Receive { product_id, .. }
            | StockChange::Set { product_id, .. } => product_id,
        }
    }
}

/// Everything one operation writes, committed as a unit.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub invoices: Vec<Versioned<Invoice>>,
    pub devices: Vec<Versioned<Device>>,
    pub approvals: Vec<Versioned<Approval>>,
    pub workflow: Vec<WorkflowLogEntry>,
    pub device_history: Vec<DeviceHistoryEntry>,
    pub reminders: Vec<Reminder>,
    pub clear_reminders: Vec<InvoiceId>,
    pub stock: Vec<StockChange>,
    pub journal: Vec<EventEnvelope<JsonValue>>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.invoices.is_empty()
            && self.devices.is_empty()
            && self.approvals.is_empty()
            && self.workflow.is_empty()
            && self.device_history.is_empty()
            && self.reminders.is_empty()
            && self.clear_reminders.is_empty()
            && self.stock.is_empty()
            && self.journal.is_empty()
    }

    /// Each record may appear once. Two staged copies of the same device
    /// would both pass the version check against stored state.
    pub fn ensure_distinct(&self) -> Result<(), StoreError> {
        first_repeat(self.invoices.iter().map(|v| v.state.id_typed()))
            .map_or(Ok(()), |id| Err(repeated("invoice", id)))?;
        first_repeat(self.devices.iter().map(|v| v.state.id_typed()))
            .map_or(Ok(()), |id| Err(repeated("device", id)))?;
        first_repeat(self.approvals.iter().map(|v| v.state.id_typed()))
            .map_or(Ok(()), |id| Err(repeated("approval", id)))
    }

    /// Stage an invoice that was loaded at `loaded_version` (0 = new).
    pub fn put_invoice(&mut self, state: Invoice, loaded_version: u64) {
        self.invoices.push(Versioned {
            state,
            expected: expected_from(loaded_version),
        });
    }

    pub fn put_device(&mut self, state: Device, loaded_version: u64) {
        self.devices.push(Versioned {
            state,
            expected: expected_from(loaded_version),
        });
    }

    pub fn put_approval(&mut self, state: Approval, loaded_version: u64) {
        self.approvals.push(Versioned {
            state,
            expected: expected_from(loaded_version),
        });
    }

    /// Journal the events that moved `aggregate` from `loaded_version` to its
    /// current version.
    pub fn record<A, E>(
        &mut self,
        aggregate: &A,
        record_kind: &str,
        loaded_version: u64,
        events: &[E],
    ) -> Result<(), StoreError>
    where
        A: AggregateRoot,
        A::Id: Into<Uuid> + Copy,
        E: Event + Serialize,
    {
        let id: Uuid = (*aggregate.id()).into();
        for (offset, event) in events.iter().enumerate() {
            let envelope =
                EventEnvelope::seal(id, record_kind, loaded_version + offset as u64 + 1, event)?;
            self.journal.push(envelope);
        }
        Ok(())
    }
}

fn first_repeat<K: Copy + Eq + Hash>(mut ids: impl Iterator<Item = K>) -> Option<K> {
    let mut seen = HashSet::new();
    ids.find(|id| !seen.insert(*id))
}

fn repeated(kind: &str, id: impl std::fmt::Display) -> StoreError {
    StoreError::Conflict(format!("{kind} {id} staged twice in one commit"))
}

fn expected_from(loaded_version: u64) -> ExpectedVersion {
    if loaded_version == 0 {
        ExpectedVersion::New
    } else {
        ExpectedVersion::Exact(loaded_version)
    }
}

/// Cut a one-based page out of an already ordered list.
pub fn paginate<T>(items: Vec<T>, page: usize, limit: usize) -> Vec<T> {
    let page = page.max(1);
    let limit = limit.max(1);
    let offset = (page - 1).saturating_mul(limit);
    items.into_iter().skip(offset).take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn far_pages_are_empty_instead_of_overflowing() {
        let items: Vec<u32> = (1..=10).collect();
        assert_eq!(paginate(items.clone(), 2, 4), vec![5, 6, 7, 8]);
        assert_eq!(paginate(items.clone(), 0, 0), vec![1]);
        assert!(paginate(items, usize::MAX, 500).is_empty());
    }

    #[test]
    fn one_record_staged_twice_is_a_conflict() {
        let approval = Approval::empty(ApprovalId::new());
        let mut changes = ChangeSet::new();
        changes.put_approval(approval.clone(), 0);
        assert!(changes.ensure_distinct().is_ok());

        changes.put_approval(approval, 0);
        assert!(matches!(changes.ensure_distinct(), Err(StoreError::Conflict(_))));
    }
}
