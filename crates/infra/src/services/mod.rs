//! Application services.
//!
//! Each service loads aggregates through the store traits, runs the pure
//! domain command, and hands every resulting row to one [`ChangeSet`]
//! commit. Audit entries and notifications follow the commit and are
//! best-effort.
//!
//! [`ChangeSet`]: crate::store::ChangeSet

pub mod approvals;
pub mod audit;
pub mod devices;
pub mod error;
pub mod invoices;
pub mod reports;

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use bierp_events::{EventBus, InMemoryEventBus, Notification};

use crate::store::Store;

pub use approvals::{ApprovalListFilter, ApprovalService, ApprovalTypeInfo};
pub use audit::{AuditRecorder, AuditService};
pub use devices::{CustodyAction, DeviceService, NewDevice, PrepareStep};
pub use error::ServiceError;
pub use invoices::{CancelOutcome, InvoiceService, InvoiceStats, NewInvoice, NewLine};
pub use reports::{
    CashFlow, EmployeeSales, MethodFlow, Period, ProductProfit, Profitability, ReportKind,
    ReportService,
};

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Owner-facing notification fan-out.
pub type Notifier = InMemoryEventBus<Notification>;

/// One page of a list plus the total match count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
}

impl<T> Page<T> {
    pub fn cut(all: Vec<T>, page: usize, limit: usize) -> Self {
        let page = page.max(1);
        let limit = limit.max(1);
        let total = all.len();
        Self {
            items: crate::store::paginate(all, page, limit),
            total,
            page,
            limit,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ServiceSettings {
    /// Lifetime of a pending approval request.
    pub approval_expiry: chrono::Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            approval_expiry: chrono::Duration::hours(24),
        }
    }
}

pub(crate) fn publish(notifier: &Notifier, notification: Notification) {
    let kind = notification.kind.as_str();
    if let Err(err) = notifier.publish(notification) {
        warn!(kind, error = ?err, "failed to publish notification");
    }
}

/// Every service, wired against one store and one notifier.
#[derive(Clone)]
pub struct Services {
    pub invoices: InvoiceService,
    pub devices: DeviceService,
    pub approvals: ApprovalService,
    pub audit: AuditService,
    pub reports: ReportService,
}

impl Services {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<Notifier>, settings: ServiceSettings) -> Self {
        let recorder = AuditRecorder::new(store.clone(), notifier.clone());
        let approvals = ApprovalService::new(
            store.clone(),
            notifier.clone(),
            recorder.clone(),
            settings,
        );
        Self {
            invoices: InvoiceService::new(
                store.clone(),
                notifier.clone(),
                recorder.clone(),
                approvals.clone(),
            ),
            devices: DeviceService::new(
                store.clone(),
                notifier,
                recorder.clone(),
                approvals.clone(),
            ),
            approvals,
            audit: AuditService::new(store.clone(), recorder.clone()),
            reports: ReportService::new(store, recorder),
        }
    }

    /// Everything over a fresh in-memory store (tests and dev runs).
    pub fn in_memory() -> (Self, Arc<crate::store::InMemoryStore>, Arc<Notifier>) {
        let store = Arc::new(crate::store::InMemoryStore::new());
        let notifier = Arc::new(Notifier::new());
        let services = Self::new(store.clone(), notifier.clone(), ServiceSettings::default());
        (services, store, notifier)
    }
}
