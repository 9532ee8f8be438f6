//! Identifiers, errors and lifecycle traits shared by every domain crate.
//! Nothing in here performs IO.

pub mod aggregate;
pub mod error;
pub mod id;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use id::{
    ApprovalId, AuditEntryId, CustomerId, DeviceId, InvoiceId, ProductId, SupplierId, UserId,
    WarehouseId,
};
