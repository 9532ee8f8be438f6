//! Invoicing domain module.
//!
//! Business rules for the invoice lifecycle implemented purely as
//! deterministic domain logic (no IO, no HTTP, no storage). The infra layer
//! persists the resulting state and runs the cross-aggregate side effects
//! (devices, stock) in the same transaction.

pub mod invoice;
pub mod kinds;
pub mod line;
pub mod numbering;
pub mod workflow;

pub use invoice::{
    CreateInvoice, Invoice, InvoiceCommand, InvoiceCreated, InvoiceEvent, InvoiceUpdate,
    InvoiceUpdated, StatusChanged,
};
pub use kinds::{
    InvoiceStatus, InvoiceSubType, InvoiceType, PaymentMethod, PaymentStatus, StockDirection,
};
pub use line::{InvoiceLine, MAX_LINE_QUANTITY, Totals};
pub use numbering::{format_invoice_number, invoice_sequence_key};
pub use workflow::{Reminder, WorkflowLogEntry};
