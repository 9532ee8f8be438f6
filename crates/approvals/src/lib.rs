//! Approval ledger domain module.
//!
//! Destructive operations (deletion, invoice void, manual quantity
//! correction) are parked here as pending requests until the owner decides.
//! Executing the approved action is the infra layer's job; this crate only
//! owns the request lifecycle.

pub mod approval;
pub mod kinds;

pub use approval::{Approval, ApprovalCommand, ApprovalEvent, RequestApproval, sort_pending};
pub use kinds::{
    ApprovalStatus, ApprovalType, EntityType, Priority, RequestData, format_approval_number,
};
