//! Notifications fanned out to downstream consumers (owner alerts, task
//! distribution) after a state change commits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    InvoiceCreated,
    InvoiceWaitingPrices,
    InspectionComplete,
    ApprovalRequested,
    ApprovalDecided,
    CriticalAuditEvent,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::InvoiceCreated => "invoice_created",
            NotificationKind::InvoiceWaitingPrices => "invoice_waiting_prices",
            NotificationKind::InspectionComplete => "inspection_complete",
            NotificationKind::ApprovalRequested => "approval_requested",
            NotificationKind::ApprovalDecided => "approval_decided",
            NotificationKind::CriticalAuditEvent => "critical_audit_event",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    /// Id of the record the notification is about.
    pub entity_id: String,
    pub message: String,
    pub data: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        kind: NotificationKind,
        entity_id: impl ToString,
        message: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            entity_id: entity_id.to_string(),
            message: message.into(),
            data,
            occurred_at: Utc::now(),
        }
    }
}
