//! Append-only invoice workflow log and follow-up reminders.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use bierp_core::{InvoiceId, UserId};
use bierp_events::Event;

use crate::invoice::InvoiceEvent;
use crate::kinds::InvoiceStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowLogEntry {
    pub invoice_id: InvoiceId,
    pub from_status: Option<InvoiceStatus>,
    pub to_status: InvoiceStatus,
    pub action: String,
    pub notes: Option<String>,
    pub actor_id: UserId,
    pub actor_role: String,
    pub created_at: DateTime<Utc>,
}

impl WorkflowLogEntry {
    /// Workflow row for an event, when it belongs in the log.
    ///
    /// Status changes, audit and preparation marks are logged; creation is
    /// logged only for invoices that start in draft.
    pub fn from_event(
        invoice_id: InvoiceId,
        current: InvoiceStatus,
        event: &InvoiceEvent,
        actor_role: &str,
    ) -> Option<Self> {
        let (from_status, to_status, notes, actor_id) = match event {
            InvoiceEvent::Created(e) if e.status == InvoiceStatus::Draft => {
                (None, e.status, e.notes.clone(), e.created_by)
            }
            InvoiceEvent::Audited { actor, .. } | InvoiceEvent::Prepared { actor, .. } => {
                (Some(current), current, None, *actor)
            }
            other => {
                let change = other.status_change()?;
                (Some(change.from), change.to, change.notes.clone(), change.actor)
            }
        };
        Some(Self {
            invoice_id,
            from_status,
            to_status,
            action: event.action().to_string(),
            notes,
            actor_id,
            actor_role: actor_role.to_string(),
            created_at: event.occurred_at(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: Uuid,
    pub invoice_id: InvoiceId,
    pub remind_at: DateTime<Utc>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

impl Reminder {
    pub fn new(invoice_id: InvoiceId, remind_at: DateTime<Utc>, created_by: UserId) -> Self {
        Self {
            id: Uuid::now_v7(),
            invoice_id,
            remind_at,
            created_by,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::StatusChanged;

    #[test]
    fn status_changes_become_log_rows() {
        let actor = UserId::new();
        let event = InvoiceEvent::Transitioned(StatusChanged {
            from: InvoiceStatus::Draft,
            to: InvoiceStatus::PendingAudit,
            actor,
            notes: Some("prices filled".into()),
            occurred_at: Utc::now(),
        });
        let row = WorkflowLogEntry::from_event(InvoiceId::new(), InvoiceStatus::Draft, &event, "manager")
            .unwrap();
        assert_eq!(row.from_status, Some(InvoiceStatus::Draft));
        assert_eq!(row.to_status, InvoiceStatus::PendingAudit);
        assert_eq!(row.action, "transition");
        assert_eq!(row.actor_id, actor);
    }

    #[test]
    fn payments_are_not_workflow_rows() {
        let event = InvoiceEvent::PaymentRegistered {
            amount: 10,
            new_paid_amount: 10,
            actor: UserId::new(),
            occurred_at: Utc::now(),
        };
        assert!(
            WorkflowLogEntry::from_event(InvoiceId::new(), InvoiceStatus::Completed, &event, "x")
                .is_none()
        );
    }
}
