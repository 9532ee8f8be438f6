use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use bierp_core::{Aggregate, AggregateRoot, ApprovalId, DomainError, UserId};
use bierp_events::Event;

use crate::kinds::{ApprovalStatus, ApprovalType, EntityType, Priority, RequestData};

/// Aggregate root: Approval request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    id: ApprovalId,
    approval_number: String,
    approval_type: ApprovalType,
    entity_type: EntityType,
    entity_id: String,
    entity_name: Option<String>,
    requested_by: UserId,
    request_reason: String,
    request_data: RequestData,
    priority: Priority,
    status: ApprovalStatus,
    expires_at: DateTime<Utc>,
    decided_by: Option<UserId>,
    decision_notes: Option<String>,
    decided_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    version: u64,
}

impl Approval {
    pub fn empty(id: ApprovalId) -> Self {
        Self {
            id,
            approval_number: String::new(),
            approval_type: ApprovalType::Deletion,
            entity_type: EntityType::Invoice,
            entity_id: String::new(),
            entity_name: None,
            requested_by: UserId::from_uuid(Uuid::nil()),
            request_reason: String::new(),
            request_data: RequestData::Delete,
            priority: Priority::default(),
            status: ApprovalStatus::Pending,
            expires_at: DateTime::<Utc>::default(),
            decided_by: None,
            decision_notes: None,
            decided_at: None,
            created_at: DateTime::<Utc>::default(),
            version: 0,
        }
    }

    pub fn exists(&self) -> bool {
        self.version > 0
    }

    pub fn id_typed(&self) -> ApprovalId {
        self.id
    }

    pub fn approval_number(&self) -> &str {
        &self.approval_number
    }

    pub fn approval_type(&self) -> ApprovalType {
        self.approval_type
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn requested_by(&self) -> UserId {
        self.requested_by
    }

    pub fn request_reason(&self) -> &str {
        &self.request_reason
    }

    pub fn request_data(&self) -> &RequestData {
        &self.request_data
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn status(&self) -> ApprovalStatus {
        self.status
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn decided_by(&self) -> Option<UserId> {
        self.decided_by
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Pending but past its expiry time.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.status == ApprovalStatus::Pending && now >= self.expires_at
    }
}

impl AggregateRoot for Approval {
    type Id = ApprovalId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RequestApproval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestApproval {
    pub approval_id: ApprovalId,
    pub approval_number: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub entity_name: Option<String>,
    pub requested_by: UserId,
    pub reason: String,
    pub request_data: RequestData,
    pub priority: Priority,
    pub expires_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalCommand {
    Request(RequestApproval),
    Approve {
        decider: UserId,
        notes: Option<String>,
        occurred_at: DateTime<Utc>,
    },
    Reject {
        decider: UserId,
        reason: String,
        occurred_at: DateTime<Utc>,
    },
    Expire {
        occurred_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalEvent {
    Requested(RequestApproval),
    Approved {
        decider: UserId,
        notes: Option<String>,
        occurred_at: DateTime<Utc>,
    },
    Rejected {
        decider: UserId,
        reason: String,
        occurred_at: DateTime<Utc>,
    },
    Expired {
        occurred_at: DateTime<Utc>,
    },
}

impl Event for ApprovalEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ApprovalEvent::Requested(_) => "approvals.approval.requested",
            ApprovalEvent::Approved { .. } => "approvals.approval.approved",
            ApprovalEvent::Rejected { .. } => "approvals.approval.rejected",
            ApprovalEvent::Expired { .. } => "approvals.approval.expired",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ApprovalEvent::Requested(e) => e.occurred_at,
            ApprovalEvent::Approved { occurred_at, .. }
            | ApprovalEvent::Rejected { occurred_at, .. }
            | ApprovalEvent::Expired { occurred_at } => *occurred_at,
        }
    }
}

impl Aggregate for Approval {
    type Command = ApprovalCommand;
    type Event = ApprovalEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ApprovalEvent::Requested(e) => {
                self.id = e.approval_id;
                self.approval_number = e.approval_number.clone();
                self.approval_type = e.request_data.approval_type();
                self.entity_type = e.entity_type;
                self.entity_id = e.entity_id.clone();
                self.entity_name = e.entity_name.clone();
                self.requested_by = e.requested_by;
                self.request_reason = e.reason.clone();
                self.request_data = e.request_data.clone();
                self.priority = e.priority;
                self.status = ApprovalStatus::Pending;
                self.expires_at = e.expires_at;
                self.created_at = e.occurred_at;
            }
            ApprovalEvent::Approved {
                decider,
                notes,
                occurred_at,
            } => {
                self.status = ApprovalStatus::Approved;
                self.decided_by = Some(*decider);
                self.decision_notes = notes.clone();
                self.decided_at = Some(*occurred_at);
            }
            ApprovalEvent::Rejected {
                decider,
                reason,
                occurred_at,
            } => {
                self.status = ApprovalStatus::Rejected;
                self.decided_by = Some(*decider);
                self.decision_notes = Some(reason.clone());
                self.decided_at = Some(*occurred_at);
            }
            ApprovalEvent::Expired { .. } => {
                self.status = ApprovalStatus::Expired;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ApprovalCommand::Request(cmd) => {
                if self.exists() {
                    return Err(DomainError::conflict("approval already exists"));
                }
                if cmd.reason.trim().is_empty() {
                    return Err(DomainError::validation("request reason is required"));
                }
                if cmd.expires_at <= cmd.occurred_at {
                    return Err(DomainError::validation("expiry must be after the request time"));
                }
                Ok(vec![ApprovalEvent::Requested(cmd.clone())])
            }
            ApprovalCommand::Approve {
                decider,
                notes,
                occurred_at,
            } => {
                self.ensure_decidable(*occurred_at)?;
                Ok(vec![ApprovalEvent::Approved {
                    decider: *decider,
                    notes: notes.clone(),
                    occurred_at: *occurred_at,
                }])
            }
            ApprovalCommand::Reject {
                decider,
                reason,
                occurred_at,
            } => {
                if reason.trim().is_empty() {
                    return Err(DomainError::validation("rejection reason is required"));
                }
                self.ensure_decidable(*occurred_at)?;
                Ok(vec![ApprovalEvent::Rejected {
                    decider: *decider,
                    reason: reason.clone(),
                    occurred_at: *occurred_at,
                }])
            }
            ApprovalCommand::Expire { occurred_at } => {
                if !self.exists() {
                    return Err(DomainError::not_found());
                }
                if !self.is_stale(*occurred_at) {
                    return Err(DomainError::conflict("approval is not due to expire"));
                }
                Ok(vec![ApprovalEvent::Expired {
                    occurred_at: *occurred_at,
                }])
            }
        }
    }
}

impl Approval {
    fn ensure_decidable(&self, now: DateTime<Utc>) -> Result<(), DomainError> {
        if !self.exists() {
            return Err(DomainError::not_found());
        }
        if self.status != ApprovalStatus::Pending {
            return Err(DomainError::conflict(format!(
                "approval is {}",
                self.status.as_str()
            )));
        }
        if self.is_stale(now) {
            return Err(DomainError::conflict("approval has expired"));
        }
        Ok(())
    }
}

/// Pending view order: priority first, then oldest first.
pub fn sort_pending(approvals: &mut [Approval]) {
    approvals.sort_by(|a, b| {
        a.priority
            .rank()
            .cmp(&b.priority.rank())
            .then(a.created_at.cmp(&b.created_at))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn requested_at(at: DateTime<Utc>, priority: Priority) -> Approval {
        let approval_id = ApprovalId::new();
        let mut approval = Approval::empty(approval_id);
        approval
            .execute(&ApprovalCommand::Request(RequestApproval {
                approval_id,
                approval_number: "APR-202501-0001".into(),
                entity_type: EntityType::Invoice,
                entity_id: "inv-1".into(),
                entity_name: None,
                requested_by: UserId::new(),
                reason: "duplicate".into(),
                request_data: RequestData::Delete,
                priority,
                expires_at: at + Duration::hours(24),
                occurred_at: at,
            }))
            .unwrap();
        approval
    }

    fn approve(at: DateTime<Utc>) -> ApprovalCommand {
        ApprovalCommand::Approve {
            decider: UserId::new(),
            notes: None,
            occurred_at: at,
        }
    }

    #[test]
    fn request_starts_pending_with_type_from_data() {
        let approval = requested_at(Utc::now(), Priority::High);
        assert_eq!(approval.status(), ApprovalStatus::Pending);
        assert_eq!(approval.approval_type(), ApprovalType::Deletion);
    }

    #[test]
    fn decided_approval_is_not_pending_anymore() {
        let now = Utc::now();
        let mut approval = requested_at(now, Priority::High);
        approval.execute(&approve(now)).unwrap();
        assert_eq!(approval.status(), ApprovalStatus::Approved);
        let err = approval.handle(&approve(now)).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(m) if m.contains("approved")));
    }

    #[test]
    fn expired_requests_cannot_be_approved() {
        let then = Utc::now() - Duration::hours(30);
        let mut approval = requested_at(then, Priority::High);
        let now = Utc::now();
        assert!(approval.is_stale(now));
        assert!(approval.handle(&approve(now)).is_err());
        approval
            .execute(&ApprovalCommand::Expire { occurred_at: now })
            .unwrap();
        assert_eq!(approval.status(), ApprovalStatus::Expired);
    }

    #[test]
    fn rejection_needs_a_reason() {
        let now = Utc::now();
        let approval = requested_at(now, Priority::High);
        let cmd = ApprovalCommand::Reject {
            decider: UserId::new(),
            reason: "  ".into(),
            occurred_at: now,
        };
        assert!(matches!(approval.handle(&cmd), Err(DomainError::Validation(_))));
    }

    #[test]
    fn pending_view_sorts_by_priority_then_age() {
        let now = Utc::now();
        let mut list = vec![
            requested_at(now, Priority::Low),
            requested_at(now - Duration::minutes(5), Priority::High),
            requested_at(now, Priority::Urgent),
            requested_at(now - Duration::minutes(10), Priority::High),
        ];
        sort_pending(&mut list);
        let order: Vec<(Priority, DateTime<Utc>)> =
            list.iter().map(|a| (a.priority(), a.created_at())).collect();
        assert_eq!(order[0].0, Priority::Urgent);
        assert_eq!(order[1], (Priority::High, now - Duration::minutes(10)));
        assert_eq!(order[2], (Priority::High, now - Duration::minutes(5)));
        assert_eq!(order[3].0, Priority::Low);
    }
}
