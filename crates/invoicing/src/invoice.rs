use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use bierp_core::{
    Aggregate, AggregateRoot, CustomerId, DomainError, InvoiceId, SupplierId, UserId,
};
use bierp_events::Event;

use crate::kinds::{InvoiceStatus, InvoiceSubType, InvoiceType, PaymentMethod, PaymentStatus};
use crate::line::{InvoiceLine, Totals};

/// Aggregate root: Invoice.
///
/// The serialized form doubles as the stored row and the API view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    id: InvoiceId,
    invoice_number: String,
    invoice_type: InvoiceType,
    sub_type: Option<InvoiceSubType>,
    status: InvoiceStatus,
    customer_id: Option<CustomerId>,
    supplier_id: Option<SupplierId>,
    items: Vec<InvoiceLine>,
    subtotal: u64,
    discount_amount: u64,
    discount_percent: Option<u8>,
    tax_amount: u64,
    total: u64,
    paid_amount: u64,
    remaining_amount: u64,
    payment_method: PaymentMethod,
    payment_status: PaymentStatus,
    audited: bool,
    audited_by: Option<UserId>,
    audited_at: Option<DateTime<Utc>>,
    prepared_by: Option<UserId>,
    prepared_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    cancelled_reason: Option<String>,
    deleted_at: Option<DateTime<Utc>>,
    notes: Option<String>,
    created_by: UserId,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: u64,
}

impl Invoice {
    /// Not-yet-created instance; `Create` is the only command it accepts.
    pub fn empty(id: InvoiceId) -> Self {
        Self {
            id,
            invoice_number: String::new(),
            invoice_type: InvoiceType::Sale,
            sub_type: None,
            status: InvoiceStatus::Draft,
            customer_id: None,
            supplier_id: None,
            items: Vec::new(),
            subtotal: 0,
            discount_amount: 0,
            discount_percent: None,
            tax_amount: 0,
            total: 0,
            paid_amount: 0,
            remaining_amount: 0,
            payment_method: PaymentMethod::Cash,
            payment_status: PaymentStatus::Paid,
            audited: false,
            audited_by: None,
            audited_at: None,
            prepared_by: None,
            prepared_at: None,
            cancelled_at: None,
            cancelled_reason: None,
            deleted_at: None,
            notes: None,
            created_by: UserId::from_uuid(Uuid::nil()),
            created_at: DateTime::<Utc>::default(),
            updated_at: DateTime::<Utc>::default(),
            version: 0,
        }
    }

    pub fn exists(&self) -> bool {
        self.version > 0
    }

    pub fn id_typed(&self) -> InvoiceId {
        self.id
    }

    pub fn invoice_number(&self) -> &str {
        &self.invoice_number
    }

    pub fn invoice_type(&self) -> InvoiceType {
        self.invoice_type
    }

    pub fn sub_type(&self) -> Option<InvoiceSubType> {
        self.sub_type
    }

    pub fn status(&self) -> InvoiceStatus {
        self.status
    }

    pub fn customer_id(&self) -> Option<&CustomerId> {
        self.customer_id.as_ref()
    }

    pub fn supplier_id(&self) -> Option<&SupplierId> {
        self.supplier_id.as_ref()
    }

    pub fn items(&self) -> &[InvoiceLine] {
        &self.items
    }

    pub fn subtotal(&self) -> u64 {
        self.subtotal
    }

    pub fn discount_amount(&self) -> u64 {
        self.discount_amount
    }

    pub fn discount_percent(&self) -> Option<u8> {
        self.discount_percent
    }

    pub fn tax_amount(&self) -> u64 {
        self.tax_amount
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn paid_amount(&self) -> u64 {
        self.paid_amount
    }

    pub fn remaining_amount(&self) -> u64 {
        self.remaining_amount
    }

    pub fn payment_method(&self) -> PaymentMethod {
        self.payment_method
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.payment_status
    }

    pub fn is_audited(&self) -> bool {
        self.audited
    }

    pub fn prepared_by(&self) -> Option<UserId> {
        self.prepared_by
    }

    pub fn cancelled_reason(&self) -> Option<&str> {
        self.cancelled_reason.as_deref()
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn created_by(&self) -> UserId {
        self.created_by
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Waiting list membership: draft/waiting status or the waiting sub-type.
    pub fn is_waiting(&self) -> bool {
        matches!(self.status, InvoiceStatus::Draft | InvoiceStatus::Waiting)
            || self.sub_type == Some(InvoiceSubType::Waiting)
    }

    fn set_payment(&mut self, paid_amount: u64) {
        self.paid_amount = paid_amount;
        self.remaining_amount = self.total.saturating_sub(paid_amount);
        self.payment_status = PaymentStatus::derive(self.total, paid_amount);
    }
}

impl AggregateRoot for Invoice {
    type Id = InvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateInvoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateInvoice {
    pub invoice_id: InvoiceId,
    pub invoice_number: String,
    pub invoice_type: InvoiceType,
    pub sub_type: Option<InvoiceSubType>,
    pub customer_id: Option<CustomerId>,
    pub supplier_id: Option<SupplierId>,
    pub lines: Vec<InvoiceLine>,
    pub discount_amount: u64,
    pub discount_percent: Option<u8>,
    pub tax_amount: u64,
    pub paid_amount: u64,
    pub payment_method: PaymentMethod,
    pub notes: Option<String>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Mutable invoice fields. Status is deliberately absent: it only moves
/// through transitions and the cancel / void / delete commands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceUpdate {
    pub paid_amount: Option<u64>,
    pub discount_amount: Option<u64>,
    pub discount_percent: Option<u8>,
    pub payment_method: Option<PaymentMethod>,
    pub notes: Option<String>,
}

impl InvoiceUpdate {
    pub fn is_empty(&self) -> bool {
        *self == InvoiceUpdate::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceCommand {
    Create(CreateInvoice),
    Transition {
        to: InvoiceStatus,
        actor: UserId,
        notes: Option<String>,
        occurred_at: DateTime<Utc>,
    },
    RegisterPayment {
        amount: u64,
        actor: UserId,
        occurred_at: DateTime<Utc>,
    },
    Update {
        changes: InvoiceUpdate,
        actor: UserId,
        occurred_at: DateTime<Utc>,
    },
    MarkAudited {
        actor: UserId,
        occurred_at: DateTime<Utc>,
    },
    MarkPrepared {
        actor: UserId,
        occurred_at: DateTime<Utc>,
    },
    Cancel {
        reason: String,
        actor: UserId,
        occurred_at: DateTime<Utc>,
    },
    Void {
        reason: String,
        actor: UserId,
        occurred_at: DateTime<Utc>,
    },
    Delete {
        reason: Option<String>,
        actor: UserId,
        occurred_at: DateTime<Utc>,
    },
}

/// Event: InvoiceCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceCreated {
    pub invoice_id: InvoiceId,
    pub invoice_number: String,
    pub invoice_type: InvoiceType,
    pub sub_type: Option<InvoiceSubType>,
    pub status: InvoiceStatus,
    pub customer_id: Option<CustomerId>,
    pub supplier_id: Option<SupplierId>,
    pub lines: Vec<InvoiceLine>,
    pub discount_percent: Option<u8>,
    pub totals: Totals,
    pub paid_amount: u64,
    pub payment_method: PaymentMethod,
    pub notes: Option<String>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Any status change, including cancel / void / delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChanged {
    pub from: InvoiceStatus,
    pub to: InvoiceStatus,
    pub actor: UserId,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceUpdated {
    pub changes: InvoiceUpdate,
    pub totals: Totals,
    pub paid_amount: u64,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceEvent {
    Created(InvoiceCreated),
    Transitioned(StatusChanged),
    PaymentRegistered {
        amount: u64,
        new_paid_amount: u64,
        actor: UserId,
        occurred_at: DateTime<Utc>,
    },
    Updated(InvoiceUpdated),
    Audited {
        actor: UserId,
        occurred_at: DateTime<Utc>,
    },
    Prepared {
        actor: UserId,
        occurred_at: DateTime<Utc>,
    },
    Cancelled(StatusChanged),
    Voided(StatusChanged),
    Deleted(StatusChanged),
}

impl InvoiceEvent {
    /// The status change carried by this event, if any.
    pub fn status_change(&self) -> Option<&StatusChanged> {
        match self {
            InvoiceEvent::Transitioned(c)
            | InvoiceEvent::Cancelled(c)
            | InvoiceEvent::Voided(c)
            | InvoiceEvent::Deleted(c) => Some(c),
            _ => None,
        }
    }

    /// Short action name used for workflow-log rows.
    pub fn action(&self) -> &'static str {
        match self {
            InvoiceEvent::Created(_) => "created",
            InvoiceEvent::Transitioned(_) => "transition",
            InvoiceEvent::PaymentRegistered { .. } => "payment",
            InvoiceEvent::Updated(_) => "modified",
            InvoiceEvent::Audited { .. } => "audited",
            InvoiceEvent::Prepared { .. } => "prepared",
            InvoiceEvent::Cancelled(_) => "cancelled",
            InvoiceEvent::Voided(_) => "voided",
            InvoiceEvent::Deleted(_) => "deleted",
        }
    }
}

impl Event for InvoiceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InvoiceEvent::Created(_) => "invoicing.invoice.created",
            InvoiceEvent::Transitioned(_) => "invoicing.invoice.transitioned",
            InvoiceEvent::PaymentRegistered { .. } => "invoicing.invoice.payment_registered",
            InvoiceEvent::Updated(_) => "invoicing.invoice.updated",
            InvoiceEvent::Audited { .. } => "invoicing.invoice.audited",
            InvoiceEvent::Prepared { .. } => "invoicing.invoice.prepared",
            InvoiceEvent::Cancelled(_) => "invoicing.invoice.cancelled",
            InvoiceEvent::Voided(_) => "invoicing.invoice.voided",
            InvoiceEvent::Deleted(_) => "invoicing.invoice.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InvoiceEvent::Created(e) => e.occurred_at,
            InvoiceEvent::Updated(e) => e.occurred_at,
            InvoiceEvent::PaymentRegistered { occurred_at, .. }
            | InvoiceEvent::Audited { occurred_at, .. }
            | InvoiceEvent::Prepared { occurred_at, .. } => *occurred_at,
            InvoiceEvent::Transitioned(c)
            | InvoiceEvent::Cancelled(c)
            | InvoiceEvent::Voided(c)
            | InvoiceEvent::Deleted(c) => c.occurred_at,
        }
    }
}

impl Aggregate for Invoice {
    type Command = InvoiceCommand;
    type Event = InvoiceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InvoiceEvent::Created(e) => {
                self.id = e.invoice_id;
                self.invoice_number = e.invoice_number.clone();
                self.invoice_type = e.invoice_type;
                self.sub_type = e.sub_type;
                self.status = e.status;
                self.customer_id = e.customer_id.clone();
                self.supplier_id = e.supplier_id.clone();
                self.items = e.lines.clone();
                self.subtotal = e.totals.subtotal;
                self.discount_amount = e.totals.discount_amount;
                self.discount_percent = e.discount_percent;
                self.tax_amount = e.totals.tax_amount;
                self.total = e.totals.total;
                self.payment_method = e.payment_method;
                self.notes = e.notes.clone();
                self.created_by = e.created_by;
                self.created_at = e.occurred_at;
                self.set_payment(e.paid_amount);
            }
            InvoiceEvent::Transitioned(c) => {
                self.status = c.to;
            }
            InvoiceEvent::PaymentRegistered {
                new_paid_amount, ..
            } => {
                self.set_payment(*new_paid_amount);
            }
            InvoiceEvent::Updated(e) => {
                self.subtotal = e.totals.subtotal;
                self.discount_amount = e.totals.discount_amount;
                self.tax_amount = e.totals.tax_amount;
                self.total = e.totals.total;
                if e.changes.discount_percent.is_some() {
                    self.discount_percent = e.changes.discount_percent;
                } else if e.changes.discount_amount.is_some() {
                    self.discount_percent = None;
                }
                if let Some(method) = e.changes.payment_method {
                    self.payment_method = method;
                }
                if let Some(notes) = &e.changes.notes {
                    self.notes = Some(notes.clone());
                }
                self.set_payment(e.paid_amount);
            }
            InvoiceEvent::Audited { actor, occurred_at } => {
                self.audited = true;
                self.audited_by = Some(*actor);
                self.audited_at = Some(*occurred_at);
            }
            InvoiceEvent::Prepared { actor, occurred_at } => {
                self.prepared_by = Some(*actor);
                self.prepared_at = Some(*occurred_at);
            }
            InvoiceEvent::Cancelled(c) | InvoiceEvent::Voided(c) => {
                self.status = c.to;
                self.cancelled_at = Some(c.occurred_at);
                self.cancelled_reason = c.notes.clone();
            }
            InvoiceEvent::Deleted(c) => {
                self.status = c.to;
                self.deleted_at = Some(c.occurred_at);
            }
        }

        self.updated_at = event.occurred_at();
        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        if !matches!(command, InvoiceCommand::Create(_)) && !self.exists() {
            return Err(DomainError::not_found());
        }

        match command {
            InvoiceCommand::Create(cmd) => self.handle_create(cmd),
            InvoiceCommand::Transition {
                to,
                actor,
                notes,
                occurred_at,
            } => self.handle_transition(*to, *actor, notes.clone(), *occurred_at),
            InvoiceCommand::RegisterPayment {
                amount,
                actor,
                occurred_at,
            } => self.handle_payment(*amount, *actor, *occurred_at),
            InvoiceCommand::Update {
                changes,
                actor,
                occurred_at,
            } => self.handle_update(changes, *actor, *occurred_at),
            InvoiceCommand::MarkAudited { actor, occurred_at } => {
                self.ensure_live()?;
                if self.audited {
                    return Err(DomainError::conflict("invoice is already audited"));
                }
                Ok(vec![InvoiceEvent::Audited {
                    actor: *actor,
                    occurred_at: *occurred_at,
                }])
            }
            InvoiceCommand::MarkPrepared { actor, occurred_at } => {
                self.ensure_live()?;
                Ok(vec![InvoiceEvent::Prepared {
                    actor: *actor,
                    occurred_at: *occurred_at,
                }])
            }
            InvoiceCommand::Cancel {
                reason,
                actor,
                occurred_at,
            } => {
                self.ensure_cancellable()?;
                Ok(vec![InvoiceEvent::Cancelled(self.change_to(
                    InvoiceStatus::Cancelled,
                    *actor,
                    Some(reason.clone()),
                    *occurred_at,
                ))])
            }
            InvoiceCommand::Void {
                reason,
                actor,
                occurred_at,
            } => {
                self.ensure_cancellable()?;
                Ok(vec![InvoiceEvent::Voided(self.change_to(
                    InvoiceStatus::Voided,
                    *actor,
                    Some(reason.clone()),
                    *occurred_at,
                ))])
            }
            InvoiceCommand::Delete {
                reason,
                actor,
                occurred_at,
            } => {
                if self.status == InvoiceStatus::Deleted {
                    return Err(DomainError::conflict("invoice is already deleted"));
                }
                Ok(vec![InvoiceEvent::Deleted(self.change_to(
                    InvoiceStatus::Deleted,
                    *actor,
                    reason.clone(),
                    *occurred_at,
                ))])
            }
        }
    }
}

impl Invoice {
    fn change_to(
        &self,
        to: InvoiceStatus,
        actor: UserId,
        notes: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> StatusChanged {
        StatusChanged {
            from: self.status,
            to,
            actor,
            notes,
            occurred_at,
        }
    }

    fn ensure_live(&self) -> Result<(), DomainError> {
        if self.status.is_dead() {
            return Err(DomainError::conflict(format!(
                "invoice is {}",
                self.status
            )));
        }
        Ok(())
    }

    fn ensure_cancellable(&self) -> Result<(), DomainError> {
        match self.status {
            InvoiceStatus::Deleted => Err(DomainError::conflict("invoice is already deleted")),
            s if s.is_cancelled() => Err(DomainError::conflict("invoice is already cancelled")),
            _ => Ok(()),
        }
    }

    fn handle_create(&self, cmd: &CreateInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        if self.exists() {
            return Err(DomainError::conflict("invoice already exists"));
        }
        if cmd.invoice_number.trim().is_empty() {
            return Err(DomainError::validation("invoice number is required"));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("cannot create invoice without lines"));
        }
        for line in &cmd.lines {
            line.validate()?;
        }

        let totals = Totals::compute(
            &cmd.lines,
            cmd.discount_amount,
            cmd.discount_percent,
            cmd.tax_amount,
        )?;
        if cmd.paid_amount > totals.total {
            return Err(DomainError::validation("cannot overpay invoice"));
        }

        let status = match cmd.sub_type {
            Some(_) => InvoiceStatus::Draft,
            None => InvoiceStatus::Completed,
        };

        Ok(vec![InvoiceEvent::Created(InvoiceCreated {
            invoice_id: cmd.invoice_id,
            invoice_number: cmd.invoice_number.clone(),
            invoice_type: cmd.invoice_type,
            sub_type: cmd.sub_type,
            status,
            customer_id: cmd.customer_id.clone(),
            supplier_id: cmd.supplier_id.clone(),
            lines: cmd.lines.clone(),
            discount_percent: cmd.discount_percent,
            totals,
            paid_amount: cmd.paid_amount,
            payment_method: cmd.payment_method,
            notes: cmd.notes.clone(),
            created_by: cmd.created_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_transition(
        &self,
        to: InvoiceStatus,
        actor: UserId,
        notes: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<InvoiceEvent>, DomainError> {
        if !self.status.can_transition_to(to) {
            return Err(DomainError::invalid_transition(self.status, to));
        }
        Ok(vec![InvoiceEvent::Transitioned(
            self.change_to(to, actor, notes, occurred_at),
        )])
    }

    fn handle_payment(
        &self,
        amount: u64,
        actor: UserId,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_live()?;
        if amount == 0 {
            return Err(DomainError::validation("payment amount must be positive"));
        }
        let new_paid_amount = self
            .paid_amount
            .checked_add(amount)
            .ok_or_else(|| DomainError::invariant("payment total overflow"))?;
        if new_paid_amount > self.total {
            return Err(DomainError::validation("cannot overpay invoice"));
        }
        Ok(vec![InvoiceEvent::PaymentRegistered {
            amount,
            new_paid_amount,
            actor,
            occurred_at,
        }])
    }

    fn handle_update(
        &self,
        changes: &InvoiceUpdate,
        actor: UserId,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_live()?;
        if changes.is_empty() {
            return Err(DomainError::validation("no fields to update"));
        }

        let (discount_amount, discount_percent) =
            match (changes.discount_percent, changes.discount_amount) {
                (Some(p), _) => (0, Some(p)),
                (None, Some(amount)) => (amount, None),
                (None, None) => (self.discount_amount, self.discount_percent),
            };
        let totals = Totals::from_subtotal(
            self.subtotal,
            discount_amount,
            discount_percent,
            self.tax_amount,
        )?;
        let paid_amount = changes.paid_amount.unwrap_or(self.paid_amount);
        if paid_amount > totals.total {
            return Err(DomainError::validation("cannot overpay invoice"));
        }

        Ok(vec![InvoiceEvent::Updated(InvoiceUpdated {
            changes: changes.clone(),
            totals,
            paid_amount,
            actor,
            occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bierp_core::ProductId;
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn line(quantity: i64, price: u64) -> InvoiceLine {
        InvoiceLine::new(1, ProductId::parse("P1").unwrap(), quantity, price).unwrap()
    }

    fn create_cmd(
        invoice_type: InvoiceType,
        sub_type: Option<InvoiceSubType>,
        lines: Vec<InvoiceLine>,
    ) -> CreateInvoice {
        let invoice_id = InvoiceId::new();
        CreateInvoice {
            invoice_id,
            invoice_number: "SAL-20250101-0001".to_string(),
            invoice_type,
            sub_type,
            customer_id: None,
            supplier_id: None,
            lines,
            discount_amount: 0,
            discount_percent: None,
            tax_amount: 0,
            paid_amount: 0,
            payment_method: PaymentMethod::Cash,
            notes: None,
            created_by: UserId::new(),
            occurred_at: now(),
        }
    }

    fn created(sub_type: Option<InvoiceSubType>) -> Invoice {
        let cmd = create_cmd(InvoiceType::Sale, sub_type, vec![line(2, 500)]);
        let mut invoice = Invoice::empty(cmd.invoice_id);
        invoice.execute(&InvoiceCommand::Create(cmd)).unwrap();
        invoice
    }

    fn transition(to: InvoiceStatus) -> InvoiceCommand {
        InvoiceCommand::Transition {
            to,
            actor: UserId::new(),
            notes: None,
            occurred_at: now(),
        }
    }

    fn at_status(status: InvoiceStatus) -> Invoice {
        let mut invoice = created(Some(InvoiceSubType::Quotation));
        let actor = UserId::new();
        let path: &[InvoiceStatus] = match status {
            InvoiceStatus::Draft => &[],
            InvoiceStatus::Waiting => &[InvoiceStatus::Waiting],
            InvoiceStatus::PendingAudit => &[InvoiceStatus::PendingAudit],
            InvoiceStatus::Completed => &[InvoiceStatus::Completed],
            _ => &[],
        };
        for to in path {
            invoice.execute(&transition(*to)).unwrap();
        }
        let reason = "test".to_string();
        let terminal = match status {
            InvoiceStatus::Cancelled => Some(InvoiceCommand::Cancel {
                reason,
                actor,
                occurred_at: now(),
            }),
            InvoiceStatus::Voided => Some(InvoiceCommand::Void {
                reason,
                actor,
                occurred_at: now(),
            }),
            InvoiceStatus::Deleted => Some(InvoiceCommand::Delete {
                reason: Some(reason),
                actor,
                occurred_at: now(),
            }),
            _ => None,
        };
        if let Some(cmd) = terminal {
            invoice.execute(&cmd).unwrap();
        }
        assert_eq!(invoice.status(), status);
        invoice
    }

    #[test]
    fn plain_invoice_is_created_completed_with_totals() {
        let invoice = created(None);
        assert_eq!(invoice.status(), InvoiceStatus::Completed);
        assert_eq!(invoice.subtotal(), 1000);
        assert_eq!(invoice.total(), 1000);
        assert_eq!(invoice.remaining_amount(), 1000);
        assert_eq!(invoice.payment_status(), PaymentStatus::Unpaid);
        assert_eq!(invoice.version(), 1);
    }

    #[test]
    fn sub_typed_invoices_start_in_draft() {
        assert_eq!(created(Some(InvoiceSubType::Waiting)).status(), InvoiceStatus::Draft);
        assert_eq!(created(Some(InvoiceSubType::Quotation)).status(), InvoiceStatus::Draft);
        assert!(created(Some(InvoiceSubType::Waiting)).is_waiting());
    }

    #[test]
    fn invoice_without_lines_is_rejected() {
        let cmd = create_cmd(InvoiceType::Sale, None, vec![]);
        let invoice = Invoice::empty(cmd.invoice_id);
        let err = invoice.handle(&InvoiceCommand::Create(cmd)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn commands_on_missing_invoice_are_not_found() {
        let invoice = Invoice::empty(InvoiceId::new());
        let err = invoice.handle(&transition(InvoiceStatus::Completed)).unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn completed_invoice_cannot_go_back_to_draft() {
        let invoice = created(None);
        let err = invoice.handle(&transition(InvoiceStatus::Draft)).unwrap_err();
        assert_eq!(
            err,
            DomainError::invalid_transition(InvoiceStatus::Completed, InvoiceStatus::Draft)
        );
    }

    #[test]
    fn payments_update_remaining_and_reject_overpayment() {
        let mut invoice = created(None);
        let pay = |amount| InvoiceCommand::RegisterPayment {
            amount,
            actor: UserId::new(),
            occurred_at: now(),
        };
        invoice.execute(&pay(400)).unwrap();
        assert_eq!(invoice.remaining_amount(), 600);
        assert_eq!(invoice.payment_status(), PaymentStatus::Partial);

        assert!(invoice.handle(&pay(601)).is_err());
        assert!(invoice.handle(&pay(0)).is_err());

        invoice.execute(&pay(600)).unwrap();
        assert_eq!(invoice.payment_status(), PaymentStatus::Paid);
        assert_eq!(invoice.remaining_amount(), 0);
    }

    #[test]
    fn cancelled_and_deleted_invoices_reject_second_cancel() {
        let cancelled = at_status(InvoiceStatus::Cancelled);
        let cmd = InvoiceCommand::Void {
            reason: "again".into(),
            actor: UserId::new(),
            occurred_at: now(),
        };
        assert!(matches!(cancelled.handle(&cmd), Err(DomainError::Conflict(m)) if m.contains("cancelled")));
        assert_eq!(cancelled.cancelled_reason(), Some("test"));

        let deleted = at_status(InvoiceStatus::Deleted);
        assert!(matches!(deleted.handle(&cmd), Err(DomainError::Conflict(m)) if m.contains("deleted")));
    }

    #[test]
    fn update_recomputes_totals_and_keeps_status() {
        let mut invoice = created(None);
        let events = invoice
            .execute(&InvoiceCommand::Update {
                changes: InvoiceUpdate {
                    discount_amount: Some(100),
                    paid_amount: Some(900),
                    ..Default::default()
                },
                actor: UserId::new(),
                occurred_at: now(),
            })
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(invoice.total(), 900);
        assert_eq!(invoice.payment_status(), PaymentStatus::Paid);
        assert_eq!(invoice.status(), InvoiceStatus::Completed);
    }

    #[test]
    fn audit_flag_is_set_once() {
        let mut invoice = created(None);
        let cmd = InvoiceCommand::MarkAudited {
            actor: UserId::new(),
            occurred_at: now(),
        };
        invoice.execute(&cmd).unwrap();
        assert!(invoice.is_audited());
        assert!(invoice.handle(&cmd).is_err());
    }

    #[test]
    fn serialized_view_uses_snake_case_states() {
        let json = serde_json::to_value(created(Some(InvoiceSubType::Waiting))).unwrap();
        assert_eq!(json["status"], "draft");
        assert_eq!(json["sub_type"], "waiting");
        assert_eq!(json["payment_status"], "unpaid");
    }

    fn any_status() -> impl Strategy<Value = InvoiceStatus> {
        proptest::sample::select(InvoiceStatus::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn illegal_transitions_fail_and_leave_status_unchanged(
            from in any_status(),
            to in any_status(),
        ) {
            let invoice = at_status(from);
            let result = invoice.handle(&transition(to));
            if from.can_transition_to(to) {
                prop_assert!(result.is_ok());
            } else {
                prop_assert_eq!(result.unwrap_err(), DomainError::invalid_transition(from, to));
                prop_assert_eq!(invoice.status(), from);
            }
        }
    }
}
