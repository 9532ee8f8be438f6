//! Invoice classification enums and the status transition table.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceType {
    Sale,
    Purchase,
    SaleReturn,
    PurchaseReturn,
    Exchange,
    Installment,
    Repair,
}

/// Effect a completed invoice has on product stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockDirection {
    In,
    Out,
}

impl InvoiceType {
    pub const ALL: [InvoiceType; 7] = [
        InvoiceType::Sale,
        InvoiceType::Purchase,
        InvoiceType::SaleReturn,
        InvoiceType::PurchaseReturn,
        InvoiceType::Exchange,
        InvoiceType::Installment,
        InvoiceType::Repair,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceType::Sale => "sale",
            InvoiceType::Purchase => "purchase",
            InvoiceType::SaleReturn => "sale_return",
            InvoiceType::PurchaseReturn => "purchase_return",
            InvoiceType::Exchange => "exchange",
            InvoiceType::Installment => "installment",
            InvoiceType::Repair => "repair",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == value)
    }

    /// Purchases and purchase returns belong to the purchases book; every other
    /// type is guarded by the sales permissions.
    pub fn is_purchases_book(&self) -> bool {
        matches!(self, InvoiceType::Purchase | InvoiceType::PurchaseReturn)
    }

    /// Counted as revenue by the reports.
    pub fn is_sale(&self) -> bool {
        matches!(self, InvoiceType::Sale | InvoiceType::Installment)
    }

    pub fn number_prefix(&self) -> &'static str {
        match self {
            InvoiceType::Purchase => "PUR",
            InvoiceType::Sale => "SAL",
            InvoiceType::PurchaseReturn => "RPR",
            InvoiceType::SaleReturn => "RSL",
            _ => "INV",
        }
    }

    pub fn stock_direction(&self) -> Option<StockDirection> {
        match self {
            InvoiceType::Sale | InvoiceType::Installment | InvoiceType::PurchaseReturn => {
                Some(StockDirection::Out)
            }
            InvoiceType::Purchase | InvoiceType::SaleReturn => Some(StockDirection::In),
            InvoiceType::Exchange | InvoiceType::Repair => None,
        }
    }
}

impl core::fmt::Display for InvoiceType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification that keeps a new invoice in draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceSubType {
    /// Waiting for prices to be filled in.
    Waiting,
    Quotation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Waiting,
    PendingAudit,
    Completed,
    Cancelled,
    Voided,
    Deleted,
}

impl InvoiceStatus {
    pub const ALL: [InvoiceStatus; 7] = [
        InvoiceStatus::Draft,
        InvoiceStatus::Waiting,
        InvoiceStatus::PendingAudit,
        InvoiceStatus::Completed,
        InvoiceStatus::Cancelled,
        InvoiceStatus::Voided,
        InvoiceStatus::Deleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Waiting => "waiting",
            InvoiceStatus::PendingAudit => "pending_audit",
            InvoiceStatus::Completed => "completed",
            InvoiceStatus::Cancelled => "cancelled",
            InvoiceStatus::Voided => "voided",
            InvoiceStatus::Deleted => "deleted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }

    /// Targets reachable through an ordinary transition.
    ///
    /// Cancelled, voided and deleted are only entered through the dedicated
    /// cancel / void / delete commands, so they never appear here.
    pub fn allowed_targets(&self) -> &'static [InvoiceStatus] {
        use InvoiceStatus::*;
        match self {
            Draft => &[Waiting, PendingAudit, Completed],
            Waiting => &[PendingAudit, Completed],
            PendingAudit => &[Completed],
            Completed | Cancelled | Voided | Deleted => &[],
        }
    }

    pub fn can_transition_to(&self, target: InvoiceStatus) -> bool {
        self.allowed_targets().contains(&target)
    }

    /// Cancelled or voided.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, InvoiceStatus::Cancelled | InvoiceStatus::Voided)
    }

    /// Excluded from reports and totals.
    pub fn is_dead(&self) -> bool {
        matches!(
            self,
            InvoiceStatus::Cancelled | InvoiceStatus::Voided | InvoiceStatus::Deleted
        )
    }
}

impl core::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[default]
    Cash,
    Card,
    Transfer,
    Credit,
    Installment,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::Transfer => "transfer",
            PaymentMethod::Credit => "credit",
            PaymentMethod::Installment => "installment",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Paid,
    Partial,
    Unpaid,
}

impl PaymentStatus {
    pub fn derive(total: u64, paid: u64) -> Self {
        if paid >= total {
            PaymentStatus::Paid
        } else if paid > 0 {
            PaymentStatus::Partial
        } else {
            PaymentStatus::Unpaid
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Paid => "paid",
            PaymentStatus::Partial => "partial",
            PaymentStatus::Unpaid => "unpaid",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn any_status() -> impl Strategy<Value = InvoiceStatus> {
        proptest::sample::select(InvoiceStatus::ALL.to_vec())
    }

    #[test]
    fn terminal_states_have_no_targets() {
        for s in [
            InvoiceStatus::Completed,
            InvoiceStatus::Cancelled,
            InvoiceStatus::Voided,
            InvoiceStatus::Deleted,
        ] {
            assert!(s.allowed_targets().is_empty(), "{s}");
        }
    }

    #[test]
    fn draft_can_skip_straight_to_completed() {
        assert!(InvoiceStatus::Draft.can_transition_to(InvoiceStatus::Completed));
        assert!(!InvoiceStatus::PendingAudit.can_transition_to(InvoiceStatus::Waiting));
    }

    #[test]
    fn names_parse_back() {
        for s in InvoiceStatus::ALL {
            assert_eq!(InvoiceStatus::parse(s.as_str()), Some(s));
        }
        for t in InvoiceType::ALL {
            assert_eq!(InvoiceType::parse(t.as_str()), Some(t));
        }
        assert_eq!(InvoiceType::parse("gift"), None);
    }

    #[test]
    fn stock_directions() {
        assert_eq!(InvoiceType::Sale.stock_direction(), Some(StockDirection::Out));
        assert_eq!(InvoiceType::Purchase.stock_direction(), Some(StockDirection::In));
        assert_eq!(InvoiceType::SaleReturn.stock_direction(), Some(StockDirection::In));
        assert_eq!(InvoiceType::Repair.stock_direction(), None);
    }

    #[test]
    fn payment_status_is_derived_from_amounts() {
        assert_eq!(PaymentStatus::derive(100, 100), PaymentStatus::Paid);
        assert_eq!(PaymentStatus::derive(100, 40), PaymentStatus::Partial);
        assert_eq!(PaymentStatus::derive(100, 0), PaymentStatus::Unpaid);
        assert_eq!(PaymentStatus::derive(0, 0), PaymentStatus::Paid);
    }

    proptest! {
        #[test]
        fn no_status_can_reach_a_terminal_cancel_state_by_transition(from in any_status()) {
            for to in [InvoiceStatus::Cancelled, InvoiceStatus::Voided, InvoiceStatus::Deleted] {
                prop_assert!(!from.can_transition_to(to));
            }
        }

        #[test]
        fn transitions_only_move_forward(from in any_status(), to in any_status()) {
            if from.can_transition_to(to) {
                let rank = |s: InvoiceStatus| InvoiceStatus::ALL.iter().position(|x| *x == s);
                prop_assert!(rank(from) < rank(to));
            }
        }
    }
}
