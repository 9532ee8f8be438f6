use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bierp_core::ProductId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalType {
    Deletion,
    InvoiceVoid,
    QuantityCorrection,
}

impl ApprovalType {
    pub const ALL: [ApprovalType; 3] = [
        ApprovalType::Deletion,
        ApprovalType::InvoiceVoid,
        ApprovalType::QuantityCorrection,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalType::Deletion => "deletion",
            ApprovalType::InvoiceVoid => "invoice_void",
            ApprovalType::QuantityCorrection => "quantity_correction",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == value)
    }

    /// Display label for the approvals screen.
    pub fn label(&self) -> &'static str {
        match self {
            ApprovalType::Deletion => "طلب حذف",
            ApprovalType::InvoiceVoid => "إلغاء فاتورة",
            ApprovalType::QuantityCorrection => "تصحيح كمية",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Invoice,
    Device,
    Product,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Invoice => "invoice",
            EntityType::Device => "device",
            EntityType::Product => "product",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Urgent,
    #[default]
    High,
    Normal,
    Low,
}

impl Priority {
    /// Sort key: lower is more urgent.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::Urgent => 1,
            Priority::High => 2,
            Priority::Normal => 3,
            Priority::Low => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl ApprovalStatus {
    pub const ALL: [ApprovalStatus; 4] = [
        ApprovalStatus::Pending,
        ApprovalStatus::Approved,
        ApprovalStatus::Rejected,
        ApprovalStatus::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }
}

/// What the approved request will do, carried with the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RequestData {
    Delete,
    Void {
        reason: String,
    },
    QuantityCorrection {
        product_id: ProductId,
        old_quantity: i64,
        new_quantity: i64,
        difference: i64,
    },
}

impl RequestData {
    pub fn quantity_correction(product_id: ProductId, old_quantity: i64, new_quantity: i64) -> Self {
        RequestData::QuantityCorrection {
            product_id,
            old_quantity,
            new_quantity,
            difference: new_quantity - old_quantity,
        }
    }

    pub fn approval_type(&self) -> ApprovalType {
        match self {
            RequestData::Delete => ApprovalType::Deletion,
            RequestData::Void { .. } => ApprovalType::InvoiceVoid,
            RequestData::QuantityCorrection { .. } => ApprovalType::QuantityCorrection,
        }
    }
}

/// `APR-YYYYMM-NNNN`; the trailing digits are supplied by the caller.
pub fn format_approval_number(at: DateTime<Utc>, suffix: u16) -> String {
    format!("APR-{}-{:04}", at.format("%Y%m"), suffix % 10_000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn approval_numbers_are_month_scoped() {
        let at = Utc.with_ymd_and_hms(2025, 3, 14, 10, 0, 0).unwrap();
        assert_eq!(format_approval_number(at, 42), "APR-202503-0042");
        assert_eq!(format_approval_number(at, 12_345), "APR-202503-2345");
    }

    #[test]
    fn quantity_correction_records_difference() {
        let data = RequestData::quantity_correction(ProductId::parse("P1").unwrap(), 10, 7);
        assert!(matches!(data, RequestData::QuantityCorrection { difference: -3, .. }));
        assert_eq!(data.approval_type(), ApprovalType::QuantityCorrection);
    }

    #[test]
    fn request_data_is_tagged_by_action() {
        let json = serde_json::to_value(RequestData::Void { reason: "dup".into() }).unwrap();
        assert_eq!(json["action"], "void");
        assert_eq!(json["reason"], "dup");
    }

    #[test]
    fn priorities_rank_urgent_first() {
        assert!(Priority::Urgent.rank() < Priority::High.rank());
        assert!(Priority::Normal.rank() < Priority::Low.rank());
        assert_eq!(Priority::default(), Priority::High);
    }
}
