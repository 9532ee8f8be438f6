//! Closed permission catalogue.
//!
//! Every guarded operation names one of these (resource, action) pairs. The
//! dotted code (e.g. `sales.invoice.void`) is only the wire/storage form.

use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which invoice book a permission applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceScope {
    Sales,
    Purchases,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceAction {
    View,
    Create,
    Edit,
    Void,
    Delete,
    Print,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceAction {
    Read,
    Create,
    Update,
    Custody,
    Transfer,
    DeleteRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalAction {
    Read,
    Request,
    Decide,
}

/// A permission the gate can check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Permission {
    Invoice {
        scope: InvoiceScope,
        action: InvoiceAction,
    },
    Device(DeviceAction),
    Approval(ApprovalAction),
    /// Perform approval-gated actions immediately.
    BypassApprovals,
    ViewAudit,
    ViewReports,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown permission '{0}'")]
pub struct UnknownPermission(pub String);

impl Permission {
    /// Every permission in the catalogue.
    pub const ALL: [Permission; 24] = [
        Permission::invoice(InvoiceScope::Sales, InvoiceAction::View),
        Permission::invoice(InvoiceScope::Sales, InvoiceAction::Create),
        Permission::invoice(InvoiceScope::Sales, InvoiceAction::Edit),
        Permission::invoice(InvoiceScope::Sales, InvoiceAction::Void),
        Permission::invoice(InvoiceScope::Sales, InvoiceAction::Delete),
        Permission::invoice(InvoiceScope::Sales, InvoiceAction::Print),
        Permission::invoice(InvoiceScope::Purchases, InvoiceAction::View),
        Permission::invoice(InvoiceScope::Purchases, InvoiceAction::Create),
        Permission::invoice(InvoiceScope::Purchases, InvoiceAction::Edit),
        Permission::invoice(InvoiceScope::Purchases, InvoiceAction::Void),
        Permission::invoice(InvoiceScope::Purchases, InvoiceAction::Delete),
        Permission::invoice(InvoiceScope::Purchases, InvoiceAction::Print),
        Permission::Device(DeviceAction::Read),
        Permission::Device(DeviceAction::Create),
        Permission::Device(DeviceAction::Update),
        Permission::Device(DeviceAction::Custody),
        Permission::Device(DeviceAction::Transfer),
        Permission::Device(DeviceAction::DeleteRequest),
        Permission::Approval(ApprovalAction::Read),
        Permission::Approval(ApprovalAction::Request),
        Permission::Approval(ApprovalAction::Decide),
        Permission::BypassApprovals,
        Permission::ViewAudit,
        Permission::ViewReports,
    ];

    pub const fn invoice(scope: InvoiceScope, action: InvoiceAction) -> Self {
        Permission::Invoice { scope, action }
    }

    /// Dotted permission code.
    pub fn code(&self) -> &'static str {
        use InvoiceAction as A;
        use InvoiceScope as S;
        match self {
            Permission::Invoice { scope: S::Sales, action } => match action {
                A::View => "sales.invoice.view",
                A::Create => "sales.invoice.create",
                A::Edit => "sales.invoice.edit",
                A::Void => "sales.invoice.void",
                A::Delete => "sales.invoice.delete",
                A::Print => "sales.invoice.print",
            },
            Permission::Invoice { scope: S::Purchases, action } => match action {
                A::View => "purchases.invoice.view",
                A::Create => "purchases.invoice.create",
                A::Edit => "purchases.invoice.edit",
                A::Void => "purchases.invoice.void",
                A::Delete => "purchases.invoice.delete",
                A::Print => "purchases.invoice.print",
            },
            Permission::Device(action) => match action {
                DeviceAction::Read => "devices.read",
                DeviceAction::Create => "devices.create",
                DeviceAction::Update => "devices.update",
                DeviceAction::Custody => "devices.custody",
                DeviceAction::Transfer => "devices.transfer",
                DeviceAction::DeleteRequest => "devices.delete_request",
            },
            Permission::Approval(action) => match action {
                ApprovalAction::Read => "approvals.read",
                ApprovalAction::Request => "approvals.request",
                ApprovalAction::Decide => "approvals.decide",
            },
            Permission::BypassApprovals => "system.approvals.bypass",
            Permission::ViewAudit => "system.audit.view",
            Permission::ViewReports => "reports.view",
        }
    }

    /// Minimum user security level needed to exercise this permission.
    pub fn required_level(&self) -> u8 {
        match self {
            Permission::Invoice { scope, action } => match (scope, action) {
                (_, InvoiceAction::View | InvoiceAction::Print) => 1,
                (InvoiceScope::Sales, InvoiceAction::Create) => 1,
                (InvoiceScope::Purchases, InvoiceAction::Create) => 2,
                (_, InvoiceAction::Edit) => 2,
                (_, InvoiceAction::Void | InvoiceAction::Delete) => 3,
            },
            Permission::Device(_) => 1,
            Permission::Approval(ApprovalAction::Decide) => 5,
            Permission::Approval(_) => 1,
            Permission::BypassApprovals => 5,
            Permission::ViewAudit => 3,
            Permission::ViewReports => 2,
        }
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Permission {
    type Err = UnknownPermission;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .iter()
            .copied()
            .find(|p| p.code() == s)
            .ok_or_else(|| UnknownPermission(s.to_string()))
    }
}

impl TryFrom<String> for Permission {
    type Error = UnknownPermission;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Permission> for String {
    fn from(value: Permission) -> Self {
        value.code().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn codes_parse_back_to_the_same_permission() {
        for p in Permission::ALL {
            assert_eq!(p.code().parse::<Permission>().unwrap(), p);
        }
    }

    #[test]
    fn codes_are_unique_per_permission() {
        let distinct: HashSet<Permission> = Permission::ALL.into_iter().collect();
        let codes: HashSet<&str> = distinct.iter().map(|p| p.code()).collect();
        assert_eq!(distinct.len(), codes.len());
    }

    #[test]
    fn invoice_codes_follow_scope_and_action() {
        assert_eq!(
            Permission::invoice(InvoiceScope::Purchases, InvoiceAction::Void).code(),
            "purchases.invoice.void"
        );
        assert_eq!(
            Permission::invoice(InvoiceScope::Sales, InvoiceAction::Create).code(),
            "sales.invoice.create"
        );
    }

    #[test]
    fn unknown_codes_are_rejected() {
        assert!("sales.invoice.explode".parse::<Permission>().is_err());
    }

    #[test]
    fn serde_uses_the_dotted_code() {
        let json = serde_json::to_string(&Permission::BypassApprovals).unwrap();
        assert_eq!(json, "\"system.approvals.bypass\"");
        let back: Permission = serde_json::from_str("\"devices.custody\"").unwrap();
        assert_eq!(back, Permission::Device(DeviceAction::Custody));
    }
}
