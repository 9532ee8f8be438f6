use serde::{Deserialize, Serialize};

use crate::permissions::{
    ApprovalAction as Ap, DeviceAction as Dv, InvoiceAction as Ia, InvoiceScope as Is, Permission,
};

/// Role assigned to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    Owner,
    Admin,
    Manager,
    Accountant,
    Salesperson,
    WarehouseKeeper,
    Inspector,
    Preparer,
    Delivery,
    Technician,
    Viewer,
}

const fn inv(scope: Is, action: Ia) -> Permission {
    Permission::invoice(scope, action)
}

const MANAGER: &[Permission] = &[
    inv(Is::Sales, Ia::View),
    inv(Is::Sales, Ia::Create),
    inv(Is::Sales, Ia::Edit),
    inv(Is::Sales, Ia::Void),
    inv(Is::Sales, Ia::Print),
    inv(Is::Purchases, Ia::View),
    inv(Is::Purchases, Ia::Create),
    inv(Is::Purchases, Ia::Edit),
    inv(Is::Purchases, Ia::Void),
    inv(Is::Purchases, Ia::Print),
    Permission::Device(Dv::Read),
    Permission::Device(Dv::Create),
    Permission::Device(Dv::Update),
    Permission::Device(Dv::Custody),
    Permission::Device(Dv::Transfer),
    Permission::Device(Dv::DeleteRequest),
    Permission::Approval(Ap::Read),
    Permission::Approval(Ap::Request),
    Permission::ViewAudit,
    Permission::ViewReports,
];

const ACCOUNTANT: &[Permission] = &[
    inv(Is::Sales, Ia::View),
    inv(Is::Sales, Ia::Create),
    inv(Is::Sales, Ia::Edit),
    inv(Is::Sales, Ia::Print),
    inv(Is::Purchases, Ia::View),
    inv(Is::Purchases, Ia::Create),
    inv(Is::Purchases, Ia::Edit),
    inv(Is::Purchases, Ia::Print),
    Permission::Approval(Ap::Read),
    Permission::Approval(Ap::Request),
    Permission::ViewReports,
];

const SALESPERSON: &[Permission] = &[
    inv(Is::Sales, Ia::View),
    inv(Is::Sales, Ia::Create),
    inv(Is::Sales, Ia::Print),
    Permission::Device(Dv::Read),
    Permission::Approval(Ap::Request),
];

const WAREHOUSE_KEEPER: &[Permission] = &[
    inv(Is::Purchases, Ia::View),
    inv(Is::Purchases, Ia::Create),
    Permission::Device(Dv::Read),
    Permission::Device(Dv::Create),
    Permission::Device(Dv::Update),
    Permission::Device(Dv::Custody),
    Permission::Device(Dv::Transfer),
    Permission::Device(Dv::DeleteRequest),
    Permission::Approval(Ap::Request),
];

const INSPECTOR: &[Permission] = &[Permission::Device(Dv::Read), Permission::Device(Dv::Update)];

const PREPARER: &[Permission] = &[
    Permission::Device(Dv::Read),
    Permission::Device(Dv::Update),
    Permission::Device(Dv::Custody),
];

const DELIVERY: &[Permission] = &[Permission::Device(Dv::Read), Permission::Device(Dv::Custody)];

const VIEWER: &[Permission] = &[
    inv(Is::Sales, Ia::View),
    inv(Is::Purchases, Ia::View),
    Permission::Device(Dv::Read),
];

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Accountant => "accountant",
            Role::Salesperson => "salesperson",
            Role::WarehouseKeeper => "warehouse_keeper",
            Role::Inspector => "inspector",
            Role::Preparer => "preparer",
            Role::Delivery => "delivery",
            Role::Technician => "technician",
            Role::Viewer => "viewer",
        }
    }

    /// Default security level for users holding this role.
    pub fn security_level(&self) -> u8 {
        match self {
            Role::SuperAdmin | Role::Owner => 5,
            Role::Admin => 4,
            Role::Manager => 3,
            Role::Accountant => 2,
            _ => 1,
        }
    }

    /// Roles that pass every permission check.
    pub fn is_unrestricted(&self) -> bool {
        matches!(self, Role::SuperAdmin | Role::Owner)
    }

    /// Whether `permission` is part of this role's default grant.
    pub fn grants(&self, permission: Permission) -> bool {
        match self {
            Role::SuperAdmin | Role::Owner => true,
            Role::Admin => permission != Permission::BypassApprovals,
            _ => self.default_permissions().contains(&permission),
        }
    }

    /// Static role → permission table (unrestricted roles are handled by
    /// [`Role::grants`] and return the full catalogue here).
    pub fn default_permissions(&self) -> &'static [Permission] {
        match self {
            Role::SuperAdmin | Role::Owner | Role::Admin => &Permission::ALL,
            Role::Manager => MANAGER,
            Role::Accountant => ACCOUNTANT,
            Role::Salesperson => SALESPERSON,
            Role::WarehouseKeeper => WAREHOUSE_KEEPER,
            Role::Inspector => INSPECTOR,
            Role::Preparer | Role::Technician => PREPARER,
            Role::Delivery => DELIVERY,
            Role::Viewer => VIEWER,
        }
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_and_super_admin_are_unrestricted() {
        assert!(Role::Owner.is_unrestricted());
        assert!(Role::SuperAdmin.is_unrestricted());
        assert!(!Role::Admin.is_unrestricted());
    }

    #[test]
    fn admin_gets_everything_but_bypass() {
        assert!(Role::Admin.grants(Permission::ViewAudit));
        assert!(!Role::Admin.grants(Permission::BypassApprovals));
    }

    #[test]
    fn manager_can_void_but_not_delete_sales_invoices() {
        assert!(Role::Manager.grants(inv(Is::Sales, Ia::Void)));
        assert!(!Role::Manager.grants(inv(Is::Sales, Ia::Delete)));
    }

    #[test]
    fn role_names_match_serde_representation() {
        let json = serde_json::to_string(&Role::WarehouseKeeper).unwrap();
        assert_eq!(json, format!("\"{}\"", Role::WarehouseKeeper.as_str()));
    }
}
