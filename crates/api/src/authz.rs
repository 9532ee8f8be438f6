//! Request-boundary permission checks.
//!
//! Every guarded handler calls [`guard`] before touching a service; denials
//! are rendered as 403 and written to the audit trail.

use axum::response::Response;

use bierp_auth::{InvoiceAction, InvoiceScope, Permission, Principal, authorize};
use bierp_invoicing::InvoiceType;

use crate::app::errors;
use crate::app::services::AppServices;

/// Check `permission` for the caller; `target` names what was being accessed.
pub async fn guard(
    services: &AppServices,
    principal: &Principal,
    permission: Permission,
    target: &str,
) -> Result<(), Response> {
    match authorize(principal, permission) {
        Ok(()) => Ok(()),
        Err(err) => {
            services.recorder().permission_denied(principal, &err, target).await;
            Err(errors::forbidden(&err))
        }
    }
}

/// Purchase-side invoices are governed by the purchases book.
pub fn scope_of(invoice_type: InvoiceType) -> InvoiceScope {
    if invoice_type.is_purchases_book() {
        InvoiceScope::Purchases
    } else {
        InvoiceScope::Sales
    }
}

pub fn invoice_permission(invoice_type: InvoiceType, action: InvoiceAction) -> Permission {
    Permission::invoice(scope_of(invoice_type), action)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn purchases_and_their_returns_use_the_purchases_book() {
        assert_eq!(scope_of(InvoiceType::Purchase), InvoiceScope::Purchases);
        assert_eq!(scope_of(InvoiceType::PurchaseReturn), InvoiceScope::Purchases);
        for t in [
            InvoiceType::Sale,
            InvoiceType::SaleReturn,
            InvoiceType::Exchange,
            InvoiceType::Installment,
            InvoiceType::Repair,
        ] {
            assert_eq!(scope_of(t), InvoiceScope::Sales);
        }
    }

    #[tokio::test]
    async fn denials_are_audited() {
        use bierp_audit::AuditQuery;
        use bierp_auth::Role;
        use bierp_core::UserId;

        let services = AppServices::in_memory();
        let viewer = Principal::with_role(UserId::new(), Role::Viewer);

        let denied = guard(&services, &viewer, Permission::ViewAudit, "/audit").await;
        assert_eq!(denied.unwrap_err().status(), axum::http::StatusCode::FORBIDDEN);

        let query = AuditQuery {
            event_type: Some("permission_denied".into()),
            ..AuditQuery::default()
        };
        let (entries, total) = services.audit.search(&query).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(entries[0].user_id, Some(viewer.user_id));
    }
}
