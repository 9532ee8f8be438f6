use axum::{Router, routing::get};

pub mod approvals;
pub mod audit;
pub mod devices;
pub mod invoices;
pub mod reports;
pub mod system;

/// Router for every authenticated endpoint.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/invoices", invoices::router())
        .nest("/devices", devices::router())
        .nest("/approvals", approvals::router())
        .nest("/audit", audit::router())
        .nest("/reports", reports::router())
}
