//! Append-only audit log model: entries, search filter, stats and CSV export.

pub mod entry;
pub mod export;
pub mod query;

pub use entry::{AuditCategory, AuditEntry, CRITICAL_EVENTS, Severity, is_critical};
pub use export::{ExportError, entries_to_csv, write_csv};
pub use query::{AuditQuery, AuditStats};
