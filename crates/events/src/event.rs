use chrono::{DateTime, Utc};

/// A fact recorded against an invoice, device or approval.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Dotted name stored in the journal, e.g. `invoice.completed`.
    fn event_type(&self) -> &'static str;

    fn version(&self) -> u32;

    fn occurred_at(&self) -> DateTime<Utc>;
}
