use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use bierp_core::{AuditEntryId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Auth,
    Inventory,
    Invoice,
    Warranty,
    Sensitive,
    Approval,
    System,
    Security,
}

impl AuditCategory {
    pub const ALL: [AuditCategory; 8] = [
        AuditCategory::Auth,
        AuditCategory::Inventory,
        AuditCategory::Invoice,
        AuditCategory::Warranty,
        AuditCategory::Sensitive,
        AuditCategory::Approval,
        AuditCategory::System,
        AuditCategory::Security,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditCategory::Auth => "auth",
            AuditCategory::Inventory => "inventory",
            AuditCategory::Invoice => "invoice",
            AuditCategory::Warranty => "warranty",
            AuditCategory::Sensitive => "sensitive",
            AuditCategory::Approval => "approval",
            AuditCategory::System => "system",
            AuditCategory::Security => "security",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        [Severity::Info, Severity::Warning, Severity::Critical]
            .into_iter()
            .find(|s| s.as_str() == value)
    }
}

/// Event types that are pushed to the owner as they happen.
pub const CRITICAL_EVENTS: &[&str] = &[
    "delete_requested",
    "quantity_manual_change",
    "price_change",
    "data_exported",
    "suspicious_activity",
    "permission_denied",
    "bulk_operation",
];

pub fn is_critical(event_type: &str) -> bool {
    CRITICAL_EVENTS.contains(&event_type)
}

/// One audit row. Never updated or deleted once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditEntryId,
    pub event_type: String,
    pub category: AuditCategory,
    pub severity: Severity,
    pub user_id: Option<UserId>,
    pub user_role: Option<String>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub entity_name: Option<String>,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(event_type: impl Into<String>, category: AuditCategory) -> Self {
        Self {
            id: AuditEntryId::new(),
            event_type: event_type.into(),
            category,
            severity: Severity::Info,
            user_id: None,
            user_role: None,
            entity_type: None,
            entity_id: None,
            entity_name: None,
            old_value: None,
            new_value: None,
            metadata: None,
            created_at: Utc::now(),
        }
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn actor(mut self, user_id: UserId, role: impl Into<String>) -> Self {
        self.user_id = Some(user_id);
        self.user_role = Some(role.into());
        self
    }

    pub fn entity(mut self, entity_type: impl Into<String>, entity_id: impl ToString) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.to_string());
        self
    }

    pub fn entity_name(mut self, name: impl Into<String>) -> Self {
        self.entity_name = Some(name.into());
        self
    }

    pub fn change(mut self, old_value: Option<Value>, new_value: Option<Value>) -> Self {
        self.old_value = old_value;
        self.new_value = new_value;
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn is_critical(&self) -> bool {
        is_critical(&self.event_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_fills_actor_and_entity() {
        let user = UserId::new();
        let entry = AuditEntry::new("invoice_created", AuditCategory::Invoice)
            .actor(user, "salesperson")
            .entity("invoice", "abc")
            .change(None, Some(json!({"total": 10})));
        assert_eq!(entry.user_id, Some(user));
        assert_eq!(entry.entity_id.as_deref(), Some("abc"));
        assert_eq!(entry.severity, Severity::Info);
        assert!(!entry.is_critical());
    }

    #[test]
    fn permission_denied_is_critical() {
        assert!(is_critical("permission_denied"));
        assert!(is_critical("data_exported"));
        assert!(!is_critical("invoice_created"));
    }

    #[test]
    fn categories_parse_back() {
        for c in AuditCategory::ALL {
            assert_eq!(AuditCategory::parse(c.as_str()), Some(c));
        }
        assert_eq!(Severity::parse("critical"), Some(Severity::Critical));
        assert_eq!(Severity::parse("fatal"), None);
    }
}
