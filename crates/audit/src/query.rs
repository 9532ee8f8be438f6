use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bierp_core::UserId;

use crate::entry::{AuditCategory, AuditEntry, Severity};

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 500;

/// Audit search filter. Every field is optional and the set ones are ANDed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub event_type: Option<String>,
    pub category: Option<AuditCategory>,
    pub severity: Option<Severity>,
    pub user_id: Option<UserId>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    /// Case-insensitive substring over event type and entity name.
    pub search: Option<String>,
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if self.from.is_some_and(|from| entry.created_at < from) {
            return false;
        }
        if self.to.is_some_and(|to| entry.created_at > to) {
            return false;
        }
        if self
            .event_type
            .as_deref()
            .is_some_and(|t| entry.event_type != t)
        {
            return false;
        }
        if self.category.is_some_and(|c| entry.category != c) {
            return false;
        }
        if self.severity.is_some_and(|s| entry.severity != s) {
            return false;
        }
        if self.user_id.is_some() && entry.user_id != self.user_id {
            return false;
        }
        if self.entity_type.is_some() && entry.entity_type != self.entity_type {
            return false;
        }
        if self.entity_id.is_some() && entry.entity_id != self.entity_id {
            return false;
        }
        if let Some(needle) = self.search.as_deref().map(str::to_lowercase) {
            let in_type = entry.event_type.to_lowercase().contains(&needle);
            let in_name = entry
                .entity_name
                .as_deref()
                .is_some_and(|n| n.to_lowercase().contains(&needle));
            if !in_type && !in_name {
                return false;
            }
        }
        true
    }

    pub fn page(&self) -> usize {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> usize {
        (self.page() - 1).saturating_mul(self.limit())
    }

    /// Filter, order newest first and cut one page.
    pub fn run<'a>(&self, entries: impl IntoIterator<Item = &'a AuditEntry>) -> (Vec<AuditEntry>, usize) {
        let mut hits: Vec<&AuditEntry> = entries.into_iter().filter(|e| self.matches(e)).collect();
        hits.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = hits.len();
        let page = hits
            .into_iter()
            .skip(self.offset())
            .take(self.limit())
            .cloned()
            .collect();
        (page, total)
    }
}

/// Counts over a recent window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStats {
    pub days: u32,
    pub total: u64,
    pub by_category: BTreeMap<AuditCategory, u64>,
    pub by_severity: BTreeMap<Severity, u64>,
}

impl AuditStats {
    pub fn compute<'a>(
        entries: impl IntoIterator<Item = &'a AuditEntry>,
        days: u32,
        now: DateTime<Utc>,
    ) -> Self {
        let since = now - chrono::Duration::days(i64::from(days));
        let mut stats = AuditStats {
            days,
            ..Default::default()
        };
        for entry in entries.into_iter().filter(|e| e.created_at >= since) {
            stats.total += 1;
            *stats.by_category.entry(entry.category).or_default() += 1;
            *stats.by_severity.entry(entry.severity).or_default() += 1;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(event_type: &str, category: AuditCategory, minutes_ago: i64) -> AuditEntry {
        AuditEntry::new(event_type, category).at(Utc::now() - Duration::minutes(minutes_ago))
    }

    #[test]
    fn filters_combine_and_results_are_newest_first() {
        let entries = vec![
            entry("invoice_created", AuditCategory::Invoice, 30),
            entry("invoice_modified", AuditCategory::Invoice, 10),
            entry("permission_denied", AuditCategory::Security, 5),
        ];
        let q = AuditQuery {
            category: Some(AuditCategory::Invoice),
            ..Default::default()
        };
        let (page, total) = q.run(&entries);
        assert_eq!(total, 2);
        assert_eq!(page[0].event_type, "invoice_modified");
    }

    #[test]
    fn free_text_hits_entity_name() {
        let mut named = entry("device_created", AuditCategory::Inventory, 1);
        named.entity_name = Some("ThinkPad T480".into());
        let q = AuditQuery {
            search: Some("thinkpad".into()),
            ..Default::default()
        };
        assert!(q.matches(&named));
        assert!(!q.matches(&entry("device_created", AuditCategory::Inventory, 1)));
    }

    #[test]
    fn pagination_is_one_based_and_clamped() {
        let entries: Vec<AuditEntry> = (0..7)
            .map(|i| entry("x", AuditCategory::System, i))
            .collect();
        let q = AuditQuery {
            page: Some(2),
            limit: Some(3),
            ..Default::default()
        };
        let (page, total) = q.run(&entries);
        assert_eq!(total, 7);
        assert_eq!(page.len(), 3);
        assert_eq!(AuditQuery { page: Some(0), limit: Some(0), ..Default::default() }.offset(), 0);
    }

    #[test]
    fn stats_count_only_the_window() {
        let mut old = entry("old", AuditCategory::System, 0);
        old.created_at = Utc::now() - Duration::days(10);
        let entries = vec![
            entry("a", AuditCategory::Invoice, 1),
            entry("b", AuditCategory::Invoice, 2).severity(Severity::Warning),
            old,
        ];
        let stats = AuditStats::compute(&entries, 7, Utc::now());
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_category.get(&AuditCategory::Invoice), Some(&2));
        assert_eq!(stats.by_severity.get(&Severity::Warning), Some(&1));
    }
}
