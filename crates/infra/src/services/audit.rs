//! Audit trail writes, search, stats and export.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use tracing::{info, warn};

use bierp_audit::query::MAX_PAGE_SIZE;
use bierp_audit::{AuditCategory, AuditEntry, AuditQuery, AuditStats, Severity, entries_to_csv};
use bierp_auth::{AuthzError, Principal};
use bierp_events::{Notification, NotificationKind};

use super::{Notifier, ServiceResult, publish};
use crate::store::Store;

/// Best-effort audit writer shared by every service.
///
/// A failed append is logged and swallowed; critical event types also go out
/// as an owner notification.
#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<dyn Store>,
    notifier: Arc<Notifier>,
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<Notifier>) -> Self {
        Self { store, notifier }
    }

    pub async fn record(&self, entry: AuditEntry) {
        if let Err(err) = self.store.append_audit(&entry).await {
            warn!(
                event_type = %entry.event_type,
                error = %err,
                "failed to write audit entry"
            );
        }
        if entry.is_critical() {
            let message = format!("critical audit event: {}", entry.event_type);
            let entity = entry.entity_id.clone().unwrap_or_default();
            let data = json!({
                "event_type": entry.event_type,
                "user_id": entry.user_id,
                "entity_type": entry.entity_type,
                "entity_name": entry.entity_name,
            });
            publish(
                &self.notifier,
                Notification::new(NotificationKind::CriticalAuditEvent, entity, message, data),
            );
        }
    }

    /// Entry pre-filled with the acting principal.
    pub fn entry(
        principal: &Principal,
        event_type: &str,
        category: AuditCategory,
    ) -> AuditEntry {
        AuditEntry::new(event_type, category).actor(principal.user_id, principal.role.as_str())
    }

    /// Record a denied permission check.
    pub async fn permission_denied(&self, principal: &Principal, err: &AuthzError, target: &str) {
        let entry = Self::entry(principal, "permission_denied", AuditCategory::Security)
            .severity(Severity::Warning)
            .metadata(json!({
                "permission": err.permission().code(),
                "code": err.code(),
                "target": target,
            }));
        self.record(entry).await;
    }
}

#[derive(Clone)]
pub struct AuditService {
    store: Arc<dyn Store>,
    recorder: AuditRecorder,
}

impl AuditService {
    pub fn new(store: Arc<dyn Store>, recorder: AuditRecorder) -> Self {
        Self { store, recorder }
    }

    pub fn recorder(&self) -> &AuditRecorder {
        &self.recorder
    }

    pub async fn search(&self, query: &AuditQuery) -> ServiceResult<(Vec<AuditEntry>, usize)> {
        Ok(self.store.search_audit(query).await?)
    }

    /// Counts by category and severity over the last `days` days.
    pub async fn stats(&self, days: u32) -> ServiceResult<AuditStats> {
        let now = Utc::now();
        let since = now - Duration::days(i64::from(days));
        let entries = self.store.audit_since(since).await?;
        Ok(AuditStats::compute(&entries, days, now))
    }

    /// CSV of every entry matching `query`, fetched page by page.
    pub async fn export_csv(&self, principal: &Principal, query: &AuditQuery) -> ServiceResult<String> {
        let mut batch_query = query.clone();
        batch_query.limit = Some(MAX_PAGE_SIZE);
        let mut entries = Vec::new();
        let mut page = 1;
        loop {
            batch_query.page = Some(page);
            let (batch, total) = self.store.search_audit(&batch_query).await?;
            let done = batch.is_empty() || entries.len() + batch.len() >= total;
            entries.extend(batch);
            if done {
                break;
            }
            page += 1;
        }
        let total = entries.len();
        let csv = entries_to_csv(&entries)?;

        let entry = AuditRecorder::entry(principal, "data_exported", AuditCategory::Sensitive)
            .severity(Severity::Warning)
            .metadata(json!({ "export": "audit_logs", "rows": total }));
        self.recorder.record(entry).await;
        info!(rows = total, "audit log exported");
        Ok(csv)
    }
}
