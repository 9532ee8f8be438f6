//! Postgres-backed store.
//!
//! Aggregates are stored as one row each: the indexed columns the list
//! filters need, the optimistic-concurrency `version`, and the full state in a
//! JSONB `body`. Log tables (workflow, device history, audit) are plain
//! columns.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | Invoice number / serial / id already taken |
//! | Database (other) | Any other | `Database` | Constraint or type errors |
//! | PoolClosed | N/A | `Database` | Connection pool was closed |
//! | Other | N/A | `Database` | Network errors, connection failures, etc. |
//!
//! An `UPDATE .. WHERE version = $expected` that touches no row is reported
//! as `Conflict` as well.
//!
//! ## Atomicity
//!
//! [`UnitOfWork::commit`] runs the whole [`ChangeSet`] in one transaction.
//! Any error returns before `commit()`, and dropping the transaction rolls it
//! back.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{FromRow, PgConnection, PgPool, Postgres, QueryBuilder, Row, Transaction};
use tracing::{Span, instrument};
use uuid::Uuid;

use bierp_approvals::Approval;
use bierp_audit::{AuditCategory, AuditEntry, AuditQuery, Severity};
use bierp_core::{
    AggregateRoot, ApprovalId, AuditEntryId, DeviceId, ExpectedVersion, InvoiceId, ProductId,
    UserId,
};
use bierp_inventory::{Device, DeviceHistoryEntry, DeviceStatus, ProductStock};
use bierp_invoicing::{Invoice, InvoiceStatus, Reminder, WorkflowLogEntry};

use super::{
    ApprovalStore, AuditStore, ChangeSet, DeviceFilter, DeviceStore, InvoiceFilter, InvoiceStore,
    SequenceStore, StockChange, StockStore, UnitOfWork, Versioned,
};
use crate::error::{StoreError, map_sqlx_error};

/// Tables and indexes, idempotent.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS invoices (
    id              UUID PRIMARY KEY,
    invoice_number  TEXT NOT NULL UNIQUE,
    invoice_type    TEXT NOT NULL,
    status          TEXT NOT NULL,
    created_by      UUID NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL,
    version         BIGINT NOT NULL CHECK (version > 0),
    body            JSONB NOT NULL
);
CREATE INDEX IF NOT EXISTS invoices_type_status_idx ON invoices (invoice_type, status);
CREATE INDEX IF NOT EXISTS invoices_created_at_idx ON invoices (created_at DESC);

CREATE TABLE IF NOT EXISTS invoice_workflow_log (
    id           BIGSERIAL PRIMARY KEY,
    invoice_id   UUID NOT NULL,
    from_status  TEXT,
    to_status    TEXT NOT NULL,
    action       TEXT NOT NULL,
    notes        TEXT,
    actor_id     UUID NOT NULL,
    actor_role   TEXT NOT NULL,
    created_at   TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS invoice_workflow_log_invoice_idx ON invoice_workflow_log (invoice_id, id);

CREATE TABLE IF NOT EXISTS invoice_reminders (
    id          UUID PRIMARY KEY,
    invoice_id  UUID NOT NULL,
    remind_at   TIMESTAMPTZ NOT NULL,
    created_by  UUID NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS invoice_reminders_invoice_idx ON invoice_reminders (invoice_id);

CREATE TABLE IF NOT EXISTS devices (
    id             UUID PRIMARY KEY,
    serial_number  TEXT NOT NULL UNIQUE,
    product_id     TEXT NOT NULL,
    status         TEXT NOT NULL,
    warehouse_id   TEXT NOT NULL,
    deleted        BOOLEAN NOT NULL DEFAULT FALSE,
    created_at     TIMESTAMPTZ NOT NULL,
    version        BIGINT NOT NULL CHECK (version > 0),
    body           JSONB NOT NULL
);
CREATE INDEX IF NOT EXISTS devices_status_idx ON devices (status) WHERE NOT deleted;

CREATE TABLE IF NOT EXISTS device_history (
    id            BIGSERIAL PRIMARY KEY,
    device_id     UUID NOT NULL,
    action        TEXT NOT NULL,
    from_status   TEXT,
    to_status     TEXT,
    details       TEXT NOT NULL,
    performed_by  UUID NOT NULL,
    created_at    TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS device_history_device_idx ON device_history (device_id, id);

CREATE TABLE IF NOT EXISTS approvals (
    id               UUID PRIMARY KEY,
    approval_number  TEXT NOT NULL,
    approval_type    TEXT NOT NULL,
    status           TEXT NOT NULL,
    requested_by     UUID NOT NULL,
    created_at       TIMESTAMPTZ NOT NULL,
    version          BIGINT NOT NULL CHECK (version > 0),
    body             JSONB NOT NULL
);
CREATE INDEX IF NOT EXISTS approvals_status_idx ON approvals (status, created_at DESC);

CREATE TABLE IF NOT EXISTS product_stock (
    product_id          TEXT PRIMARY KEY,
    quantity            BIGINT NOT NULL DEFAULT 0,
    last_purchase_cost  BIGINT
);

CREATE TABLE IF NOT EXISTS sequences (
    name   TEXT PRIMARY KEY,
    value  BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS audit_logs (
    id           UUID PRIMARY KEY,
    event_type   TEXT NOT NULL,
    category     TEXT NOT NULL,
    severity     TEXT NOT NULL,
    user_id      UUID,
    user_role    TEXT,
    entity_type  TEXT,
    entity_id    TEXT,
    entity_name  TEXT,
    old_value    JSONB,
    new_value    JSONB,
    metadata     JSONB,
    created_at   TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS audit_logs_created_at_idx ON audit_logs (created_at DESC);

CREATE TABLE IF NOT EXISTS event_journal (
    id              UUID PRIMARY KEY,
    record_id       UUID NOT NULL,
    record_kind     TEXT NOT NULL,
    revision        BIGINT NOT NULL CHECK (revision > 0),
    name            TEXT NOT NULL,
    schema_version  INTEGER NOT NULL,
    occurred_at     TIMESTAMPTZ NOT NULL,
    payload         JSONB NOT NULL,
    UNIQUE (record_id, revision)
);
"#;

/// Postgres-backed implementation of every store trait.
///
/// ## Thread Safety
///
/// Uses the SQLx connection pool, which is `Send + Sync`; clones share it.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool against `database_url`.
    #[instrument(skip(database_url), err)]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create missing tables and indexes.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    async fn fetch_body<T>(&self, op: &str, sql: &str, id: Uuid) -> Result<Option<T>, StoreError>
    where
        T: DeserializeOwned + Send + Unpin + 'static,
    {
        let row: Option<Json<T>> = sqlx::query_scalar(sql)
            .bind(id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(op, e))?;
        Ok(row.map(|Json(body)| body))
    }
}

fn day_start(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(NaiveTime::MIN).and_utc()
}

/// `None` skips the version predicate (`ExpectedVersion::Any`).
fn version_guard(expected: ExpectedVersion) -> Option<i64> {
    match expected {
        ExpectedVersion::Exact(v) => Some(v as i64),
        ExpectedVersion::Any | ExpectedVersion::New => None,
    }
}

fn ensure_updated(kind: &str, id: impl core::fmt::Display, rows: u64) -> Result<(), StoreError> {
    if rows == 0 {
        return Err(StoreError::Conflict(format!(
            "{kind} {id} changed concurrently or does not exist"
        )));
    }
    Ok(())
}

fn body<T: Serialize>(state: &T) -> Json<&T> {
    Json(state)
}

async fn write_invoice(
    conn: &mut PgConnection,
    v: &Versioned<Invoice>,
) -> Result<(), StoreError> {
    let inv = &v.state;
    if v.expected == ExpectedVersion::New {
        sqlx::query(
            r#"
            INSERT INTO invoices
                (id, invoice_number, invoice_type, status, created_by, created_at, version, body)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(inv.id_typed().as_uuid())
        .bind(inv.invoice_number())
        .bind(inv.invoice_type().as_str())
        .bind(inv.status().as_str())
        .bind(inv.created_by().as_uuid())
        .bind(inv.created_at())
        .bind(inv.version() as i64)
        .bind(body(inv))
        .execute(conn)
        .await
        .map_err(|e| map_sqlx_error("insert_invoice", e))?;
        return Ok(());
    }

    let result = sqlx::query(
        r#"
        UPDATE invoices
        SET status = $2, version = $3, body = $4
        WHERE id = $1 AND ($5::BIGINT IS NULL OR version = $5)
        "#,
    )
    .bind(inv.id_typed().as_uuid())
    .bind(inv.status().as_str())
    .bind(inv.version() as i64)
    .bind(body(inv))
    .bind(version_guard(v.expected))
    .execute(conn)
    .await
    .map_err(|e| map_sqlx_error("update_invoice", e))?;
    ensure_updated("invoice", inv.id_typed(), result.rows_affected())
}

async fn write_device(conn: &mut PgConnection, v: &Versioned<Device>) -> Result<(), StoreError> {
    let dev = &v.state;
    if v.expected == ExpectedVersion::New {
        sqlx::query(
            r#"
            INSERT INTO devices
                (id, serial_number, product_id, status, warehouse_id, deleted, created_at, version, body)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(dev.id_typed().as_uuid())
        .bind(dev.serial_number().to_string())
        .bind(dev.product_id().as_str())
        .bind(dev.status().as_str())
        .bind(dev.warehouse_id().as_str())
        .bind(dev.is_deleted())
        .bind(dev.created_at())
        .bind(dev.version() as i64)
        .bind(body(dev))
        .execute(conn)
        .await
        .map_err(|e| map_sqlx_error("insert_device", e))?;
        return Ok(());
    }

    let result = sqlx::query(
        r#"
        UPDATE devices
        SET status = $2, warehouse_id = $3, deleted = $4, version = $5, body = $6
        WHERE id = $1 AND ($7::BIGINT IS NULL OR version = $7)
        "#,
    )
    .bind(dev.id_typed().as_uuid())
    .bind(dev.status().as_str())
    .bind(dev.warehouse_id().as_str())
    .bind(dev.is_deleted())
    .bind(dev.version() as i64)
    .bind(body(dev))
    .bind(version_guard(v.expected))
    .execute(conn)
    .await
    .map_err(|e| map_sqlx_error("update_device", e))?;
    ensure_updated("device", dev.id_typed(), result.rows_affected())
}

async fn write_approval(
    conn: &mut PgConnection,
    v: &Versioned<Approval>,
) -> Result<(), StoreError> {
    let apr = &v.state;
    if v.expected == ExpectedVersion::New {
        sqlx::query(
            r#"
            INSERT INTO approvals
                (id, approval_number, approval_type, status, requested_by, created_at, version, body)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(apr.id_typed().as_uuid())
        .bind(apr.approval_number())
        .bind(apr.approval_type().as_str())
        .bind(apr.status().as_str())
        .bind(apr.requested_by().as_uuid())
        .bind(apr.created_at())
        .bind(apr.version() as i64)
        .bind(body(apr))
        .execute(conn)
        .await
        .map_err(|e| map_sqlx_error("insert_approval", e))?;
        return Ok(());
    }

    let result = sqlx::query(
        r#"
        UPDATE approvals
        SET status = $2, version = $3, body = $4
        WHERE id = $1 AND ($5::BIGINT IS NULL OR version = $5)
        "#,
    )
    .bind(apr.id_typed().as_uuid())
    .bind(apr.status().as_str())
    .bind(apr.version() as i64)
    .bind(body(apr))
    .bind(version_guard(v.expected))
    .execute(conn)
    .await
    .map_err(|e| map_sqlx_error("update_approval", e))?;
    ensure_updated("approval", apr.id_typed(), result.rows_affected())
}

async fn insert_workflow(
    conn: &mut PgConnection,
    entry: &WorkflowLogEntry,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO invoice_workflow_log
            (invoice_id, from_status, to_status, action, notes, actor_id, actor_role, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(entry.invoice_id.as_uuid())
    .bind(entry.from_status.map(|s| s.as_str()))
    .bind(entry.to_status.as_str())
    .bind(&entry.action)
    .bind(&entry.notes)
    .bind(entry.actor_id.as_uuid())
    .bind(&entry.actor_role)
    .bind(entry.created_at)
    .execute(conn)
    .await
    .map_err(|e| map_sqlx_error("insert_workflow", e))?;
    Ok(())
}

async fn insert_history(
    conn: &mut PgConnection,
    entry: &DeviceHistoryEntry,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO device_history
            (device_id, action, from_status, to_status, details, performed_by, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(entry.device_id.as_uuid())
    .bind(&entry.action)
    .bind(entry.from_status.map(|s| s.as_str()))
    .bind(entry.to_status.map(|s| s.as_str()))
    .bind(&entry.details)
    .bind(entry.performed_by.as_uuid())
    .bind(entry.created_at)
    .execute(conn)
    .await
    .map_err(|e| map_sqlx_error("insert_device_history", e))?;
    Ok(())
}

async fn write_stock(conn: &mut PgConnection, change: &StockChange) -> Result<(), StoreError> {
    let query = match change {
        StockChange::Adjust { product_id, delta } => sqlx::query(
            r#"
            INSERT INTO product_stock (product_id, quantity) VALUES ($1, $2)
            ON CONFLICT (product_id) DO UPDATE
            SET quantity = product_stock.quantity + EXCLUDED.quantity
            "#,
        )
        .bind(product_id.as_str())
        .bind(*delta),
        StockChange::Receive {
            product_id,
            quantity,
            unit_cost,
        } => sqlx::query(
            r#"
            INSERT INTO product_stock (product_id, quantity, last_purchase_cost) VALUES ($1, $2, $3)
            ON CONFLICT (product_id) DO UPDATE
            SET quantity = product_stock.quantity + EXCLUDED.quantity,
                last_purchase_cost = EXCLUDED.last_purchase_cost
            "#,
        )
        .bind(product_id.as_str())
        .bind(*quantity)
        .bind(*unit_cost as i64),
        StockChange::Set {
            product_id,
            quantity,
        } => sqlx::query(
            r#"
            INSERT INTO product_stock (product_id, quantity) VALUES ($1, $2)
            ON CONFLICT (product_id) DO UPDATE SET quantity = EXCLUDED.quantity
            "#,
        )
        .bind(product_id.as_str())
        .bind(*quantity),
    };
    query
        .execute(conn)
        .await
        .map_err(|e| map_sqlx_error("write_stock", e))?;
    Ok(())
}

async fn commit_in(tx: &mut Transaction<'_, Postgres>, changes: &ChangeSet) -> Result<(), StoreError> {
    for v in &changes.invoices {
        write_invoice(&mut **tx, v).await?;
    }
    for v in &changes.devices {
        write_device(&mut **tx, v).await?;
    }
    for v in &changes.approvals {
        write_approval(&mut **tx, v).await?;
    }
    for entry in &changes.workflow {
        insert_workflow(&mut **tx, entry).await?;
    }
    for entry in &changes.device_history {
        insert_history(&mut **tx, entry).await?;
    }
    if !changes.clear_reminders.is_empty() {
        let ids: Vec<Uuid> = changes
            .clear_reminders
            .iter()
            .map(|id| *id.as_uuid())
            .collect();
        sqlx::query("DELETE FROM invoice_reminders WHERE invoice_id = ANY($1)")
            .bind(ids)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("clear_reminders", e))?;
    }
    for reminder in &changes.reminders {
        sqlx::query(
            r#"
            INSERT INTO invoice_reminders (id, invoice_id, remind_at, created_by, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(reminder.id)
        .bind(reminder.invoice_id.as_uuid())
        .bind(reminder.remind_at)
        .bind(reminder.created_by.as_uuid())
        .bind(reminder.created_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_reminder", e))?;
    }
    for change in &changes.stock {
        write_stock(&mut **tx, change).await?;
    }
    for envelope in &changes.journal {
        sqlx::query(
            r#"
            INSERT INTO event_journal (
                id, record_id, record_kind, revision,
                name, schema_version, occurred_at, payload
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(envelope.id())
        .bind(envelope.record_id())
        .bind(envelope.record_kind())
        .bind(envelope.revision() as i64)
        .bind(envelope.name())
        .bind(envelope.schema_version() as i32)
        .bind(envelope.occurred_at())
        .bind(Json(envelope.payload()))
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_journal_event", e))?;
    }
    Ok(())
}

struct WorkflowRow(WorkflowLogEntry);

impl<'r> FromRow<'r, PgRow> for WorkflowRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let from_status: Option<String> = row.try_get("from_status")?;
        let to_status: String = row.try_get("to_status")?;
        Ok(WorkflowRow(WorkflowLogEntry {
            invoice_id: InvoiceId::from_uuid(row.try_get("invoice_id")?),
            from_status: from_status.as_deref().map(parse_invoice_status).transpose()?,
            to_status: parse_invoice_status(&to_status)?,
            action: row.try_get("action")?,
            notes: row.try_get("notes")?,
            actor_id: UserId::from_uuid(row.try_get("actor_id")?),
            actor_role: row.try_get("actor_role")?,
            created_at: row.try_get("created_at")?,
        }))
    }
}

fn decode_error(column: &str, value: &str) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: format!("unknown value '{value}'").into(),
    }
}

fn parse_invoice_status(value: &str) -> Result<InvoiceStatus, sqlx::Error> {
    InvoiceStatus::parse(value).ok_or_else(|| decode_error("status", value))
}

fn parse_device_status(value: &str) -> Result<DeviceStatus, sqlx::Error> {
    DeviceStatus::parse(value).ok_or_else(|| decode_error("status", value))
}

struct HistoryRow(DeviceHistoryEntry);

impl<'r> FromRow<'r, PgRow> for HistoryRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let from_status: Option<String> = row.try_get("from_status")?;
        let to_status: Option<String> = row.try_get("to_status")?;
        Ok(HistoryRow(DeviceHistoryEntry {
            device_id: DeviceId::from_uuid(row.try_get("device_id")?),
            action: row.try_get("action")?,
            from_status: from_status.as_deref().map(parse_device_status).transpose()?,
            to_status: to_status.as_deref().map(parse_device_status).transpose()?,
            details: row.try_get("details")?,
            performed_by: UserId::from_uuid(row.try_get("performed_by")?),
            created_at: row.try_get("created_at")?,
        }))
    }
}

struct AuditRow(AuditEntry);

impl<'r> FromRow<'r, PgRow> for AuditRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let category: String = row.try_get("category")?;
        let severity: String = row.try_get("severity")?;
        let user_id: Option<Uuid> = row.try_get("user_id")?;
        let old_value: Option<Json<serde_json::Value>> = row.try_get("old_value")?;
        let new_value: Option<Json<serde_json::Value>> = row.try_get("new_value")?;
        let metadata: Option<Json<serde_json::Value>> = row.try_get("metadata")?;
        Ok(AuditRow(AuditEntry {
            id: AuditEntryId::from_uuid(row.try_get("id")?),
            event_type: row.try_get("event_type")?,
            category: AuditCategory::parse(&category)
                .ok_or_else(|| decode_error("category", &category))?,
            severity: Severity::parse(&severity)
                .ok_or_else(|| decode_error("severity", &severity))?,
            user_id: user_id.map(UserId::from_uuid),
            user_role: row.try_get("user_role")?,
            entity_type: row.try_get("entity_type")?,
            entity_id: row.try_get("entity_id")?,
            entity_name: row.try_get("entity_name")?,
            old_value: old_value.map(|Json(v)| v),
            new_value: new_value.map(|Json(v)| v),
            metadata: metadata.map(|Json(v)| v),
            created_at: row.try_get("created_at")?,
        }))
    }
}

const AUDIT_COLUMNS: &str = "id, event_type, category, severity, user_id, user_role, \
     entity_type, entity_id, entity_name, old_value, new_value, metadata, created_at";

fn push_audit_filters(qb: &mut QueryBuilder<'_, Postgres>, query: &AuditQuery) {
    qb.push(" WHERE TRUE");
    if let Some(from) = query.from {
        qb.push(" AND created_at >= ").push_bind(from);
    }
    if let Some(to) = query.to {
        qb.push(" AND created_at <= ").push_bind(to);
    }
    if let Some(event_type) = &query.event_type {
        qb.push(" AND event_type = ").push_bind(event_type.clone());
    }
    if let Some(category) = query.category {
        qb.push(" AND category = ").push_bind(category.as_str());
    }
    if let Some(severity) = query.severity {
        qb.push(" AND severity = ").push_bind(severity.as_str());
    }
    if let Some(user_id) = query.user_id {
        qb.push(" AND user_id = ").push_bind(*user_id.as_uuid());
    }
    if let Some(entity_type) = &query.entity_type {
        qb.push(" AND entity_type = ").push_bind(entity_type.clone());
    }
    if let Some(entity_id) = &query.entity_id {
        qb.push(" AND entity_id = ").push_bind(entity_id.clone());
    }
    if let Some(search) = &query.search {
        let needle = search.to_lowercase();
        qb.push(" AND (strpos(lower(event_type), ")
            .push_bind(needle.clone())
            .push(") > 0 OR strpos(lower(coalesce(entity_name, '')), ")
            .push_bind(needle)
            .push(") > 0)");
    }
}

#[async_trait]
impl InvoiceStore for PostgresStore {
    #[instrument(skip(self), fields(invoice_id = %id), err)]
    async fn get_invoice(&self, id: InvoiceId) -> Result<Option<Invoice>, StoreError> {
        self.fetch_body(
            "get_invoice",
            "SELECT body FROM invoices WHERE id = $1",
            *id.as_uuid(),
        )
        .await
    }

    #[instrument(skip(self, filter), fields(invoice_count = tracing::field::Empty), err)]
    async fn list_invoices(&self, filter: &InvoiceFilter) -> Result<Vec<Invoice>, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT body FROM invoices WHERE TRUE");
        if let Some(invoice_type) = filter.invoice_type {
            qb.push(" AND invoice_type = ").push_bind(invoice_type.as_str());
        }
        match filter.status {
            Some(status) => {
                qb.push(" AND status = ").push_bind(status.as_str());
            }
            None => {
                qb.push(" AND status <> 'deleted'");
            }
        }
        if let Some(from) = filter.date_from {
            qb.push(" AND created_at >= ").push_bind(day_start(from));
        }
        if let Some(next) = filter.date_to.and_then(|to| to.succ_opt()) {
            qb.push(" AND created_at < ").push_bind(day_start(next));
        }
        if let Some(created_by) = filter.created_by {
            qb.push(" AND created_by = ").push_bind(*created_by.as_uuid());
        }
        qb.push(" ORDER BY created_at DESC");

        let rows: Vec<Json<Invoice>> = qb
            .build_query_scalar()
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_invoices", e))?;

        let invoices: Vec<Invoice> = rows
            .into_iter()
            .map(|Json(i)| i)
            .filter(|i| filter.matches(i))
            .collect();
        Span::current().record("invoice_count", invoices.len());
        Ok(invoices)
    }

    #[instrument(skip(self), fields(invoice_id = %id), err)]
    async fn workflow_log(&self, id: InvoiceId) -> Result<Vec<WorkflowLogEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT invoice_id, from_status, to_status, action, notes, actor_id, actor_role, created_at
            FROM invoice_workflow_log
            WHERE invoice_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("workflow_log", e))?;

        rows.iter()
            .map(|row| {
                WorkflowRow::from_row(row)
                    .map(|r| r.0)
                    .map_err(|e| map_sqlx_error("workflow_log", e))
            })
            .collect()
    }

    #[instrument(skip(self), fields(invoice_id = %id), err)]
    async fn reminders(&self, id: InvoiceId) -> Result<Vec<Reminder>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, invoice_id, remind_at, created_by, created_at
            FROM invoice_reminders
            WHERE invoice_id = $1
            ORDER BY remind_at ASC
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("reminders", e))?;

        rows.iter()
            .map(|row| {
                Ok(Reminder {
                    id: row.try_get("id")?,
                    invoice_id: InvoiceId::from_uuid(row.try_get("invoice_id")?),
                    remind_at: row.try_get("remind_at")?,
                    created_by: UserId::from_uuid(row.try_get("created_by")?),
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| map_sqlx_error("reminders", e))
    }
}

#[async_trait]
impl DeviceStore for PostgresStore {
    #[instrument(skip(self), fields(device_id = %id), err)]
    async fn get_device(&self, id: DeviceId) -> Result<Option<Device>, StoreError> {
        self.fetch_body(
            "get_device",
            "SELECT body FROM devices WHERE id = $1",
            *id.as_uuid(),
        )
        .await
    }

    #[instrument(skip(self), err)]
    async fn find_device_by_serial(&self, serial: &str) -> Result<Option<Device>, StoreError> {
        let row: Option<Json<Device>> =
            sqlx::query_scalar("SELECT body FROM devices WHERE serial_number = $1")
                .bind(serial)
                .fetch_optional(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("find_device_by_serial", e))?;
        Ok(row.map(|Json(d)| d))
    }

    #[instrument(skip(self, filter), err)]
    async fn list_devices(&self, filter: &DeviceFilter) -> Result<Vec<Device>, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT body FROM devices WHERE NOT deleted");
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(warehouse) = &filter.warehouse_id {
            qb.push(" AND warehouse_id = ").push_bind(warehouse.clone());
        }
        if let Some(product) = &filter.product_id {
            qb.push(" AND product_id = ").push_bind(product.clone());
        }
        qb.push(" ORDER BY created_at DESC, serial_number DESC");

        let rows: Vec<Json<Device>> = qb
            .build_query_scalar()
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_devices", e))?;
        Ok(rows
            .into_iter()
            .map(|Json(d)| d)
            .filter(|d| filter.matches(d))
            .collect())
    }

    #[instrument(skip(self), fields(device_id = %id), err)]
    async fn device_history(&self, id: DeviceId) -> Result<Vec<DeviceHistoryEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT device_id, action, from_status, to_status, details, performed_by, created_at
            FROM device_history
            WHERE device_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("device_history", e))?;

        rows.iter()
            .map(|row| {
                HistoryRow::from_row(row)
                    .map(|r| r.0)
                    .map_err(|e| map_sqlx_error("device_history", e))
            })
            .collect()
    }

    #[instrument(skip(self, rows), fields(row_count = rows.len()), err)]
    async fn append_device_history(&self, rows: &[DeviceHistoryEntry]) -> Result<(), StoreError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;
        for entry in rows {
            insert_history(&mut *conn, entry).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ApprovalStore for PostgresStore {
    #[instrument(skip(self), fields(approval_id = %id), err)]
    async fn get_approval(&self, id: ApprovalId) -> Result<Option<Approval>, StoreError> {
        self.fetch_body(
            "get_approval",
            "SELECT body FROM approvals WHERE id = $1",
            *id.as_uuid(),
        )
        .await
    }

    #[instrument(skip(self), err)]
    async fn list_approvals(&self) -> Result<Vec<Approval>, StoreError> {
        let rows: Vec<Json<Approval>> =
            sqlx::query_scalar("SELECT body FROM approvals ORDER BY created_at DESC")
                .fetch_all(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("list_approvals", e))?;
        Ok(rows.into_iter().map(|Json(a)| a).collect())
    }
}

#[async_trait]
impl AuditStore for PostgresStore {
    #[instrument(skip(self, entry), fields(event_type = %entry.event_type), err)]
    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (
                id, event_type, category, severity, user_id, user_role,
                entity_type, entity_id, entity_name, old_value, new_value, metadata, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(&entry.event_type)
        .bind(entry.category.as_str())
        .bind(entry.severity.as_str())
        .bind(entry.user_id.map(|u| *u.as_uuid()))
        .bind(&entry.user_role)
        .bind(&entry.entity_type)
        .bind(&entry.entity_id)
        .bind(&entry.entity_name)
        .bind(entry.old_value.as_ref().map(Json))
        .bind(entry.new_value.as_ref().map(Json))
        .bind(entry.metadata.as_ref().map(Json))
        .bind(entry.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("append_audit", e))?;
        Ok(())
    }

    #[instrument(skip(self, query), err)]
    async fn search_audit(&self, query: &AuditQuery) -> Result<(Vec<AuditEntry>, usize), StoreError> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM audit_logs");
        push_audit_filters(&mut count, query);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_audit", e))?;

        let mut select = QueryBuilder::<Postgres>::new("SELECT ");
        select.push(AUDIT_COLUMNS).push(" FROM audit_logs");
        push_audit_filters(&mut select, query);
        select
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(query.limit() as i64)
            .push(" OFFSET ")
            .push_bind(query.offset() as i64);

        let rows = select
            .build()
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("search_audit", e))?;
        let entries = rows
            .iter()
            .map(|row| AuditRow::from_row(row).map(|r| r.0))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_sqlx_error("search_audit", e))?;
        Ok((entries, total as usize))
    }

    #[instrument(skip(self), err)]
    async fn audit_since(&self, since: DateTime<Utc>) -> Result<Vec<AuditEntry>, StoreError> {
        let mut select = QueryBuilder::<Postgres>::new("SELECT ");
        select
            .push(AUDIT_COLUMNS)
            .push(" FROM audit_logs WHERE created_at >= ")
            .push_bind(since)
            .push(" ORDER BY created_at DESC");
        let rows = select
            .build()
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("audit_since", e))?;
        rows.iter()
            .map(|row| AuditRow::from_row(row).map(|r| r.0))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_sqlx_error("audit_since", e))
    }
}

fn stock_from_row(row: &PgRow) -> Result<ProductStock, sqlx::Error> {
    let product_id: String = row.try_get("product_id")?;
    let last_cost: Option<i64> = row.try_get("last_purchase_cost")?;
    Ok(ProductStock {
        product_id: ProductId::parse(product_id.clone())
            .map_err(|_| decode_error("product_id", &product_id))?,
        quantity: row.try_get("quantity")?,
        last_purchase_cost: last_cost.map(|c| c as u64),
    })
}

#[async_trait]
impl StockStore for PostgresStore {
    #[instrument(skip(self), fields(product_id = %product_id), err)]
    async fn get_stock(&self, product_id: &ProductId) -> Result<Option<ProductStock>, StoreError> {
        let row = sqlx::query(
            "SELECT product_id, quantity, last_purchase_cost FROM product_stock WHERE product_id = $1",
        )
        .bind(product_id.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_stock", e))?;
        row.as_ref()
            .map(stock_from_row)
            .transpose()
            .map_err(|e| map_sqlx_error("get_stock", e))
    }

    #[instrument(skip(self), err)]
    async fn list_stock(&self) -> Result<Vec<ProductStock>, StoreError> {
        let rows = sqlx::query(
            "SELECT product_id, quantity, last_purchase_cost FROM product_stock ORDER BY product_id",
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_stock", e))?;
        rows.iter()
            .map(stock_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_sqlx_error("list_stock", e))
    }
}

#[async_trait]
impl SequenceStore for PostgresStore {
    #[instrument(skip(self), err)]
    async fn reserve(&self, name: &str, count: u64) -> Result<u64, StoreError> {
        let last: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO sequences (name, value) VALUES ($1, $2)
            ON CONFLICT (name) DO UPDATE SET value = sequences.value + EXCLUDED.value
            RETURNING value
            "#,
        )
        .bind(name)
        .bind(count as i64)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("reserve_sequence", e))?;
        Ok(last as u64 + 1 - count)
    }
}

#[async_trait]
impl UnitOfWork for PostgresStore {
    #[instrument(
        skip(self, changes),
        fields(
            invoices = changes.invoices.len(),
            devices = changes.devices.len(),
            approvals = changes.approvals.len(),
            events = changes.journal.len()
        ),
        err
    )]
    async fn commit(&self, changes: ChangeSet) -> Result<(), StoreError> {
        if changes.is_empty() {
            return Ok(());
        }
        changes.ensure_distinct()?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        commit_in(&mut tx, &changes).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }
}
