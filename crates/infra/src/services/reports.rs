//! Read-only reports over live sale invoices.
//!
//! The base set is every sale or installment invoice in the period whose
//! status is not cancelled, voided or deleted.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use bierp_audit::{AuditCategory, Severity, write_csv};
use bierp_auth::Principal;
use bierp_core::{ProductId, UserId};
use bierp_inventory::ProductStock;
use bierp_invoicing::Invoice;

use super::{AuditRecorder, ServiceError, ServiceResult};
use crate::store::{InvoiceFilter, Store};

/// Inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Period {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl Period {
    /// `YYYY-MM`.
    pub fn month(value: &str) -> ServiceResult<Self> {
        let invalid = || ServiceError::validation(format!("invalid month '{value}', expected YYYY-MM"));
        let first = NaiveDate::parse_from_str(&format!("{}-01", value.trim()), "%Y-%m-%d")
            .map_err(|_| invalid())?;
        let next = first
            .checked_add_months(chrono::Months::new(1))
            .ok_or_else(invalid)?;
        Ok(Self {
            from: first,
            to: next.pred_opt().ok_or_else(invalid)?,
        })
    }

    pub fn between(from: NaiveDate, to: NaiveDate) -> ServiceResult<Self> {
        if from > to {
            return Err(ServiceError::validation("date_from must not be after date_to"));
        }
        Ok(Self { from, to })
    }

    /// First of this month through today.
    pub fn month_to_date(today: NaiveDate) -> Self {
        Self {
            from: today.with_day(1).unwrap_or(today),
            to: today,
        }
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.from <= day && day <= self.to
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmployeeSales {
    pub employee_id: UserId,
    pub invoice_count: usize,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductProfit {
    pub product_id: ProductId,
    pub quantity: i64,
    pub revenue: u64,
    /// `None` when the product has never been purchased.
    pub cost: Option<u64>,
    pub profit: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Profitability {
    pub period: Period,
    pub revenue: u64,
    /// Sum over products with a known cost.
    pub cost: u64,
    pub margin: i64,
    pub margin_percent: f64,
    pub products_without_cost: usize,
    pub products: Vec<ProductProfit>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MethodFlow {
    pub invoice_count: usize,
    pub invoiced: u64,
    pub received: u64,
    pub pending: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CashFlow {
    pub period: Period,
    pub invoiced: u64,
    pub received: u64,
    pub pending: u64,
    pub by_payment_method: BTreeMap<String, MethodFlow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Sales,
    SalesByEmployee,
    Inventory,
}

impl ReportKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "sales" => Some(ReportKind::Sales),
            "sales-by-employee" => Some(ReportKind::SalesByEmployee),
            "inventory" => Some(ReportKind::Inventory),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::Sales => "sales",
            ReportKind::SalesByEmployee => "sales-by-employee",
            ReportKind::Inventory => "inventory",
        }
    }
}

#[derive(Clone)]
pub struct ReportService {
    store: Arc<dyn Store>,
    recorder: AuditRecorder,
}

impl ReportService {
    pub fn new(store: Arc<dyn Store>, recorder: AuditRecorder) -> Self {
        Self { store, recorder }
    }

    async fn sales(&self, period: Period) -> ServiceResult<Vec<Invoice>> {
        let filter = InvoiceFilter {
            date_from: Some(period.from),
            date_to: Some(period.to),
            ..InvoiceFilter::default()
        };
        Ok(self
            .store
            .list_invoices(&filter)
            .await?
            .into_iter()
            .filter(|i| i.invoice_type().is_sale() && !i.status().is_dead())
            .collect())
    }

    fn period_or_default(period: Option<Period>) -> Period {
        period.unwrap_or_else(|| Period::month_to_date(Utc::now().date_naive()))
    }

    /// Highest total first.
    pub async fn sales_by_employee(
        &self,
        period: Option<Period>,
        limit: usize,
    ) -> ServiceResult<Vec<EmployeeSales>> {
        let invoices = self.sales(Self::period_or_default(period)).await?;
        let mut by_user: HashMap<UserId, EmployeeSales> = HashMap::new();
        for invoice in &invoices {
            let row = by_user
                .entry(invoice.created_by())
                .or_insert_with(|| EmployeeSales {
                    employee_id: invoice.created_by(),
                    invoice_count: 0,
                    total: 0,
                });
            row.invoice_count += 1;
            row.total += invoice.total();
        }
        let mut rows: Vec<_> = by_user.into_values().collect();
        rows.sort_by(|a, b| b.total.cmp(&a.total).then(a.employee_id.cmp(&b.employee_id)));
        rows.truncate(limit.max(1));
        Ok(rows)
    }

    /// Revenue is invoice totals after discount; cost uses each product's last
    /// purchase cost.
    pub async fn profitability(&self, period: Option<Period>) -> ServiceResult<Profitability> {
        let period = Self::period_or_default(period);
        let invoices = self.sales(period).await?;
        let costs: HashMap<ProductId, Option<u64>> = self
            .store
            .list_stock()
            .await?
            .into_iter()
            .map(|s| (s.product_id, s.last_purchase_cost))
            .collect();

        let mut lines: BTreeMap<ProductId, (i64, u64)> = BTreeMap::new();
        for line in invoices.iter().flat_map(|i| i.items()) {
            let slot = lines.entry(line.product_id.clone()).or_default();
            slot.0 += line.quantity;
            slot.1 += line.line_total;
        }

        let products: Vec<ProductProfit> = lines
            .into_iter()
            .map(|(product_id, (quantity, revenue))| {
                let cost = costs
                    .get(&product_id)
                    .copied()
                    .flatten()
                    .map(|unit| unit.saturating_mul(quantity.max(0) as u64));
                ProductProfit {
                    profit: cost.map(|c| revenue as i64 - c as i64),
                    product_id,
                    quantity,
                    revenue,
                    cost,
                }
            })
            .collect();

        let revenue: u64 = invoices.iter().map(|i| i.total()).sum();
        let cost: u64 = products.iter().filter_map(|p| p.cost).sum();
        let margin = revenue as i64 - cost as i64;
        let margin_percent = if revenue == 0 {
            0.0
        } else {
            (margin as f64 / revenue as f64 * 10_000.0).round() / 100.0
        };
        Ok(Profitability {
            period,
            revenue,
            cost,
            margin,
            margin_percent,
            products_without_cost: products.iter().filter(|p| p.cost.is_none()).count(),
            products,
        })
    }

    pub async fn cash_flow(&self, period: Option<Period>) -> ServiceResult<CashFlow> {
        let period = Self::period_or_default(period);
        let invoices = self.sales(period).await?;
        let mut by_payment_method: BTreeMap<String, MethodFlow> = BTreeMap::new();
        for invoice in &invoices {
            let flow = by_payment_method
                .entry(invoice.payment_method().as_str().to_string())
                .or_default();
            flow.invoice_count += 1;
            flow.invoiced += invoice.total();
            flow.received += invoice.paid_amount();
            flow.pending += invoice.remaining_amount();
        }
        Ok(CashFlow {
            period,
            invoiced: by_payment_method.values().map(|f| f.invoiced).sum(),
            received: by_payment_method.values().map(|f| f.received).sum(),
            pending: by_payment_method.values().map(|f| f.pending).sum(),
            by_payment_method,
        })
    }

    pub async fn stock_levels(&self) -> ServiceResult<Vec<ProductStock>> {
        Ok(self.store.list_stock().await?)
    }

    /// CSV export; the export itself lands in the audit log.
    pub async fn export_csv(
        &self,
        principal: &Principal,
        kind: ReportKind,
        period: Option<Period>,
    ) -> ServiceResult<String> {
        let period = Self::period_or_default(period);
        let (csv, rows) = match kind {
            ReportKind::Sales => {
                let mut days: BTreeMap<NaiveDate, (usize, u64, u64)> = BTreeMap::new();
                for invoice in self.sales(period).await? {
                    let day = days.entry(invoice.created_at().date_naive()).or_default();
                    day.0 += 1;
                    day.1 += invoice.total();
                    day.2 += invoice.paid_amount();
                }
                let rows = days.len();
                let csv = write_csv(
                    &["date", "invoice_count", "total", "paid"],
                    days.into_iter().map(|(day, (count, total, paid))| {
                        vec![day.to_string(), count.to_string(), total.to_string(), paid.to_string()]
                    }),
                )?;
                (csv, rows)
            }
            ReportKind::SalesByEmployee => {
                let sales = self.sales_by_employee(Some(period), usize::MAX).await?;
                let rows = sales.len();
                let csv = write_csv(
                    &["employee_id", "invoice_count", "total"],
                    sales.into_iter().map(|s| {
                        vec![
                            s.employee_id.to_string(),
                            s.invoice_count.to_string(),
                            s.total.to_string(),
                        ]
                    }),
                )?;
                (csv, rows)
            }
            ReportKind::Inventory => {
                let stock = self.stock_levels().await?;
                let rows = stock.len();
                let csv = write_csv(
                    &["product_id", "quantity", "last_purchase_cost"],
                    stock.into_iter().map(|s| {
                        vec![
                            s.product_id.to_string(),
                            s.quantity.to_string(),
                            s.last_purchase_cost.map(|c| c.to_string()).unwrap_or_default(),
                        ]
                    }),
                )?;
                (csv, rows)
            }
        };

        info!(report = kind.as_str(), rows, "report exported");
        let entry = AuditRecorder::entry(principal, "data_exported", AuditCategory::Sensitive)
            .severity(Severity::Warning)
            .entity("report", kind.as_str())
            .metadata(json!({
                "report": kind.as_str(),
                "rows": rows,
                "from": period.from,
                "to": period.to,
            }));
        self.recorder.record(entry).await;
        Ok(csv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{NewInvoice, NewLine, Services};
    use crate::store::AuditStore;
    use bierp_core::AggregateRoot;
    use bierp_auth::Role;
    use bierp_invoicing::{InvoiceType, PaymentMethod};

    fn p(id: &str) -> ProductId {
        ProductId::parse(id).unwrap()
    }

    #[test]
    fn month_periods_cover_the_whole_month() {
        let feb = Period::month("2024-02").unwrap();
        assert_eq!(feb.from, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert_eq!(feb.to, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        assert!(Period::month("2024-13").is_err());
        assert!(Period::month("feb").is_err());
    }

    #[test]
    fn report_kinds_parse_from_path_segments() {
        assert_eq!(ReportKind::parse("sales-by-employee"), Some(ReportKind::SalesByEmployee));
        assert_eq!(ReportKind::parse("payroll"), None);
    }

    #[tokio::test]
    async fn profitability_uses_last_purchase_cost() {
        let (services, _store, _notifier) = Services::in_memory();
        let owner = Principal::with_role(UserId::new(), Role::Owner);
        services
            .invoices
            .create(&owner, NewInvoice::new(InvoiceType::Purchase, vec![NewLine::new(p("P1"), 2, 600)]))
            .await
            .unwrap();
        let sale = NewInvoice::new(
            InvoiceType::Sale,
            vec![NewLine::new(p("P1"), 2, 1000), NewLine::new(p("P2"), 1, 300)],
        );
        services.invoices.create(&owner, sale).await.unwrap();

        let report = services.reports.profitability(None).await.unwrap();
        assert_eq!(report.revenue, 2300);
        assert_eq!(report.cost, 1200);
        assert_eq!(report.margin, 1100);
        assert_eq!(report.products_without_cost, 1);
        let p2 = report.products.iter().find(|r| r.product_id == p("P2")).unwrap();
        assert_eq!(p2.cost, None);
    }

    #[tokio::test]
    async fn cash_flow_and_employee_sales_ignore_dead_invoices() {
        let (services, _store, _notifier) = Services::in_memory();
        let alice = Principal::with_role(UserId::new(), Role::Owner);
        let bob = Principal::with_role(UserId::new(), Role::Owner);

        let mut paid = NewInvoice::new(InvoiceType::Sale, vec![NewLine::new(p("P1"), 1, 500)]);
        paid.paid_amount = 500;
        services.invoices.create(&alice, paid).await.unwrap();
        let mut credit = NewInvoice::new(InvoiceType::Sale, vec![NewLine::new(p("P1"), 1, 200)]);
        credit.payment_method = PaymentMethod::Credit;
        services.invoices.create(&bob, credit).await.unwrap();
        let dead = services
            .invoices
            .create(&bob, NewInvoice::new(InvoiceType::Sale, vec![NewLine::new(p("P1"), 1, 9000)]))
            .await
            .unwrap();
        services
            .invoices
            .cancel_now(&bob, *dead.id(), "test")
            .await
            .unwrap();

        let flow = services.reports.cash_flow(None).await.unwrap();
        assert_eq!(flow.invoiced, 700);
        assert_eq!(flow.received, 500);
        assert_eq!(flow.pending, 200);
        assert_eq!(flow.by_payment_method["credit"].pending, 200);

        let ranking = services.reports.sales_by_employee(None, 10).await.unwrap();
        assert_eq!(ranking[0].employee_id, alice.user_id);
        assert_eq!(ranking[1].total, 200);
    }

    #[tokio::test]
    async fn exports_are_audited() {
        let (services, store, _notifier) = Services::in_memory();
        let owner = Principal::with_role(UserId::new(), Role::Owner);
        services
            .invoices
            .create(&owner, NewInvoice::new(InvoiceType::Sale, vec![NewLine::new(p("P1"), 1, 10)]))
            .await
            .unwrap();

        let csv = services
            .reports
            .export_csv(&owner, ReportKind::Sales, None)
            .await
            .unwrap();
        assert!(csv.starts_with('\u{FEFF}'));
        assert_eq!(csv.lines().count(), 2);

        let query = bierp_audit::AuditQuery {
            event_type: Some("data_exported".into()),
            ..Default::default()
        };
        let (_, total) = store.search_audit(&query).await.unwrap();
        assert_eq!(total, 1);
    }
}
