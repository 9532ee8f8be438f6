use serde::{Deserialize, Serialize};

use bierp_core::ProductId;

/// Per-product quantity counter.
///
/// Quantity may go negative: sales are not blocked on stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductStock {
    pub product_id: ProductId,
    pub quantity: i64,
    /// Unit cost of the most recent purchase; drives the profitability report.
    pub last_purchase_cost: Option<u64>,
}

impl ProductStock {
    pub fn new(product_id: ProductId) -> Self {
        Self {
            product_id,
            quantity: 0,
            last_purchase_cost: None,
        }
    }

    pub fn adjust(&mut self, delta: i64) {
        self.quantity = self.quantity.saturating_add(delta);
    }

    pub fn receive(&mut self, quantity: i64, unit_cost: u64) {
        self.adjust(quantity);
        self.last_purchase_cost = Some(unit_cost);
    }
}
