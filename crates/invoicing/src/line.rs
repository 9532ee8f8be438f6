use serde::{Deserialize, Serialize};

use bierp_core::{DeviceId, DomainError, DomainResult, ProductId};

/// Upper bound on units per line. A purchase registers one device per unit.
pub const MAX_LINE_QUANTITY: i64 = 10_000;

/// Invoice line. Owned by one invoice and persisted with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub line_no: u32,
    pub product_id: ProductId,
    pub quantity: i64,
    /// Price in smallest currency unit.
    pub unit_price: u64,
    pub line_total: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    /// Specific tracked unit sold on this line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<DeviceId>,
}

impl InvoiceLine {
    pub fn new(line_no: u32, product_id: ProductId, quantity: i64, unit_price: u64) -> DomainResult<Self> {
        let line_total = line_amount(quantity, unit_price)?;
        Ok(Self {
            line_no,
            product_id,
            quantity,
            unit_price,
            line_total,
            serial_number: None,
            device_id: None,
        })
    }

    pub fn with_device(mut self, device_id: DeviceId) -> Self {
        self.device_id = Some(device_id);
        self
    }

    pub fn with_serial(mut self, serial_number: impl Into<String>) -> Self {
        self.serial_number = Some(serial_number.into());
        self
    }

    /// Re-check positivity and the stored total.
    pub fn validate(&self) -> DomainResult<()> {
        let expected = line_amount(self.quantity, self.unit_price)?;
        if expected != self.line_total {
            return Err(DomainError::invariant(format!(
                "line {} total does not match quantity * unit_price",
                self.line_no
            )));
        }
        Ok(())
    }
}

fn line_amount(quantity: i64, unit_price: u64) -> DomainResult<u64> {
    if quantity <= 0 {
        return Err(DomainError::validation("invoice line quantity must be positive"));
    }
    if quantity > MAX_LINE_QUANTITY {
        return Err(DomainError::validation(format!(
            "invoice line quantity above {MAX_LINE_QUANTITY}"
        )));
    }
    (quantity as u64)
        .checked_mul(unit_price)
        .ok_or_else(|| DomainError::invariant("invoice line amount overflow"))
}

/// Computed money columns of an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Totals {
    pub subtotal: u64,
    pub discount_amount: u64,
    pub tax_amount: u64,
    pub total: u64,
}

impl Totals {
    /// `total = subtotal - discount + tax`.
    ///
    /// A percentage discount, when given, replaces the fixed amount.
    pub fn compute(
        lines: &[InvoiceLine],
        discount_amount: u64,
        discount_percent: Option<u8>,
        tax_amount: u64,
    ) -> DomainResult<Self> {
        let mut subtotal: u64 = 0;
        for line in lines {
            subtotal = subtotal
                .checked_add(line.line_total)
                .ok_or_else(|| DomainError::invariant("invoice subtotal overflow"))?;
        }
        Self::from_subtotal(subtotal, discount_amount, discount_percent, tax_amount)
    }

    pub fn from_subtotal(
        subtotal: u64,
        discount_amount: u64,
        discount_percent: Option<u8>,
        tax_amount: u64,
    ) -> DomainResult<Self> {
        let discount_amount = match discount_percent {
            Some(p) if p > 100 => {
                return Err(DomainError::validation("discount_percent must be between 0 and 100"));
            }
            Some(p) => ((subtotal as u128 * p as u128) / 100) as u64,
            None => discount_amount,
        };
        if discount_amount > subtotal {
            return Err(DomainError::validation("discount cannot exceed subtotal"));
        }
        let total = (subtotal - discount_amount)
            .checked_add(tax_amount)
            .ok_or_else(|| DomainError::invariant("invoice total overflow"))?;
        Ok(Self {
            subtotal,
            discount_amount,
            tax_amount,
            total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn product() -> ProductId {
        ProductId::parse("P1").unwrap()
    }

    #[test]
    fn non_positive_quantity_is_rejected() {
        assert!(matches!(
            InvoiceLine::new(1, product(), 0, 10),
            Err(DomainError::Validation(_))
        ));
        assert!(InvoiceLine::new(1, product(), -2, 10).is_err());
    }

    #[test]
    fn quantity_is_capped_per_line() {
        assert!(InvoiceLine::new(1, product(), MAX_LINE_QUANTITY, 1).is_ok());
        assert!(matches!(
            InvoiceLine::new(1, product(), MAX_LINE_QUANTITY + 1, 1),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn tampered_line_total_fails_validation() {
        let mut line = InvoiceLine::new(1, product(), 3, 1000).unwrap();
        assert_eq!(line.line_total, 3000);
        line.line_total = 1;
        assert!(line.validate().is_err());
    }

    #[test]
    fn percent_discount_overrides_fixed_amount() {
        let t = Totals::from_subtotal(2000, 999, Some(10), 50).unwrap();
        assert_eq!(t.discount_amount, 200);
        assert_eq!(t.total, 1850);
    }

    #[test]
    fn discount_above_subtotal_is_rejected() {
        assert!(Totals::from_subtotal(100, 101, None, 0).is_err());
        assert!(Totals::from_subtotal(100, 0, Some(101), 0).is_err());
    }

    proptest! {
        #[test]
        fn subtotal_is_sum_of_quantity_times_price(
            raw in proptest::collection::vec((1i64..1_000, 0u64..1_000_000), 1..20)
        ) {
            let lines: Vec<InvoiceLine> = raw
                .iter()
                .enumerate()
                .map(|(i, (q, p))| InvoiceLine::new(i as u32 + 1, product(), *q, *p).unwrap())
                .collect();
            let totals = Totals::compute(&lines, 0, None, 0).unwrap();
            let expected: u64 = raw.iter().map(|(q, p)| *q as u64 * *p).sum();
            prop_assert_eq!(totals.subtotal, expected);
            prop_assert_eq!(totals.total, expected);
        }
    }
}
