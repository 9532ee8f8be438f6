//! Human-facing invoice numbers: `PREFIX-YYYYMMDD-NNNN`.
//!
//! The counter is reserved atomically by the store under
//! [`invoice_sequence_key`]; this module only formats.

use chrono::NaiveDate;

use crate::InvoiceType;

/// Sequence name shared by all invoices of one type on one day.
pub fn invoice_sequence_key(invoice_type: InvoiceType, date: NaiveDate) -> String {
    format!("invoice:{}:{}", invoice_type.as_str(), date.format("%Y%m%d"))
}

pub fn format_invoice_number(invoice_type: InvoiceType, date: NaiveDate, sequence: u64) -> String {
    format!(
        "{}-{}-{:04}",
        invoice_type.number_prefix(),
        date.format("%Y%m%d"),
        sequence
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 2, 9).unwrap()
    }

    #[test]
    fn numbers_carry_prefix_date_and_padded_sequence() {
        assert_eq!(
            format_invoice_number(InvoiceType::Purchase, day(), 7),
            "PUR-20250209-0007"
        );
        assert_eq!(
            format_invoice_number(InvoiceType::SaleReturn, day(), 12345),
            "RSL-20250209-12345"
        );
        assert_eq!(format_invoice_number(InvoiceType::Repair, day(), 1), "INV-20250209-0001");
    }

    #[test]
    fn sequence_keys_are_per_type_and_day() {
        assert_ne!(
            invoice_sequence_key(InvoiceType::Sale, day()),
            invoice_sequence_key(InvoiceType::Purchase, day())
        );
        assert_eq!(invoice_sequence_key(InvoiceType::Sale, day()), "invoice:sale:20250209");
    }
}
