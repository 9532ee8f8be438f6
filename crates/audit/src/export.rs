//! CSV rendering for audit and report exports.
//!
//! UTF-8 with a byte-order mark so spreadsheet tools pick the right encoding;
//! fields are quoted only when they contain a comma, quote or line break.

use thiserror::Error;

use crate::entry::AuditEntry;

const BOM: &str = "\u{FEFF}";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("csv buffer error: {0}")]
    Buffer(String),
}

/// Render a header row plus records.
pub fn write_csv<I, R>(headers: &[&str], rows: I) -> Result<String, ExportError>
where
    I: IntoIterator<Item = R>,
    R: IntoIterator,
    R::Item: AsRef<[u8]>,
{
    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Necessary)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(headers)?;
    for row in rows {
        writer.write_record(row)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| ExportError::Buffer(e.to_string()))?;
    let body = String::from_utf8(bytes).map_err(|e| ExportError::Buffer(e.to_string()))?;
    Ok(format!("{BOM}{body}"))
}

pub fn entries_to_csv(entries: &[AuditEntry]) -> Result<String, ExportError> {
    let headers = [
        "created_at",
        "event_type",
        "category",
        "severity",
        "user_id",
        "user_role",
        "entity_type",
        "entity_id",
        "entity_name",
    ];
    let rows = entries.iter().map(|e| {
        vec![
            e.created_at.to_rfc3339(),
            e.event_type.clone(),
            e.category.as_str().to_string(),
            e.severity.as_str().to_string(),
            e.user_id.map(|u| u.to_string()).unwrap_or_default(),
            e.user_role.clone().unwrap_or_default(),
            e.entity_type.clone().unwrap_or_default(),
            e.entity_id.clone().unwrap_or_default(),
            e.entity_name.clone().unwrap_or_default(),
        ]
    });
    write_csv(&headers, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::AuditCategory;

    #[test]
    fn output_starts_with_bom_and_quotes_only_when_needed() {
        let csv = write_csv(
            &["a", "b"],
            vec![vec!["plain", "has,comma"], vec!["say \"hi\"", "two\nlines"]],
        )
        .unwrap();
        assert!(csv.starts_with('\u{FEFF}'));
        let body = csv.trim_start_matches('\u{FEFF}');
        assert_eq!(
            body,
            "a,b\nplain,\"has,comma\"\n\"say \"\"hi\"\"\",\"two\nlines\"\n"
        );
    }

    #[test]
    fn audit_rows_export_one_line_each() {
        let entries = vec![
            AuditEntry::new("invoice_created", AuditCategory::Invoice).entity_name("فاتورة"),
            AuditEntry::new("data_exported", AuditCategory::Sensitive),
        ];
        let csv = entries_to_csv(&entries).unwrap();
        assert_eq!(csv.lines().count(), 3);
        assert!(csv.contains("فاتورة"));
    }
}
