//! Value normalization for raw header strings.

use chrono::NaiveDate;

use crate::tags::TagEntry;
use crate::types::FieldValue;

/// Strips whitespace and NUL padding. Empty values become `None`.
pub fn normalize_text(raw: &str) -> Option<String> {
    let trimmed = raw.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parses an 8-digit `YYYYMMDD` date; any other shape is `None`.
pub fn parse_dicom_date(value: &str) -> Option<NaiveDate> {
    if value.len() != 8 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(value, "%Y%m%d").ok()
}

/// Turns a raw header value into a cell for `entry`.
///
/// Date fields that do not parse are null; they never fail the row.
pub fn normalize_field(entry: &TagEntry, raw: &str) -> Option<FieldValue> {
    let text = normalize_text(raw)?;
    if !entry.is_date() {
        return Some(FieldValue::Text(text));
    }
    match parse_dicom_date(&text) {
        Some(date) => Some(FieldValue::Date(date)),
        None => {
            tracing::debug!("malformed {} value {:?}, storing null", entry.field, text);
            None
        }
    }
}
