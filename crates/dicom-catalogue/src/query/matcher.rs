//! Per-field substring matching against index rows.

use crate::types::IndexRow;

/// Matches one column against a list of substrings.
///
/// A row matches when the column is non-null and contains any needle,
/// case-sensitively. Dates are compared in their `YYYY-MM-DD` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMatcher {
    field: String,
    needles: Vec<String>,
}

impl FieldMatcher {
    pub fn new(field: impl Into<String>, needles: Vec<String>) -> Self {
        Self {
            field: field.into(),
            needles,
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn needles(&self) -> &[String] {
        &self.needles
    }

    pub fn matches(&self, row: &IndexRow) -> bool {
        let Some(value) = row.cell_text(&self.field) else {
            return false;
        };
        self.needles
            .iter()
            .any(|needle| value.contains(needle.as_str()))
    }
}

/// Returns true when every matcher accepts `row`.
pub fn matches_all(matchers: &[FieldMatcher], row: &IndexRow) -> bool {
    matchers.iter().all(|matcher| matcher.matches(row))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldValue;
    use chrono::NaiveDate;

    fn row() -> IndexRow {
        let mut row = IndexRow::new("P1/S1/Se1");
        row.series_length = Some(12);
        row.fields.insert(
            "SeriesDescription".to_string(),
            FieldValue::Text("t2_tse_tra".to_string()),
        );
        row.fields.insert(
            "StudyDate".to_string(),
            FieldValue::Date(NaiveDate::from_ymd_opt(2014, 3, 9).unwrap()),
        );
        row
    }

    fn matcher(field: &str, needles: &[&str]) -> FieldMatcher {
        FieldMatcher::new(field, needles.iter().map(|n| n.to_string()).collect())
    }

    #[test]
    fn any_needle_is_enough() {
        assert!(matcher("SeriesDescription", &["dwi", "tse"]).matches(&row()));
        assert!(!matcher("SeriesDescription", &["dwi", "flair"]).matches(&row()));
    }

    #[test]
    fn matching_is_case_sensitive() {
        assert!(!matcher("SeriesDescription", &["TSE"]).matches(&row()));
    }

    #[test]
    fn null_never_matches() {
        assert!(!matcher("Modality", &[""]).matches(&row()));
        assert!(matcher("SeriesDescription", &[""]).matches(&row()));
    }

    #[test]
    fn dates_and_counts_match_as_text() {
        assert!(matcher("StudyDate", &["2014-03"]).matches(&row()));
        assert!(matcher("SeriesLength", &["12"]).matches(&row()));
        assert!(matcher("Path", &["S1/"]).matches(&row()));
    }

    #[test]
    fn all_matchers_must_accept() {
        let matchers = vec![
            matcher("SeriesDescription", &["t2"]),
            matcher("StudyDate", &["2015"]),
        ];
        assert!(!matches_all(&matchers, &row()));
        assert!(matches_all(&matchers[..1], &row()));
        assert!(matches_all(&[], &row()));
    }
}
