//! Canonical row order.

use std::cmp::Ordering;

use crate::tags::{PATIENT_ID, SERIES_INSTANCE_UID, SERIES_TIME, STUDY_INSTANCE_UID, STUDY_TIME};
use crate::types::IndexRow;

/// Sort keys, most significant first.
pub const CANONICAL_ORDER: [&str; 5] = [
    SERIES_TIME,
    STUDY_TIME,
    STUDY_INSTANCE_UID,
    SERIES_INSTANCE_UID,
    PATIENT_ID,
];

/// Compares two rows by the canonical keys. Nulls sort first.
pub fn canonical_cmp(left: &IndexRow, right: &IndexRow) -> Ordering {
    CANONICAL_ORDER
        .iter()
        .map(|field| left.field(field).cmp(&right.field(field)))
        .find(|ordering| ordering.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// Sorts rows in canonical order. Ties keep their stored order.
pub fn sort_canonical(rows: &mut [IndexRow]) {
    rows.sort_by(canonical_cmp);
}
