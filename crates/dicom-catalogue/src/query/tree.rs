//! Patient → study → series grouping of query results.

use crate::types::IndexRow;

use super::engine::SelectionResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesNode {
    pub row: IndexRow,
    pub direct_hit: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudyNode {
    pub study_uid: Option<String>,
    pub series: Vec<SeriesNode>,
    /// Number of direct hits among `series`.
    pub hits: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientNode {
    pub patient_id: Option<String>,
    pub studies: Vec<StudyNode>,
}

impl PatientNode {
    pub fn hits(&self) -> usize {
        self.studies.iter().map(|study| study.hits).sum()
    }

    pub fn series_count(&self) -> usize {
        self.studies.iter().map(|study| study.series.len()).sum()
    }
}

/// Rows grouped by patient, then study.
///
/// Groups appear in the order of their first row, and rows keep their order
/// inside a group, so a canonically ordered input stays canonically ordered.
/// Rows without a patient or study identifier share one `None` group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogueTree {
    pub patients: Vec<PatientNode>,
}

impl CatalogueTree {
    pub fn from_rows(rows: &[IndexRow], result: &SelectionResult) -> Self {
        let mut tree = Self::default();
        for row in rows {
            let patient_id = row.patient_id().map(str::to_string);
            let patient = match tree
                .patients
                .iter()
                .position(|patient| patient.patient_id == patient_id)
            {
                Some(position) => &mut tree.patients[position],
                None => {
                    tree.patients.push(PatientNode {
                        patient_id,
                        studies: Vec::new(),
                    });
                    let last = tree.patients.len() - 1;
                    &mut tree.patients[last]
                }
            };

            let study_uid = row.study_uid().map(str::to_string);
            let study = match patient
                .studies
                .iter()
                .position(|study| study.study_uid == study_uid)
            {
                Some(position) => &mut patient.studies[position],
                None => {
                    patient.studies.push(StudyNode {
                        study_uid,
                        series: Vec::new(),
                        hits: 0,
                    });
                    let last = patient.studies.len() - 1;
                    &mut patient.studies[last]
                }
            };

            let direct_hit = result.is_direct_hit(row);
            if direct_hit {
                study.hits += 1;
            }
            study.series.push(SeriesNode {
                row: row.clone(),
                direct_hit,
            });
        }
        tree
    }

    /// Groups the rows of `result` itself.
    pub fn from_result(result: &SelectionResult) -> Self {
        Self::from_rows(&result.rows, result)
    }

    pub fn study_count(&self) -> usize {
        self.patients.iter().map(|patient| patient.studies.len()).sum()
    }

    pub fn series_count(&self) -> usize {
        self.patients.iter().map(PatientNode::series_count).sum()
    }

    pub fn hits(&self) -> usize {
        self.patients.iter().map(PatientNode::hits).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{expand_selection, SelectOptions, Selection};
    use crate::tags::TagTable;
    use crate::types::FieldValue;

    fn row(path: &str, patient: &str, study: Option<&str>, description: &str) -> IndexRow {
        let mut row = IndexRow::new(path);
        row.fields
            .insert("PatientID".to_string(), FieldValue::Text(patient.to_string()));
        if let Some(study) = study {
            row.fields.insert(
                "StudyInstanceUID".to_string(),
                FieldValue::Text(study.to_string()),
            );
        }
        row.fields.insert(
            "SeriesDescription".to_string(),
            FieldValue::Text(description.to_string()),
        );
        row
    }

    fn rows() -> Vec<IndexRow> {
        vec![
            row("P1/S1/Se1", "P1", Some("U1"), "t2"),
            row("P2/S1/Se1", "P2", Some("U3"), "t2"),
            row("P1/S1/Se2", "P1", Some("U1"), "dwi"),
            row("P1/S2/Se1", "P1", Some("U2"), "t1"),
            row("P1/x/Se1", "P1", None, "scout"),
        ]
    }

    #[test]
    fn groups_by_first_appearance() {
        let tree = CatalogueTree::from_rows(&rows(), &SelectionResult::unfiltered(Vec::new()));
        let patients: Vec<_> = tree
            .patients
            .iter()
            .map(|patient| patient.patient_id.as_deref())
            .collect();
        assert_eq!(patients, vec![Some("P1"), Some("P2")]);

        let studies: Vec<_> = tree.patients[0]
            .studies
            .iter()
            .map(|study| (study.study_uid.as_deref(), study.series.len()))
            .collect();
        assert_eq!(studies, vec![(Some("U1"), 2), (Some("U2"), 1), (None, 1)]);
        assert_eq!(tree.study_count(), 4);
        assert_eq!(tree.series_count(), 5);
        assert_eq!(tree.hits(), 0);
    }

    #[test]
    fn counts_hits_per_study() {
        let tags = TagTable::new([
            ("0008|103e", "SeriesDescription"),
            ("0010|0020", "PatientID"),
            ("0020|000d", "StudyInstanceUID"),
        ])
        .unwrap();
        let selection = Selection::parse([("SeriesDescription", "t2")], &tags).unwrap();
        let result = expand_selection(rows(), &selection, SelectOptions::default());
        let tree = CatalogueTree::from_result(&result);

        assert_eq!(tree.hits(), 2);
        let p1 = &tree.patients[0];
        assert_eq!(p1.studies.len(), 1);
        assert_eq!(p1.studies[0].hits, 1);
        assert_eq!(p1.studies[0].series.len(), 2);
        assert!(p1.studies[0].series[0].direct_hit);
        assert!(!p1.studies[0].series[1].direct_hit);
    }
}
