//! Per-series metadata extraction.
//!
//! For every discovered series the extractor picks the representative sample,
//! reads its header with the first reader that succeeds, and flattens the
//! tag table into an [`IndexRow`]. Failures stay local to the series.

mod normalize;
mod reader;

use std::path::Path;
use std::sync::Arc;

use crate::error::{CatalogueError, Result};
use crate::tags::TagTable;
use crate::types::{IndexRow, SeriesDirectory};

pub use normalize::{normalize_field, normalize_text, parse_dicom_date};
pub use reader::{default_readers, Header, HeaderReader, Part10Reader, RawDatasetReader};

/// Result of extracting one series: exactly one of a row or an invalid mark.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeriesOutcome {
    Indexed(IndexRow),
    Invalid { path: String, reason: String },
}

impl SeriesOutcome {
    pub fn row(self) -> Option<IndexRow> {
        match self {
            Self::Indexed(row) => Some(row),
            Self::Invalid { .. } => None,
        }
    }
}

/// Reads sample headers and builds index rows.
#[derive(Debug)]
pub struct Extractor {
    tags: Arc<TagTable>,
    readers: Vec<Box<dyn HeaderReader>>,
}

impl Extractor {
    /// Creates an extractor with the default reader chain.
    pub fn new(tags: Arc<TagTable>) -> Self {
        Self {
            tags,
            readers: default_readers(),
        }
    }

    /// Replaces the reader chain. Readers are tried in order.
    pub fn with_readers(mut self, readers: Vec<Box<dyn HeaderReader>>) -> Self {
        self.readers = readers;
        self
    }

    pub fn tags(&self) -> &TagTable {
        &self.tags
    }

    /// Reads a header with the first reader that succeeds.
    pub fn read_header(&self, path: &Path) -> Result<Header> {
        let mut reasons = Vec::with_capacity(self.readers.len());
        for reader in &self.readers {
            match reader.read_header(path) {
                Ok(header) => return Ok(header),
                Err(error) => {
                    tracing::debug!(
                        "{} reader failed on {}: {}",
                        reader.name(),
                        path.display(),
                        error
                    );
                    reasons.push(format!("{}: {error}", reader.name()));
                }
            }
        }
        Err(CatalogueError::Header {
            path: path.to_path_buf(),
            reason: if reasons.is_empty() {
                "no header readers configured".to_string()
            } else {
                reasons.join("; ")
            },
        })
    }

    /// Extracts one series found under `root`.
    pub fn extract(&self, root: &Path, series: &SeriesDirectory) -> SeriesOutcome {
        let path = series.relative_str();
        let Some(sample) = series.sample() else {
            return SeriesOutcome::Invalid {
                path,
                reason: "series has no imaging files".to_string(),
            };
        };

        let sample_path = root.join(&series.relative).join(sample);
        match self.read_header(&sample_path) {
            Ok(header) => SeriesOutcome::Indexed(self.row_from_header(series, &header)),
            Err(error) => SeriesOutcome::Invalid {
                path,
                reason: error.to_string(),
            },
        }
    }

    /// Flattens a header into a row. Any unreadable field is null.
    pub fn row_from_header(&self, series: &SeriesDirectory, header: &Header) -> IndexRow {
        let mut row = IndexRow::new(series.relative_str());
        row.sample = series.sample().map(str::to_string);
        row.series_length = Some(series.files.len() as u64);

        for entry in self.tags.entries() {
            let Some(raw) = header.raw_value(entry.tag) else {
                continue;
            };
            if let Some(value) = normalize_field(entry, &raw) {
                row.fields.insert(entry.field.clone(), value);
            }
        }

        row
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{write_corrupt, write_part10, write_raw_dataset};
    use super::*;
    use crate::types::FieldValue;
    use chrono::NaiveDate;
    use dicom::dictionary_std::tags;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn small_table() -> Arc<TagTable> {
        Arc::new(
            TagTable::new([
                ("0008|0020", "StudyDate"),
                ("0008|0060", "Modality"),
                ("0008|103e", "SeriesDescription"),
                ("0010|0020", "PatientID"),
            ])
            .unwrap(),
        )
    }

    fn series(relative: &str, files: &[&str]) -> SeriesDirectory {
        SeriesDirectory {
            relative: PathBuf::from(relative),
            files: files.iter().map(|f| f.to_string()).collect(),
        }
    }

    #[test]
    fn extracts_fields_from_last_sample() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("P1/S1/Se1");
        write_part10(&dir.join("1.dcm"), &[(tags::SERIES_DESCRIPTION, "scout")]);
        write_part10(
            &dir.join("2.dcm"),
            &[
                (tags::SERIES_DESCRIPTION, "t2_tse "),
                (tags::STUDY_DATE, "20140309"),
                (tags::PATIENT_ID, "P1"),
            ],
        );

        let extractor = Extractor::new(small_table());
        let row = extractor
            .extract(temp.path(), &series("P1/S1/Se1", &["1.dcm", "2.dcm"]))
            .row()
            .expect("indexed");

        assert_eq!(row.path, "P1/S1/Se1");
        assert_eq!(row.sample.as_deref(), Some("2.dcm"));
        assert_eq!(row.series_length, Some(2));
        assert_eq!(row.text_field("SeriesDescription"), Some("t2_tse"));
        assert_eq!(
            row.field("StudyDate"),
            Some(&FieldValue::Date(NaiveDate::from_ymd_opt(2014, 3, 9).unwrap()))
        );
        assert_eq!(row.field("Modality"), None);
    }

    #[test]
    fn malformed_date_nulls_only_that_field() {
        let temp = TempDir::new().unwrap();
        write_part10(
            &temp.path().join("Se1/1.dcm"),
            &[(tags::STUDY_DATE, "2014"), (tags::MODALITY, "MR")],
        );

        let row = Extractor::new(small_table())
            .extract(temp.path(), &series("Se1", &["1.dcm"]))
            .row()
            .expect("indexed");
        assert_eq!(row.field("StudyDate"), None);
        assert_eq!(row.text_field("Modality"), Some("MR"));
    }

    #[test]
    fn falls_back_to_raw_dataset_reader() {
        let temp = TempDir::new().unwrap();
        write_raw_dataset(&temp.path().join("Se1/1.dcm"), &[(tags::MODALITY, "CT")]);

        let row = Extractor::new(small_table())
            .extract(temp.path(), &series("Se1", &["1.dcm"]))
            .row()
            .expect("indexed by fallback");
        assert_eq!(row.text_field("Modality"), Some("CT"));
    }

    #[test]
    fn corrupt_sample_marks_series_invalid() {
        let temp = TempDir::new().unwrap();
        write_corrupt(&temp.path().join("Se1/1.dcm"));

        let outcome =
            Extractor::new(small_table()).extract(temp.path(), &series("Se1", &["1.dcm"]));
        match outcome {
            SeriesOutcome::Invalid { path, reason } => {
                assert_eq!(path, "Se1");
                assert!(reason.contains("part10"));
                assert!(reason.contains("raw-dataset"));
            }
            SeriesOutcome::Indexed(row) => panic!("expected invalid, got {row:?}"),
        }
    }

    struct FixedReader {
        name: &'static str,
        modality: Option<&'static str>,
    }

    impl HeaderReader for FixedReader {
        fn name(&self) -> &'static str {
            self.name
        }

        fn read_header(&self, path: &Path) -> Result<Header> {
            match self.modality {
                Some(modality) => Ok(Header::new(modality_dataset(modality), self.name)),
                None => Err(CatalogueError::Header {
                    path: path.to_path_buf(),
                    reason: "refused".to_string(),
                }),
            }
        }
    }

    fn modality_dataset(modality: &str) -> dicom::object::InMemDicomObject {
        use dicom::core::{DataElement, PrimitiveValue, VR};
        dicom::object::InMemDicomObject::from_element_iter([DataElement::new(
            tags::MODALITY,
            VR::CS,
            PrimitiveValue::from(modality),
        )])
    }

    #[test]
    fn first_successful_reader_wins() {
        let extractor = Extractor::new(small_table()).with_readers(vec![
            Box::new(FixedReader { name: "refuses", modality: None }),
            Box::new(FixedReader { name: "second", modality: Some("MR") }),
            Box::new(FixedReader { name: "third", modality: Some("CT") }),
        ]);

        let header = extractor.read_header(Path::new("/nowhere/1.dcm")).expect("read");
        assert_eq!(header.reader(), "second");
        assert_eq!(header.raw_value(tags::MODALITY).as_deref(), Some("MR"));
    }

    #[test]
    fn empty_series_is_invalid() {
        let outcome = Extractor::new(small_table()).extract(Path::new("/"), &series("Se1", &[]));
        assert!(matches!(outcome, SeriesOutcome::Invalid { .. }));
    }
}
