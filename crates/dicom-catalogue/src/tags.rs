//! The fixed mapping from DICOM attribute codes to semantic field names.
//!
//! A [`TagTable`] is built once per process and shared read-only as
//! `Arc<TagTable>`; tests substitute smaller tables.

use std::fs;
use std::path::Path;

use dicom::core::Tag;
use fnv::FnvHashMap;

use crate::error::{CatalogueError, Result};
use crate::types::SYNTHETIC_COLUMNS;

pub const PATIENT_ID: &str = "PatientID";
pub const STUDY_INSTANCE_UID: &str = "StudyInstanceUID";
pub const SERIES_INSTANCE_UID: &str = "SeriesInstanceUID";
pub const STUDY_TIME: &str = "StudyTime";
pub const SERIES_TIME: &str = "SeriesTime";

/// Attributes indexed by default, as `(code, field name)`.
pub const STANDARD_TAGS: &[(&str, &str)] = &[
    ("0008|0005", "SpecificCharacterSet"),
    ("0008|0008", "ImageType"),
    ("0008|0012", "InstanceCreationDate"),
    ("0008|0013", "InstanceCreationTime"),
    ("0008|0016", "SOPClassUID"),
    ("0008|0018", "SOPInstanceUID"),
    ("0008|0020", "StudyDate"),
    ("0008|0021", "SeriesDate"),
    ("0008|0022", "AcquisitionDate"),
    ("0008|0023", "ContentDate"),
    ("0008|0030", "StudyTime"),
    ("0008|0031", "SeriesTime"),
    ("0008|0032", "AcquisitionTime"),
    ("0008|0033", "ContentTime"),
    ("0008|0050", "AccessionNumber"),
    ("0008|0060", "Modality"),
    ("0008|0070", "Manufacturer"),
    ("0008|1010", "StationName"),
    ("0008|1030", "StudyDescription"),
    ("0008|103e", "SeriesDescription"),
    ("0008|1040", "InstitutionalDepartmentName"),
    ("0008|1090", "ManufacturersModelName"),
    ("0010|0020", "PatientID"),
    ("0010|0030", "PatientsBirthDate"),
    ("0010|0040", "PatientsSex"),
    ("0010|1010", "PatientsAge"),
    ("0010|21b0", "AdditionalPatientHistory"),
    ("0012|0062", "PatientIdentityRemoved"),
    ("0012|0063", "DeidentificationMethod"),
    ("0018|0015", "BodyPartExamined"),
    ("0018|0020", "ScanningSequence"),
    ("0018|0021", "SequenceVariant"),
    ("0018|0022", "ScanOptions"),
    ("0018|0023", "MRAcquisitionType"),
    ("0018|0024", "SequenceName"),
    ("0018|0050", "SliceThickness"),
    ("0018|0080", "RepetitionTime"),
    ("0018|0081", "EchoTime"),
    ("0018|0083", "NumberofAverages"),
    ("0018|0084", "ImagingFrequency"),
    ("0018|0085", "ImagedNucleus"),
    ("0018|0087", "MagneticFieldStrength"),
    ("0018|0088", "SpacingBetweenSlices"),
    ("0018|0089", "NumberofPhaseEncodingSteps"),
    ("0018|0091", "EchoTrainLength"),
    ("0018|0093", "PercentSampling"),
    ("0018|0094", "PercentPhaseFieldofView"),
    ("0018|1000", "DeviceSerialNumber"),
    ("0018|1030", "ProtocolName"),
    ("0018|1310", "AcquisitionMatrix"),
    ("0018|1312", "InplanePhaseEncodingDirection"),
    ("0018|1314", "FlipAngle"),
    ("0018|1315", "VariableFlipAngleFlag"),
    ("0018|5100", "PatientPosition"),
    ("0018|9087", "Diffusionbvalue"),
    ("0020|000d", "StudyInstanceUID"),
    ("0020|000e", "SeriesInstanceUID"),
    ("0020|0010", "StudyID"),
    ("0020|0032", "ImagePositionPatient"),
    ("0020|0037", "ImageOrientationPatient"),
    ("0020|0052", "FrameofReferenceUID"),
    ("0020|1041", "SliceLocation"),
    ("0028|0002", "SamplesperPixel"),
    ("0028|0010", "Rows"),
    ("0028|0011", "Columns"),
    ("0028|0030", "PixelSpacing"),
    ("0028|0100", "BitsAllocated"),
    ("0028|0101", "BitsStored"),
    ("0028|0106", "SmallestImagePixelValue"),
    ("0028|0107", "LargestImagePixelValue"),
    ("0028|1050", "WindowCenter"),
    ("0028|1051", "WindowWidth"),
    ("0040|0244", "PerformedProcedureStepStartDate"),
    ("0040|0254", "PerformedProcedureStepDescription"),
];

/// One entry of the tag table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagEntry {
    /// Code as written in the table, e.g. `0008|103e`.
    pub code: String,
    /// Parsed group/element pair.
    pub tag: Tag,
    /// Semantic field name, e.g. `SeriesDescription`.
    pub field: String,
}

impl TagEntry {
    /// Date-valued fields are recognized by name.
    pub fn is_date(&self) -> bool {
        is_date_field(&self.field)
    }
}

/// Returns true when a field holds a `YYYYMMDD` date.
pub fn is_date_field(field: &str) -> bool {
    field.contains("Date")
}

/// Read-only code → field-name mapping.
///
/// Invariant: codes are unique and field names are unique.
#[derive(Debug, Clone)]
pub struct TagTable {
    entries: Vec<TagEntry>,
    by_field: FnvHashMap<String, usize>,
}

impl TagTable {
    /// Builds a table, rejecting duplicate codes, duplicate field names, and
    /// field names that collide with the synthetic row columns.
    pub fn new<I, C, F>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (C, F)>,
        C: AsRef<str>,
        F: Into<String>,
    {
        let mut table = Self {
            entries: Vec::new(),
            by_field: FnvHashMap::default(),
        };
        let mut by_tag: FnvHashMap<Tag, usize> = FnvHashMap::default();

        for (code, field) in entries {
            let code = code.as_ref().trim().to_string();
            let field = field.into().trim().to_string();
            let tag = parse_tag_code(&code)?;

            if field.is_empty() {
                return Err(CatalogueError::InvalidInput(format!(
                    "tag {code} has an empty field name"
                )));
            }
            if SYNTHETIC_COLUMNS.contains(&field.as_str()) {
                return Err(CatalogueError::InvalidInput(format!(
                    "field name {field} is reserved"
                )));
            }
            if let Some(existing) = by_tag.get(&tag) {
                return Err(CatalogueError::InvalidInput(format!(
                    "duplicate tag code {code} (already mapped to {})",
                    table.entries[*existing].field
                )));
            }
            if table.by_field.contains_key(&field) {
                return Err(CatalogueError::InvalidInput(format!(
                    "duplicate field name {field}"
                )));
            }

            let index = table.entries.len();
            by_tag.insert(tag, index);
            table.by_field.insert(field.clone(), index);
            table.entries.push(TagEntry { code, tag, field });
        }

        Ok(table)
    }

    /// The built-in attribute subset.
    pub fn standard() -> Self {
        Self::new(STANDARD_TAGS.iter().copied()).expect("standard tag table is valid")
    }

    /// Parses a JSON object of `{ "gggg|eeee": "FieldName" }`.
    ///
    /// Entries are ordered by code.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let map: std::collections::BTreeMap<String, String> = serde_json::from_str(raw)
            .map_err(|error| {
                CatalogueError::InvalidInput(format!("failed to parse tag table: {error}"))
            })?;
        Self::new(map)
    }

    /// Loads a JSON tag table from disk.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|error| {
            CatalogueError::InvalidInput(format!(
                "failed to read tag table {}: {error}",
                path.display()
            ))
        })?;
        Self::from_json_str(&raw)
    }

    pub fn entries(&self) -> &[TagEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Position of a field in table order.
    pub fn field_index(&self, field: &str) -> Option<usize> {
        self.by_field.get(field).copied()
    }

    pub fn contains_field(&self, field: &str) -> bool {
        self.by_field.contains_key(field)
    }

    /// Tag fields plus the synthetic `Path`, `Sample`, and `SeriesLength` columns.
    pub fn is_known_column(&self, column: &str) -> bool {
        self.contains_field(column) || SYNTHETIC_COLUMNS.contains(&column)
    }

    /// Valid selection keys, sorted.
    pub fn field_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.iter().map(|entry| entry.field.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for TagTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// Parses `gggg|eeee` or `ggggeeee` hexadecimal codes.
pub fn parse_tag_code(code: &str) -> Result<Tag> {
    let invalid = || CatalogueError::InvalidInput(format!("invalid tag code: {code:?}"));
    let (group, element) = match code.split_once('|') {
        Some(parts) => parts,
        None if code.len() == 8 && code.is_ascii() => code.split_at(4),
        None => return Err(invalid()),
    };
    if group.len() != 4 || element.len() != 4 {
        return Err(invalid());
    }
    let group = u16::from_str_radix(group, 16).map_err(|_| invalid())?;
    let element = u16::from_str_radix(element, 16).map_err(|_| invalid())?;
    Ok(Tag(group, element))
}
