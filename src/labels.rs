//! Label file loading.
//!
//! Reads the number → label map produced by an external lookup stage.
//! Three layouts are accepted:
//!
//! - JSON object: `{"1": "[^Smith-2020]", "2": {"label": "[^Doe-2019]", "citation": "..."}}`
//! - JSON array of such objects, one per reference section
//! - JSONL: `{"number": 1, "label": "[^Smith-2020]", "citation": "...", "section": 0}` per line

use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::lookup::{LabelEntry, StaticLabels};

/// Errors that can occur when loading labels.
#[derive(Error, Debug)]
pub enum LabelsError {
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid JSONL at line {line}: {message}")]
    JsonlError { line: usize, message: String },

    #[error("Label keys must be positive reference numbers, got '{0}'")]
    InvalidNumber(String),

    #[error("Labels must be a JSON object, an array of objects, or JSONL records")]
    UnexpectedShape,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LabelValue {
    Plain(String),
    Entry(LabelEntry),
}

impl From<LabelValue> for LabelEntry {
    fn from(value: LabelValue) -> Self {
        match value {
            LabelValue::Plain(label) => LabelEntry::new(label),
            LabelValue::Entry(entry) => entry,
        }
    }
}

#[derive(Deserialize)]
struct LabelRecord {
    number: u32,
    label: String,
    #[serde(default)]
    citation: Option<String>,
    #[serde(default)]
    section: Option<usize>,
}

/// Loads labels from a JSON or JSONL file.
///
/// # Arguments
///
/// * `path` - Path to a JSON object, a JSON array of per-section objects,
///   or a JSONL file
///
/// # Returns
///
/// A label table usable as a resolver.
///
/// # Errors
///
/// Returns an error if the file cannot be read, is not valid JSON / JSONL,
/// or has keys that are not reference numbers.
pub fn load_labels(path: &Path) -> Result<StaticLabels, LabelsError> {
    let content = fs::read_to_string(path)?;
    parse_labels(&content)
}

/// Parses label file content. Empty content yields an empty table.
pub fn parse_labels(content: &str) -> Result<StaticLabels, LabelsError> {
    let trimmed = content.trim();
    let mut labels = StaticLabels::new();

    if trimmed.is_empty() {
        return Ok(labels);
    }

    if trimmed.starts_with('[') {
        let value: Value = serde_json::from_str(trimmed)?;
        let Value::Array(sections) = value else {
            return Err(LabelsError::UnexpectedShape);
        };
        for (section_index, section) in sections.into_iter().enumerate() {
            let Value::Object(map) = section else {
                return Err(LabelsError::UnexpectedShape);
            };
            for (number, entry) in read_map(map)? {
                labels.insert_for_section(section_index, number, entry);
            }
        }
        return Ok(labels);
    }

    // A single object is the map layout unless it is a lone JSONL record
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
        if !map.contains_key("number") {
            for (number, entry) in read_map(map)? {
                labels.insert(number, entry);
            }
            return Ok(labels);
        }
    }

    for (line_num, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let record: LabelRecord = serde_json::from_str(line).map_err(|e| LabelsError::JsonlError {
            line: line_num + 1,
            message: e.to_string(),
        })?;
        let mut entry = LabelEntry::new(record.label);
        entry.citation = record.citation;
        match record.section {
            Some(section_index) => labels.insert_for_section(section_index, record.number, entry),
            None => labels.insert(record.number, entry),
        }
    }

    Ok(labels)
}

fn read_map(map: Map<String, Value>) -> Result<Vec<(u32, LabelEntry)>, LabelsError> {
    map.into_iter()
        .map(|(key, value)| {
            let number = key
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| LabelsError::InvalidNumber(key.clone()))?;
            let value: LabelValue = serde_json::from_value(value)?;
            Ok((number, value.into()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    // Helper to create a temporary file with content
    fn create_temp_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn label(labels: &StaticLabels, section: usize, number: u32) -> Option<String> {
        labels.get(section, number).map(|e| e.label.clone())
    }

    // ===========================================
    // Tests for load_labels
    // ===========================================

    #[test]
    fn test_load_labels_object() {
        // Given: a JSON object mapping numbers to labels
        let file = create_temp_file(r#"{"1": "[^Smith-2020]", "2": "[^Doe-2019]"}"#);

        // When: we load it
        let labels = load_labels(file.path()).unwrap();

        // Then: both labels apply to every section
        assert_eq!(labels.len(), 2);
        assert_eq!(label(&labels, 0, 1).as_deref(), Some("[^Smith-2020]"));
        assert_eq!(label(&labels, 5, 2).as_deref(), Some("[^Doe-2019]"));
    }

    #[test]
    fn test_load_labels_file_not_found() {
        let result = load_labels(Path::new("/nonexistent/path/labels.json"));
        assert!(matches!(result, Err(LabelsError::IoError(_))));
    }

    #[test]
    fn test_load_labels_empty_file() {
        let file = create_temp_file("");
        assert!(load_labels(file.path()).unwrap().is_empty());
    }

    // ===========================================
    // Tests for parse_labels
    // ===========================================

    #[test]
    fn test_parse_object_with_citations() {
        // Given: one plain label and one with citation text
        let content = r#"{"1": "[^A-2020]", "2": {"label": "[^B-2021]", "citation": "B. Title. 2021."}}"#;

        // When: we parse
        let labels = parse_labels(content).unwrap();

        // Then: the citation is kept alongside its label
        let entry = labels.get(0, 2).unwrap();
        assert_eq!(entry.label, "[^B-2021]");
        assert_eq!(entry.citation.as_deref(), Some("B. Title. 2021."));
        assert_eq!(labels.get(0, 1).unwrap().citation, None);
    }

    #[test]
    fn test_parse_array_is_per_section() {
        let content = r#"[{"1": "[^First-2020]"}, {"1": "[^Second-2021]"}]"#;

        let labels = parse_labels(content).unwrap();

        assert_eq!(label(&labels, 0, 1).as_deref(), Some("[^First-2020]"));
        assert_eq!(label(&labels, 1, 1).as_deref(), Some("[^Second-2021]"));
        assert_eq!(label(&labels, 2, 1), None);
    }

    #[test]
    fn test_parse_jsonl() {
        // Given: JSONL records, one scoped to a section, with a blank line
        let content = r#"{"number": 1, "label": "[^A-2020]"}

{"number": 2, "label": "[^B-2021]", "citation": "B.", "section": 1}"#;

        // When: we parse
        let labels = parse_labels(content).unwrap();

        // Then: blank lines are ignored and the section scope is honored
        assert_eq!(label(&labels, 0, 1).as_deref(), Some("[^A-2020]"));
        assert_eq!(label(&labels, 0, 2), None);
        assert_eq!(label(&labels, 1, 2).as_deref(), Some("[^B-2021]"));
    }

    #[test]
    fn test_parse_single_jsonl_record() {
        let labels = parse_labels(r#"{"number": 4, "label": "[^D-2004]"}"#).unwrap();
        assert_eq!(label(&labels, 0, 4).as_deref(), Some("[^D-2004]"));
    }

    #[test]
    fn test_parse_jsonl_error_with_line_number() {
        // Given: JSONL with an invalid record on line 2
        let content = r#"{"number": 1, "label": "[^A-2020]"}
not json
{"number": 3, "label": "[^C-2020]"}"#;

        // When: we parse
        let err = parse_labels(content).unwrap_err();

        // Then: the error points at line 2
        match err {
            LabelsError::JsonlError { line, .. } => assert_eq!(line, 2),
            _ => panic!("Expected JsonlError, got {:?}", err),
        }
    }

    #[test]
    fn test_parse_rejects_non_numeric_key() {
        let err = parse_labels(r#"{"smith": "[^Smith-2020]"}"#).unwrap_err();
        assert!(matches!(err, LabelsError::InvalidNumber(key) if key == "smith"));
    }

    #[test]
    fn test_parse_rejects_array_of_strings() {
        let err = parse_labels(r#"["[^A-2020]"]"#).unwrap_err();
        assert!(matches!(err, LabelsError::UnexpectedShape));
    }
}
