use crate::config::{LabelsConfig, Validatable};
use serde::Deserialize;
use std::{
    collections::{BTreeMap, HashMap},
    fs::File,
    io::{self, BufRead},
    path::Path,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LabelMapError {
    #[error("Failed to read labels file: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to parse model config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid class index `{0}` in id2label")]
    InvalidIndex(String),
    #[error("Label map is empty")]
    Empty,
}

#[derive(Deserialize)]
struct ModelConfigFile {
    id2label: HashMap<String, String>,
}

/// Class index to label mapping shipped with the model.
#[derive(Debug, Clone)]
pub struct LabelMap {
    labels: BTreeMap<usize, String>,
}

impl LabelMap {
    pub fn new(labels_cfg: &LabelsConfig) -> Result<Self, LabelMapError> {
        let path = labels_cfg.get_path();
        let labels = Self::from_path(&path)?;
        tracing::info!("Loaded {} class labels from {:?}", labels.len(), path);
        Ok(labels)
    }

    /// `.txt` files hold one label per line, anything else is read as a
    /// model `config.json` carrying an `id2label` object.
    pub fn from_path(path: &Path) -> Result<Self, LabelMapError> {
        let is_text = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("txt"));

        if is_text {
            let file = File::open(path)?;
            Self::from_lines(io::BufReader::new(file))
        } else {
            let contents = std::fs::read_to_string(path)?;
            Self::from_id2label_json(&contents)
        }
    }

    pub fn from_id2label_json(contents: &str) -> Result<Self, LabelMapError> {
        let config: ModelConfigFile = serde_json::from_str(contents)?;
        let labels = config
            .id2label
            .into_iter()
            .map(|(index, label)| {
                index
                    .trim()
                    .parse::<usize>()
                    .map(|index| (index, label))
                    .map_err(|_| LabelMapError::InvalidIndex(index))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        Self::from_map(labels)
    }

    /// Line number is the class index; blank lines leave that index unmapped.
    pub fn from_lines<R: BufRead>(reader: R) -> Result<Self, LabelMapError> {
        let mut labels = BTreeMap::new();

        for (index, line_result) in reader.lines().enumerate() {
            let line = line_result?;
            let label = line.trim();
            if label.is_empty() {
                continue;
            }
            labels.insert(index, label.to_string());
        }

        Self::from_map(labels)
    }

    fn from_map(labels: BTreeMap<usize, String>) -> Result<Self, LabelMapError> {
        if labels.is_empty() {
            return Err(LabelMapError::Empty);
        }
        Ok(Self { labels })
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(&index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn contains_label(&self, label: &str) -> bool {
        self.labels.values().any(|l| l == label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_from_id2label_json() {
        let contents = r#"{
            "architectures": ["ViTForImageClassification"],
            "id2label": {"0": "apple_pie", "1": "baby_back_ribs", "10": "bruschetta"},
            "label2id": {"apple_pie": 0}
        }"#;

        let labels = LabelMap::from_id2label_json(contents).unwrap();

        assert_eq!(labels.len(), 3);
        assert_eq!(labels.get(0), Some("apple_pie"));
        assert_eq!(labels.get(10), Some("bruschetta"));
        assert_eq!(labels.get(2), None);
        assert!(labels.contains_label("baby_back_ribs"));
    }

    #[test]
    fn test_non_numeric_index_is_rejected() {
        let contents = r#"{"id2label": {"zero": "apple_pie"}}"#;

        let err = LabelMap::from_id2label_json(contents).unwrap_err();
        assert!(matches!(err, LabelMapError::InvalidIndex(ref index) if index == "zero"));
    }

    #[test]
    fn test_missing_id2label_is_rejected() {
        let err = LabelMap::from_id2label_json(r#"{"num_labels": 3}"#).unwrap_err();
        assert!(matches!(err, LabelMapError::Json(_)));
    }

    #[test]
    fn test_empty_map_is_rejected() {
        let err = LabelMap::from_id2label_json(r#"{"id2label": {}}"#).unwrap_err();
        assert!(matches!(err, LabelMapError::Empty));
    }

    #[test]
    fn test_from_lines_keeps_line_numbers_as_indices() {
        let reader = Cursor::new("pizza\n  sushi \nramen\n");

        let labels = LabelMap::from_lines(reader).unwrap();

        assert_eq!(labels.len(), 3);
        assert_eq!(labels.get(0), Some("pizza"));
        assert_eq!(labels.get(1), Some("sushi"));
        assert_eq!(labels.get(2), Some("ramen"));
    }

    #[test]
    fn test_from_lines_blank_line_leaves_index_unmapped() {
        let reader = Cursor::new("pizza\n\nramen\n");

        let labels = LabelMap::from_lines(reader).unwrap();

        assert_eq!(labels.len(), 2);
        assert_eq!(labels.get(0), Some("pizza"));
        assert_eq!(labels.get(1), None);
        assert_eq!(labels.get(2), Some("ramen"));
    }
}
