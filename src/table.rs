// 📊 Merged Feature Table
// One row per entity id. Columns: numeric means, MRR, IS_CUSTOMER, then the
// one-hot indicators. The column set never depends on which population a row
// came from.

use crate::error::{PipelineError, Result};
use crate::frame::Frame;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

pub const ID_COLUMN: &str = "id";
pub const LABEL_COLUMN: &str = "IS_CUSTOMER";
pub const MRR_COLUMN: &str = "MRR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub id: i64,
    /// Aligned with `FeatureTable::columns()`
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    /// Every column except `id`; includes IS_CUSTOMER
    columns: Vec<String>,
    rows: Vec<FeatureRow>,
}

impl FeatureTable {
    /// Validate shape and id uniqueness
    pub fn new(columns: Vec<String>, rows: Vec<FeatureRow>) -> Result<Self> {
        if !columns.iter().any(|c| c == LABEL_COLUMN) {
            return Err(PipelineError::data_integrity(format!(
                "feature table has no {} column",
                LABEL_COLUMN
            )));
        }

        let mut seen = HashSet::with_capacity(rows.len());
        for row in &rows {
            if row.values.len() != columns.len() {
                return Err(PipelineError::data_integrity(format!(
                    "row for id {} has {} values, expected {}",
                    row.id,
                    row.values.len(),
                    columns.len()
                )));
            }
            if !seen.insert(row.id) {
                return Err(PipelineError::data_integrity(format!(
                    "duplicate id {} in feature table",
                    row.id
                )));
            }
        }

        Ok(FeatureTable { columns, rows })
    }

    /// Full ordered schema, `id` first
    pub fn schema(&self) -> Vec<String> {
        std::iter::once(ID_COLUMN.to_string())
            .chain(self.columns.iter().cloned())
            .collect()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Value of one cell, None for null or unknown column
    pub fn value(&self, row: &FeatureRow, column: &str) -> Option<f64> {
        self.column_index(column)
            .and_then(|i| row.values.get(i).copied().flatten())
    }

    /// Feature column names: every column except `id` and IS_CUSTOMER
    pub fn feature_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.as_str() != LABEL_COLUMN)
            .cloned()
            .collect()
    }

    /// IS_CUSTOMER per row as a class index
    pub fn labels(&self) -> Result<Vec<usize>> {
        let idx = self.column_index(LABEL_COLUMN).ok_or_else(|| {
            PipelineError::data_integrity(format!("missing {} column", LABEL_COLUMN))
        })?;

        self.rows
            .iter()
            .map(|row| match row.values[idx] {
                Some(v) if v == 0.0 => Ok(0),
                Some(v) if v == 1.0 => Ok(1),
                other => Err(PipelineError::data_integrity(format!(
                    "id {} has invalid {} value {:?}",
                    row.id, LABEL_COLUMN, other
                ))),
            })
            .collect()
    }

    /// Frame of feature columns for the given row positions (id and label dropped)
    pub fn feature_frame(&self, positions: &[usize]) -> Result<Frame> {
        let mut frame = Frame::new();
        for (col_idx, name) in self.columns.iter().enumerate() {
            if name == LABEL_COLUMN {
                continue;
            }
            let values = positions
                .iter()
                .map(|&p| {
                    self.rows
                        .get(p)
                        .map(|row| row.values[col_idx])
                        .ok_or_else(|| PipelineError::validation(format!("row {} out of range", p)))
                })
                .collect::<Result<Vec<_>>>()?;
            frame = frame.with_numeric(name.clone(), values)?;
        }
        Ok(frame)
    }

    /// Frame of every row's features, in table order
    pub fn full_feature_frame(&self) -> Result<Frame> {
        let all: Vec<usize> = (0..self.rows.len()).collect();
        self.feature_frame(&all)
    }

    /// SHA-256 of the ordered schema; equal fingerprints mean interchangeable tables
    pub fn schema_fingerprint(&self) -> String {
        fingerprint(&self.schema())
    }
}

/// Fingerprint of an ordered column list
pub fn fingerprint(columns: &[String]) -> String {
    let mut hasher = Sha256::new();
    for column in columns {
        hasher.update(column.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ColumnData;

    fn table() -> FeatureTable {
        FeatureTable::new(
            vec!["clicks".into(), MRR_COLUMN.into(), LABEL_COLUMN.into()],
            vec![
                FeatureRow { id: 1, values: vec![Some(5.0), Some(100.0), Some(1.0)] },
                FeatureRow { id: 2, values: vec![None, Some(0.0), Some(0.0)] },
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_schema_and_features() {
        let t = table();
        assert_eq!(t.schema(), vec!["id", "clicks", "MRR", "IS_CUSTOMER"]);
        assert_eq!(t.feature_columns(), vec!["clicks", "MRR"]);
        assert_eq!(t.labels().unwrap(), vec![1, 0]);
        assert_eq!(t.value(&t.rows()[0], "clicks"), Some(5.0));
    }

    #[test]
    fn test_feature_frame_drops_label() {
        let frame = table().feature_frame(&[1]).unwrap();
        assert_eq!(frame.n_rows(), 1);
        assert!(frame.column(LABEL_COLUMN).is_none());
        assert_eq!(frame.column("clicks").unwrap().data, ColumnData::Numeric(vec![None]));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let err = FeatureTable::new(
            vec![LABEL_COLUMN.into()],
            vec![
                FeatureRow { id: 1, values: vec![Some(1.0)] },
                FeatureRow { id: 1, values: vec![Some(0.0)] },
            ],
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::DataIntegrity(_)));
    }

    #[test]
    fn test_fingerprint_tracks_column_order() {
        let a = fingerprint(&["id".into(), "x".into(), "y".into()]);
        let b = fingerprint(&["id".into(), "y".into(), "x".into()]);
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
        assert_eq!(table().schema_fingerprint(), table().schema_fingerprint());
    }
}
