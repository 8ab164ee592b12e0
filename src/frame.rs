// 🧮 Frame - column-oriented input handed to preprocessors
// Numeric columns may hold nulls; text columns feed the tokenizer.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnData {
    Numeric(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Numeric(v) => v.len(),
            ColumnData::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnData::Numeric(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameColumn {
    pub name: String,
    pub data: ColumnData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    columns: Vec<FrameColumn>,
    n_rows: usize,
}

impl Frame {
    pub fn new() -> Self {
        Frame::default()
    }

    fn push(&mut self, name: String, data: ColumnData) -> Result<()> {
        if self.columns.iter().any(|c| c.name == name) {
            return Err(PipelineError::data_integrity(format!(
                "duplicate frame column '{}'",
                name
            )));
        }
        if !self.columns.is_empty() && data.len() != self.n_rows {
            return Err(PipelineError::data_integrity(format!(
                "column '{}' has {} rows, frame has {}",
                name,
                data.len(),
                self.n_rows
            )));
        }
        self.n_rows = data.len();
        self.columns.push(FrameColumn { name, data });
        Ok(())
    }

    /// Builder: add a numeric column
    pub fn with_numeric(mut self, name: impl Into<String>, values: Vec<Option<f64>>) -> Result<Self> {
        self.push(name.into(), ColumnData::Numeric(values))?;
        Ok(self)
    }

    /// Builder: add a text column
    pub fn with_text(mut self, name: impl Into<String>, values: Vec<Option<String>>) -> Result<Self> {
        self.push(name.into(), ColumnData::Text(values))?;
        Ok(self)
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[FrameColumn] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&FrameColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Names of numeric columns, in frame order
    pub fn numeric_column_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.data.is_numeric())
            .map(|c| c.name.clone())
            .collect()
    }

    /// New frame holding only the given rows, in the given order
    pub fn select_rows(&self, indices: &[usize]) -> Result<Frame> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.n_rows) {
            return Err(PipelineError::validation(format!(
                "row {} out of range for frame with {} rows",
                bad, self.n_rows
            )));
        }

        let columns = self
            .columns
            .iter()
            .map(|c| FrameColumn {
                name: c.name.clone(),
                data: match &c.data {
                    ColumnData::Numeric(v) => {
                        ColumnData::Numeric(indices.iter().map(|&i| v[i]).collect())
                    }
                    ColumnData::Text(v) => {
                        ColumnData::Text(indices.iter().map(|&i| v[i].clone()).collect())
                    }
                },
            })
            .collect();

        Ok(Frame {
            columns,
            n_rows: indices.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_rejects_ragged_columns() {
        let frame = Frame::new()
            .with_numeric("a", vec![Some(1.0), None])
            .unwrap();
        assert!(frame.clone().with_numeric("b", vec![Some(1.0)]).is_err());
        assert!(frame.with_numeric("a", vec![None, None]).is_err());
    }

    #[test]
    fn test_select_rows_reorders() {
        let frame = Frame::new()
            .with_numeric("a", vec![Some(1.0), Some(2.0), None])
            .unwrap()
            .with_text("text", vec![Some("x".into()), None, Some("z".into())])
            .unwrap();

        let picked = frame.select_rows(&[2, 0]).unwrap();
        assert_eq!(picked.n_rows(), 2);
        assert_eq!(
            picked.column("a").unwrap().data,
            ColumnData::Numeric(vec![None, Some(1.0)])
        );
        assert_eq!(picked.numeric_column_names(), vec!["a".to_string()]);
        assert!(frame.select_rows(&[3]).is_err());
    }
}
