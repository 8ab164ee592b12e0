// 🔢 Numeric preprocessor: sentinel fill + standard scaling
//
// Missing values become a sentinel before scaling. Mean and standard deviation
// are learned once by `fit`; `transform` only applies them.

use super::{variant_mismatch, Preprocessor, PreprocessorArtifact, PreprocessorKind};
use crate::artifact::{parse_params, read_json, write_json};
use crate::error::{PipelineError, Result};
use crate::frame::{ColumnData, Frame};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info};

/// Value substituted for missing cells before scaling
pub const MISSING_SENTINEL: f64 = -1.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NumericParams {
    pub fill_value: f64,
    /// Disable to pass filled values through unscaled
    pub scale: bool,
}

impl Default for NumericParams {
    fn default() -> Self {
        NumericParams {
            fill_value: MISSING_SENTINEL,
            scale: true,
        }
    }
}

/// Fitted statistics, one entry per column in `columns`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NumericState {
    pub params: NumericParams,
    pub columns: Vec<String>,
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct NumericPreprocessor {
    state: NumericState,
}

impl NumericPreprocessor {
    pub fn new(params: NumericParams) -> Self {
        NumericPreprocessor {
            state: NumericState {
                params,
                ..NumericState::default()
            },
        }
    }

    pub fn from_params(params: &Value) -> Result<Self> {
        Ok(Self::new(parse_params("numeric", params)?))
    }

    pub fn state(&self) -> &NumericState {
        &self.state
    }

    fn filled_column<'a>(&self, frame: &'a Frame, name: &str) -> Result<&'a [Option<f64>]> {
        let column = frame.column(name).ok_or_else(|| {
            PipelineError::validation(format!("input lacks fitted column '{}'", name))
        })?;
        match &column.data {
            ColumnData::Numeric(values) => Ok(values.as_slice()),
            ColumnData::Text(_) => Err(PipelineError::validation(format!(
                "column '{}' was fitted as numeric but holds text",
                name
            ))),
        }
    }

    fn fill(&self, value: Option<f64>, column: &str) -> Result<f64> {
        let v = value.unwrap_or(self.state.params.fill_value);
        if !v.is_finite() {
            return Err(PipelineError::validation(format!(
                "column '{}' holds non-finite value {}",
                column, v
            )));
        }
        Ok(v)
    }
}

impl Preprocessor for NumericPreprocessor {
    fn kind(&self) -> PreprocessorKind {
        PreprocessorKind::Numeric
    }

    fn fit(&mut self, frame: &Frame) -> Result<()> {
        let columns = frame.numeric_column_names();
        if columns.is_empty() {
            return Err(PipelineError::validation("frame has no numeric columns to fit"));
        }
        if frame.n_rows() == 0 {
            return Err(PipelineError::validation("cannot fit on an empty frame"));
        }

        let mut mean = Vec::with_capacity(columns.len());
        let mut std = Vec::with_capacity(columns.len());

        for name in &columns {
            let values: Vec<f64> = self
                .filled_column(frame, name)?
                .iter()
                .map(|v| v.unwrap_or(self.state.params.fill_value))
                .collect();

            let non_finite = values.iter().filter(|v| !v.is_finite()).count();
            if non_finite > 0 {
                return Err(PipelineError::data_integrity(format!(
                    "column '{}' has {} non-finite value(s) in the training frame",
                    name, non_finite
                )));
            }

            let n = values.len() as f64;
            let m = values.iter().sum::<f64>() / n;
            let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n;
            let s = var.sqrt();

            mean.push(m);
            // zero-variance columns scale with std 1
            std.push(if s > 0.0 && s.is_finite() { s } else { 1.0 });
        }

        info!(columns = columns.len(), rows = frame.n_rows(), "fitted numeric preprocessor");
        self.state.columns = columns;
        self.state.mean = mean;
        self.state.std = std;
        Ok(())
    }

    fn transform(&self, frame: &Frame) -> Result<Array2<f32>> {
        if self.state.columns.is_empty() {
            return Err(PipelineError::validation("numeric preprocessor is not fitted"));
        }

        let extra = frame.n_columns().saturating_sub(self.state.columns.len());
        if extra > 0 {
            debug!(extra, "ignoring columns outside the fitted schema");
        }

        let mut out = Array2::<f32>::zeros((frame.n_rows(), self.state.columns.len()));
        for (j, name) in self.state.columns.iter().enumerate() {
            let values = self.filled_column(frame, name)?;
            for (i, value) in values.iter().enumerate() {
                let v = self.fill(*value, name)?;
                let scaled = if self.state.params.scale {
                    (v - self.state.mean[j]) / self.state.std[j]
                } else {
                    v
                };
                out[[i, j]] = scaled as f32;
            }
        }
        Ok(out)
    }

    fn required_features(&self) -> Vec<String> {
        self.state.columns.clone()
    }

    fn output_dim(&self) -> Option<usize> {
        (!self.state.columns.is_empty()).then_some(self.state.columns.len())
    }

    fn save(&self, path: &Path) -> Result<()> {
        write_json(path, &PreprocessorArtifact::Numeric(self.state.clone()))
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        match read_json::<PreprocessorArtifact>(path)? {
            PreprocessorArtifact::Numeric(state) => {
                self.state = state;
                Ok(())
            }
            other => Err(variant_mismatch(path, other.kind(), self.kind())),
        }
    }
}
