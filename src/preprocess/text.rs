// 📝 Text preprocessor: whitespace tokenizer over the `text` column
// Produces fixed-length rows of token ids (0 = padding, 1 = out of vocabulary).

use super::{variant_mismatch, Preprocessor, PreprocessorArtifact, PreprocessorKind};
use crate::artifact::{parse_params, read_json, write_json};
use crate::error::{PipelineError, Result};
use crate::frame::{ColumnData, Frame};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::info;

pub const TEXT_COLUMN: &str = "text";

const PAD_ID: u32 = 0;
const UNKNOWN_ID: u32 = 1;
const FIRST_TOKEN_ID: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TextParams {
    pub max_length: usize,
    pub lowercase: bool,
}

impl Default for TextParams {
    fn default() -> Self {
        TextParams {
            max_length: 32,
            lowercase: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextState {
    pub params: TextParams,
    pub fitted: bool,
    pub vocabulary: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, Default)]
pub struct TextPreprocessor {
    state: TextState,
}

impl TextPreprocessor {
    pub fn new(params: TextParams) -> Self {
        TextPreprocessor {
            state: TextState {
                params,
                ..TextState::default()
            },
        }
    }

    pub fn from_params(params: &Value) -> Result<Self> {
        let params: TextParams = parse_params("text", params)?;
        if params.max_length == 0 {
            return Err(PipelineError::configuration("text max_length must be positive"));
        }
        Ok(Self::new(params))
    }

    pub fn state(&self) -> &TextState {
        &self.state
    }

    pub fn tokenize(&self, text: &str) -> Vec<String> {
        text.split_whitespace()
            .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|t| !t.is_empty())
            .map(|t| {
                if self.state.params.lowercase {
                    t.to_lowercase()
                } else {
                    t.to_string()
                }
            })
            .collect()
    }

    fn text_column<'a>(frame: &'a Frame) -> Result<&'a [Option<String>]> {
        let column = frame.column(TEXT_COLUMN).ok_or_else(|| {
            PipelineError::validation(format!(
                "text preprocessor requires a '{}' column",
                TEXT_COLUMN
            ))
        })?;
        match &column.data {
            ColumnData::Text(values) => Ok(values.as_slice()),
            ColumnData::Numeric(_) => Err(PipelineError::validation(format!(
                "column '{}' must hold text",
                TEXT_COLUMN
            ))),
        }
    }
}

impl Preprocessor for TextPreprocessor {
    fn kind(&self) -> PreprocessorKind {
        PreprocessorKind::Text
    }

    fn fit(&mut self, frame: &Frame) -> Result<()> {
        let texts = Self::text_column(frame)?;

        let tokens: BTreeSet<String> = texts
            .iter()
            .flatten()
            .flat_map(|t| self.tokenize(t))
            .collect();

        self.state.vocabulary = tokens
            .into_iter()
            .zip(FIRST_TOKEN_ID..)
            .collect();
        self.state.fitted = true;

        info!(vocabulary = self.state.vocabulary.len(), "fitted text preprocessor");
        Ok(())
    }

    fn transform(&self, frame: &Frame) -> Result<Array2<f32>> {
        if !self.state.fitted {
            return Err(PipelineError::validation("text preprocessor is not fitted"));
        }
        let texts = Self::text_column(frame)?;
        let width = self.state.params.max_length;

        let mut out = Array2::<f32>::from_elem((texts.len(), width), PAD_ID as f32);
        for (i, text) in texts.iter().enumerate() {
            let Some(text) = text else { continue };
            for (j, token) in self.tokenize(text).iter().take(width).enumerate() {
                let id = self.state.vocabulary.get(token).copied().unwrap_or(UNKNOWN_ID);
                out[[i, j]] = id as f32;
            }
        }
        Ok(out)
    }

    fn required_features(&self) -> Vec<String> {
        if self.state.fitted {
            vec![TEXT_COLUMN.to_string()]
        } else {
            Vec::new()
        }
    }

    fn output_dim(&self) -> Option<usize> {
        self.state.fitted.then_some(self.state.params.max_length)
    }

    fn save(&self, path: &Path) -> Result<()> {
        write_json(path, &PreprocessorArtifact::Text(self.state.clone()))
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        match read_json::<PreprocessorArtifact>(path)? {
            PreprocessorArtifact::Text(state) => {
                self.state = state;
                Ok(())
            }
            other => Err(variant_mismatch(path, other.kind(), self.kind())),
        }
    }
}
