// 📉 Logistic regression
// Full-batch gradient descent on the mean log-loss with an L2 penalty of
// strength 1/c. Stops after `max_iter` steps or when the loss improves by less
// than `tolerance`.

use super::{
    check_inference_input, check_same_width, check_training_inputs, variant_mismatch, Model, ModelArtifact,
    ModelKind, TrainOptions, TrainSummary, NUM_CLASSES,
};
use crate::artifact::{parse_params, read_json, write_json};
use crate::error::{PipelineError, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info};

const EPS: f32 = 1e-7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogisticParams {
    pub learning_rate: f32,
    pub max_iter: usize,
    /// Inverse regularization strength
    pub c: f32,
    pub tolerance: f32,
}

impl Default for LogisticParams {
    fn default() -> Self {
        LogisticParams {
            learning_rate: 0.1,
            max_iter: 1000,
            c: 1.0,
            tolerance: 1e-6,
        }
    }
}

impl LogisticParams {
    fn validate(&self) -> Result<()> {
        if !(self.learning_rate > 0.0) || !(self.c > 0.0) || self.max_iter == 0 {
            return Err(PipelineError::configuration(format!(
                "logistic_regression needs learning_rate > 0, c > 0, max_iter > 0 (got {:?})",
                self
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogisticState {
    pub params: LogisticParams,
    pub weights: Option<Array1<f32>>,
    pub bias: f32,
}

#[derive(Debug, Clone, Default)]
pub struct LogisticRegression {
    state: LogisticState,
}

fn sigmoid(z: f32) -> f32 {
    1.0 / (1.0 + (-z).exp())
}

impl LogisticRegression {
    pub fn new(params: LogisticParams) -> Result<Self> {
        params.validate()?;
        Ok(LogisticRegression {
            state: LogisticState {
                params,
                ..LogisticState::default()
            },
        })
    }

    pub fn from_params(params: &Value) -> Result<Self> {
        Self::new(parse_params("logistic_regression", params)?)
    }

    pub fn state(&self) -> &LogisticState {
        &self.state
    }

    /// P(class = 1) per row
    fn positive_probability(&self, weights: &Array1<f32>, features: &Array2<f32>) -> Array1<f32> {
        (features.dot(weights) + self.state.bias).mapv(sigmoid)
    }

    fn log_loss(p: &Array1<f32>, y: &Array1<f32>, weights: &Array1<f32>, l2: f32) -> f64 {
        let n = y.len() as f64;
        let data: f64 = p
            .iter()
            .zip(y)
            .map(|(&p, &y)| {
                let p = p.clamp(EPS, 1.0 - EPS) as f64;
                -(y as f64 * p.ln() + (1.0 - y as f64) * (1.0 - p).ln())
            })
            .sum::<f64>()
            / n;
        data + 0.5 * l2 as f64 * weights.dot(weights) as f64
    }
}

impl Model for LogisticRegression {
    fn kind(&self) -> ModelKind {
        ModelKind::LogisticRegression
    }

    fn input_dim(&self) -> Option<usize> {
        self.state.weights.as_ref().map(|w| w.len())
    }

    fn train(
        &mut self,
        features: &Array2<f32>,
        labels: &[usize],
        validation: Option<(&Array2<f32>, &[usize])>,
        options: &TrainOptions,
    ) -> Result<TrainSummary> {
        check_training_inputs(features, labels)?;

        let params = self.state.params.clone();
        let max_iter = options.epochs.unwrap_or(params.max_iter);
        let n = features.nrows() as f32;
        let l2 = 1.0 / (params.c * n);
        let y: Array1<f32> = labels.iter().map(|&l| l as f32).collect();

        let mut weights = Array1::<f32>::zeros(features.ncols());
        self.state.bias = 0.0;

        let mut previous = f64::INFINITY;
        let mut loss = previous;
        let mut iterations = 0;

        for iter in 0..max_iter {
            let p = self.positive_probability(&weights, features);
            loss = Self::log_loss(&p, &y, &weights, l2);
            iterations = iter + 1;

            let residual = &p - &y;
            let grad_w = features.t().dot(&residual) / n + &weights * l2;
            let grad_b = residual.sum() / n;

            weights.scaled_add(-params.learning_rate, &grad_w);
            self.state.bias -= params.learning_rate * grad_b;

            if (previous - loss).abs() < params.tolerance as f64 {
                debug!(iteration = iterations, loss, "logistic regression converged");
                break;
            }
            previous = loss;
        }

        let validation_loss = match validation {
            Some((vx, vy)) => {
                check_training_inputs(vx, vy)?;
                check_same_width(features, vx)?;
                let vy: Array1<f32> = vy.iter().map(|&l| l as f32).collect();
                let p = self.positive_probability(&weights, vx);
                Some(Self::log_loss(&p, &vy, &weights, l2))
            }
            None => None,
        };

        self.state.weights = Some(weights);
        info!(iterations, loss, "trained logistic regression");

        Ok(TrainSummary {
            epochs_run: iterations,
            final_loss: loss,
            validation_loss,
        })
    }

    fn predict_proba(&self, features: &Array2<f32>) -> Result<Array2<f32>> {
        check_inference_input(self.kind(), self.input_dim(), features)?;
        let weights = self
            .state
            .weights
            .as_ref()
            .ok_or_else(|| PipelineError::inference("logistic_regression model is not trained"))?;

        let positive = self.positive_probability(weights, features);
        let mut probs = Array2::<f32>::zeros((features.nrows(), NUM_CLASSES));
        for (i, p) in positive.iter().enumerate() {
            probs[[i, 0]] = 1.0 - p;
            probs[[i, 1]] = *p;
        }
        Ok(probs)
    }

    fn save(&self, path: &Path) -> Result<()> {
        write_json(path, &ModelArtifact::LogisticRegression(self.state.clone()))
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        match read_json::<ModelArtifact>(path)? {
            ModelArtifact::LogisticRegression(state) => {
                self.state = state;
                Ok(())
            }
            other => Err(variant_mismatch(path, other.kind(), self.kind())),
        }
    }
}
