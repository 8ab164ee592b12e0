// 🕸️ Dense neural network
// input → Dense(hidden_units, ReLU) → Dense(2, softmax)
// Trained with Adam on sparse categorical cross-entropy over shuffled
// mini-batches. All randomness comes from one seeded generator, so a fixed
// seed reproduces the same parameters.

use super::{
    check_inference_input, check_same_width, check_training_inputs, variant_mismatch, Model,
    ModelArtifact, ModelKind, TrainOptions, TrainSummary, NUM_CLASSES,
};
use crate::artifact::{parse_params, read_json, write_json};
use crate::error::{PipelineError, Result};
use ndarray::{Array, Array1, Array2, Axis, Dimension, Zip};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info};

const BETA1: f32 = 0.9;
const BETA2: f32 = 0.999;
const ADAM_EPS: f32 = 1e-7;
const PROB_EPS: f32 = 1e-7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NeuralParams {
    pub hidden_units: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    pub seed: u64,
    /// Inferred from the first training matrix when unset
    pub input_dim: Option<usize>,
}

impl Default for NeuralParams {
    fn default() -> Self {
        NeuralParams {
            hidden_units: 128,
            epochs: 10,
            batch_size: 32,
            learning_rate: 0.001,
            seed: 42,
            input_dim: None,
        }
    }
}

impl NeuralParams {
    fn validate(&self) -> Result<()> {
        if self.hidden_units == 0 || self.batch_size == 0 || !(self.learning_rate > 0.0) {
            return Err(PipelineError::configuration(format!(
                "neural_network needs hidden_units > 0, batch_size > 0, learning_rate > 0 (got {:?})",
                self
            )));
        }
        if self.input_dim == Some(0) {
            return Err(PipelineError::configuration("neural_network input_dim must be positive"));
        }
        Ok(())
    }
}

/// Trained parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layers {
    pub w1: Array2<f32>,
    pub b1: Array1<f32>,
    pub w2: Array2<f32>,
    pub b2: Array1<f32>,
}

impl Layers {
    /// Glorot-uniform weights, zero biases
    fn init(input_dim: usize, hidden: usize, rng: &mut StdRng) -> Self {
        let mut glorot = |fan_in: usize, fan_out: usize| {
            let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
            Array2::from_shape_fn((fan_in, fan_out), |_| rng.gen_range(-limit..limit))
        };
        let w1 = glorot(input_dim, hidden);
        let w2 = glorot(hidden, NUM_CLASSES);
        Layers {
            w1,
            b1: Array1::zeros(hidden),
            w2,
            b2: Array1::zeros(NUM_CLASSES),
        }
    }

    fn input_dim(&self) -> usize {
        self.w1.nrows()
    }

    /// Returns (hidden pre-activation, hidden activation, class probabilities)
    fn forward(&self, x: &Array2<f32>) -> (Array2<f32>, Array2<f32>, Array2<f32>) {
        let z1 = x.dot(&self.w1) + &self.b1;
        let a1 = z1.mapv(|v| v.max(0.0));
        let z2 = a1.dot(&self.w2) + &self.b2;
        (z1, a1, softmax(z2))
    }
}

fn softmax(mut logits: Array2<f32>) -> Array2<f32> {
    for mut row in logits.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    logits
}

fn cross_entropy(probs: &Array2<f32>, labels: &[usize]) -> f64 {
    let total: f64 = labels
        .iter()
        .enumerate()
        .map(|(i, &l)| -(probs[[i, l]].max(PROB_EPS) as f64).ln())
        .sum();
    total / labels.len().max(1) as f64
}

/// First and second moment estimates for one parameter tensor
#[derive(Debug, Clone)]
struct Moments<D: Dimension> {
    m: Array<f32, D>,
    v: Array<f32, D>,
}

impl<D: Dimension> Moments<D> {
    fn like(param: &Array<f32, D>) -> Self {
        Moments {
            m: Array::zeros(param.raw_dim()),
            v: Array::zeros(param.raw_dim()),
        }
    }

    fn step(&mut self, param: &mut Array<f32, D>, grad: &Array<f32, D>, lr: f32, t: i32) {
        let bc1 = 1.0 - BETA1.powi(t);
        let bc2 = 1.0 - BETA2.powi(t);
        Zip::from(param)
            .and(&mut self.m)
            .and(&mut self.v)
            .and(grad)
            .for_each(|p, m, v, &g| {
                *m = BETA1 * *m + (1.0 - BETA1) * g;
                *v = BETA2 * *v + (1.0 - BETA2) * g * g;
                *p -= lr * (*m / bc1) / ((*v / bc2).sqrt() + ADAM_EPS);
            });
    }
}

struct Adam {
    w1: Moments<ndarray::Ix2>,
    b1: Moments<ndarray::Ix1>,
    w2: Moments<ndarray::Ix2>,
    b2: Moments<ndarray::Ix1>,
    t: i32,
}

impl Adam {
    fn new(layers: &Layers) -> Self {
        Adam {
            w1: Moments::like(&layers.w1),
            b1: Moments::like(&layers.b1),
            w2: Moments::like(&layers.w2),
            b2: Moments::like(&layers.b2),
            t: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NeuralState {
    pub params: NeuralParams,
    pub layers: Option<Layers>,
}

#[derive(Debug, Clone, Default)]
pub struct NeuralNetwork {
    state: NeuralState,
}

impl NeuralNetwork {
    pub fn new(params: NeuralParams) -> Result<Self> {
        params.validate()?;
        Ok(NeuralNetwork {
            state: NeuralState {
                params,
                layers: None,
            },
        })
    }

    pub fn from_params(params: &Value) -> Result<Self> {
        Self::new(parse_params("neural_network", params)?)
    }

    pub fn state(&self) -> &NeuralState {
        &self.state
    }

    /// One Adam step on a mini-batch; returns the batch loss
    fn train_batch(
        layers: &mut Layers,
        adam: &mut Adam,
        x: &Array2<f32>,
        labels: &[usize],
        lr: f32,
    ) -> f64 {
        let (z1, a1, probs) = layers.forward(x);
        let loss = cross_entropy(&probs, labels);
        let m = x.nrows() as f32;

        // d(loss)/d(logits) = (probs - onehot) / m
        let mut dz2 = probs;
        for (i, &l) in labels.iter().enumerate() {
            dz2[[i, l]] -= 1.0;
        }
        dz2.mapv_inplace(|v| v / m);

        let dw2 = a1.t().dot(&dz2);
        let db2 = dz2.sum_axis(Axis(0));
        let mut dz1 = dz2.dot(&layers.w2.t());
        Zip::from(&mut dz1).and(&z1).for_each(|d, &z| {
            if z <= 0.0 {
                *d = 0.0;
            }
        });
        let dw1 = x.t().dot(&dz1);
        let db1 = dz1.sum_axis(Axis(0));

        adam.t += 1;
        let t = adam.t;
        adam.w1.step(&mut layers.w1, &dw1, lr, t);
        adam.b1.step(&mut layers.b1, &db1, lr, t);
        adam.w2.step(&mut layers.w2, &dw2, lr, t);
        adam.b2.step(&mut layers.b2, &db2, lr, t);

        loss
    }
}

impl Model for NeuralNetwork {
    fn kind(&self) -> ModelKind {
        ModelKind::NeuralNetwork
    }

    fn input_dim(&self) -> Option<usize> {
        self.state.layers.as_ref().map(Layers::input_dim)
    }

    fn train(
        &mut self,
        features: &Array2<f32>,
        labels: &[usize],
        validation: Option<(&Array2<f32>, &[usize])>,
        options: &TrainOptions,
    ) -> Result<TrainSummary> {
        check_training_inputs(features, labels)?;
        if let Some((vx, vy)) = validation {
            check_training_inputs(vx, vy)?;
            check_same_width(features, vx)?;
        }

        let params = self.state.params.clone();
        let input_dim = match params.input_dim {
            Some(dim) if dim != features.ncols() => {
                return Err(PipelineError::validation(format!(
                    "neural_network configured for {} features, got {}",
                    dim,
                    features.ncols()
                )));
            }
            Some(dim) => dim,
            None => features.ncols(),
        };
        let epochs = options.epochs.unwrap_or(params.epochs);
        let batch_size = options.batch_size.unwrap_or(params.batch_size).max(1);

        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut layers = Layers::init(input_dim, params.hidden_units, &mut rng);
        let mut adam = Adam::new(&layers);
        let mut order: Vec<usize> = (0..features.nrows()).collect();

        let mut epoch_loss = f64::NAN;
        for epoch in 0..epochs {
            order.shuffle(&mut rng);

            let mut weighted = 0.0;
            for batch in order.chunks(batch_size) {
                let x = features.select(Axis(0), batch);
                let y: Vec<usize> = batch.iter().map(|&i| labels[i]).collect();
                let loss =
                    Self::train_batch(&mut layers, &mut adam, &x, &y, params.learning_rate);
                weighted += loss * batch.len() as f64;
            }
            epoch_loss = weighted / order.len() as f64;
            debug!(epoch = epoch + 1, loss = epoch_loss, "neural_network epoch");
        }

        let validation_loss = validation.map(|(vx, vy)| {
            let (_, _, probs) = layers.forward(vx);
            cross_entropy(&probs, vy)
        });

        self.state.layers = Some(layers);
        info!(
            epochs,
            loss = epoch_loss,
            validation_loss = ?validation_loss,
            "trained neural network"
        );

        Ok(TrainSummary {
            epochs_run: epochs,
            final_loss: epoch_loss,
            validation_loss,
        })
    }

    fn predict_proba(&self, features: &Array2<f32>) -> Result<Array2<f32>> {
        check_inference_input(self.kind(), self.input_dim(), features)?;
        let layers = self
            .state
            .layers
            .as_ref()
            .ok_or_else(|| PipelineError::inference("neural_network model is not trained"))?;

        let (_, _, probs) = layers.forward(features);
        if probs.iter().any(|p| !p.is_finite()) {
            return Err(PipelineError::inference("neural_network produced non-finite probabilities"));
        }
        Ok(probs)
    }

    fn save(&self, path: &Path) -> Result<()> {
        write_json(path, &ModelArtifact::NeuralNetwork(self.state.clone()))
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        match read_json::<ModelArtifact>(path)? {
            ModelArtifact::NeuralNetwork(state) => {
                self.state = state;
                Ok(())
            }
            other => Err(variant_mismatch(path, other.kind(), self.kind())),
        }
    }
}
