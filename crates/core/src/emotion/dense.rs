use crate::emotion::{ClassifyError, EmotionLabel, EmotionModel};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    Linear,
    Relu,
    Tanh,
    Softmax,
}

/// Fully connected layer; `weights` is `[outputs][inputs]`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DenseLayer {
    pub weights: Vec<Vec<f32>>,
    pub bias: Vec<f32>,
    #[serde(default)]
    pub activation: Activation,
}

impl DenseLayer {
    fn outputs(&self) -> usize {
        self.bias.len()
    }

    fn forward(&self, input: &[f32]) -> Vec<f32> {
        let mut out: Vec<f32> = self
            .weights
            .iter()
            .zip(&self.bias)
            .map(|(row, b)| row.iter().zip(input).map(|(w, x)| w * x).sum::<f32>() + b)
            .collect();
        match self.activation {
            Activation::Linear => {}
            Activation::Relu => out.iter_mut().for_each(|v| *v = v.max(0.0)),
            Activation::Tanh => out.iter_mut().for_each(|v| *v = v.tanh()),
            Activation::Softmax => softmax(&mut out),
        }
        out
    }
}

fn softmax(values: &mut [f32]) {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for v in values.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    if sum > 0.0 {
        values.iter_mut().for_each(|v| *v /= sum);
    }
}

/// Feed-forward network exported as JSON:
///
/// ```json
/// { "input_dim": 40, "layers": [{ "weights": [[..]], "bias": [..], "activation": "relu" }] }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "RawDenseModel")]
pub struct DenseModel {
    input_dim: usize,
    layers: Vec<DenseLayer>,
}

#[derive(Deserialize)]
struct RawDenseModel {
    input_dim: usize,
    layers: Vec<DenseLayer>,
}

impl TryFrom<RawDenseModel> for DenseModel {
    type Error = ClassifyError;

    fn try_from(raw: RawDenseModel) -> Result<Self, Self::Error> {
        Self::new(raw.input_dim, raw.layers)
    }
}

impl DenseModel {
    pub fn new(input_dim: usize, layers: Vec<DenseLayer>) -> Result<Self, ClassifyError> {
        if input_dim == 0 {
            return Err(ClassifyError::InvalidModel("input_dim must be > 0".to_owned()));
        }
        if layers.is_empty() {
            return Err(ClassifyError::InvalidModel("model has no layers".to_owned()));
        }

        let mut width = input_dim;
        for (i, layer) in layers.iter().enumerate() {
            if layer.weights.len() != layer.outputs() {
                return Err(ClassifyError::InvalidModel(format!(
                    "layer {i}: {} weight rows but {} biases",
                    layer.weights.len(),
                    layer.outputs()
                )));
            }
            if let Some(row) = layer.weights.iter().find(|row| row.len() != width) {
                return Err(ClassifyError::InvalidModel(format!(
                    "layer {i}: weight row has {} inputs, expected {width}",
                    row.len()
                )));
            }
            let finite = layer.weights.iter().flatten().chain(&layer.bias).all(|v| v.is_finite());
            if !finite {
                return Err(ClassifyError::InvalidModel(format!(
                    "layer {i}: non-finite parameter"
                )));
            }
            width = layer.outputs();
        }

        if width != EmotionLabel::COUNT {
            return Err(ClassifyError::InvalidModel(format!(
                "final layer has {width} outputs, expected {}",
                EmotionLabel::COUNT
            )));
        }

        Ok(Self { input_dim, layers })
    }

    pub fn from_json(json: &str) -> Result<Self, ClassifyError> {
        serde_json::from_str(json).map_err(|e| ClassifyError::InvalidModel(e.to_string()))
    }

    pub fn from_path(path: &Path) -> Result<Self, ClassifyError> {
        let model_load = |reason: String| ClassifyError::ModelLoad {
            path: path.to_path_buf(),
            reason,
        };
        let raw = std::fs::read_to_string(path).map_err(|e| model_load(e.to_string()))?;
        serde_json::from_str(&raw).map_err(|e| model_load(e.to_string()))
    }

    pub fn layers(&self) -> &[DenseLayer] {
        &self.layers
    }
}

impl EmotionModel for DenseModel {
    fn input_dim(&self) -> usize {
        self.input_dim
    }

    fn scores(&self, features: &[f32]) -> Result<Vec<f32>, ClassifyError> {
        if features.len() != self.input_dim {
            return Err(ClassifyError::FeatureShapeMismatch {
                expected: self.input_dim,
                actual: features.len(),
            });
        }
        let mut activations = features.to_vec();
        for layer in &self.layers {
            activations = layer.forward(&activations);
        }
        Ok(activations)
    }
}
