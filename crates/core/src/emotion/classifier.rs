use crate::emotion::{argmax, ClassifyError, DenseModel, EmotionLabel};
use crate::features::FeatureVector;
use std::path::Path;
use std::sync::Arc;

/// A trained model producing one score per [`EmotionLabel`].
///
/// Implementations are shared read-only between concurrent requests.
pub trait EmotionModel: Send + Sync {
    fn input_dim(&self) -> usize;

    fn scores(&self, features: &[f32]) -> Result<Vec<f32>, ClassifyError>;
}

#[derive(Clone)]
pub struct EmotionClassifier {
    model: Arc<dyn EmotionModel>,
}

impl EmotionClassifier {
    pub fn new(model: Arc<dyn EmotionModel>) -> Self {
        Self { model }
    }

    /// Loads a [`DenseModel`] from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ClassifyError> {
        let model = DenseModel::from_path(path)?;
        tracing::info!(
            path = %path.display(),
            input_dim = model.input_dim(),
            layers = model.layers().len(),
            "emotion model loaded"
        );
        Ok(Self::new(Arc::new(model)))
    }

    pub fn input_dim(&self) -> usize {
        self.model.input_dim()
    }

    pub fn classify(&self, features: &FeatureVector) -> Result<EmotionLabel, ClassifyError> {
        let expected = self.model.input_dim();
        if features.len() != expected {
            return Err(ClassifyError::FeatureShapeMismatch {
                expected,
                actual: features.len(),
            });
        }

        let scores = self.model.scores(features.as_slice())?;
        if scores.len() != EmotionLabel::COUNT {
            return Err(ClassifyError::ScoreShapeMismatch {
                expected: EmotionLabel::COUNT,
                actual: scores.len(),
            });
        }

        argmax(&scores)
            .and_then(EmotionLabel::from_index)
            .ok_or(ClassifyError::NoFiniteScore)
    }
}
