mod classifier;
mod dense;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

pub use classifier::{EmotionClassifier, EmotionModel};
pub use dense::{Activation, DenseLayer, DenseModel};

/// The classifier's output classes, in model output order.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EmotionLabel {
    Angry,
    Disgust,
    Fear,
    Happy,
    Neutral,
    #[serde(rename = "Pleasant Surprised")]
    PleasantSurprised,
    Sad,
}

impl EmotionLabel {
    pub const ALL: [EmotionLabel; 7] = [
        Self::Angry,
        Self::Disgust,
        Self::Fear,
        Self::Happy,
        Self::Neutral,
        Self::PleasantSurprised,
        Self::Sad,
    ];

    pub const COUNT: usize = Self::ALL.len();

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Angry => "Angry",
            Self::Disgust => "Disgust",
            Self::Fear => "Fear",
            Self::Happy => "Happy",
            Self::Neutral => "Neutral",
            Self::PleasantSurprised => "Pleasant Surprised",
            Self::Sad => "Sad",
        }
    }
}

impl fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Index of the highest score; the first one wins a tie and NaN never wins.
pub fn argmax(scores: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &score) in scores.iter().enumerate() {
        if score.is_nan() {
            continue;
        }
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((i, score)),
        }
    }
    best.map(|(i, _)| i)
}

#[derive(thiserror::Error, Debug)]
pub enum ClassifyError {
    #[error("feature vector has {actual} values, model expects {expected}")]
    FeatureShapeMismatch { expected: usize, actual: usize },

    #[error("model returned {actual} scores, expected {expected}")]
    ScoreShapeMismatch { expected: usize, actual: usize },

    #[error("model returned no finite score")]
    NoFiniteScore,

    #[error("invalid model: {0}")]
    InvalidModel(String),

    #[error("failed to load model from {path}: {reason}")]
    ModelLoad { path: PathBuf, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_in_model_order() {
        for (i, label) in EmotionLabel::ALL.iter().enumerate() {
            assert_eq!(label.index(), i);
            assert_eq!(EmotionLabel::from_index(i), Some(*label));
        }
        assert_eq!(EmotionLabel::from_index(7), None);
    }

    #[test]
    fn wire_names_match_display() {
        for label in EmotionLabel::ALL {
            let json = serde_json::to_string(&label).unwrap();
            assert_eq!(json, format!("\"{label}\""));
        }
        assert_eq!(EmotionLabel::PleasantSurprised.to_string(), "Pleasant Surprised");
    }

    #[test]
    fn argmax_prefers_lowest_index_on_tie() {
        assert_eq!(argmax(&[0.1, 0.4, 0.4, 0.1]), Some(1));
        assert_eq!(argmax(&[0.2; 7]), Some(0));
        assert_eq!(argmax(&[-3.0, -1.0, -2.0]), Some(1));
    }

    #[test]
    fn argmax_skips_nan() {
        assert_eq!(argmax(&[f32::NAN, 0.1, 0.3]), Some(2));
        assert_eq!(argmax(&[0.1, f32::NAN, 0.05]), Some(0));
        assert_eq!(argmax(&[f32::NAN]), None);
        assert_eq!(argmax(&[]), None);
    }
}
