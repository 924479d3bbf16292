use ndarray::{Array3, Array4, Axis};
use serde::Serialize;

use super::labels::{Genre, GENRE_COUNT};
use super::stats::{normalize, NormalizationStatistics};
use super::GenreClassifier;
use crate::audio::features::{FeatureSet, Stem};
use crate::error::{GenreError, Result};

/// Nine probabilities in [`Genre::ALL`] order, exactly as the model produced them.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PredictionResult {
    pub probabilities: Vec<f32>,
    /// False when no normalization statistics were loaded and the model saw raw features.
    pub normalized: bool,
}

impl PredictionResult {
    /// Genres sorted by descending probability.
    pub fn ranked(&self) -> Vec<(Genre, f32)> {
        let mut ranked: Vec<(Genre, f32)> = Genre::ALL
            .iter()
            .copied()
            .zip(self.probabilities.iter().copied())
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }

    pub fn top(&self, n: usize) -> Vec<(Genre, f32)> {
        let mut ranked = self.ranked();
        ranked.truncate(n);
        ranked
    }
}

enum ModelState {
    Unloaded,
    Loaded(Box<dyn GenreClassifier>),
}

/// The shared inference entry point: classifier plus optional statistics.
///
/// Built once at startup and never mutated afterwards, so it can be shared behind an
/// `Arc` by every request. A service built without a classifier stays unloaded for its
/// whole lifetime and rejects predictions; there is no lazy or hot reload.
pub struct PredictionService {
    model: ModelState,
    stats: Option<NormalizationStatistics>,
    feature_shape: [usize; 3],
}

impl PredictionService {
    pub fn new(
        classifier: Option<Box<dyn GenreClassifier>>,
        stats: Option<NormalizationStatistics>,
        feature_shape: [usize; 3],
    ) -> Self {
        let model = match classifier {
            Some(classifier) => {
                log::info!("Prediction service ready: {}", classifier.describe());
                ModelState::Loaded(classifier)
            }
            None => {
                log::warn!("Prediction service started without a model; predictions will fail");
                ModelState::Unloaded
            }
        };
        Self {
            model,
            stats,
            feature_shape,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.model, ModelState::Loaded(_))
    }

    pub fn has_statistics(&self) -> bool {
        self.stats.is_some()
    }

    pub fn feature_shape(&self) -> [usize; 3] {
        self.feature_shape
    }

    pub fn predict_features(&self, features: FeatureSet) -> Result<PredictionResult> {
        self.predict(features.into_tensors())
    }

    /// Normalizes four stem tensors and runs the classifier on them.
    pub fn predict(&self, tensors: Vec<Array3<f32>>) -> Result<PredictionResult> {
        let ModelState::Loaded(classifier) = &self.model else {
            return Err(GenreError::ModelUnavailable);
        };

        if tensors.len() != Stem::ALL.len() {
            return Err(GenreError::InvalidInput {
                expected: Stem::ALL.len(),
                actual: tensors.len(),
            });
        }
        for (index, tensor) in tensors.iter().enumerate() {
            if tensor.shape() != self.feature_shape {
                return Err(GenreError::InvalidShape {
                    index,
                    expected: self.feature_shape.to_vec(),
                    actual: tensor.shape().to_vec(),
                });
            }
        }

        let normalized = normalize(tensors, self.stats.as_ref());

        let batched: Vec<Array4<f32>> = normalized
            .tensors
            .into_iter()
            .map(|t| t.insert_axis(Axis(0)))
            .collect();
        for (stem, tensor) in Stem::ALL.iter().zip(&batched) {
            log::debug!("Input {} ({}): {:?}", stem.index(), stem, tensor.shape());
        }
        let inputs: [Array4<f32>; 4] = batched
            .try_into()
            .map_err(|v: Vec<Array4<f32>>| GenreError::InvalidInput {
                expected: Stem::ALL.len(),
                actual: v.len(),
            })?;

        let output = classifier.predict(inputs)?;
        if output.nrows() == 0 {
            return Err(GenreError::ModelOutputMismatch {
                expected: GENRE_COUNT,
                actual: 0,
            });
        }

        let probabilities: Vec<f32> = output.row(0).to_vec();
        log::debug!("Predictions: {:?}", probabilities);
        if probabilities.len() != GENRE_COUNT {
            return Err(GenreError::ModelOutputMismatch {
                expected: GENRE_COUNT,
                actual: probabilities.len(),
            });
        }

        Ok(PredictionResult {
            probabilities,
            normalized: normalized.applied,
        })
    }
}
