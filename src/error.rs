use std::path::PathBuf;

use thiserror::Error;

use crate::audio::features::Stem;

/// Errors raised by the feature and prediction pipeline.
///
/// None of these are retryable: each one means the input or an artifact does
/// not match the contract the classifier was trained with.
#[derive(Debug, Error)]
pub enum GenreError {
    #[error("feature extraction failed: {0}")]
    FeatureExtraction(String),

    #[error("stem '{stem}' not found at {}", path.display())]
    StemMissing { stem: Stem, path: PathBuf },

    #[error("expected {expected} feature tensors, got {actual}")]
    InvalidInput { expected: usize, actual: usize },

    #[error("feature tensor {index} has shape {actual:?}, expected {expected:?}")]
    InvalidShape {
        index: usize,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("model returned {actual} values, expected {expected}")]
    ModelOutputMismatch { expected: usize, actual: usize },

    #[error("model not loaded")]
    ModelUnavailable,

    #[error("failed to decode {}: {message}", path.display())]
    Decode { path: PathBuf, message: String },

    #[error("stem separation failed: {0}")]
    Separation(String),

    #[error("normalization statistics: {0}")]
    Statistics(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GenreError>;
