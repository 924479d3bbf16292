pub mod labels;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod predict;
pub mod stats;

use ndarray::{Array2, Array4};

use crate::error::Result;

pub use labels::{Genre, GENRE_COUNT};
pub use predict::{PredictionResult, PredictionService};
pub use stats::{normalize, NormalizationStatistics, Normalized};

/// A trained multi-input genre model.
pub trait GenreClassifier: Send + Sync {
    /// Runs the model on four `(batch, mel, frame, channel)` tensors, one per stem in
    /// canonical order, as four separate positional inputs.
    ///
    /// Returns the raw `(batch, classes)` output; the caller validates its width.
    fn predict(&self, inputs: [Array4<f32>; 4]) -> Result<Array2<f32>>;

    /// Short description for health output and logs.
    fn describe(&self) -> String {
        "genre classifier".to_string()
    }
}
