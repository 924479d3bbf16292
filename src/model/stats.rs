//! Training-time normalization statistics and the per-stem standardization they drive.
//!
//! Artifacts are indexed first by stem, optionally behind a leading batch axis of size 1
//! (`(1, 4, 1, 1)` for one scalar per stem, `(1, 4, 128, 1)` for one value per mel bin).
//! Each stem's slice is aligned to the leading axes of the `(mel, frame, channel)` feature
//! and padded with trailing unit axes; ordinary broadcasting then covers every layout.

use std::path::Path;

use ndarray::{Array3, Array4, ArrayD, Axis, IxDyn};
use ndarray_npy::read_npy;

use crate::audio::features::Stem;
use crate::error::{GenreError, Result};

pub const MEAN_FILE: &str = "mean.npy";
pub const STD_FILE: &str = "std.npy";

/// Per-stem mean and standard deviation, shaped `(stem, mel, frame, channel)` with unit
/// axes wherever a value is shared.
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizationStatistics {
    mean: Array4<f32>,
    std: Array4<f32>,
}

/// Output of [`normalize`]. `applied` is false when no statistics were loaded and the
/// tensors passed through unchanged.
#[derive(Clone, Debug, PartialEq)]
pub struct Normalized {
    pub tensors: Vec<Array3<f32>>,
    pub applied: bool,
}

impl NormalizationStatistics {
    /// Validates both arrays against one stem feature's shape.
    pub fn new(mean: ArrayD<f32>, std: ArrayD<f32>, feature_shape: [usize; 3]) -> Result<Self> {
        let mean = align("mean", mean, feature_shape)?;
        let std = align("std", std, feature_shape)?;

        if std.iter().any(|&s| s == 0.0) {
            log::warn!("Normalization std contains zeros; affected features will be non-finite");
        }

        Ok(Self { mean, std })
    }

    /// Loads `mean.npy` and `std.npy` from `dir`.
    ///
    /// Returns `Ok(None)` when neither file exists, which is the degraded unnormalized mode.
    /// A lone file or an unreadable one is an error.
    pub fn load_dir(dir: &Path, feature_shape: [usize; 3]) -> Result<Option<Self>> {
        let mean_path = dir.join(MEAN_FILE);
        let std_path = dir.join(STD_FILE);

        match (mean_path.is_file(), std_path.is_file()) {
            (false, false) => {
                log::warn!(
                    "Normalization files not found in {}; predictions will be unnormalized",
                    dir.display()
                );
                Ok(None)
            }
            (true, true) => {
                let mean = read_array(&mean_path)?;
                let std = read_array(&std_path)?;
                log::info!(
                    "Loaded normalization statistics: mean {:?}, std {:?}",
                    mean.shape(),
                    std.shape()
                );
                Self::new(mean, std, feature_shape).map(Some)
            }
            (has_mean, _) => Err(GenreError::Statistics(format!(
                "found {} without {} in {}",
                if has_mean { MEAN_FILE } else { STD_FILE },
                if has_mean { STD_FILE } else { MEAN_FILE },
                dir.display()
            ))),
        }
    }

    /// `(x - mean[stem]) / std[stem]`, broadcast over the stem's feature shape.
    pub fn apply(&self, stem: Stem, features: &Array3<f32>) -> Array3<f32> {
        let mean = self.mean.index_axis(Axis(0), stem.index());
        let std = self.std.index_axis(Axis(0), stem.index());
        (features - &mean) / &std
    }
}

/// Standardizes four stem tensors in canonical order, or passes them through when
/// `stats` is absent.
pub fn normalize(tensors: Vec<Array3<f32>>, stats: Option<&NormalizationStatistics>) -> Normalized {
    match stats {
        Some(stats) => Normalized {
            tensors: tensors
                .iter()
                .zip(Stem::ALL)
                .map(|(tensor, stem)| stats.apply(stem, tensor))
                .collect(),
            applied: true,
        },
        None => {
            log::warn!("Normalization skipped (statistics not loaded)");
            Normalized {
                tensors,
                applied: false,
            }
        }
    }
}

fn read_array(path: &Path) -> Result<ArrayD<f32>> {
    match read_npy::<_, ArrayD<f32>>(path) {
        Ok(array) => Ok(array),
        Err(f32_err) => read_npy::<_, ArrayD<f64>>(path)
            .map(|array| array.mapv(|v| v as f32))
            .map_err(|_| GenreError::Statistics(format!("{}: {}", path.display(), f32_err))),
    }
}

/// Strips an optional leading batch axis, checks the stem axis, and pads each stem's slice
/// to rank 3 with trailing unit axes.
fn align(name: &str, array: ArrayD<f32>, feature_shape: [usize; 3]) -> Result<Array4<f32>> {
    let stems = Stem::ALL.len();
    let original = array.shape().to_vec();

    let mut shape: Vec<usize> = original.clone();
    if shape.len() >= 2 && shape[0] == 1 && shape[1] == stems {
        shape.remove(0);
    }
    if shape.first() != Some(&stems) {
        return Err(GenreError::Statistics(format!(
            "{} has shape {:?}; expected the first axis (after an optional batch axis) to index {} stems",
            name, original, stems
        )));
    }
    if shape.len() > 4 {
        return Err(GenreError::Statistics(format!(
            "{} has shape {:?}; a stem slice can have at most 3 axes",
            name, original
        )));
    }
    shape.resize(4, 1);

    for (axis, (&have, &want)) in shape[1..].iter().zip(feature_shape.iter()).enumerate() {
        if have != 1 && have != want {
            return Err(GenreError::Statistics(format!(
                "{} has shape {:?}; axis {} of a stem slice is {} but must be 1 or {}",
                name, original, axis, have, want
            )));
        }
    }

    if array.iter().any(|v| !v.is_finite()) {
        return Err(GenreError::Statistics(format!("{} contains non-finite values", name)));
    }

    let values: Vec<f32> = array.iter().copied().collect();
    ArrayD::from_shape_vec(IxDyn(&shape), values)
        .map_err(|e| GenreError::Statistics(format!("{}: {}", name, e)))?
        .into_dimensionality()
        .map_err(|e| GenreError::Statistics(format!("{}: {}", name, e)))
}
