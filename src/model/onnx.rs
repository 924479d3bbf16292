//! ONNX Runtime backend for the four-input genre model.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ndarray::{Array2, Array4};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;

use super::GenreClassifier;
use crate::audio::features::Stem;
use crate::error::{GenreError, Result};

pub struct OnnxClassifier {
    // `Session::run` needs `&mut self`.
    session: Mutex<Session>,
    path: PathBuf,
    input_names: Vec<String>,
}

impl OnnxClassifier {
    pub fn load(path: &Path, intra_threads: usize) -> Result<Self> {
        if !path.is_file() {
            return Err(GenreError::Inference(format!(
                "model file not found: {}",
                path.display()
            )));
        }

        log::info!("Loading model from {}", path.display());
        let session = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.with_intra_threads(intra_threads))
            .and_then(|b| b.commit_from_file(path))
            .map_err(|e| GenreError::Inference(format!("failed to load {}: {}", path.display(), e)))?;

        let input_names: Vec<String> = session.inputs.iter().map(|i| i.name.clone()).collect();
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        if input_names.len() != Stem::ALL.len() {
            return Err(GenreError::Inference(format!(
                "model has {} inputs {:?}, expected one per stem",
                input_names.len(),
                input_names
            )));
        }
        log::info!("Model inputs: {:?}, outputs: {:?}", input_names, output_names);

        Ok(Self {
            session: Mutex::new(session),
            path: path.to_path_buf(),
            input_names,
        })
    }
}

impl GenreClassifier for OnnxClassifier {
    fn predict(&self, inputs: [Array4<f32>; 4]) -> Result<Array2<f32>> {
        let [vocals, drums, bass, other] = inputs;
        let tensor = |array: Array4<f32>| {
            Tensor::from_array(array).map_err(|e| GenreError::Inference(format!("tensor creation: {}", e)))
        };
        let values = ort::inputs![tensor(vocals)?, tensor(drums)?, tensor(bass)?, tensor(other)?];

        let mut session = self
            .session
            .lock()
            .map_err(|_| GenreError::Inference("model session poisoned".into()))?;
        let outputs = session
            .run(values)
            .map_err(|e| GenreError::Inference(e.to_string()))?;

        let (_, value) = outputs
            .iter()
            .next()
            .ok_or_else(|| GenreError::Inference("model produced no output".into()))?;
        let (shape, data) = value
            .try_extract_tensor::<f32>()
            .map_err(|e| GenreError::Inference(format!("output extraction: {}", e)))?;

        let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
        let cols = dims.last().copied().unwrap_or(0);
        let rows = if cols == 0 { 0 } else { data.len() / cols };
        Array2::from_shape_vec((rows, cols), data.to_vec())
            .map_err(|e| GenreError::Inference(format!("output shape {:?}: {}", dims, e)))
    }

    fn describe(&self) -> String {
        format!("onnx model {} ({} inputs)", self.path.display(), self.input_names.len())
    }
}
