//! End-to-end orchestration: audio file → stems → features → prediction, plus the JSON
//! payloads exchanged by the CLI and the HTTP service.

use std::path::Path;
use std::time::Instant;

use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::audio::features::{tensor_from_nested, FeatureAssembler, FeatureSet, NestedTensor};
use crate::error::Result;
use crate::model::labels::label_names;
use crate::model::{PredictionResult, PredictionService};
use crate::separate::StemSeparator;

/// Separates a track and assembles its features.
pub struct AudioProcessor {
    separator: Box<dyn StemSeparator>,
    assembler: FeatureAssembler,
}

impl AudioProcessor {
    pub fn new(separator: Box<dyn StemSeparator>, assembler: FeatureAssembler) -> Self {
        Self {
            separator,
            assembler,
        }
    }

    /// Runs separation into a private temp directory and builds the feature set.
    ///
    /// The directory and all decoded stems are removed when this returns, on success
    /// and on every error path.
    pub fn process(&self, audio_path: &Path) -> Result<FeatureSet> {
        let started = Instant::now();
        let workdir = tempfile::Builder::new().prefix("stemgenre-").tempdir()?;
        log::info!("Processing {}", audio_path.display());

        let stems = self.separator.separate(audio_path, workdir.path())?;
        log::debug!("Stems in {}", stems.dir().display());

        let features = self.assembler.assemble(&stems)?;
        log::info!(
            "Created {} stem features in {:.1}s",
            features.iter().count(),
            started.elapsed().as_secs_f32()
        );
        Ok(features)
    }

    /// Full pipeline for one file.
    pub fn classify(&self, audio_path: &Path, service: &PredictionService) -> Result<PredictionResult> {
        let features = self.process(audio_path)?;
        service.predict_features(features)
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessResponse {
    /// Four `(mel, frame, channel)` tensors: vocals, drums, bass, other.
    pub preprocessed_data: Vec<NestedTensor>,
    pub message: String,
}

impl ProcessResponse {
    pub fn from_features(features: &FeatureSet) -> Self {
        Self {
            preprocessed_data: features.to_nested(),
            message: "Audio processed successfully".into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PredictionRequest {
    /// Also accepts the `preprocessedData` field, so `/process` output can be posted as is.
    #[serde(alias = "preprocessedData")]
    pub data: Vec<NestedTensor>,
}

impl PredictionRequest {
    pub fn into_tensors(self) -> Result<Vec<Array3<f32>>> {
        self.data
            .iter()
            .enumerate()
            .map(|(i, nested)| tensor_from_nested(i, nested))
            .collect()
    }
}

impl From<ProcessResponse> for PredictionRequest {
    fn from(response: ProcessResponse) -> Self {
        Self {
            data: response.preprocessed_data,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionResponse {
    pub probabilities: Vec<f32>,
    pub labels: Vec<String>,
    pub normalized: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<u64>,
}

impl PredictionResponse {
    pub fn new(result: &PredictionResult) -> Self {
        let message = if result.normalized {
            "Prediction successful"
        } else {
            "Prediction successful (features were not normalized)"
        };
        Self {
            probabilities: result.probabilities.clone(),
            labels: label_names().into_iter().map(String::from).collect(),
            normalized: result.normalized,
            message: message.into(),
            processing_time: None,
        }
    }

    pub fn with_processing_time(mut self, millis: u64) -> Self {
        self.processing_time = Some(millis);
        self
    }
}
