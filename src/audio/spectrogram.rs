//! Log-mel spectrograms with the exact parameterization the classifier was trained on.
//!
//! The transform follows the conventions of the training pipeline: centered frames with
//! zero padding, a periodic Hann window, a Slaney-style mel filterbank with area
//! normalization, and power-to-dB referenced to the spectrogram's own peak.

use std::sync::Arc;

use ndarray::{s, Array2};
use rayon::prelude::*;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::Deserialize;

use crate::error::{GenreError, Result};

/// Padding value for frames beyond the end of a stem. Silence in the dB domain, never zero.
pub const SILENCE_FLOOR_DB: f32 = -80.0;

/// Mel bins x time frames, in dB.
pub type Spectrogram = Array2<f32>;

const AMIN: f32 = 1e-10;

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct SpectrogramParams {
    /// Rate the model was trained at. Stems are analyzed at their native rate; a mismatch is logged.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_n_fft")]
    pub n_fft: usize,
    #[serde(default = "default_hop_length")]
    pub hop_length: usize,
    #[serde(default = "default_n_mels")]
    pub n_mels: usize,
    #[serde(default = "default_target_frames")]
    pub target_frames: usize,
    #[serde(default = "default_top_db")]
    pub top_db: f32,
    #[serde(default = "default_center")]
    pub center: bool,
}

impl Default for SpectrogramParams {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            n_fft: default_n_fft(),
            hop_length: default_hop_length(),
            n_mels: default_n_mels(),
            target_frames: default_target_frames(),
            top_db: default_top_db(),
            center: default_center(),
        }
    }
}

fn default_sample_rate() -> u32 { 22050 }
fn default_n_fft() -> usize { 2048 }
fn default_hop_length() -> usize { 512 }
fn default_n_mels() -> usize { 128 }
fn default_target_frames() -> usize { 862 }
fn default_top_db() -> f32 { 80.0 }
fn default_center() -> bool { true }

impl SpectrogramParams {
    pub fn validate(&self) -> Result<()> {
        if self.n_fft < 2 || self.hop_length == 0 || self.n_mels == 0 {
            return Err(GenreError::FeatureExtraction(format!(
                "invalid transform configuration: n_fft={}, hop_length={}, n_mels={}",
                self.n_fft, self.hop_length, self.n_mels
            )));
        }
        if self.top_db.is_nan() || self.top_db < 0.0 {
            return Err(GenreError::FeatureExtraction(format!(
                "top_db must be non-negative, got {}",
                self.top_db
            )));
        }
        Ok(())
    }

    /// Shape of one stem feature: (mel bins, frames, channel).
    pub fn feature_shape(&self) -> [usize; 3] {
        [self.n_mels, self.target_frames, 1]
    }
}

/// Converts one waveform into a dB-scaled mel spectrogram.
///
/// Holds the FFT plan and window so repeated extractions (four stems per request)
/// share them. The extractor is immutable and can be used from several threads.
pub struct SpectrogramExtractor {
    params: SpectrogramParams,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
}

impl SpectrogramExtractor {
    pub fn new(params: SpectrogramParams) -> Result<Self> {
        params.validate()?;
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(params.n_fft);
        let window = hann_window(params.n_fft);
        Ok(Self {
            params,
            fft,
            window,
        })
    }

    pub fn params(&self) -> &SpectrogramParams {
        &self.params
    }

    pub fn extract(&self, samples: &[f32], sample_rate: u32) -> Result<Spectrogram> {
        let n_fft = self.params.n_fft;
        let hop = self.params.hop_length;

        if samples.is_empty() {
            return Err(GenreError::FeatureExtraction("waveform is empty".into()));
        }
        if sample_rate == 0 {
            return Err(GenreError::FeatureExtraction("sample rate is zero".into()));
        }
        if samples.iter().any(|s| !s.is_finite()) {
            return Err(GenreError::FeatureExtraction(
                "waveform contains non-finite samples".into(),
            ));
        }
        if !self.params.center && samples.len() < n_fft {
            return Err(GenreError::FeatureExtraction(format!(
                "waveform of {} samples is shorter than n_fft={} with centering disabled",
                samples.len(),
                n_fft
            )));
        }
        if self.params.center && samples.len() < n_fft {
            log::warn!(
                "n_fft={} is larger than the waveform ({} samples); frames are mostly padding",
                n_fft,
                samples.len()
            );
        }
        if sample_rate != self.params.sample_rate {
            log::debug!(
                "Analyzing at native rate {}Hz (configured {}Hz)",
                sample_rate,
                self.params.sample_rate
            );
        }

        let padded: Vec<f32> = if self.params.center {
            let pad = n_fft / 2;
            let mut buf = vec![0.0f32; samples.len() + 2 * pad];
            buf[pad..pad + samples.len()].copy_from_slice(samples);
            buf
        } else {
            samples.to_vec()
        };

        let n_frames = 1 + (padded.len() - n_fft) / hop;
        let n_bins = n_fft / 2 + 1;
        let filters = mel_filterbank(self.params.n_mels, n_fft, sample_rate);

        let columns: Vec<Vec<f32>> = (0..n_frames)
            .into_par_iter()
            .map(|frame_idx| {
                let start = frame_idx * hop;
                let mut buffer: Vec<Complex<f32>> = padded[start..start + n_fft]
                    .iter()
                    .zip(self.window.iter())
                    .map(|(&s, &w)| Complex::new(s * w, 0.0))
                    .collect();
                self.fft.process(&mut buffer);

                let power: Vec<f32> = buffer[..n_bins].iter().map(|c| c.norm_sqr()).collect();

                filters
                    .iter()
                    .map(|filter| {
                        filter
                            .weights
                            .iter()
                            .zip(&power[filter.start..filter.start + filter.weights.len()])
                            .map(|(w, p)| w * p)
                            .sum::<f32>()
                    })
                    .collect()
            })
            .collect();

        let mut mel = Array2::<f32>::zeros((self.params.n_mels, n_frames));
        for (t, column) in columns.iter().enumerate() {
            for (m, &energy) in column.iter().enumerate() {
                mel[[m, t]] = energy;
            }
        }

        power_to_db(&mut mel, self.params.top_db);
        Ok(mel)
    }
}

/// Converts power to dB in place, referenced to the maximum power and clipped `top_db` below the peak.
///
/// An all-zero input maps to 0 dB everywhere: both the values and the reference clamp to `AMIN`.
pub fn power_to_db(spec: &mut Spectrogram, top_db: f32) {
    let ref_power = spec.iter().copied().fold(0.0f32, f32::max);
    let ref_db = 10.0 * ref_power.max(AMIN).log10();

    spec.mapv_inplace(|p| 10.0 * p.max(AMIN).log10() - ref_db);

    let peak = spec.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let floor = peak - top_db;
    spec.mapv_inplace(|v| v.max(floor));
}

/// Pads or crops the time axis to exactly `target_frames`.
///
/// Shorter inputs are right-padded with [`SILENCE_FLOOR_DB`]; longer inputs keep their
/// leading frames. Equal-length inputs are returned untouched.
pub fn normalize_length(spec: Spectrogram, target_frames: usize) -> Spectrogram {
    let (n_mels, current) = spec.dim();

    if current == target_frames {
        spec
    } else if current < target_frames {
        let mut padded = Array2::from_elem((n_mels, target_frames), SILENCE_FLOOR_DB);
        padded.slice_mut(s![.., ..current]).assign(&spec);
        log::debug!("Padded from {} to {} frames", current, target_frames);
        padded
    } else {
        log::debug!("Cropped from {} to {} frames", current, target_frames);
        spec.slice(s![.., ..target_frames]).to_owned()
    }
}

/// Non-zero span of one triangular mel filter over the FFT bins.
struct MelFilter {
    start: usize,
    weights: Vec<f32>,
}

/// Slaney-scale mel filterbank covering 0 Hz to Nyquist, each filter normalized to unit area.
fn mel_filterbank(n_mels: usize, n_fft: usize, sample_rate: u32) -> Vec<MelFilter> {
    let n_bins = n_fft / 2 + 1;
    let sr = sample_rate as f64;
    let fft_freqs: Vec<f64> = (0..n_bins).map(|k| k as f64 * sr / n_fft as f64).collect();

    let mel_max = hz_to_mel(sr / 2.0);
    let mel_points: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f64 / (n_mels + 1) as f64))
        .collect();

    (0..n_mels)
        .map(|m| {
            let (left, center, right) = (mel_points[m], mel_points[m + 1], mel_points[m + 2]);
            let enorm = 2.0 / (right - left);

            let full: Vec<f32> = fft_freqs
                .iter()
                .map(|&f| {
                    let lower = (f - left) / (center - left);
                    let upper = (right - f) / (right - center);
                    (lower.min(upper).max(0.0) * enorm) as f32
                })
                .collect();

            let start = full.iter().position(|&w| w > 0.0).unwrap_or(0);
            let end = full.iter().rposition(|&w| w > 0.0).map_or(start, |i| i + 1);
            MelFilter {
                start,
                weights: full[start..end].to_vec(),
            }
        })
        .collect()
}

const F_SP: f64 = 200.0 / 3.0;
const MIN_LOG_HZ: f64 = 1000.0;
const MIN_LOG_MEL: f64 = MIN_LOG_HZ / F_SP;

fn log_step() -> f64 {
    6.4f64.ln() / 27.0
}

fn hz_to_mel(hz: f64) -> f64 {
    if hz >= MIN_LOG_HZ {
        MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / log_step()
    } else {
        hz / F_SP
    }
}

fn mel_to_hz(mel: f64) -> f64 {
    if mel >= MIN_LOG_MEL {
        MIN_LOG_HZ * (log_step() * (mel - MIN_LOG_MEL)).exp()
    } else {
        F_SP * mel
    }
}

/// Periodic Hann window (the DFT-even form used for spectral analysis).
fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / size as f32).cos()))
        .collect()
}
