use std::fmt;
use std::str::FromStr;

use ndarray::{Array3, ArrayView3, Axis};
use rayon::prelude::*;

use super::decode::decode_waveform;
use super::spectrogram::{normalize_length, SpectrogramExtractor, SpectrogramParams};
use crate::error::{GenreError, Result};
use crate::separate::SeparatedStems;

/// One isolated instrumental component. Declaration order is the classifier's input order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stem {
    Vocals,
    Drums,
    Bass,
    Other,
}

impl Stem {
    /// Canonical order of the classifier's four positional inputs.
    pub const ALL: [Stem; 4] = [Stem::Vocals, Stem::Drums, Stem::Bass, Stem::Other];

    pub fn name(self) -> &'static str {
        match self {
            Stem::Vocals => "vocals",
            Stem::Drums => "drums",
            Stem::Bass => "bass",
            Stem::Other => "other",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Stem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stem {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Stem::ALL
            .iter()
            .copied()
            .find(|stem| stem.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown stem '{}'", s))
    }
}

/// A fixed-shape spectrogram with a trailing channel axis: (mel bins, frames, 1).
#[derive(Clone, Debug, PartialEq)]
pub struct StemFeature {
    pub stem: Stem,
    pub data: Array3<f32>,
}

/// Exactly four stem features in canonical order. Immutable once assembled.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureSet {
    features: [StemFeature; 4],
}

impl FeatureSet {
    /// Builds a set, checking every slot holds the stem that belongs there.
    pub fn new(features: [StemFeature; 4]) -> Result<Self> {
        for (slot, feature) in features.iter().enumerate() {
            let expected = Stem::ALL[slot];
            if feature.stem != expected {
                return Err(GenreError::FeatureExtraction(format!(
                    "slot {} holds '{}' but must hold '{}'",
                    slot, feature.stem, expected
                )));
            }
        }
        Ok(Self { features })
    }

    pub fn get(&self, stem: Stem) -> &StemFeature {
        &self.features[stem.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &StemFeature> {
        self.features.iter()
    }

    pub fn into_tensors(self) -> Vec<Array3<f32>> {
        self.features.into_iter().map(|f| f.data).collect()
    }

    /// Nested `[stem][mel][frame][channel]` lists, the wire layout of the process endpoint.
    pub fn to_nested(&self) -> Vec<NestedTensor> {
        self.features.iter().map(|f| tensor_to_nested(f.data.view())).collect()
    }
}

pub type NestedTensor = Vec<Vec<Vec<f32>>>;

pub fn tensor_to_nested(tensor: ArrayView3<'_, f32>) -> NestedTensor {
    tensor
        .outer_iter()
        .map(|mel_row| {
            mel_row
                .outer_iter()
                .map(|frame| frame.iter().copied().collect())
                .collect()
        })
        .collect()
}

/// Rebuilds a tensor from nested lists, rejecting ragged input.
pub fn tensor_from_nested(index: usize, nested: &[Vec<Vec<f32>>]) -> Result<Array3<f32>> {
    let d0 = nested.len();
    let d1 = nested.first().map_or(0, |r| r.len());
    let d2 = nested.first().and_then(|r| r.first()).map_or(0, |c| c.len());

    let mut flat = Vec::with_capacity(d0 * d1 * d2);
    for row in nested {
        if row.len() != d1 {
            return Err(ragged(index, [d0, d1, d2], [d0, row.len(), d2]));
        }
        for cell in row {
            if cell.len() != d2 {
                return Err(ragged(index, [d0, d1, d2], [d0, d1, cell.len()]));
            }
            flat.extend_from_slice(cell);
        }
    }

    Array3::from_shape_vec((d0, d1, d2), flat)
        .map_err(|e| GenreError::FeatureExtraction(format!("tensor {}: {}", index, e)))
}

fn ragged(index: usize, expected: [usize; 3], actual: [usize; 3]) -> GenreError {
    GenreError::InvalidShape {
        index,
        expected: expected.to_vec(),
        actual: actual.to_vec(),
    }
}

/// Turns separator output into a [`FeatureSet`].
pub struct FeatureAssembler {
    extractor: SpectrogramExtractor,
}

impl FeatureAssembler {
    pub fn new(params: SpectrogramParams) -> Result<Self> {
        Ok(Self {
            extractor: SpectrogramExtractor::new(params)?,
        })
    }

    /// Locates, decodes and extracts each stem by name.
    ///
    /// All four stems are located before any decoding starts, so a missing stem is
    /// reported without paying for the others. Stems are then processed in parallel;
    /// results are placed by stem name, never by enumeration order.
    pub fn assemble(&self, stems: &SeparatedStems) -> Result<FeatureSet> {
        let located = Stem::ALL
            .iter()
            .map(|&stem| stems.locate(stem).map(|path| (stem, path)))
            .collect::<Result<Vec<_>>>()?;

        let features = located
            .par_iter()
            .map(|(stem, path)| {
                let waveform = decode_waveform(path)?;
                log::debug!(
                    "Decoded {} stem: {:.1}s at {}Hz",
                    stem,
                    waveform.duration_secs(),
                    waveform.sample_rate
                );
                self.stem_feature(*stem, &waveform.samples, waveform.sample_rate)
            })
            .collect::<Result<Vec<_>>>()?;

        let features: [StemFeature; 4] =
            features
                .try_into()
                .map_err(|v: Vec<StemFeature>| GenreError::InvalidInput {
                    expected: Stem::ALL.len(),
                    actual: v.len(),
                })?;
        FeatureSet::new(features)
    }

    /// Extract, fix the frame count, and add the channel axis for one stem.
    pub fn stem_feature(&self, stem: Stem, samples: &[f32], sample_rate: u32) -> Result<StemFeature> {
        let target = self.extractor.params().target_frames;
        let spec = self.extractor.extract(samples, sample_rate)?;
        let spec = normalize_length(spec, target);
        let data = spec.insert_axis(Axis(2));
        log::debug!("Stem {} ({}Hz): {:?}", stem, sample_rate, data.shape());
        Ok(StemFeature { stem, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn write_tone(path: &Path, freq: f32, sample_rate: u32, secs: f32) {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        let n = (sample_rate as f32 * secs) as usize;
        for i in 0..n {
            let v = (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin();
            let s = (v * 0.5 * i16::MAX as f32) as i16;
            writer.write_sample(s).unwrap();
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn small_params() -> SpectrogramParams {
        SpectrogramParams {
            n_mels: 32,
            target_frames: 40,
            ..SpectrogramParams::default()
        }
    }

    #[test]
    fn stems_parse_by_name() {
        assert_eq!("Vocals".parse::<Stem>().unwrap(), Stem::Vocals);
        assert_eq!("other".parse::<Stem>().unwrap(), Stem::Other);
        assert!("piano".parse::<Stem>().is_err());
    }

    #[test]
    fn canonical_order_is_positional() {
        let names: Vec<&str> = Stem::ALL.iter().map(|s| s.name()).collect();
        assert_eq!(names, ["vocals", "drums", "bass", "other"]);
        for (i, stem) in Stem::ALL.iter().enumerate() {
            assert_eq!(stem.index(), i);
        }
    }

    #[test]
    fn assemble_orders_by_name_not_by_directory() {
        let dir = tempfile::tempdir().unwrap();
        // Written in reverse so directory enumeration order differs from canonical order.
        let tones = [(Stem::Other, 880.0), (Stem::Bass, 110.0), (Stem::Drums, 3000.0), (Stem::Vocals, 440.0)];
        for (stem, freq) in tones {
            write_tone(&dir.path().join(format!("{}.wav", stem)), freq, 22050, 0.5);
        }

        let assembler = FeatureAssembler::new(small_params()).unwrap();
        let set = assembler.assemble(&SeparatedStems::new(dir.path())).unwrap();

        let order: Vec<Stem> = set.iter().map(|f| f.stem).collect();
        assert_eq!(order, Stem::ALL.to_vec());
        for feature in set.iter() {
            assert_eq!(feature.data.shape(), &[32, 40, 1]);
        }

        // The bass tone peaks in a lower mel bin than the vocal tone.
        let peak = |stem: Stem| {
            let col = set.get(stem).data.index_axis(Axis(1), 5).to_owned();
            col.iter()
                .enumerate()
                .fold((0usize, f32::NEG_INFINITY), |b, (i, &v)| if v > b.1 { (i, v) } else { b })
                .0
        };
        assert!(peak(Stem::Bass) < peak(Stem::Vocals));
        assert!(peak(Stem::Vocals) < peak(Stem::Drums));
    }

    #[test]
    fn assemble_names_the_missing_stem() {
        let dir = tempfile::tempdir().unwrap();
        for stem in [Stem::Vocals, Stem::Bass, Stem::Other] {
            write_tone(&dir.path().join(format!("{}.wav", stem)), 440.0, 22050, 0.2);
        }

        let assembler = FeatureAssembler::new(small_params()).unwrap();
        match assembler.assemble(&SeparatedStems::new(dir.path())) {
            Err(GenreError::StemMissing { stem, .. }) => assert_eq!(stem, Stem::Drums),
            other => panic!("expected StemMissing, got {:?}", other),
        }
    }

    #[test]
    fn thirty_second_stems_have_model_shape() {
        let dir = tempfile::tempdir().unwrap();
        for stem in Stem::ALL {
            write_tone(&dir.path().join(format!("{}.wav", stem)), 440.0, 44100, 30.0);
        }
        let assembler = FeatureAssembler::new(SpectrogramParams::default()).unwrap();
        let set = assembler.assemble(&SeparatedStems::new(dir.path())).unwrap();
        for feature in set.iter() {
            assert_eq!(feature.data.shape(), &[128, 862, 1]);
        }
    }

    #[test]
    fn feature_set_rejects_misplaced_stems() {
        let feature = |stem| StemFeature {
            stem,
            data: Array3::zeros((2, 3, 1)),
        };
        let err = FeatureSet::new([
            feature(Stem::Drums),
            feature(Stem::Vocals),
            feature(Stem::Bass),
            feature(Stem::Other),
        ]);
        assert!(err.is_err());
    }

    #[test]
    fn nested_conversion_keeps_layout() {
        let tensor = Array3::from_shape_fn((3, 4, 1), |(m, t, _)| (m * 10 + t) as f32);
        let nested = tensor_to_nested(tensor.view());
        assert_eq!(nested.len(), 3);
        assert_eq!(nested[2][3], vec![23.0]);
        assert_eq!(tensor_from_nested(0, &nested).unwrap(), tensor);
    }

    #[test]
    fn ragged_nested_tensor_is_rejected() {
        let nested = vec![vec![vec![0.0], vec![1.0]], vec![vec![2.0]]];
        assert!(matches!(
            tensor_from_nested(1, &nested),
            Err(GenreError::InvalidShape { index: 1, .. })
        ));
    }
}
