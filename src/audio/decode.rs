use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{GenreError, Result};

/// Mono samples at the file's native rate.
#[derive(Clone, Debug)]
pub struct Waveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Waveform {
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Decode an audio file into a mono waveform, keeping its native sample rate.
///
/// Multi-channel audio is downmixed by averaging channels.
pub fn decode_waveform(path: &Path) -> Result<Waveform> {
    let fail = |message: String| GenreError::Decode {
        path: path.to_path_buf(),
        message,
    };

    let file = std::fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| fail(format!("probe failed: {}", e)))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| fail("no audio tracks found".into()))?;

    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| fail("unknown sample rate".into()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| fail(format!("no decoder: {}", e)))?;

    let mut all_samples: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => return Err(fail(e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(fail(e.to_string())),
        };

        // Containers may omit the channel count; the decoded buffer always carries it.
        let spec = *decoded.spec();
        let num_frames = decoded.frames();

        let mut sample_buf = SampleBuffer::<f32>::new(num_frames as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);

        downmix_into(&mut all_samples, sample_buf.samples(), spec.channels.count());
    }

    log::debug!(
        "Decoded {}: {} samples, {}Hz, {:.1}s",
        path.display(),
        all_samples.len(),
        sample_rate,
        all_samples.len() as f32 / sample_rate as f32
    );

    Ok(Waveform {
        samples: all_samples,
        sample_rate,
    })
}

/// Appends interleaved frames to `out` as their channel average.
fn downmix_into(out: &mut Vec<f32>, interleaved: &[f32], channels: usize) {
    if channels <= 1 {
        out.extend_from_slice(interleaved);
        return;
    }
    out.extend(
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, channels: u16, sample_rate: u32, frames: &[Vec<f32>]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for frame in frames {
            for &s in frame {
                writer.write_sample(s).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn decodes_mono_wav_at_native_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let frames: Vec<Vec<f32>> = (0..4410).map(|i| vec![(i as f32 * 0.01).sin() * 0.5]).collect();
        write_wav(&path, 1, 44100, &frames);

        let wave = decode_waveform(&path).unwrap();
        assert_eq!(wave.sample_rate, 44100);
        assert_eq!(wave.samples.len(), 4410);
        assert!((wave.duration_secs() - 0.1).abs() < 1e-4);
    }

    #[test]
    fn downmixes_stereo_by_averaging() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let frames: Vec<Vec<f32>> = (0..100).map(|_| vec![0.5, -0.25]).collect();
        write_wav(&path, 2, 22050, &frames);

        let wave = decode_waveform(&path).unwrap();
        assert_eq!(wave.samples.len(), 100);
        assert!(wave.samples.iter().all(|&s| (s - 0.125).abs() < 1e-6));
    }

    #[test]
    fn downmix_follows_the_buffer_channel_count() {
        let interleaved = [0.3, 0.6, 0.9, -0.3, -0.6, -0.9];
        let mut out = Vec::new();
        downmix_into(&mut out, &interleaved, 3);
        assert_eq!(out.len(), 2);
        assert!((out[0] - 0.6).abs() < 1e-6);
        assert!((out[1] + 0.6).abs() < 1e-6);

        downmix_into(&mut out, &[0.25, 0.5], 1);
        assert_eq!(out.len(), 4);
        assert_eq!(&out[2..], &[0.25, 0.5]);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = decode_waveform(Path::new("/nonexistent/stem.wav")).unwrap_err();
        assert!(matches!(err, GenreError::Io(_)));
    }
}
