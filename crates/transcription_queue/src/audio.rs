use crate::error::ResourceError;
use hound::{SampleFormat, WavReader};
use std::path::Path;
use tracing::debug;

/// Decodes a job's audio file into mono samples at the engine's sample rate
pub trait AudioLoader: Send + Sync + 'static {
	/// # Errors
	/// `ResourceError` when the file cannot be read or is in an unsupported format
	fn load(&self, path: &Path) -> Result<Vec<f32>, ResourceError>;
}

/// WAV decoder. Multi-channel input is averaged down to mono; no resampling.
#[derive(Debug, Clone, Copy)]
pub struct WavLoader {
	sample_rate: u32,
}

impl WavLoader {
	#[must_use]
	pub const fn new(sample_rate: u32) -> Self {
		Self { sample_rate }
	}
}

fn audio_error(path: &Path, error: impl ToString) -> ResourceError {
	ResourceError::Audio {
		path: path.to_path_buf(),
		reason: error.to_string(),
	}
}

impl AudioLoader for WavLoader {
	fn load(&self, path: &Path) -> Result<Vec<f32>, ResourceError> {
		let mut reader = WavReader::open(path).map_err(|e| audio_error(path, e))?;
		let spec = reader.spec();

		debug!(
			path = %path.display(),
			sample_rate = spec.sample_rate,
			channels = spec.channels,
			bits = spec.bits_per_sample,
			"📂 Loading WAV file"
		);

		if spec.sample_rate != self.sample_rate {
			return Err(ResourceError::SampleRate {
				expected: self.sample_rate,
				found: spec.sample_rate,
			});
		}

		let interleaved: Vec<f32> = match spec.sample_format {
			SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>().map_err(|e| audio_error(path, e))?,
			SampleFormat::Int => {
				let scale = (1_i64 << (spec.bits_per_sample - 1)) as f32;
				reader
					.samples::<i32>()
					.map(|s| s.map(|sample| sample as f32 / scale))
					.collect::<Result<_, _>>()
					.map_err(|e| audio_error(path, e))?
			}
		};

		let channels = usize::from(spec.channels.max(1));
		if channels == 1 {
			return Ok(interleaved);
		}

		Ok(interleaved.chunks(channels).map(|frame| frame.iter().sum::<f32>() / frame.len() as f32).collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use hound::{WavSpec, WavWriter};
	use tempfile::tempdir;

	fn write_wav(path: &Path, channels: u16, sample_rate: u32, samples: &[i16]) {
		let spec = WavSpec {
			channels,
			sample_rate,
			bits_per_sample: 16,
			sample_format: SampleFormat::Int,
		};
		let mut writer = WavWriter::create(path, spec).unwrap();
		for &sample in samples {
			writer.write_sample(sample).unwrap();
		}
		writer.finalize().unwrap();
	}

	#[test]
	fn test_mono_int_samples_are_normalised() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("mono.wav");
		write_wav(&path, 1, 16000, &[0, 16384, -32768]);

		let samples = WavLoader::new(16000).load(&path).unwrap();
		assert_eq!(samples, vec![0.0, 0.5, -1.0]);
	}

	#[test]
	fn test_stereo_is_downmixed() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("stereo.wav");
		write_wav(&path, 2, 16000, &[16384, 0, -16384, -16384]);

		let samples = WavLoader::new(16000).load(&path).unwrap();
		assert_eq!(samples, vec![0.25, -0.5]);
	}

	#[test]
	fn test_sample_rate_mismatch() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("cd.wav");
		write_wav(&path, 1, 44100, &[0, 1, 2]);

		let error = WavLoader::new(16000).load(&path).unwrap_err();
		assert_eq!(error, ResourceError::SampleRate { expected: 16000, found: 44100 });
	}

	#[test]
	fn test_unreadable_file() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("not-audio.wav");
		std::fs::write(&path, b"definitely not RIFF").unwrap();

		assert!(matches!(WavLoader::new(16000).load(&path), Err(ResourceError::Audio { .. })));
	}
}
