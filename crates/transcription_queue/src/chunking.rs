use crate::config::Config;
use crate::error::ValidationError;
use std::ops::Range;
use std::time::Duration;

/// A contiguous slice of a job's samples, processed atomically between preemption checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitSpan {
	pub index: usize,
	pub start_sample: usize,
	pub end_sample: usize,
}

impl UnitSpan {
	/// The whole input as a single unit (interactive jobs)
	#[must_use]
	pub const fn whole(total_samples: usize) -> Self {
		Self {
			index: 0,
			start_sample: 0,
			end_sample: total_samples,
		}
	}

	#[must_use]
	pub const fn len(&self) -> usize {
		self.end_sample - self.start_sample
	}

	#[must_use]
	pub const fn is_empty(&self) -> bool {
		self.len() == 0
	}

	#[must_use]
	pub const fn range(&self) -> Range<usize> {
		self.start_sample..self.end_sample
	}

	#[must_use]
	pub fn start_secs(&self, sample_rate: u32) -> f64 {
		self.start_sample as f64 / f64::from(sample_rate)
	}

	#[must_use]
	pub fn end_secs(&self, sample_rate: u32) -> f64 {
		self.end_sample as f64 / f64::from(sample_rate)
	}
}

/// Splits bulk audio into fixed-duration units.
///
/// The unit length bounds preemption latency: a high-priority job waits at most one
/// unit's processing time. The final unit may be shorter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSplitter {
	sample_rate: u32,
	unit_samples: usize,
}

impl ChunkSplitter {
	/// # Errors
	/// Returns `ValidationError::Config` if the sample rate or unit duration yields empty units
	pub fn new(sample_rate: u32, unit_duration: Duration) -> Result<Self, ValidationError> {
		let unit_samples = (f64::from(sample_rate) * unit_duration.as_secs_f64()).round() as usize;
		if unit_samples == 0 {
			return Err(ValidationError::Config(format!(
				"unit of {unit_duration:?} at {sample_rate} Hz contains no samples"
			)));
		}

		Ok(Self { sample_rate, unit_samples })
	}

	/// # Errors
	/// Same as [`ChunkSplitter::new`]
	pub fn from_config(config: &Config) -> Result<Self, ValidationError> {
		Self::new(config.sample_rate, config.unit_duration())
	}

	#[must_use]
	pub const fn sample_rate(&self) -> u32 {
		self.sample_rate
	}

	#[must_use]
	pub const fn unit_samples(&self) -> usize {
		self.unit_samples
	}

	#[must_use]
	pub const fn unit_count(&self, total_samples: usize) -> usize {
		total_samples.div_ceil(self.unit_samples)
	}

	#[must_use]
	pub fn spans(&self, total_samples: usize) -> Vec<UnitSpan> {
		(0..self.unit_count(total_samples))
			.map(|index| {
				let start_sample = index * self.unit_samples;
				UnitSpan {
					index,
					start_sample,
					end_sample: (start_sample + self.unit_samples).min(total_samples),
				}
			})
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_default_unit_is_thirty_seconds() {
		let splitter = ChunkSplitter::from_config(&Config::default()).unwrap();
		assert_eq!(splitter.unit_samples(), 30 * 16000);
		assert_eq!(splitter.sample_rate(), 16000);
	}

	#[test]
	fn test_spans_cover_input_exactly() {
		let splitter = ChunkSplitter::new(10, Duration::from_secs(3)).unwrap();
		let spans = splitter.spans(70);

		assert_eq!(spans.len(), 3);
		assert_eq!(spans[0].range(), 0..30);
		assert_eq!(spans[1].range(), 30..60);
		assert_eq!(spans[2].range(), 60..70);
		assert_eq!(spans.iter().map(UnitSpan::len).sum::<usize>(), 70);
		assert!(spans.iter().enumerate().all(|(i, span)| span.index == i));
	}

	#[test]
	fn test_unit_offsets_are_cumulative() {
		let splitter = ChunkSplitter::new(16000, Duration::from_secs(30)).unwrap();
		let spans = splitter.spans(16000 * 75);

		assert_eq!(spans.len(), 3);
		assert!((spans[1].start_secs(16000) - 30.0).abs() < f64::EPSILON);
		assert!((spans[2].start_secs(16000) - 60.0).abs() < f64::EPSILON);
		assert!((spans[2].end_secs(16000) - 75.0).abs() < f64::EPSILON);
	}

	#[test]
	fn test_exact_multiple_and_empty_input() {
		let splitter = ChunkSplitter::new(10, Duration::from_secs(1)).unwrap();
		assert_eq!(splitter.unit_count(30), 3);
		assert_eq!(splitter.unit_count(31), 4);
		assert!(splitter.spans(0).is_empty());
	}

	#[test]
	fn test_zero_length_units_rejected() {
		assert!(ChunkSplitter::new(16000, Duration::ZERO).is_err());
		assert!(ChunkSplitter::new(0, Duration::from_secs(30)).is_err());
	}

	#[test]
	fn test_whole_span() {
		let span = UnitSpan::whole(480);
		assert_eq!(span.index, 0);
		assert_eq!(span.range(), 0..480);
		assert!(!span.is_empty());
	}
}
