use crate::chunking::UnitSpan;
use serde::{Deserialize, Serialize};

/// A timed piece of text, times in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
	pub start: f64,
	pub end: f64,
	pub text: String,
}

impl TranscriptSegment {
	pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
		Self { start, end, text: text.into() }
	}

	#[must_use]
	pub fn shifted(mut self, offset_secs: f64) -> Self {
		self.start += offset_secs;
		self.end += offset_secs;
		self
	}
}

/// What the engine returns for one call, timestamps relative to the audio it was given
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineOutput {
	pub text: String,
	pub segments: Vec<TranscriptSegment>,
}

impl EngineOutput {
	pub fn new(text: impl Into<String>) -> Self {
		Self {
			text: text.into(),
			segments: Vec::new(),
		}
	}

	#[must_use]
	pub fn with_segment(mut self, segment: TranscriptSegment) -> Self {
		self.segments.push(segment);
		self
	}
}

/// Output of one completed unit, with segment times already absolute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitOutput {
	pub index: usize,
	pub start_secs: f64,
	pub end_secs: f64,
	pub text: String,
	pub segments: Vec<TranscriptSegment>,
}

impl UnitOutput {
	/// Shift the engine's unit-relative timestamps by the unit's offset in the source
	#[must_use]
	pub fn from_engine(span: &UnitSpan, output: EngineOutput, sample_rate: u32) -> Self {
		let start_secs = span.start_secs(sample_rate);
		Self {
			index: span.index,
			start_secs,
			end_secs: span.end_secs(sample_rate),
			text: output.text.trim().to_string(),
			segments: output.segments.into_iter().map(|segment| segment.shifted(start_secs)).collect(),
		}
	}
}

/// Final result of a job, assembled from its units
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
	pub text: String,
	pub segments: Vec<TranscriptSegment>,
	pub language: Option<String>,
}

impl Transcript {
	/// Stitch unit outputs in index order. Unit texts are joined with a single space,
	/// empty units (silence) contribute nothing.
	#[must_use]
	pub fn assemble(units: &[UnitOutput], language: Option<String>) -> Self {
		let mut ordered: Vec<&UnitOutput> = units.iter().collect();
		ordered.sort_by_key(|unit| unit.index);

		let text = ordered.iter().map(|unit| unit.text.as_str()).filter(|text| !text.is_empty()).collect::<Vec<_>>().join(" ");
		let segments = ordered.iter().flat_map(|unit| unit.segments.iter().cloned()).collect();

		Self { text, segments, language }
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_unit_output_offsets_segments() {
		let span = UnitSpan {
			index: 2,
			start_sample: 60,
			end_sample: 90,
		};
		let output = EngineOutput::new("  hello there ")
			.with_segment(TranscriptSegment::new(0.0, 1.5, "hello"))
			.with_segment(TranscriptSegment::new(1.5, 3.0, "there"));

		let unit = UnitOutput::from_engine(&span, output, 10);

		assert_eq!(unit.index, 2);
		assert_eq!(unit.text, "hello there");
		assert!((unit.start_secs - 6.0).abs() < f64::EPSILON);
		assert!((unit.end_secs - 9.0).abs() < f64::EPSILON);
		assert!((unit.segments[0].start - 6.0).abs() < f64::EPSILON);
		assert!((unit.segments[1].end - 9.0).abs() < f64::EPSILON);
	}

	#[test]
	fn test_assemble_matches_unchunked_layout() {
		let first = UnitOutput {
			index: 0,
			start_secs: 0.0,
			end_secs: 30.0,
			text: "good morning".to_string(),
			segments: vec![TranscriptSegment::new(0.0, 2.0, "good morning")],
		};
		let silent = UnitOutput {
			index: 1,
			start_secs: 30.0,
			end_secs: 60.0,
			text: String::new(),
			segments: Vec::new(),
		};
		let last = UnitOutput {
			index: 2,
			start_secs: 60.0,
			end_secs: 75.0,
			text: "goodbye".to_string(),
			segments: vec![TranscriptSegment::new(61.0, 62.0, "goodbye")],
		};

		// Out-of-order input still assembles by index
		let transcript = Transcript::assemble(&[last, first, silent], Some("en".to_string()));

		assert_eq!(transcript.text, "good morning goodbye");
		assert_eq!(transcript.segments.len(), 2);
		assert!((transcript.segments[1].start - 61.0).abs() < f64::EPSILON);
		assert_eq!(transcript.language.as_deref(), Some("en"));
	}
}
