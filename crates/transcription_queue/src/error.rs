use crate::job::{JobId, JobStatus, Priority};
use std::path::PathBuf;
use thiserror::Error;

/// Malformed submission, rejected before the job reaches the queue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
	#[error("audio buffer is empty")]
	EmptyAudio,
	#[error("batch contains no audio sources")]
	EmptyBatch,
	#[error("audio file not found: {}", .0.display())]
	MissingFile(PathBuf),
	#[error("bulk jobs cannot be submitted with {0} priority")]
	InvalidPriority(Priority),
	#[error("invalid configuration: {0}")]
	Config(String),
}

/// Raised by the inference engine or while reading a job's audio.
/// Fails the job, never the scheduler loop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
	#[error("transcription failed: {0}")]
	Transcription(String),
	#[error("failed to load audio from {}: {reason}", path.display())]
	Audio { path: PathBuf, reason: String },
	#[error("unsupported sample rate {found} Hz (expected {expected} Hz)")]
	SampleRate { expected: u32, found: u32 },
	#[error("audio source contains no samples")]
	NoSamples,
	#[error("engine panicked: {0}")]
	Panicked(String),
}

/// Checkpoint read/write failure. Logged by the scheduler; degrades resumability only.
#[derive(Error, Debug)]
pub enum PersistenceError {
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
	#[error("no checkpoint record for job {0}")]
	UnknownJob(JobId),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
	#[error("queue is closed")]
	Closed,
	#[error("job {0} is already queued")]
	Duplicate(JobId),
}

#[derive(Error, Debug)]
pub enum SchedulerError {
	#[error("validation error: {0}")]
	Validation(#[from] ValidationError),
	#[error("unknown job {0}")]
	UnknownJob(JobId),
	#[error("job {job_id} is {status}; operation not allowed")]
	InvalidState { job_id: JobId, status: JobStatus },
	#[error("job {0} is already queued")]
	DuplicateJob(JobId),
	#[error("scheduler is shutting down")]
	ShuttingDown,
	#[error("persistence error: {0}")]
	Persistence(#[from] PersistenceError),
	#[error("Prometheus error: {0}")]
	Metrics(#[from] prometheus::Error),
	#[error("resource lock already held while dispatching job {0}")]
	ResourceBusy(JobId),
	#[error("failed to spawn scheduler thread: {0}")]
	Spawn(#[from] std::io::Error),
	#[error("scheduler loop panicked")]
	WorkerPanicked,
}

impl From<QueueError> for SchedulerError {
	fn from(error: QueueError) -> Self {
		match error {
			QueueError::Closed => Self::ShuttingDown,
			QueueError::Duplicate(job_id) => Self::DuplicateJob(job_id),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_queue_error_conversion() {
		let job_id = JobId::new();
		assert!(matches!(SchedulerError::from(QueueError::Closed), SchedulerError::ShuttingDown));
		assert!(matches!(SchedulerError::from(QueueError::Duplicate(job_id)), SchedulerError::DuplicateJob(id) if id == job_id));
	}

	#[test]
	fn test_error_messages() {
		let error = ResourceError::SampleRate { expected: 16000, found: 44100 };
		assert_eq!(error.to_string(), "unsupported sample rate 44100 Hz (expected 16000 Hz)");

		let error = SchedulerError::from(ValidationError::InvalidPriority(Priority::High));
		assert_eq!(error.to_string(), "validation error: bulk jobs cannot be submitted with high priority");
	}
}
