use crate::error::ValidationError;
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Where a paused job re-enters the queue relative to jobs of the same priority
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequeuePolicy {
	/// Behind every job already waiting at the same priority
	#[default]
	FreshArrival,
	/// At its original submission position
	OriginalArrival,
}

#[derive(Parser, Clone, Debug, Serialize, Deserialize)]
#[command(author, version, about = "Priority-preemptive transcription scheduler", long_about = None)]
pub struct Config {
	#[arg(long, env = "SAMPLE_RATE", default_value = "16000", help = "Sample rate expected by the transcription engine")]
	pub sample_rate: u32,

	#[arg(long, env = "UNIT_DURATION_SECS", default_value = "30", help = "Length of one bulk-job unit in seconds")]
	pub unit_duration_secs: u64,

	#[arg(
        long,
        env = "PAUSE_POLL_MS",
        default_value = "100",
        help = "How long the loop waits on a cleared pause signal before yielding"
    )]
	pub pause_poll_ms: u64,

	#[arg(long, env = "EVENT_CAPACITY", default_value = "256", help = "Capacity of the job event broadcast channel")]
	pub event_capacity: usize,

	#[arg(long, env = "REQUEUE_POLICY", value_enum, default_value = "fresh-arrival", help = "Queue position of re-queued paused jobs")]
	pub requeue_policy: RequeuePolicy,

	#[arg(long, env = "CHECKPOINT_DIR", help = "Directory for file-backed checkpoints (in-memory when unset)")]
	pub checkpoint_dir: Option<PathBuf>,

	#[arg(
        long,
        env = "MAX_FINISHED_JOBS",
        default_value = "1024",
        help = "Finished jobs kept for status queries and in-memory retry before the oldest is dropped"
    )]
	pub max_finished_jobs: usize,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			sample_rate: 16000,
			unit_duration_secs: 30,
			pause_poll_ms: 100,
			event_capacity: 256,
			requeue_policy: RequeuePolicy::FreshArrival,
			checkpoint_dir: None,
			max_finished_jobs: 1024,
		}
	}
}

impl Config {
	#[must_use]
	pub fn new() -> Self {
		Self::parse()
	}

	#[must_use]
	pub const fn unit_duration(&self) -> Duration {
		Duration::from_secs(self.unit_duration_secs)
	}

	#[must_use]
	pub const fn pause_poll(&self) -> Duration {
		Duration::from_millis(self.pause_poll_ms)
	}

	/// Validate configuration values
	///
	/// # Errors
	/// Returns `ValidationError::Config` naming the first invalid field
	pub fn validate(&self) -> Result<(), ValidationError> {
		if self.sample_rate == 0 {
			return Err(ValidationError::Config("sample_rate must be greater than 0".to_string()));
		}

		if self.unit_duration_secs == 0 {
			return Err(ValidationError::Config("unit_duration_secs must be greater than 0".to_string()));
		}

		if self.pause_poll_ms == 0 {
			return Err(ValidationError::Config("pause_poll_ms must be greater than 0".to_string()));
		}

		if self.event_capacity == 0 {
			return Err(ValidationError::Config("event_capacity must be greater than 0".to_string()));
		}

		if self.max_finished_jobs == 0 {
			return Err(ValidationError::Config("max_finished_jobs must be greater than 0".to_string()));
		}

		Ok(())
	}
}
