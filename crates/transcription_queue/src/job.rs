use crate::transcript::UnitOutput;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Job identifier, assigned at submission and never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
	#[must_use]
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for JobId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for JobId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Scheduling class. Lower rank preempts higher rank.
///
/// The derived ordering follows declaration order, so `High < Normal < Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
	/// Interactive (push-to-talk) requests
	High = 0,
	/// A single bulk file request
	Normal = 1,
	/// A member of a batch submission
	Low = 2,
}

impl Priority {
	#[must_use]
	pub const fn rank(self) -> u8 {
		self as u8
	}

	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::High => "high",
			Self::Normal => "normal",
			Self::Low => "low",
		}
	}

	/// True when a job of this priority should make a running `other` job yield
	#[must_use]
	pub fn preempts(self, other: Self) -> bool {
		self == Self::High && other > self
	}
}

impl fmt::Display for Priority {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
	Pending,
	Running,
	Paused,
	Completed,
	Failed,
	Cancelled,
}

impl JobStatus {
	#[must_use]
	pub const fn is_terminal(self) -> bool {
		matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
	}

	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Pending => "pending",
			Self::Running => "running",
			Self::Paused => "paused",
			Self::Completed => "completed",
			Self::Failed => "failed",
			Self::Cancelled => "cancelled",
		}
	}
}

impl fmt::Display for JobStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Where a job's audio comes from. The two forms are mutually exclusive.
#[derive(Debug, Clone)]
pub enum AudioSource {
	/// Mono samples already in memory at the engine's sample rate
	Buffer(Arc<[f32]>),
	/// Audio file decoded by the configured `AudioLoader` each time the job is dispatched
	File(PathBuf),
}

impl AudioSource {
	pub fn buffer(samples: impl Into<Arc<[f32]>>) -> Self {
		Self::Buffer(samples.into())
	}

	pub fn file(path: impl Into<PathBuf>) -> Self {
		Self::File(path.into())
	}

	#[must_use]
	pub fn file_path(&self) -> Option<&PathBuf> {
		match self {
			Self::File(path) => Some(path),
			Self::Buffer(_) => None,
		}
	}
}

/// Transcription settings, passed through to the engine untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionOptions {
	/// Language code, `None` for auto-detect
	pub language: Option<String>,
	/// Decoder parameters (beam size, temperature, ...)
	#[serde(default)]
	pub params: BTreeMap<String, serde_json::Value>,
}

impl TranscriptionOptions {
	#[must_use]
	pub fn with_language(mut self, language: impl Into<String>) -> Self {
		self.language = Some(language.into());
		self
	}

	#[must_use]
	pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
		self.params.insert(key.into(), value.into());
		self
	}
}

/// One transcription request.
///
/// Identity (`id`, `priority`, `source`, `options`) is fixed at creation. Progress and
/// status are mutated only by whoever currently owns the job: the queue while it waits,
/// the scheduler loop while it runs.
#[derive(Debug)]
pub struct Job {
	id: JobId,
	priority: Priority,
	status: JobStatus,
	source: AudioSource,
	options: Arc<TranscriptionOptions>,
	total_units: usize,
	current_unit_index: usize,
	completed_units: usize,
	partial_results: Vec<UnitOutput>,
	error_message: Option<String>,
	created_at: DateTime<Utc>,
	started_at: Option<DateTime<Utc>>,
	finished_at: Option<DateTime<Utc>>,
	pub(crate) arrival_seq: Option<u64>,
	reload_checkpoint: bool,
	cancel_requested: Arc<AtomicBool>,
}

impl Job {
	pub(crate) fn new(source: AudioSource, options: TranscriptionOptions, priority: Priority) -> Self {
		Self {
			id: JobId::new(),
			priority,
			status: JobStatus::Pending,
			source,
			options: Arc::new(options),
			total_units: 1,
			current_unit_index: 0,
			completed_units: 0,
			partial_results: Vec::new(),
			error_message: None,
			created_at: Utc::now(),
			started_at: None,
			finished_at: None,
			arrival_seq: None,
			reload_checkpoint: false,
			cancel_requested: Arc::new(AtomicBool::new(false)),
		}
	}

	/// Rebuild a file-backed job from its persisted record.
	///
	/// Returns `None` for in-memory jobs, whose audio does not survive a restart. The
	/// rebuilt job reloads its completed units from the checkpoint store on dispatch.
	#[must_use]
	pub fn from_record(record: &JobRecord) -> Option<Self> {
		let path = record.file_path.clone()?;
		let mut job = Self::new(AudioSource::File(path), record.options.clone(), record.priority);
		job.id = record.id;
		job.total_units = record.total_units.max(1);
		job.created_at = record.created_at;
		job.error_message.clone_from(&record.error_message);
		job.status = record.status;
		job.reload_checkpoint = true;
		Some(job)
	}

	#[must_use]
	pub const fn id(&self) -> JobId {
		self.id
	}

	#[cfg(test)]
	pub(crate) fn set_id(&mut self, id: JobId) {
		self.id = id;
	}

	#[must_use]
	pub const fn priority(&self) -> Priority {
		self.priority
	}

	#[must_use]
	pub const fn status(&self) -> JobStatus {
		self.status
	}

	#[must_use]
	pub const fn source(&self) -> &AudioSource {
		&self.source
	}

	#[must_use]
	pub fn options(&self) -> &TranscriptionOptions {
		&self.options
	}

	/// Interactive jobs are never chunked
	#[must_use]
	pub fn is_interactive(&self) -> bool {
		self.priority == Priority::High
	}

	#[must_use]
	pub const fn total_units(&self) -> usize {
		self.total_units
	}

	/// Authoritative resume point
	#[must_use]
	pub const fn current_unit_index(&self) -> usize {
		self.current_unit_index
	}

	#[must_use]
	pub const fn completed_units(&self) -> usize {
		self.completed_units
	}

	#[must_use]
	pub fn partial_results(&self) -> &[UnitOutput] {
		&self.partial_results
	}

	#[must_use]
	pub fn error_message(&self) -> Option<&str> {
		self.error_message.as_deref()
	}

	#[must_use]
	pub const fn started_at(&self) -> Option<DateTime<Utc>> {
		self.started_at
	}

	#[must_use]
	pub fn is_cancel_requested(&self) -> bool {
		self.cancel_requested.load(Ordering::Acquire)
	}

	pub(crate) fn cancel_flag(&self) -> Arc<AtomicBool> {
		Arc::clone(&self.cancel_requested)
	}

	pub(crate) fn take_reload_flag(&mut self) -> bool {
		std::mem::take(&mut self.reload_checkpoint)
	}

	pub(crate) fn set_total_units(&mut self, total_units: usize) {
		self.total_units = total_units;
	}

	/// Replace in-memory progress with units reloaded from the checkpoint store
	pub(crate) fn restore_units(&mut self, units: Vec<UnitOutput>) {
		if units.len() < self.current_unit_index {
			return;
		}
		self.current_unit_index = units.len();
		self.completed_units = units.len();
		self.partial_results = units;
	}

	/// Enter RUNNING. Returns true on the first entry, when the start time is recorded.
	pub(crate) fn mark_running(&mut self) -> bool {
		debug_assert!(!self.status.is_terminal(), "terminal jobs never run again");
		self.status = JobStatus::Running;
		if self.started_at.is_some() {
			return false;
		}
		self.started_at = Some(Utc::now());
		true
	}

	pub(crate) fn record_unit(&mut self, output: UnitOutput) {
		debug_assert_eq!(output.index, self.current_unit_index, "units must complete in order");
		self.partial_results.push(output);
		self.current_unit_index += 1;
		self.completed_units = self.current_unit_index;
	}

	pub(crate) fn mark_paused(&mut self) {
		debug_assert_eq!(self.current_unit_index, self.partial_results.len());
		self.status = JobStatus::Paused;
	}

	pub(crate) fn mark_completed(&mut self) {
		debug_assert_eq!(self.current_unit_index, self.partial_results.len());
		self.status = JobStatus::Completed;
		self.finished_at = Some(Utc::now());
	}

	pub(crate) fn mark_failed(&mut self, message: impl Into<String>) {
		self.status = JobStatus::Failed;
		self.error_message = Some(message.into());
		self.finished_at = Some(Utc::now());
	}

	pub(crate) fn mark_cancelled(&mut self) {
		self.status = JobStatus::Cancelled;
		self.finished_at = Some(Utc::now());
	}

	/// FAILED -> PENDING. Progress is kept so the retry resumes instead of restarting.
	pub(crate) fn reset_for_retry(&mut self) {
		self.status = JobStatus::Pending;
		self.error_message = None;
		self.finished_at = None;
		self.cancel_requested = Arc::new(AtomicBool::new(false));
	}

	#[must_use]
	pub fn to_record(&self) -> JobRecord {
		JobRecord {
			id: self.id,
			priority: self.priority,
			status: self.status,
			file_path: self.source.file_path().cloned(),
			options: (*self.options).clone(),
			total_units: self.total_units,
			current_unit_index: self.current_unit_index,
			completed_units: self.completed_units,
			error_message: self.error_message.clone(),
			created_at: self.created_at,
			updated_at: Utc::now(),
		}
	}

	#[must_use]
	pub fn snapshot(&self) -> JobSnapshot {
		JobSnapshot {
			id: self.id,
			priority: self.priority,
			status: self.status,
			current_unit_index: self.current_unit_index,
			total_units: self.total_units,
			error_message: self.error_message.clone(),
		}
	}
}

/// Persisted job state, enough to restore or retry a file-backed job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
	pub id: JobId,
	pub priority: Priority,
	pub status: JobStatus,
	pub file_path: Option<PathBuf>,
	pub options: TranscriptionOptions,
	pub total_units: usize,
	pub current_unit_index: usize,
	pub completed_units: usize,
	pub error_message: Option<String>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

/// Point-in-time view of a job for observers that cannot subscribe to events
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSnapshot {
	pub id: JobId,
	pub priority: Priority,
	pub status: JobStatus,
	pub current_unit_index: usize,
	pub total_units: usize,
	pub error_message: Option<String>,
}

impl JobSnapshot {
	#[must_use]
	pub const fn percent(&self) -> u8 {
		crate::events::progress_percent(self.current_unit_index, self.total_units)
	}
}
