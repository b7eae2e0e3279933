mod worker;

pub use worker::RunOutcome;

use crate::audio::{AudioLoader, WavLoader};
use crate::checkpoint::{CheckpointStore, JsonFileCheckpointStore, MemoryCheckpointStore};
use crate::chunking::ChunkSplitter;
use crate::config::Config;
use crate::error::{QueueError, SchedulerError, ValidationError};
use crate::events::{EventBus, JobEvent};
use crate::job::{AudioSource, Job, JobId, JobSnapshot, JobStatus, Priority, TranscriptionOptions};
use crate::metrics::SchedulerMetrics;
use crate::queue::JobQueue;
use crate::resource::{ResourceLock, TranscriptionEngine};
use crate::sync::lock;
use prometheus::Registry;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

struct JobEntry {
	snapshot: JobSnapshot,
	cancel: Arc<AtomicBool>,
}

/// State shared between the submission handles and the scheduler loop
struct Shared {
	config: Config,
	queue: JobQueue,
	splitter: ChunkSplitter,
	events: EventBus,
	metrics: SchedulerMetrics,
	store: Arc<dyn CheckpointStore>,
	loader: Arc<dyn AudioLoader>,
	jobs: Mutex<HashMap<JobId, JobEntry>>,
	failed: Mutex<HashMap<JobId, Job>>,
	/// Terminal jobs, oldest first, bounded by `max_finished_jobs`
	finished: Mutex<VecDeque<JobId>>,
	worker: Mutex<Option<JoinHandle<Result<(), SchedulerError>>>>,
}

impl Shared {
	fn register(&self, job: &Job) {
		lock(&self.jobs).insert(
			job.id(),
			JobEntry {
				snapshot: job.snapshot(),
				cancel: job.cancel_flag(),
			},
		);
	}

	fn track(&self, job: &Job) {
		if let Some(entry) = lock(&self.jobs).get_mut(&job.id()) {
			entry.snapshot = job.snapshot();
		}
	}

	fn persist_status(&self, job: &Job) {
		if let Err(e) = self.store.update_status(job.id(), job.status(), job.current_unit_index()) {
			warn!(job_id = %job.id(), status = %job.status(), error = %e, "⚠️ Failed to persist job status");
			self.metrics.checkpoint_failures.inc();
		}
	}

	fn discard_units(&self, job: &Job) {
		if let Err(e) = self.store.discard_units(job.id()) {
			warn!(job_id = %job.id(), error = %e, "⚠️ Failed to discard checkpointed units");
		}
	}

	/// Record that a job reached a terminal status and drop the oldest finished jobs
	/// beyond the retention limit. A job retried since it was recorded is left alone.
	fn retire(&self, job_id: JobId) {
		let evicted: Vec<JobId> = {
			let mut finished = lock(&self.finished);
			finished.retain(|id| *id != job_id);
			finished.push_back(job_id);
			let excess = finished.len().saturating_sub(self.config.max_finished_jobs);
			finished.drain(..excess).collect()
		};
		if evicted.is_empty() {
			return;
		}

		let mut jobs = lock(&self.jobs);
		let mut failed = lock(&self.failed);
		for id in evicted {
			if jobs.get(&id).is_some_and(|entry| entry.snapshot.status.is_terminal()) {
				jobs.remove(&id);
				failed.remove(&id);
				debug!(job_id = %id, "Finished job evicted");
			}
		}
	}

	fn finish_cancelled(&self, mut job: Job) {
		job.mark_cancelled();
		self.persist_status(&job);
		self.discard_units(&job);
		self.track(&job);
		self.retire(job.id());
		self.metrics.jobs_cancelled.inc();

		info!(job_id = %job.id(), unit_index = job.current_unit_index(), "🚫 Job cancelled");
		self.events.emit(JobEvent::Cancelled { job_id: job.id() });
	}
}

/// Handle to a running scheduler. Cheap to clone; every clone drives the same loop.
#[derive(Clone)]
pub struct Scheduler {
	shared: Arc<Shared>,
	registry: Registry,
}

pub struct SchedulerBuilder {
	config: Config,
	store: Option<Arc<dyn CheckpointStore>>,
	loader: Option<Arc<dyn AudioLoader>>,
	registry: Option<Registry>,
}

impl SchedulerBuilder {
	/// Defaults to a `JsonFileCheckpointStore` when `checkpoint_dir` is set, in-memory otherwise
	#[must_use]
	pub fn checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
		self.store = Some(store);
		self
	}

	/// Defaults to a `WavLoader` at the configured sample rate
	#[must_use]
	pub fn audio_loader(mut self, loader: Arc<dyn AudioLoader>) -> Self {
		self.loader = Some(loader);
		self
	}

	#[must_use]
	pub fn metrics_registry(mut self, registry: Registry) -> Self {
		self.registry = Some(registry);
		self
	}

	/// Validate the configuration, take ownership of the engine and spawn the scheduler loop.
	///
	/// # Errors
	/// Invalid configuration, an unopenable checkpoint directory, duplicate metric
	/// registration, or failure to spawn the loop thread
	pub fn start<E: TranscriptionEngine>(self, engine: E) -> Result<Scheduler, SchedulerError> {
		self.config.validate()?;
		let splitter = ChunkSplitter::from_config(&self.config)?;

		let store: Arc<dyn CheckpointStore> = match (self.store, &self.config.checkpoint_dir) {
			(Some(store), _) => store,
			(None, Some(dir)) => Arc::new(JsonFileCheckpointStore::open(dir)?),
			(None, None) => Arc::new(MemoryCheckpointStore::new()),
		};
		let loader: Arc<dyn AudioLoader> = match self.loader {
			Some(loader) => loader,
			None => Arc::new(WavLoader::new(self.config.sample_rate)),
		};
		let registry = self.registry.unwrap_or_else(Registry::new);
		let metrics = SchedulerMetrics::new(&registry)?;

		let shared = Arc::new(Shared {
			events: EventBus::new(self.config.event_capacity),
			config: self.config,
			queue: JobQueue::new(),
			splitter,
			metrics,
			store,
			loader,
			jobs: Mutex::new(HashMap::new()),
			failed: Mutex::new(HashMap::new()),
			finished: Mutex::new(VecDeque::new()),
			worker: Mutex::new(None),
		});

		let resource = ResourceLock::new(engine);
		let loop_shared = Arc::clone(&shared);
		let handle = thread::Builder::new()
			.name("transcription-scheduler".to_string())
			.spawn(move || worker::run(&loop_shared, &resource))?;
		*lock(&shared.worker) = Some(handle);

		info!(
			sample_rate = shared.config.sample_rate,
			unit_duration_secs = shared.config.unit_duration_secs,
			requeue_policy = ?shared.config.requeue_policy,
			"🚀 Scheduler started"
		);

		Ok(Scheduler { shared, registry })
	}
}

fn validate_source(source: &AudioSource) -> Result<(), ValidationError> {
	match source {
		AudioSource::Buffer(samples) if samples.is_empty() => Err(ValidationError::EmptyAudio),
		AudioSource::File(path) if !path.is_file() => Err(ValidationError::MissingFile(path.clone())),
		_ => Ok(()),
	}
}

impl Scheduler {
	#[must_use]
	pub const fn builder(config: Config) -> SchedulerBuilder {
		SchedulerBuilder {
			config,
			store: None,
			loader: None,
			registry: None,
		}
	}

	/// Start with the default checkpoint store and audio loader
	///
	/// # Errors
	/// See [`SchedulerBuilder::start`]
	pub fn start<E: TranscriptionEngine>(config: Config, engine: E) -> Result<Self, SchedulerError> {
		Self::builder(config).start(engine)
	}

	/// Push-to-talk request: HIGH priority, transcribed as a single unit.
	///
	/// # Errors
	/// `ValidationError::EmptyAudio`, or `ShuttingDown` after [`Scheduler::shutdown`]
	pub fn submit_interactive(&self, audio: impl Into<Arc<[f32]>>, options: TranscriptionOptions) -> Result<JobId, SchedulerError> {
		let source = AudioSource::Buffer(audio.into());
		validate_source(&source)?;
		self.enqueue(Job::new(source, options, Priority::High))
	}

	/// Chunked request at NORMAL or LOW priority.
	///
	/// # Errors
	/// `ValidationError` for HIGH priority, an empty buffer or a missing file
	pub fn submit_bulk(&self, source: AudioSource, options: TranscriptionOptions, priority: Priority) -> Result<JobId, SchedulerError> {
		if priority == Priority::High {
			return Err(ValidationError::InvalidPriority(priority).into());
		}
		validate_source(&source)?;
		self.enqueue(Job::new(source, options, priority))
	}

	/// Submit every source as a LOW job, in order. Nothing is enqueued unless all sources are valid.
	///
	/// # Errors
	/// `ValidationError::EmptyBatch` or the first invalid source
	pub fn submit_batch(&self, sources: Vec<AudioSource>, options: &TranscriptionOptions) -> Result<Vec<JobId>, SchedulerError> {
		if sources.is_empty() {
			return Err(ValidationError::EmptyBatch.into());
		}
		for source in &sources {
			validate_source(source)?;
		}

		let job_ids = sources
			.into_iter()
			.map(|source| self.enqueue(Job::new(source, options.clone(), Priority::Low)))
			.collect::<Result<Vec<_>, _>>()?;

		info!(jobs = job_ids.len(), "📦 Batch submitted");
		Ok(job_ids)
	}

	fn enqueue(&self, job: Job) -> Result<JobId, SchedulerError> {
		let shared = &self.shared;
		let job_id = job.id();
		let priority = job.priority();

		// The record must exist before the loop can pop the job
		if let Err(e) = shared.store.save_job(&job.to_record()) {
			warn!(job_id = %job_id, error = %e, "⚠️ Failed to persist submitted job");
			shared.metrics.checkpoint_failures.inc();
		}

		shared.register(&job);
		let enqueued = match shared.queue.push(job) {
			Ok(enqueued) => enqueued,
			Err(e) => {
				lock(&shared.jobs).remove(&job_id);
				if let Err(remove_error) = shared.store.remove_job(job_id) {
					warn!(job_id = %job_id, error = %remove_error, "⚠️ Failed to remove record of rejected job");
				}
				return Err(e.into());
			}
		};

		shared.metrics.record_submission(priority);
		shared.metrics.set_queue_depth(shared.queue.len());
		info!(job_id = %job_id, priority = %priority, arrival_seq = enqueued.arrival_seq, "📥 Job submitted");

		if let Some(running) = enqueued.preempting {
			info!(job_id = %job_id, preempted = %running.id, "⏸️ Requested preemption of running job");
		}

		Ok(job_id)
	}

	/// Cancel a job that has not finished. A queued job is removed immediately; the running
	/// job stops at its next unit boundary.
	///
	/// # Errors
	/// `UnknownJob`, or `InvalidState` if the job already reached a terminal status
	pub fn cancel(&self, job_id: JobId) -> Result<(), SchedulerError> {
		let cancel = {
			let jobs = lock(&self.shared.jobs);
			let entry = jobs.get(&job_id).ok_or(SchedulerError::UnknownJob(job_id))?;
			if entry.snapshot.status.is_terminal() {
				return Err(SchedulerError::InvalidState {
					job_id,
					status: entry.snapshot.status,
				});
			}
			Arc::clone(&entry.cancel)
		};
		cancel.store(true, Ordering::Release);

		match self.shared.queue.remove(job_id) {
			Some(job) => {
				self.shared.finish_cancelled(job);
				self.shared.metrics.set_queue_depth(self.shared.queue.len());
			}
			None => debug!(job_id = %job_id, "Cancellation flagged for running job"),
		}
		Ok(())
	}

	/// Re-submit a FAILED job. It resumes from its last completed unit.
	///
	/// Jobs failed before a restart are rebuilt from the checkpoint store when file-backed.
	///
	/// # Errors
	/// `UnknownJob`, `InvalidState` for any job that is not FAILED (or cannot be rebuilt),
	/// `ShuttingDown` (the job stays FAILED), or a `Persistence` error reading the stored record
	pub fn retry(&self, job_id: JobId) -> Result<(), SchedulerError> {
		let shared = &self.shared;
		if let Some(status) = lock(&shared.jobs).get(&job_id).map(|entry| entry.snapshot.status) {
			if status != JobStatus::Failed {
				return Err(SchedulerError::InvalidState { job_id, status });
			}
		}

		let retained = lock(&shared.failed).remove(&job_id);
		let mut job = match retained {
			Some(job) => job,
			None => self.rebuild_failed(job_id)?,
		};

		let error_message = job.error_message().unwrap_or_default().to_string();
		job.reset_for_retry();
		shared.persist_status(&job);
		shared.register(&job);
		let resume_from = job.current_unit_index();

		if let Err((error, mut job)) = shared.queue.try_push(job) {
			// Refused by a closed queue: back to FAILED and retained
			if error == QueueError::Closed {
				job.mark_failed(error_message);
				shared.persist_status(&job);
				shared.track(&job);
				lock(&shared.failed).insert(job_id, job);
			}
			return Err(error.into());
		}
		shared.metrics.set_queue_depth(shared.queue.len());

		info!(job_id = %job_id, resume_from, "🔁 Job retried");
		Ok(())
	}

	fn rebuild_failed(&self, job_id: JobId) -> Result<Job, SchedulerError> {
		let record = self.shared.store.load_job(job_id)?.ok_or(SchedulerError::UnknownJob(job_id))?;
		if record.status != JobStatus::Failed {
			return Err(SchedulerError::InvalidState { job_id, status: record.status });
		}
		Job::from_record(&record).ok_or(SchedulerError::InvalidState { job_id, status: record.status })
	}

	/// Re-enqueue unfinished file-backed jobs found in the checkpoint store, e.g. after a
	/// restart. Each resumes from its persisted units. Jobs already known are skipped.
	///
	/// # Errors
	/// `Persistence` if the store cannot be listed, `ShuttingDown` after shutdown
	pub fn restore_pending(&self) -> Result<Vec<JobId>, SchedulerError> {
		let shared = &self.shared;
		let mut restored = Vec::new();

		for record in shared.store.pending_jobs()? {
			if lock(&shared.jobs).contains_key(&record.id) {
				continue;
			}
			let Some(job) = Job::from_record(&record) else {
				debug!(job_id = %record.id, "Skipping in-memory job, audio did not survive restart");
				continue;
			};

			shared.register(&job);
			if let Err(e) = shared.queue.push(job) {
				lock(&shared.jobs).remove(&record.id);
				return Err(e.into());
			}
			info!(job_id = %record.id, status = %record.status, unit_index = record.current_unit_index, "♻️ Job restored");
			restored.push(record.id);
		}

		shared.metrics.set_queue_depth(shared.queue.len());
		Ok(restored)
	}

	#[must_use]
	pub fn status(&self, job_id: JobId) -> Option<JobSnapshot> {
		lock(&self.shared.jobs).get(&job_id).map(|entry| entry.snapshot.clone())
	}

	#[must_use]
	pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
		self.shared.events.subscribe()
	}

	#[must_use]
	pub fn queue_len(&self) -> usize {
		self.shared.queue.len()
	}

	#[must_use]
	pub fn config(&self) -> &Config {
		&self.shared.config
	}

	#[must_use]
	pub fn metrics(&self) -> &SchedulerMetrics {
		&self.shared.metrics
	}

	#[must_use]
	pub const fn registry(&self) -> &Registry {
		&self.registry
	}

	/// Stop accepting work and wait for the loop to exit after its in-flight unit.
	/// Unfinished jobs stay in the checkpoint store for [`Scheduler::restore_pending`].
	///
	/// # Errors
	/// The loop's fatal error, or `WorkerPanicked`
	pub fn shutdown(&self) -> Result<(), SchedulerError> {
		self.shared.queue.close();
		let handle = lock(&self.shared.worker).take();
		let Some(handle) = handle else {
			return Ok(());
		};

		info!("🛑 Waiting for scheduler loop to stop");
		handle.join().map_err(|_| SchedulerError::WorkerPanicked)?
	}
}
