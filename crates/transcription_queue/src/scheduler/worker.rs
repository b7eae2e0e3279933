use super::Shared;
use crate::chunking::UnitSpan;
use crate::error::{QueueError, ResourceError, SchedulerError};
use crate::events::{progress_percent, JobEvent};
use crate::job::{AudioSource, Job};
use crate::resource::{ResourceLock, TranscriptionEngine};
use crate::sync::lock;
use crate::transcript::{Transcript, UnitOutput};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// How one dispatch of a job ended. A yield is a scheduling decision, never a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
	Completed,
	/// Paused at a unit boundary for a higher-priority job or shutdown
	Yielded,
	Cancelled,
	Failed(String),
}

/// The scheduler loop: the only caller of the engine.
///
/// Suspends only in `pop_blocking`, never while the resource lock is held.
pub(super) fn run<E: TranscriptionEngine>(shared: &Shared, resource: &ResourceLock<E>) -> Result<(), SchedulerError> {
	info!("🔄 Scheduler loop running");

	while let Some(job) = shared.queue.pop_blocking() {
		shared.metrics.set_queue_depth(shared.queue.len());
		let job_id = job.id();
		let result = dispatch(shared, resource, job);
		shared.queue.finish(job_id);

		if let Err(e) = result {
			error!(job_id = %job_id, error = %e, "❌ Fatal scheduler error, stopping loop");
			shared.queue.close();
			return Err(e);
		}
	}

	info!("🛑 Scheduler loop stopped");
	Ok(())
}

fn dispatch<E: TranscriptionEngine>(shared: &Shared, resource: &ResourceLock<E>, mut job: Job) -> Result<(), SchedulerError> {
	if job.is_cancel_requested() {
		shared.finish_cancelled(job);
		return Ok(());
	}

	match run_job(shared, resource, &mut job) {
		Ok(RunOutcome::Completed) => shared.finish_completed(job),
		Ok(RunOutcome::Yielded) => shared.yield_job(job),
		Ok(RunOutcome::Cancelled) => shared.finish_cancelled(job),
		Ok(RunOutcome::Failed(message)) => shared.finish_failed(job, message),
		Err(e) => {
			shared.finish_failed(job, e.to_string());
			return Err(e);
		}
	}
	Ok(())
}

fn load_samples(shared: &Shared, job: &Job) -> Result<Arc<[f32]>, ResourceError> {
	let samples: Arc<[f32]> = match job.source() {
		AudioSource::Buffer(samples) => Arc::clone(samples),
		AudioSource::File(path) => shared.loader.load(path)?.into(),
	};
	if samples.is_empty() {
		return Err(ResourceError::NoSamples);
	}
	Ok(samples)
}

fn run_job<E: TranscriptionEngine>(shared: &Shared, resource: &ResourceLock<E>, job: &mut Job) -> Result<RunOutcome, SchedulerError> {
	let job_id = job.id();

	if job.take_reload_flag() {
		match shared.store.load_units(job_id) {
			Ok(units) => {
				debug!(job_id = %job_id, units = units.len(), "Reloaded checkpointed units");
				job.restore_units(units);
			}
			Err(e) => warn!(job_id = %job_id, error = %e, "⚠️ Failed to reload checkpoint, resuming from in-memory progress"),
		}
	}

	let samples = match load_samples(shared, job) {
		Ok(samples) => samples,
		Err(e) => return Ok(RunOutcome::Failed(e.to_string())),
	};

	let spans = if job.is_interactive() {
		vec![UnitSpan::whole(samples.len())]
	} else {
		shared.splitter.spans(samples.len())
	};
	let total_units = spans.len();
	job.set_total_units(total_units);

	if job.mark_running() {
		debug!(job_id = %job_id, started_at = ?job.started_at(), "Start time recorded");
	}
	shared.persist_status(job);
	shared.track(job);

	let start_index = job.current_unit_index();
	if start_index > 0 {
		info!(job_id = %job_id, unit_index = start_index, total_units, "▶️ Job resumed");
		shared.events.emit(JobEvent::Resumed { job_id, unit_index: start_index });
	} else {
		info!(job_id = %job_id, priority = %job.priority(), total_units, "▶️ Job started");
		shared.events.emit(JobEvent::Started { job_id });
	}

	for span in spans.iter().skip(start_index) {
		let timer = shared.metrics.unit_duration_seconds.start_timer();
		let output = {
			let mut engine = resource.acquire(job_id)?;
			engine.transcribe_unit(&samples[span.range()], job.options())
		};
		timer.observe_duration();

		let output = match output {
			Ok(output) => output,
			Err(e) => {
				warn!(job_id = %job_id, unit_index = span.index, error = %e, "Unit failed");
				return Ok(RunOutcome::Failed(e.to_string()));
			}
		};

		let unit = UnitOutput::from_engine(span, output, shared.splitter.sample_rate());
		if let Err(e) = shared.store.save_unit(job_id, span.index, &unit) {
			warn!(job_id = %job_id, unit_index = span.index, error = %e, "⚠️ Failed to checkpoint unit");
			shared.metrics.checkpoint_failures.inc();
		}
		job.record_unit(unit);
		shared.metrics.units_processed.inc();
		shared.track(job);

		let done = job.current_unit_index();
		debug!(job_id = %job_id, unit_index = span.index, done, total_units, "Unit complete");
		if !job.is_interactive() {
			shared.events.emit(JobEvent::Progress {
				job_id,
				percent: progress_percent(done, total_units),
			});
		}

		if job.is_cancel_requested() {
			return Ok(RunOutcome::Cancelled);
		}
		if done < total_units && (shared.queue.is_closed() || shared.queue.should_yield(shared.config.pause_poll())) {
			return Ok(RunOutcome::Yielded);
		}
	}

	Ok(RunOutcome::Completed)
}

impl Shared {
	fn finish_completed(&self, mut job: Job) {
		let transcript = Transcript::assemble(job.partial_results(), job.options().language.clone());
		job.mark_completed();
		self.persist_status(&job);
		self.discard_units(&job);
		self.track(&job);
		self.retire(job.id());
		self.metrics.jobs_completed.inc();

		info!(job_id = %job.id(), units = job.completed_units(), chars = transcript.text.len(), "✅ Job completed");
		self.events.emit(JobEvent::Completed {
			job_id: job.id(),
			result: transcript,
		});
	}

	fn yield_job(&self, mut job: Job) {
		let job_id = job.id();
		let unit_index = job.current_unit_index();
		job.mark_paused();
		self.persist_status(&job);
		self.track(&job);

		info!(job_id = %job_id, unit_index, "⏸️ Job paused");
		self.events.emit(JobEvent::Paused { job_id, unit_index });

		match self.queue.requeue(job, self.config.requeue_policy) {
			Ok(enqueued) => {
				self.metrics.preemptions.inc();
				debug!(job_id = %job_id, arrival_seq = enqueued.arrival_seq, "Paused job re-queued");
			}
			Err(QueueError::Closed) => info!(job_id = %job_id, unit_index, "Shutting down, paused job left in checkpoint store"),
			Err(e) => error!(job_id = %job_id, error = %e, "❌ Failed to re-queue paused job"),
		}
		self.metrics.set_queue_depth(self.queue.len());
	}

	fn finish_failed(&self, mut job: Job, message: String) {
		let job_id = job.id();
		job.mark_failed(message.as_str());
		if let Err(e) = self.store.save_job(&job.to_record()) {
			warn!(job_id = %job_id, error = %e, "⚠️ Failed to persist failed job");
			self.metrics.checkpoint_failures.inc();
		}
		self.metrics.jobs_failed.inc();
		warn!(job_id = %job_id, unit_index = job.current_unit_index(), error = %message, "❌ Job failed");

		// Retained before the status flips so a retry never misses it
		let snapshot = job.snapshot();
		lock(&self.failed).insert(job_id, job);
		if let Some(entry) = lock(&self.jobs).get_mut(&job_id) {
			entry.snapshot = snapshot;
		}
		self.retire(job_id);

		self.events.emit(JobEvent::Failed { job_id, error: message });
	}
}
