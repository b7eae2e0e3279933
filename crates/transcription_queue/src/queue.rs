use crate::config::RequeuePolicy;
use crate::error::QueueError;
use crate::job::{Job, JobId, Priority};
use crate::pause::PauseSignal;
use crate::priority_queue::{ImplicitHeap, QueueKey};
use crate::sync::lock;
use std::collections::HashSet;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

/// The job currently owned by the scheduler loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunningJob {
	pub id: JobId,
	pub priority: Priority,
}

/// Result of a successful push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enqueued {
	pub arrival_seq: u64,
	/// Set when the push cleared the pause signal to preempt this running job
	pub preempting: Option<RunningJob>,
}

#[derive(Debug, Default)]
struct QueueState {
	heap: ImplicitHeap<Job>,
	queued: HashSet<JobId>,
	running: Option<RunningJob>,
	next_seq: u64,
	closed: bool,
}

/// Jobs waiting for the engine, plus the pause signal that lets a new high-priority
/// job interrupt the running one.
///
/// Queue contents, the running slot and the preemption decision share one short-lived
/// lock, so a submission can never miss a job the loop has just dequeued. The lock is
/// never held while transcribing.
#[derive(Debug, Default)]
pub struct JobQueue {
	state: Mutex<QueueState>,
	ready: Condvar,
	pause: PauseSignal,
}

impl JobQueue {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Insert a newly submitted job behind everything already waiting at its priority.
	///
	/// # Errors
	/// `QueueError::Closed` after shutdown, `QueueError::Duplicate` if the job is already queued
	pub fn push(&self, job: Job) -> Result<Enqueued, QueueError> {
		self.try_push(job).map_err(|(error, _)| error)
	}

	/// Same as [`JobQueue::push`], but a refused job is handed back to the caller.
	///
	/// # Errors
	/// The refusal reason together with the job
	pub fn try_push(&self, job: Job) -> Result<Enqueued, (QueueError, Job)> {
		let mut state = lock(&self.state);
		let arrival_seq = Self::next_seq(&mut state);
		self.insert_locked(&mut state, job, arrival_seq)
	}

	/// Put a paused job back at its original priority.
	///
	/// # Errors
	/// Same as [`JobQueue::push`]
	pub fn requeue(&self, job: Job, policy: RequeuePolicy) -> Result<Enqueued, QueueError> {
		let mut state = lock(&self.state);
		let arrival_seq = match (policy, job.arrival_seq) {
			(RequeuePolicy::OriginalArrival, Some(seq)) => seq,
			_ => Self::next_seq(&mut state),
		};
		self.insert_locked(&mut state, job, arrival_seq).map_err(|(error, _)| error)
	}

	fn next_seq(state: &mut QueueState) -> u64 {
		let seq = state.next_seq;
		state.next_seq += 1;
		seq
	}

	fn insert_locked(&self, state: &mut QueueState, mut job: Job, arrival_seq: u64) -> Result<Enqueued, (QueueError, Job)> {
		if state.closed {
			return Err((QueueError::Closed, job));
		}
		if !state.queued.insert(job.id()) {
			return Err((QueueError::Duplicate(job.id()), job));
		}

		let priority = job.priority();
		job.arrival_seq = Some(arrival_seq);

		let preempting = state.running.filter(|running| priority.preempts(running.priority));
		if preempting.is_some() {
			self.pause.clear();
		}

		state.heap.insert(job, QueueKey::new(priority, arrival_seq));
		self.ready.notify_one();

		Ok(Enqueued { arrival_seq, preempting })
	}

	/// Remove and return the highest-priority job, blocking while the queue is empty.
	/// Returns `None` once the queue is closed.
	///
	/// The returned job becomes the running job until [`JobQueue::finish`].
	pub fn pop_blocking(&self) -> Option<Job> {
		let mut state = lock(&self.state);
		loop {
			if state.closed {
				return None;
			}

			if let Some(job) = state.heap.extract_first() {
				state.queued.remove(&job.id());
				state.running = Some(RunningJob {
					id: job.id(),
					priority: job.priority(),
				});

				// A cleared signal with no interactive job left to run (e.g. it was
				// cancelled while queued) would make this job yield forever
				if job.priority() != Priority::High && !state.heap.contains_priority(Priority::High) {
					self.pause.set();
				}
				return Some(job);
			}

			state = self.ready.wait(state).unwrap_or_else(PoisonError::into_inner);
		}
	}

	/// Release the running slot. Finishing a high-priority job lets paused work continue.
	pub fn finish(&self, job_id: JobId) {
		let mut state = lock(&self.state);
		if let Some(running) = state.running.filter(|running| running.id == job_id) {
			state.running = None;
			if running.priority == Priority::High {
				self.pause.set();
			}
		}
	}

	/// Between-unit preemption check: true when the running job must yield
	#[must_use]
	pub fn should_yield(&self, timeout: Duration) -> bool {
		!self.pause.wait(timeout)
	}

	/// Take a waiting job out of the queue.
	///
	/// Removing the last waiting high-priority job sets the pause signal again, so the
	/// running job is not paused for work that no longer exists.
	pub fn remove(&self, job_id: JobId) -> Option<Job> {
		let mut state = lock(&self.state);
		if !state.queued.remove(&job_id) {
			return None;
		}
		let job = state.heap.remove_where(|job| job.id() == job_id)?;
		if job.priority() == Priority::High && !state.heap.contains_priority(Priority::High) {
			self.pause.set();
		}
		Some(job)
	}

	#[must_use]
	pub fn contains(&self, job_id: JobId) -> bool {
		lock(&self.state).queued.contains(&job_id)
	}

	#[must_use]
	pub fn running(&self) -> Option<RunningJob> {
		lock(&self.state).running
	}

	#[must_use]
	pub fn len(&self) -> usize {
		lock(&self.state).heap.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		lock(&self.state).heap.is_empty()
	}

	#[must_use]
	pub const fn pause_signal(&self) -> &PauseSignal {
		&self.pause
	}

	/// Stop accepting jobs and wake the loop. Queued jobs stay where they are.
	pub fn close(&self) {
		lock(&self.state).closed = true;
		self.ready.notify_all();
	}

	#[must_use]
	pub fn is_closed(&self) -> bool {
		lock(&self.state).closed
	}
}
