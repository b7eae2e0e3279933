use crate::job::JobId;
use crate::transcript::Transcript;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Lifecycle notifications, emitted in order per job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
	Started { job_id: JobId },
	Progress { job_id: JobId, percent: u8 },
	Paused { job_id: JobId, unit_index: usize },
	Resumed { job_id: JobId, unit_index: usize },
	Completed { job_id: JobId, result: Transcript },
	Failed { job_id: JobId, error: String },
	Cancelled { job_id: JobId },
}

impl JobEvent {
	#[must_use]
	pub const fn job_id(&self) -> JobId {
		match self {
			Self::Started { job_id }
			| Self::Progress { job_id, .. }
			| Self::Paused { job_id, .. }
			| Self::Resumed { job_id, .. }
			| Self::Completed { job_id, .. }
			| Self::Failed { job_id, .. }
			| Self::Cancelled { job_id } => *job_id,
		}
	}

	#[must_use]
	pub const fn is_terminal(&self) -> bool {
		matches!(self, Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled { .. })
	}
}

/// Completed units as a rounded percentage
#[must_use]
pub const fn progress_percent(done: usize, total: usize) -> u8 {
	if total == 0 || done >= total {
		return 100;
	}
	((done * 200 + total) / (total * 2)) as u8
}

/// Fan-out of job events to any number of subscribers.
///
/// Slow subscribers lag and lose the oldest events; emitting never blocks the scheduler loop.
#[derive(Debug, Clone)]
pub struct EventBus {
	tx: broadcast::Sender<JobEvent>,
}

impl EventBus {
	#[must_use]
	pub fn new(capacity: usize) -> Self {
		let (tx, _) = broadcast::channel(capacity.max(1));
		Self { tx }
	}

	#[must_use]
	pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
		self.tx.subscribe()
	}

	pub fn emit(&self, event: JobEvent) {
		// No subscribers is not an error
		let _ = self.tx.send(event);
	}

	#[must_use]
	pub fn receiver_count(&self) -> usize {
		self.tx.receiver_count()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_progress_percent_rounds() {
		assert_eq!(progress_percent(0, 3), 0);
		assert_eq!(progress_percent(1, 3), 33);
		assert_eq!(progress_percent(2, 3), 67);
		assert_eq!(progress_percent(3, 3), 100);
		assert_eq!(progress_percent(1, 8), 13);
		assert_eq!(progress_percent(0, 0), 100);
		assert_eq!(progress_percent(5, 4), 100);
	}

	#[test]
	fn test_emit_without_subscribers() {
		let bus = EventBus::new(4);
		assert_eq!(bus.receiver_count(), 0);
		bus.emit(JobEvent::Started { job_id: JobId::new() });
	}

	#[tokio::test]
	async fn test_subscribers_see_events_in_order() {
		let bus = EventBus::new(8);
		let mut rx = bus.subscribe();
		let job_id = JobId::new();

		bus.emit(JobEvent::Started { job_id });
		bus.emit(JobEvent::Progress { job_id, percent: 50 });
		bus.emit(JobEvent::Paused { job_id, unit_index: 1 });

		assert_eq!(rx.recv().await.unwrap(), JobEvent::Started { job_id });
		assert_eq!(rx.recv().await.unwrap(), JobEvent::Progress { job_id, percent: 50 });
		let paused = rx.recv().await.unwrap();
		assert_eq!(paused.job_id(), job_id);
		assert!(!paused.is_terminal());
	}

	#[test]
	fn test_event_wire_format() {
		let job_id = JobId::new();
		let json = serde_json::to_value(JobEvent::Resumed { job_id, unit_index: 5 }).unwrap();
		assert_eq!(json["type"], "resumed");
		assert_eq!(json["unit_index"], 5);
		assert_eq!(json["job_id"], job_id.to_string());
	}
}
