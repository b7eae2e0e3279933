use crate::job::Priority;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

#[derive(Debug, Clone)]
pub struct SchedulerMetrics {
	pub jobs_submitted: IntCounterVec,
	pub jobs_completed: IntCounter,
	pub jobs_failed: IntCounter,
	pub jobs_cancelled: IntCounter,
	pub preemptions: IntCounter,
	pub units_processed: IntCounter,
	pub checkpoint_failures: IntCounter,
	pub queue_depth: IntGauge,
	pub unit_duration_seconds: Histogram,
}

impl SchedulerMetrics {
	/// # Errors
	/// Fails if a metric with the same name is already registered
	pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
		let jobs_submitted = IntCounterVec::new(Opts::new("transcription_jobs_submitted_total", "Jobs accepted by the scheduler"), &["priority"])?;
		let jobs_completed = IntCounter::new("transcription_jobs_completed_total", "Jobs that finished successfully")?;
		let jobs_failed = IntCounter::new("transcription_jobs_failed_total", "Jobs that ended in FAILED")?;
		let jobs_cancelled = IntCounter::new("transcription_jobs_cancelled_total", "Jobs cancelled before completion")?;
		let preemptions = IntCounter::new("transcription_preemptions_total", "Times a bulk job yielded to an interactive job")?;
		let units_processed = IntCounter::new("transcription_units_processed_total", "Units transcribed by the engine")?;
		let checkpoint_failures = IntCounter::new("transcription_checkpoint_failures_total", "Checkpoint writes that failed")?;
		let queue_depth = IntGauge::new("transcription_queue_depth", "Jobs waiting in the queue")?;
		let unit_duration_seconds = Histogram::with_opts(HistogramOpts::new("transcription_unit_duration_seconds", "Engine time per unit"))?;

		registry.register(Box::new(jobs_submitted.clone()))?;
		registry.register(Box::new(jobs_completed.clone()))?;
		registry.register(Box::new(jobs_failed.clone()))?;
		registry.register(Box::new(jobs_cancelled.clone()))?;
		registry.register(Box::new(preemptions.clone()))?;
		registry.register(Box::new(units_processed.clone()))?;
		registry.register(Box::new(checkpoint_failures.clone()))?;
		registry.register(Box::new(queue_depth.clone()))?;
		registry.register(Box::new(unit_duration_seconds.clone()))?;

		Ok(Self {
			jobs_submitted,
			jobs_completed,
			jobs_failed,
			jobs_cancelled,
			preemptions,
			units_processed,
			checkpoint_failures,
			queue_depth,
			unit_duration_seconds,
		})
	}

	pub fn record_submission(&self, priority: Priority) {
		self.jobs_submitted.with_label_values(&[priority.as_str()]).inc();
	}

	pub fn set_queue_depth(&self, depth: usize) {
		self.queue_depth.set(i64::try_from(depth).unwrap_or(i64::MAX));
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_metrics_register_once_per_registry() {
		let registry = Registry::new();
		let metrics = SchedulerMetrics::new(&registry).unwrap();
		assert!(SchedulerMetrics::new(&registry).is_err());

		// A fresh registry accepts the same names
		assert!(SchedulerMetrics::new(&Registry::new()).is_ok());

		metrics.record_submission(Priority::Low);
		metrics.record_submission(Priority::Low);
		metrics.record_submission(Priority::High);
		metrics.set_queue_depth(3);

		assert_eq!(metrics.jobs_submitted.with_label_values(&["low"]).get(), 2);
		assert_eq!(metrics.jobs_submitted.with_label_values(&["high"]).get(), 1);
		assert_eq!(metrics.queue_depth.get(), 3);

		let families = registry.gather();
		assert!(families.iter().any(|family| family.get_name() == "transcription_preemptions_total"));
	}
}
