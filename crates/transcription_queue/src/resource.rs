use crate::error::{ResourceError, SchedulerError};
use crate::job::{JobId, TranscriptionOptions};
use crate::transcript::EngineOutput;
use std::any::Any;
use std::ops::{Deref, DerefMut};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard, TryLockError};
use tracing::error;

/// The speech-to-text inference engine.
///
/// Implementations are stateful and not reentrant; `&mut self` lets the compiler
/// enforce that and the scheduler guarantees a single call in flight.
pub trait TranscriptionEngine: Send + 'static {
	/// Transcribe mono samples at the configured sample rate.
	/// Segment timestamps are relative to the start of `audio`.
	///
	/// # Errors
	/// Any engine failure; the scheduler fails the job that owns this unit
	fn transcribe(&mut self, audio: &[f32], options: &TranscriptionOptions) -> Result<EngineOutput, ResourceError>;
}

impl<F> TranscriptionEngine for F
where
	F: FnMut(&[f32], &TranscriptionOptions) -> Result<EngineOutput, ResourceError> + Send + 'static,
{
	fn transcribe(&mut self, audio: &[f32], options: &TranscriptionOptions) -> Result<EngineOutput, ResourceError> {
		self(audio, options)
	}
}

/// Exclusive gate in front of the engine.
///
/// Owned by the scheduler loop and acquired for exactly one unit at a time. A second
/// acquisition while a guard is alive is a programming error, reported as
/// `SchedulerError::ResourceBusy` instead of blocking.
pub struct ResourceLock<E> {
	engine: Mutex<E>,
}

/// Proof of exclusive access; the engine is released when this drops
pub struct ResourceGuard<'a, E> {
	engine: MutexGuard<'a, E>,
}

impl<E: TranscriptionEngine> ResourceLock<E> {
	pub const fn new(engine: E) -> Self {
		Self { engine: Mutex::new(engine) }
	}

	/// # Errors
	/// `SchedulerError::ResourceBusy` if the lock is already held
	pub fn acquire(&self, job_id: JobId) -> Result<ResourceGuard<'_, E>, SchedulerError> {
		match self.engine.try_lock() {
			Ok(engine) => Ok(ResourceGuard { engine }),
			// Only a guard dropped while unwinding poisons the lock; the engine is reused as-is
			Err(TryLockError::Poisoned(poisoned)) => Ok(ResourceGuard { engine: poisoned.into_inner() }),
			Err(TryLockError::WouldBlock) => {
				error!(job_id = %job_id, "❌ Resource lock double-acquire");
				Err(SchedulerError::ResourceBusy(job_id))
			}
		}
	}
}

impl<E: TranscriptionEngine> ResourceGuard<'_, E> {
	/// Run one engine call. A panic inside the engine comes back as
	/// `ResourceError::Panicked` and the guard releases the lock unpoisoned.
	///
	/// # Errors
	/// Whatever the engine returns, or `ResourceError::Panicked`
	pub fn transcribe_unit(&mut self, audio: &[f32], options: &TranscriptionOptions) -> Result<EngineOutput, ResourceError> {
		let engine = &mut *self.engine;
		panic::catch_unwind(AssertUnwindSafe(|| engine.transcribe(audio, options))).unwrap_or_else(|payload| {
			let message = panic_message(payload.as_ref());
			error!(error = %message, "❌ Engine panicked while transcribing");
			Err(ResourceError::Panicked(message))
		})
	}
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
	payload
		.downcast_ref::<&str>()
		.map(|message| (*message).to_string())
		.or_else(|| payload.downcast_ref::<String>().cloned())
		.unwrap_or_else(|| "non-string panic payload".to_string())
}

impl<E> Deref for ResourceGuard<'_, E> {
	type Target = E;

	fn deref(&self) -> &E {
		&self.engine
	}
}

impl<E> DerefMut for ResourceGuard<'_, E> {
	fn deref_mut(&mut self) -> &mut E {
		&mut self.engine
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn echo_engine() -> impl TranscriptionEngine {
		let mut calls = 0_usize;
		move |audio: &[f32], options: &TranscriptionOptions| -> Result<EngineOutput, ResourceError> {
			calls += 1;
			let language = options.language.as_deref().unwrap_or("auto");
			Ok(EngineOutput::new(format!("call {calls}: {} samples ({language})", audio.len())))
		}
	}

	#[test]
	fn test_closure_engine() {
		let lock = ResourceLock::new(echo_engine());
		let options = TranscriptionOptions::default().with_language("de");

		let mut guard = lock.acquire(JobId::new()).unwrap();
		let output = guard.transcribe(&[0.0; 8], &options).unwrap();
		assert_eq!(output.text, "call 1: 8 samples (de)");
	}

	#[test]
	fn test_double_acquire_is_rejected() {
		let lock = ResourceLock::new(echo_engine());
		let job_id = JobId::new();

		let guard = lock.acquire(job_id).unwrap();
		assert!(matches!(lock.acquire(job_id), Err(SchedulerError::ResourceBusy(id)) if id == job_id));

		drop(guard);
		assert!(lock.acquire(job_id).is_ok());
	}

	#[test]
	fn test_engine_errors_pass_through() {
		let lock = ResourceLock::new(|_: &[f32], _: &TranscriptionOptions| -> Result<EngineOutput, ResourceError> { Err(ResourceError::Transcription("kv cache mismatch".to_string())) });
		let mut guard = lock.acquire(JobId::new()).unwrap();
		let error = guard.transcribe(&[0.1], &TranscriptionOptions::default()).unwrap_err();
		assert_eq!(error.to_string(), "transcription failed: kv cache mismatch");
	}

	#[test]
	fn test_engine_panic_is_contained() {
		let lock = ResourceLock::new(|audio: &[f32], _: &TranscriptionOptions| -> Result<EngineOutput, ResourceError> {
			assert!(audio[0] < 5.0, "sample out of range: {}", audio[0]);
			Ok(EngineOutput::new("ok"))
		});
		let options = TranscriptionOptions::default();

		let error = lock.acquire(JobId::new()).unwrap().transcribe_unit(&[7.0], &options).unwrap_err();
		assert!(matches!(&error, ResourceError::Panicked(message) if message.contains("sample out of range: 7")));
		assert!(!lock.engine.is_poisoned());

		let output = lock.acquire(JobId::new()).unwrap().transcribe_unit(&[1.0], &options).unwrap();
		assert_eq!(output.text, "ok");
	}

	#[test]
	fn test_panic_message_payloads() {
		assert_eq!(panic_message(&"static message"), "static message");
		assert_eq!(panic_message(&"owned message".to_string()), "owned message");
		assert_eq!(panic_message(&42_u32), "non-string panic payload");
	}
}
