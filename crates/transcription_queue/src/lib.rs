//! Priority-preemptive scheduling of transcription jobs onto a single, non-reentrant
//! speech-to-text engine.
//!
//! Interactive (push-to-talk) jobs run ahead of bulk file work. Bulk jobs are split into
//! fixed-duration units; between units the scheduler loop checks a pause signal and, when
//! an interactive job is waiting, checkpoints the bulk job, re-queues it and moves on. The
//! engine lock is never held while waiting.

pub mod audio;
pub mod checkpoint;
pub mod chunking;
pub mod config;
pub mod error;
pub mod events;
pub mod job;
pub mod metrics;
pub mod observability;
pub mod pause;
pub mod priority_queue;
pub mod queue;
pub mod resource;
pub mod scheduler;
pub mod transcript;

mod sync;

pub use audio::{AudioLoader, WavLoader};
pub use checkpoint::{CheckpointStore, JsonFileCheckpointStore, MemoryCheckpointStore};
pub use config::{Config, RequeuePolicy};
pub use error::{PersistenceError, ResourceError, SchedulerError, ValidationError};
pub use events::JobEvent;
pub use job::{AudioSource, JobId, JobRecord, JobSnapshot, JobStatus, Priority, TranscriptionOptions};
pub use resource::TranscriptionEngine;
pub use scheduler::{RunOutcome, Scheduler, SchedulerBuilder};
pub use transcript::{EngineOutput, Transcript, TranscriptSegment};
