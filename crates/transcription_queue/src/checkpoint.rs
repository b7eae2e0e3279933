use crate::error::PersistenceError;
use crate::job::{JobId, JobRecord, JobStatus};
use crate::sync::lock;
use crate::transcript::UnitOutput;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Durable job state and completed unit outputs.
///
/// Called once per unit from the scheduler loop and on submission from caller threads.
/// Every write replaces what was stored for the same key, so repeating a call is harmless.
pub trait CheckpointStore: Send + Sync + 'static {
	/// # Errors
	/// `PersistenceError` on storage failure
	fn save_job(&self, record: &JobRecord) -> Result<(), PersistenceError>;

	/// # Errors
	/// `PersistenceError` on storage failure
	fn load_job(&self, job_id: JobId) -> Result<Option<JobRecord>, PersistenceError>;

	/// Forget a job and its units. Removing an unknown job is not an error.
	///
	/// # Errors
	/// `PersistenceError` on storage failure
	fn remove_job(&self, job_id: JobId) -> Result<(), PersistenceError>;

	/// # Errors
	/// `PersistenceError::UnknownJob` if the job was never saved
	fn save_unit(&self, job_id: JobId, unit_index: usize, output: &UnitOutput) -> Result<(), PersistenceError>;

	/// Completed units in index order, stopping at the first gap
	///
	/// # Errors
	/// `PersistenceError` on storage failure
	fn load_units(&self, job_id: JobId) -> Result<Vec<UnitOutput>, PersistenceError>;

	/// # Errors
	/// `PersistenceError::UnknownJob` if the job was never saved
	fn update_status(&self, job_id: JobId, status: JobStatus, unit_index: usize) -> Result<(), PersistenceError>;

	/// Drop unit outputs once they are no longer needed for resumption
	///
	/// # Errors
	/// `PersistenceError` on storage failure
	fn discard_units(&self, job_id: JobId) -> Result<(), PersistenceError>;

	/// Non-terminal records, oldest first
	///
	/// # Errors
	/// `PersistenceError` on storage failure
	fn pending_jobs(&self) -> Result<Vec<JobRecord>, PersistenceError>;
}

fn set_status(record: &mut JobRecord, status: JobStatus, unit_index: usize) {
	record.status = status;
	record.current_unit_index = unit_index;
	record.completed_units = unit_index;
	record.updated_at = Utc::now();
}

fn sort_pending(mut records: Vec<JobRecord>) -> Vec<JobRecord> {
	records.retain(|record| !record.status.is_terminal());
	records.sort_by_key(|record| record.created_at);
	records
}

#[derive(Debug)]
struct StoredJob {
	record: JobRecord,
	units: BTreeMap<usize, UnitOutput>,
}

impl StoredJob {
	fn contiguous_units(&self) -> Vec<UnitOutput> {
		self.units.iter().enumerate().take_while(|(expected, (index, _))| expected == *index).map(|(_, (_, unit))| unit.clone()).collect()
	}
}

#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
	jobs: Mutex<HashMap<JobId, StoredJob>>,
}

impl MemoryCheckpointStore {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}
}

impl CheckpointStore for MemoryCheckpointStore {
	fn save_job(&self, record: &JobRecord) -> Result<(), PersistenceError> {
		lock(&self.jobs)
			.entry(record.id)
			.and_modify(|stored| stored.record = record.clone())
			.or_insert_with(|| StoredJob {
				record: record.clone(),
				units: BTreeMap::new(),
			});
		Ok(())
	}

	fn load_job(&self, job_id: JobId) -> Result<Option<JobRecord>, PersistenceError> {
		Ok(lock(&self.jobs).get(&job_id).map(|stored| stored.record.clone()))
	}

	fn remove_job(&self, job_id: JobId) -> Result<(), PersistenceError> {
		lock(&self.jobs).remove(&job_id);
		Ok(())
	}

	fn save_unit(&self, job_id: JobId, unit_index: usize, output: &UnitOutput) -> Result<(), PersistenceError> {
		let mut jobs = lock(&self.jobs);
		let stored = jobs.get_mut(&job_id).ok_or(PersistenceError::UnknownJob(job_id))?;
		stored.units.insert(unit_index, output.clone());
		Ok(())
	}

	fn load_units(&self, job_id: JobId) -> Result<Vec<UnitOutput>, PersistenceError> {
		Ok(lock(&self.jobs).get(&job_id).map(StoredJob::contiguous_units).unwrap_or_default())
	}

	fn update_status(&self, job_id: JobId, status: JobStatus, unit_index: usize) -> Result<(), PersistenceError> {
		let mut jobs = lock(&self.jobs);
		let stored = jobs.get_mut(&job_id).ok_or(PersistenceError::UnknownJob(job_id))?;
		set_status(&mut stored.record, status, unit_index);
		Ok(())
	}

	fn discard_units(&self, job_id: JobId) -> Result<(), PersistenceError> {
		if let Some(stored) = lock(&self.jobs).get_mut(&job_id) {
			stored.units.clear();
		}
		Ok(())
	}

	fn pending_jobs(&self) -> Result<Vec<JobRecord>, PersistenceError> {
		let records = lock(&self.jobs).values().map(|stored| stored.record.clone()).collect();
		Ok(sort_pending(records))
	}
}

/// File layout under the store directory:
///
/// ```text
/// <job id>.json              job record
/// <job id>.units/<n>.json    output of unit n, one file per unit
/// ```
///
/// Every file is replaced atomically. Saving a unit writes only that unit's file.
#[derive(Debug)]
pub struct JsonFileCheckpointStore {
	dir: PathBuf,
	write_lock: Mutex<()>,
}

impl JsonFileCheckpointStore {
	/// # Errors
	/// `PersistenceError::Io` if the directory cannot be created
	pub fn open(dir: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
		let dir = dir.into();
		fs::create_dir_all(&dir)?;
		info!(dir = %dir.display(), "📁 Checkpoint store opened");
		Ok(Self { dir, write_lock: Mutex::new(()) })
	}

	fn record_path(&self, job_id: JobId) -> PathBuf {
		self.dir.join(format!("{job_id}.json"))
	}

	fn units_dir(&self, job_id: JobId) -> PathBuf {
		self.dir.join(format!("{job_id}.units"))
	}

	fn unit_path(&self, job_id: JobId, unit_index: usize) -> PathBuf {
		self.units_dir(job_id).join(format!("{unit_index}.json"))
	}

	fn read<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistenceError> {
		match fs::read(path) {
			Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
			Err(e) => Err(e.into()),
		}
	}

	fn write<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistenceError> {
		let tmp = path.with_extension("json.tmp");
		fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
		fs::rename(&tmp, path)?;
		Ok(())
	}

	fn remove_dir(path: &Path) -> Result<(), PersistenceError> {
		match fs::remove_dir_all(path) {
			Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
			_ => Ok(()),
		}
	}
}

impl CheckpointStore for JsonFileCheckpointStore {
	fn save_job(&self, record: &JobRecord) -> Result<(), PersistenceError> {
		let _guard = lock(&self.write_lock);
		Self::write(&self.record_path(record.id), record)?;
		debug!(job_id = %record.id, status = %record.status, "💾 Job record written");
		Ok(())
	}

	fn load_job(&self, job_id: JobId) -> Result<Option<JobRecord>, PersistenceError> {
		Self::read(&self.record_path(job_id))
	}

	fn remove_job(&self, job_id: JobId) -> Result<(), PersistenceError> {
		let _guard = lock(&self.write_lock);
		match fs::remove_file(self.record_path(job_id)) {
			Err(e) if e.kind() != ErrorKind::NotFound => return Err(e.into()),
			_ => {}
		}
		Self::remove_dir(&self.units_dir(job_id))
	}

	fn save_unit(&self, job_id: JobId, unit_index: usize, output: &UnitOutput) -> Result<(), PersistenceError> {
		if !self.record_path(job_id).is_file() {
			return Err(PersistenceError::UnknownJob(job_id));
		}
		fs::create_dir_all(self.units_dir(job_id))?;
		Self::write(&self.unit_path(job_id, unit_index), output)?;
		debug!(job_id = %job_id, unit_index, "💾 Unit checkpoint written");
		Ok(())
	}

	fn load_units(&self, job_id: JobId) -> Result<Vec<UnitOutput>, PersistenceError> {
		let mut units = Vec::new();
		while let Some(unit) = Self::read(&self.unit_path(job_id, units.len()))? {
			units.push(unit);
		}
		Ok(units)
	}

	fn update_status(&self, job_id: JobId, status: JobStatus, unit_index: usize) -> Result<(), PersistenceError> {
		let _guard = lock(&self.write_lock);
		let path = self.record_path(job_id);
		let mut record: JobRecord = Self::read(&path)?.ok_or(PersistenceError::UnknownJob(job_id))?;
		set_status(&mut record, status, unit_index);
		Self::write(&path, &record)
	}

	fn discard_units(&self, job_id: JobId) -> Result<(), PersistenceError> {
		Self::remove_dir(&self.units_dir(job_id))
	}

	/// Unreadable records are logged and skipped so one bad file cannot block a restore
	fn pending_jobs(&self) -> Result<Vec<JobRecord>, PersistenceError> {
		let mut records = Vec::new();
		for entry in fs::read_dir(&self.dir)? {
			let path = entry?.path();
			if !path.is_file() || path.extension().and_then(|ext| ext.to_str()) != Some("json") {
				continue;
			}
			match Self::read::<JobRecord>(&path) {
				Ok(Some(record)) => records.push(record),
				Ok(None) => {}
				Err(e) => warn!(path = %path.display(), error = %e, "⚠️ Skipping unreadable job record"),
			}
		}
		Ok(sort_pending(records))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::job::{AudioSource, Job, Priority, TranscriptionOptions};
	use std::sync::Arc;
	use tempfile::tempdir;

	fn record(path: &str, priority: Priority) -> JobRecord {
		Job::new(AudioSource::file(path), TranscriptionOptions::default(), priority).to_record()
	}

	fn unit(index: usize) -> UnitOutput {
		UnitOutput {
			index,
			start_secs: index as f64 * 30.0,
			end_secs: (index + 1) as f64 * 30.0,
			text: format!("unit {index}"),
			segments: Vec::new(),
		}
	}

	fn stores() -> (tempfile::TempDir, Vec<Arc<dyn CheckpointStore>>) {
		let dir = tempdir().unwrap();
		let file_store = JsonFileCheckpointStore::open(dir.path().join("checkpoints")).unwrap();
		(dir, vec![Arc::new(MemoryCheckpointStore::new()), Arc::new(file_store)])
	}

	#[test]
	fn test_units_round_trip_in_order() {
		let (_dir, stores) = stores();
		for store in stores {
			let record = record("/data/a.wav", Priority::Normal);
			store.save_job(&record).unwrap();

			store.save_unit(record.id, 1, &unit(1)).unwrap();
			store.save_unit(record.id, 0, &unit(0)).unwrap();
			// Idempotent rewrite of the same unit
			store.save_unit(record.id, 1, &unit(1)).unwrap();

			assert_eq!(store.load_units(record.id).unwrap(), vec![unit(0), unit(1)]);
		}
	}

	#[test]
	fn test_load_units_stops_at_gap() {
		let (_dir, stores) = stores();
		for store in stores {
			let record = record("/data/b.wav", Priority::Low);
			store.save_job(&record).unwrap();
			store.save_unit(record.id, 0, &unit(0)).unwrap();
			store.save_unit(record.id, 2, &unit(2)).unwrap();

			assert_eq!(store.load_units(record.id).unwrap(), vec![unit(0)]);
			assert!(store.load_units(JobId::new()).unwrap().is_empty());
		}
	}

	#[test]
	fn test_unknown_job_writes_fail() {
		let (_dir, stores) = stores();
		for store in stores {
			let job_id = JobId::new();
			assert!(matches!(store.save_unit(job_id, 0, &unit(0)), Err(PersistenceError::UnknownJob(id)) if id == job_id));
			assert!(matches!(store.update_status(job_id, JobStatus::Paused, 1), Err(PersistenceError::UnknownJob(_))));
			assert!(store.discard_units(job_id).is_ok());
		}
	}

	#[test]
	fn test_status_updates_and_pending_filter() {
		let (_dir, stores) = stores();
		for store in stores {
			let mut paused = record("/data/c.wav", Priority::Normal);
			paused.created_at = Utc::now() - chrono::Duration::seconds(10);
			let done = record("/data/d.wav", Priority::Low);
			let pending = record("/data/e.wav", Priority::Low);
			for record in [&paused, &done, &pending] {
				store.save_job(record).unwrap();
			}

			store.update_status(paused.id, JobStatus::Paused, 3).unwrap();
			store.update_status(done.id, JobStatus::Completed, 4).unwrap();

			let loaded = store.load_job(paused.id).unwrap().unwrap();
			assert_eq!(loaded.status, JobStatus::Paused);
			assert_eq!(loaded.current_unit_index, 3);

			let ids: Vec<_> = store.pending_jobs().unwrap().into_iter().map(|record| record.id).collect();
			assert_eq!(ids, vec![paused.id, pending.id]);
		}
	}

	#[test]
	fn test_resaving_record_keeps_units() {
		let (_dir, stores) = stores();
		for store in stores {
			let mut record = record("/data/f.wav", Priority::Normal);
			store.save_job(&record).unwrap();
			store.save_unit(record.id, 0, &unit(0)).unwrap();

			record.status = JobStatus::Failed;
			record.error_message = Some("engine crashed".to_string());
			store.save_job(&record).unwrap();

			assert_eq!(store.load_units(record.id).unwrap().len(), 1);
			assert_eq!(store.load_job(record.id).unwrap().unwrap().error_message.as_deref(), Some("engine crashed"));

			store.discard_units(record.id).unwrap();
			assert!(store.load_units(record.id).unwrap().is_empty());
		}
	}

	#[test]
	fn test_remove_job_forgets_record_and_units() {
		let (_dir, stores) = stores();
		for store in stores {
			let record = record("/data/h.wav", Priority::Normal);
			store.save_job(&record).unwrap();
			store.save_unit(record.id, 0, &unit(0)).unwrap();

			store.remove_job(record.id).unwrap();
			assert!(store.load_job(record.id).unwrap().is_none());
			assert!(store.load_units(record.id).unwrap().is_empty());
			assert!(store.pending_jobs().unwrap().is_empty());
			assert!(store.remove_job(record.id).is_ok());
		}
	}

	#[test]
	fn test_file_store_writes_one_file_per_unit() {
		let dir = tempdir().unwrap();
		let store = JsonFileCheckpointStore::open(dir.path()).unwrap();
		let record = record("/data/i.wav", Priority::Low);
		store.save_job(&record).unwrap();
		for index in 0..3 {
			store.save_unit(record.id, index, &unit(index)).unwrap();
		}

		let units_dir = dir.path().join(format!("{}.units", record.id));
		assert_eq!(fs::read_dir(&units_dir).unwrap().count(), 3);
		let record_json = fs::read_to_string(dir.path().join(format!("{}.json", record.id))).unwrap();
		assert!(!record_json.contains("unit 0"));

		store.discard_units(record.id).unwrap();
		assert!(!units_dir.exists());
		assert!(store.load_job(record.id).unwrap().is_some());
	}

	#[test]
	fn test_corrupt_record_does_not_block_pending_scan() {
		let dir = tempdir().unwrap();
		let store = JsonFileCheckpointStore::open(dir.path()).unwrap();
		let good = record("/data/j.wav", Priority::Normal);
		store.save_job(&good).unwrap();
		fs::write(dir.path().join(format!("{}.json", JobId::new())), b"{ truncated").unwrap();

		let pending = store.pending_jobs().unwrap();
		assert_eq!(pending.len(), 1);
		assert_eq!(pending[0].id, good.id);
	}

	#[test]
	fn test_file_store_survives_reopen() {
		let dir = tempdir().unwrap();
		let record = record("/data/g.wav", Priority::Low);
		{
			let store = JsonFileCheckpointStore::open(dir.path()).unwrap();
			store.save_job(&record).unwrap();
			store.save_unit(record.id, 0, &unit(0)).unwrap();
			store.update_status(record.id, JobStatus::Paused, 1).unwrap();
		}

		let store = JsonFileCheckpointStore::open(dir.path()).unwrap();
		let pending = store.pending_jobs().unwrap();
		assert_eq!(pending.len(), 1);
		assert_eq!(pending[0].id, record.id);
		assert_eq!(pending[0].current_unit_index, 1);
		assert_eq!(store.load_units(record.id).unwrap(), vec![unit(0)]);
		assert!(!dir.path().join(format!("{}.json.tmp", record.id)).exists());
	}
}
