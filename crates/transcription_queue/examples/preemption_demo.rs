use clap::Parser;
use std::error::Error;
use std::thread;
use std::time::Duration;
use transcription_queue::observability::{init_tracing, DEFAULT_DIRECTIVES};
use transcription_queue::{AudioSource, Config, EngineOutput, JobEvent, Priority, ResourceError, Scheduler, TranscriptionOptions};

/// Stand-in for a real model: takes 200ms per call and reports what it was given
fn synthetic_engine(audio: &[f32], options: &TranscriptionOptions) -> Result<EngineOutput, ResourceError> {
	thread::sleep(Duration::from_millis(200));
	let language = options.language.as_deref().unwrap_or("auto");
	Ok(EngineOutput::new(format!("[{} samples, {language}]", audio.len())))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
	init_tracing(DEFAULT_DIRECTIVES);

	let config = Config::parse();
	let sample_rate = usize::try_from(config.sample_rate)?;
	let unit_secs = usize::try_from(config.unit_duration_secs)?;
	let scheduler = Scheduler::start(config, synthetic_engine)?;
	let mut events = scheduler.subscribe();

	// Five units of silence as a bulk job
	let bulk = scheduler.submit_bulk(
		AudioSource::buffer(vec![0.0_f32; sample_rate * unit_secs * 5]),
		TranscriptionOptions::default().with_language("en"),
		Priority::Normal,
	)?;
	println!("Submitted bulk job {bulk}");

	let interactive_handle = {
		let scheduler = scheduler.clone();
		tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(300)).await;
			scheduler.submit_interactive(vec![0.0_f32; sample_rate], TranscriptionOptions::default())
		})
	};
	let interactive = interactive_handle.await??;
	println!("Submitted interactive job {interactive}");

	let mut finished = 0;
	while finished < 2 {
		let event = events.recv().await?;
		println!("{}", serde_json::to_string(&event)?);
		if matches!(event, JobEvent::Completed { .. } | JobEvent::Failed { .. } | JobEvent::Cancelled { .. }) {
			finished += 1;
		}
	}

	scheduler.shutdown()?;
	Ok(())
}
