use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const DEFAULT_DIRECTIVES: &str = "info,transcription_queue=debug";

/// Install the fmt subscriber, filtered by `RUST_LOG` or `default_directives`.
///
/// Returns false when a global subscriber is already set (tests, embedding applications).
pub fn init_tracing(default_directives: &str) -> bool {
	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

	let installed = tracing_subscriber::registry()
		.with(env_filter)
		.with(tracing_subscriber::fmt::layer().with_target(true))
		.try_init()
		.is_ok();

	if installed {
		info!("✅ Tracing initialized");
	}
	installed
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_second_init_is_a_noop() {
		init_tracing(DEFAULT_DIRECTIVES);
		assert!(!init_tracing(DEFAULT_DIRECTIVES));
	}
}
