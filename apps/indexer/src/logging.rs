use std::{path::Path, sync::Once};

use anyhow::{anyhow, Result};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const CRATES: [&str; 4] = [
	"sd_indexer",
	"sd_core_text_indexer",
	"sd_ocr",
	"sd_task_system",
];

/// Logs to stdout and to a daily rotated file under `logs_dir`. Only the first call does anything.
pub fn init(logs_dir: &Path, level: &str) -> Result<()> {
	static INIT: Once = Once::new();
	let mut result = Ok(());

	INIT.call_once(|| {
		if let Err(e) = std::fs::create_dir_all(logs_dir) {
			result = Err(anyhow!("Failed to create logs directory: {e}"));
			return;
		}

		let default_filter = CRATES
			.iter()
			.map(|krate| format!("{krate}={level}"))
			.collect::<Vec<_>>()
			.join(",");

		let file_appender = RollingFileAppender::new(Rotation::DAILY, logs_dir, "indexer.log");

		if let Err(e) = tracing_subscriber::registry()
			.with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
			.with(
				fmt::layer()
					.with_target(true)
					.with_thread_ids(true)
					.with_writer(std::io::stdout),
			)
			.with(
				fmt::layer()
					.with_target(true)
					.with_thread_ids(true)
					.with_ansi(false)
					.with_writer(file_appender),
			)
			.try_init()
		{
			result = Err(anyhow!("Failed to initialize tracing: {e}"));
		}
	});

	result
}
