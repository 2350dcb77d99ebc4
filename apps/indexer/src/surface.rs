use sd_core_text_indexer::{EngineTag, KeepAliveFacility, NotificationSurface, ProgressView};

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

/// Progress indicators drawn as log lines, for headless runs.
#[derive(Debug, Default)]
pub struct LogSurface;

#[async_trait]
impl NotificationSurface for LogSurface {
	async fn show(&self, view: &ProgressView) {
		let eta = view
			.estimated_time_remaining
			.map_or_else(|| "unknown".to_string(), |eta| format!("{}s", eta.as_secs()));

		info!(
			engine = %view.engine,
			state = %view.display,
			processed = view.processed_items,
			total = view.total_items,
			failed = view.failed_items,
			background = view.dismissed,
			%eta,
			"Text indexing {:.1}%",
			view.percentage,
		);
	}

	async fn hide(&self, engine: &EngineTag) {
		debug!(%engine, "Progress indicator hidden");
	}
}

/// A plain process has nothing to assert, it stays alive until it is told to quit.
#[derive(Debug, Default)]
pub struct ProcessKeepAlive;

#[async_trait]
impl KeepAliveFacility for ProcessKeepAlive {
	async fn acquire(&self, duration: Duration) {
		debug!(?duration, "Keep-alive acquired");
	}

	async fn release(&self) {
		debug!("Keep-alive released");
	}
}
