use std::{
	panic::AssertUnwindSafe,
	sync::Arc,
	time::{Duration, Instant},
};

use async_trait::async_trait;
use futures::FutureExt;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use super::{
	backend::RecognitionBackend, decode::OcrImage, error::EngineError, script::Script,
};

/// Text extracted from one image.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
	pub text: String,
	/// Mean confidence in `[0, 1]`.
	pub confidence: f32,
	pub block_count: u32,
	pub processing_time: Duration,
	/// Script of the engine that produced this text.
	pub script: Script,
}

impl Extraction {
	#[must_use]
	pub fn char_count(&self) -> usize {
		self.text.chars().count()
	}

	#[must_use]
	pub fn is_blank(&self) -> bool {
		self.text.trim().is_empty()
	}
}

#[async_trait]
pub trait RecognitionEngine: Send + Sync + 'static {
	/// The script this engine recognizes first.
	fn script(&self) -> Script;

	/// Never panics and never runs unbounded, any failure comes back as an [`EngineError`].
	async fn extract(&self, image: &OcrImage) -> Result<Extraction, EngineError>;
}

/// Wraps a single backend configured for one script, enforcing a hard time budget.
pub struct SingleScriptEngine {
	script: Script,
	backend: Arc<dyn RecognitionBackend>,
	time_budget: Duration,
}

impl SingleScriptEngine {
	#[must_use]
	pub fn new(script: Script, backend: Arc<dyn RecognitionBackend>, time_budget: Duration) -> Self {
		Self {
			script,
			backend,
			time_budget,
		}
	}
}

#[async_trait]
impl RecognitionEngine for SingleScriptEngine {
	fn script(&self) -> Script {
		self.script
	}

	#[instrument(
		skip_all,
		fields(script = %self.script, backend = self.backend.name(), budget = ?self.time_budget),
	)]
	async fn extract(&self, image: &OcrImage) -> Result<Extraction, EngineError> {
		let start = Instant::now();
		let name = self.backend.name();

		let output = match timeout(
			self.time_budget,
			AssertUnwindSafe(self.backend.recognize(image)).catch_unwind(),
		)
		.await
		{
			Ok(Ok(Ok(output))) => output,
			Ok(Ok(Err(source))) => {
				warn!(?source, "Recognition backend failed");
				return Err(EngineError::Backend { name, source });
			}
			Ok(Err(_)) => {
				warn!("Recognition backend panicked");
				return Err(EngineError::BackendPanic(name));
			}
			Err(_) => {
				warn!("Recognition timed out");
				return Err(EngineError::Timeout(self.time_budget));
			}
		};

		let extraction = Extraction {
			text: output.text,
			confidence: if output.confidence.is_nan() {
				0.0
			} else {
				output.confidence.clamp(0.0, 1.0)
			},
			block_count: output.block_count,
			processing_time: start.elapsed(),
			script: self.script,
		};

		debug!(
			chars = extraction.char_count(),
			blocks = extraction.block_count,
			elapsed = ?extraction.processing_time,
			"Recognition completed",
		);

		Ok(extraction)
	}
}
