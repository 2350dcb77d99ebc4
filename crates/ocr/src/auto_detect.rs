use std::{sync::Arc, time::Instant};

use async_trait::async_trait;
use tracing::{debug, instrument, trace};

use super::{
	decode::OcrImage,
	engine::{Extraction, RecognitionEngine},
	error::EngineError,
	script::{self, Script},
};

/// Runs the default engine first and sniffs its text for other scripts.
///
/// When a script with a dedicated engine shows up, recognition is re-run with that engine and the
/// longer of both texts wins. When the default engine finds nothing at all, the first dedicated
/// engine gets one try.
pub struct AutoDetectEngine {
	default: Arc<dyn RecognitionEngine>,
	dedicated: Vec<Arc<dyn RecognitionEngine>>,
}

impl AutoDetectEngine {
	/// `dedicated` order is the fallback order, engines for the default's own script are ignored.
	#[must_use]
	pub fn new(
		default: Arc<dyn RecognitionEngine>,
		dedicated: impl IntoIterator<Item = Arc<dyn RecognitionEngine>>,
	) -> Self {
		let default_script = default.script();

		Self {
			dedicated: dedicated
				.into_iter()
				.filter(|engine| engine.script() != default_script)
				.collect(),
			default,
		}
	}

	fn dedicated_for(&self, script: Script) -> Option<&Arc<dyn RecognitionEngine>> {
		self.dedicated
			.iter()
			.find(|engine| engine.script() == script)
	}

	async fn switch_if_other_script(&self, image: &OcrImage, primary: Extraction) -> Extraction {
		let Some(detected) = script::detect(
			&primary.text,
			self.dedicated.iter().map(|engine| engine.script()),
		) else {
			trace!("No other script detected, keeping default result");
			return primary;
		};

		let Some(engine) = self.dedicated_for(detected) else {
			return primary;
		};

		debug!(%detected, "Detected another script, switching engine");

		match engine.extract(image).await {
			Ok(dedicated) if dedicated.char_count() > primary.char_count() => dedicated,
			Ok(_) => {
				trace!("Dedicated engine result is not longer, keeping default result");
				primary
			}
			Err(e) => {
				debug!(?e, "Dedicated engine failed, keeping default result");
				primary
			}
		}
	}
}

#[async_trait]
impl RecognitionEngine for AutoDetectEngine {
	fn script(&self) -> Script {
		self.default.script()
	}

	#[instrument(skip_all, fields(default = %self.default.script()))]
	async fn extract(&self, image: &OcrImage) -> Result<Extraction, EngineError> {
		let start = Instant::now();

		let res = match self.default.extract(image).await {
			Ok(primary) if !primary.is_blank() => {
				Ok(self.switch_if_other_script(image, primary).await)
			}
			primary => match self.dedicated.first() {
				Some(fallback) => {
					debug!(fallback = %fallback.script(), "Default engine found nothing, trying fallback");
					match fallback.extract(image).await {
						Ok(extraction) => Ok(extraction),
						Err(e) => {
							debug!(?e, "Fallback engine failed too");
							primary
						}
					}
				}
				None => primary,
			},
		};

		res.map(|extraction| Extraction {
			processing_time: start.elapsed(),
			..extraction
		})
	}
}
