use async_trait::async_trait;

use super::{decode::OcrImage, error::BackendError};

/// Raw result of a recognition backend, before the engine layer adds timings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendOutput {
	pub text: String,
	/// Mean confidence in `[0, 1]`.
	pub confidence: f32,
	pub block_count: u32,
}

/// A black box image to text recognizer.
///
/// Backends are only reached through a [`RecognitionEngine`](crate::RecognitionEngine), which bounds
/// them with a timeout and turns their failures and panics into values.
#[async_trait]
pub trait RecognitionBackend: Send + Sync + 'static {
	fn name(&self) -> &'static str;

	async fn recognize(&self, image: &OcrImage) -> Result<BackendOutput, BackendError>;
}
